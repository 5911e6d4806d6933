//! Persistent storage: idempotent upserts of raw items and enriched
//! alerts, geocode caching, and schema migrations.

pub mod database;
pub mod migrations;
pub mod records;
pub mod schema;

pub use database::{Database, DatabaseError, SaveReport};
pub use migrations::{MigrationError, MigrationRunner};
pub use records::{EnrichedAlert, RawItem, RejectCause};
