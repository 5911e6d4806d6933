//! Feed ingestion: catalogue, fetch fan-out, and body parsing.

pub mod catalogue;
pub mod fetcher;
pub mod parser;
pub mod types;

pub use catalogue::{FeedCatalogue, FeedSource};
pub use fetcher::{FeedFetcher, FetcherConfig};
pub use types::{Entry, KwMatch, Location, LocationConfidence, LocationMethod, MatchType};
