//! Enrichment: structured threat assessment of filtered, located entries.

pub mod assessment;
pub mod enricher;

pub use assessment::{ThreatAssessment, ThreatLabel};
pub use enricher::{EnrichError, Enricher, EnricherConfig, Enrichment};
