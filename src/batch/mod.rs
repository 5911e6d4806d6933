//! Batching: the size/age-triggered flush queue that drives LLM batch
//! location resolution.

pub mod queue;

pub use queue::{BatchConfig, BatchItem, BatchQueue, FlushHandler};
