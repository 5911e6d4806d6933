//! Location resolution: deterministic gazetteer extraction, LLM batch
//! resolution, geocode caching, and country centroids.

pub mod batch_resolver;
pub mod cache;
pub mod gazetteer;
pub mod resolver;

pub use batch_resolver::{BatchLocationHandler, PendingLocation};
pub use cache::{LocationCache, MemoryLocationCache};
pub use resolver::{DeferredLocation, LocationResolver, Resolution, ResolverConfig};
