//! Cache interface for location resolution.
//!
//! Step one of the resolver cascade consults previously-resolved entries
//! (keyed by the deterministic entry uuid), and coordinate attachment
//! consults the `(city, country)` geocode cache. The database-backed
//! implementation lives in `storage`; the in-memory one here backs tests
//! and DB-less runs.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::feeds::types::Location;

/// Read/write access to cached location data.
#[async_trait]
pub trait LocationCache: Send + Sync {
    /// Previously-resolved location for this entry key, if any.
    async fn lookup_entry(&self, uuid: &str) -> Option<Location>;

    /// Cached coordinates for a lowercase `(city, country)` pair.
    async fn lookup_geocode(&self, city: &str, country: &str) -> Option<(f64, f64)>;

    /// Stores coordinates for a `(city, country)` pair.
    async fn store_geocode(&self, city: &str, country: &str, latitude: f64, longitude: f64);
}

/// In-memory cache for tests and database-less operation.
#[derive(Default)]
pub struct MemoryLocationCache {
    entries: RwLock<HashMap<String, Location>>,
    geocodes: RwLock<HashMap<(String, String), (f64, f64)>>,
}

impl MemoryLocationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a resolved entry (test helper and cross-cycle warm start).
    pub async fn put_entry(&self, uuid: impl Into<String>, location: Location) {
        self.entries.write().await.insert(uuid.into(), location);
    }
}

#[async_trait]
impl LocationCache for MemoryLocationCache {
    async fn lookup_entry(&self, uuid: &str) -> Option<Location> {
        self.entries.read().await.get(uuid).cloned()
    }

    async fn lookup_geocode(&self, city: &str, country: &str) -> Option<(f64, f64)> {
        self.geocodes
            .read()
            .await
            .get(&(city.to_lowercase(), country.to_lowercase()))
            .copied()
    }

    async fn store_geocode(&self, city: &str, country: &str, latitude: f64, longitude: f64) {
        self.geocodes.write().await.insert(
            (city.to_lowercase(), country.to_lowercase()),
            (latitude, longitude),
        );
    }
}
