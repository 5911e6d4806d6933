//! PostgreSQL persistence for raw items and enriched alerts.
//!
//! All writes are idempotent: raw items insert with
//! `ON CONFLICT (content_hash) DO NOTHING`, alerts upsert on `uuid`
//! updating every non-key column and advancing `updated_at`. Connections
//! come from a bounded pool; every acquisition is scoped and returned on
//! all exit paths.

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use thiserror::Error;
use tracing::warn;

use super::migrations::MigrationRunner;
use super::records::{EnrichedAlert, RawItem, RejectCause};
use crate::feeds::types::Location;
use crate::location::LocationCache;
use crate::metrics;

/// Rows scanned for the semantic nearest-neighbour check.
const EMBEDDING_SCAN_LIMIT: i64 = 512;

/// Errors that can occur during database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] super::migrations::MigrationError),
}

/// Outcome of a bulk enriched save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// Rows inserted or updated.
    pub saved: u64,
    /// Rows refused by the storage invariants.
    pub rejected: u64,
}

/// PostgreSQL database client.
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connects with the pipeline's pool bounds (min 1, max 10).
    pub async fn connect(database_url: &str) -> Result<Self, DatabaseError> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(10)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies pending schema migrations.
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        MigrationRunner::new(self.pool.clone()).run().await?;
        Ok(())
    }

    /// Bulk-inserts raw items; duplicates are silent no-ops.
    ///
    /// Returns the number of rows actually inserted.
    pub async fn save_raw(&self, items: &[RawItem]) -> Result<u64, DatabaseError> {
        if items.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for item in items {
            let result = sqlx::query(
                r#"
                INSERT INTO raw_items (
                    uuid, title, link, summary, published, source_url, source_tag,
                    language, country, city, region, latitude, longitude,
                    location_method, location_confidence, tags, kw_match,
                    content_hash, ingested_at
                ) VALUES (
                    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19
                )
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(&item.uuid)
            .bind(&item.title)
            .bind(&item.link)
            .bind(&item.summary)
            .bind(item.published)
            .bind(&item.source_url)
            .bind(&item.source_tag)
            .bind(&item.language)
            .bind(&item.country)
            .bind(&item.city)
            .bind(&item.region)
            .bind(item.latitude)
            .bind(item.longitude)
            .bind(&item.location_method)
            .bind(&item.location_confidence)
            .bind(&item.tags)
            .bind(&item.kw_match)
            .bind(&item.content_hash)
            .bind(item.ingested_at)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                inserted += 1;
            } else {
                metrics::inc_storage_rejected(RejectCause::Duplicate.as_str());
            }
        }

        tx.commit().await?;
        metrics::inc_storage_written("raw_items", inserted as usize);
        Ok(inserted)
    }

    /// Bulk-upserts enriched alerts, enforcing the storage invariants.
    ///
    /// Invalid rows (no location, out-of-range numerics) are rejected with
    /// a metric and a warning; the rest of the batch continues.
    pub async fn save_enriched(&self, alerts: &[EnrichedAlert]) -> Result<SaveReport, DatabaseError> {
        if alerts.is_empty() {
            return Ok(SaveReport::default());
        }

        let mut tx = self.pool.begin().await?;
        let mut report = SaveReport::default();

        for alert in alerts {
            if let Some(cause) = alert.validate() {
                metrics::inc_storage_rejected(cause.as_str());
                warn!(
                    target: "storage",
                    uuid = %alert.raw.uuid,
                    cause = cause.as_str(),
                    "Alert rejected at storage"
                );
                report.rejected += 1;
                continue;
            }

            let embedding = (!alert.embedding.is_empty()).then_some(&alert.embedding);
            let components = (!alert.threat_score_components.is_null())
                .then_some(&alert.threat_score_components);

            sqlx::query(
                r#"
                INSERT INTO alerts (
                    uuid, title, link, summary, published, source_url, source_tag,
                    language, country, city, region, latitude, longitude,
                    location_method, location_confidence, tags, kw_match, content_hash,
                    category, subcategory, threat_label, score, confidence, reasoning,
                    threat_score_components, sentiment, forecast, cyber_score,
                    physical_score, embedding, model_used, created_at, updated_at
                ) VALUES (
                    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19, $20,
                    $21, $22, $23, $24, $25, $26, $27, $28, $29, $30,
                    $31, NOW(), NOW()
                )
                ON CONFLICT (uuid) DO UPDATE SET
                    title = EXCLUDED.title,
                    link = EXCLUDED.link,
                    summary = EXCLUDED.summary,
                    published = EXCLUDED.published,
                    source_url = EXCLUDED.source_url,
                    source_tag = EXCLUDED.source_tag,
                    language = EXCLUDED.language,
                    country = EXCLUDED.country,
                    city = EXCLUDED.city,
                    region = EXCLUDED.region,
                    latitude = EXCLUDED.latitude,
                    longitude = EXCLUDED.longitude,
                    location_method = EXCLUDED.location_method,
                    location_confidence = EXCLUDED.location_confidence,
                    tags = EXCLUDED.tags,
                    kw_match = EXCLUDED.kw_match,
                    content_hash = EXCLUDED.content_hash,
                    category = EXCLUDED.category,
                    subcategory = EXCLUDED.subcategory,
                    threat_label = EXCLUDED.threat_label,
                    score = EXCLUDED.score,
                    confidence = EXCLUDED.confidence,
                    reasoning = EXCLUDED.reasoning,
                    threat_score_components = EXCLUDED.threat_score_components,
                    sentiment = EXCLUDED.sentiment,
                    forecast = EXCLUDED.forecast,
                    cyber_score = EXCLUDED.cyber_score,
                    physical_score = EXCLUDED.physical_score,
                    embedding = EXCLUDED.embedding,
                    model_used = EXCLUDED.model_used,
                    updated_at = NOW()
                "#,
            )
            .bind(&alert.raw.uuid)
            .bind(&alert.raw.title)
            .bind(&alert.raw.link)
            .bind(&alert.raw.summary)
            .bind(alert.raw.published)
            .bind(&alert.raw.source_url)
            .bind(&alert.raw.source_tag)
            .bind(&alert.raw.language)
            .bind(&alert.raw.country)
            .bind(&alert.raw.city)
            .bind(&alert.raw.region)
            .bind(alert.raw.latitude)
            .bind(alert.raw.longitude)
            .bind(&alert.raw.location_method)
            .bind(&alert.raw.location_confidence)
            .bind(&alert.raw.tags)
            .bind(&alert.raw.kw_match)
            .bind(&alert.raw.content_hash)
            .bind(&alert.category)
            .bind(&alert.subcategory)
            .bind(&alert.threat_label)
            .bind(alert.score)
            .bind(alert.confidence)
            .bind(&alert.reasoning)
            .bind(components)
            .bind(alert.sentiment)
            .bind(&alert.forecast)
            .bind(alert.cyber_score)
            .bind(alert.physical_score)
            .bind(embedding)
            .bind(&alert.model_used)
            .execute(&mut *tx)
            .await?;

            report.saved += 1;
        }

        tx.commit().await?;
        metrics::inc_storage_written("alerts", report.saved as usize);
        Ok(report)
    }

    /// Recent alert embeddings for the semantic nearest-neighbour scan.
    pub async fn recent_embeddings(&self) -> Result<Vec<(String, Vec<f32>)>, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT uuid, embedding
            FROM alerts
            WHERE embedding IS NOT NULL
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(EMBEDDING_SCAN_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let uuid: String = row.get("uuid");
                let embedding: Vec<f32> = row.get("embedding");
                (uuid, embedding)
            })
            .collect())
    }

}

#[async_trait]
impl LocationCache for Database {
    async fn lookup_entry(&self, uuid: &str) -> Option<Location> {
        let result = sqlx::query(
            r#"
            SELECT country, city, region, latitude, longitude,
                   location_method, location_confidence
            FROM raw_items
            WHERE uuid = $1 AND location_method <> 'unknown'
            "#,
        )
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(Some(row)) => {
                let method: String = row.get("location_method");
                let confidence: String = row.get("location_confidence");
                Some(Location {
                    country: row.get("country"),
                    city: row.get("city"),
                    region: row.get("region"),
                    latitude: row.get("latitude"),
                    longitude: row.get("longitude"),
                    method: crate::feeds::types::LocationMethod::parse(&method)
                        .unwrap_or(crate::feeds::types::LocationMethod::Unknown),
                    confidence: crate::feeds::types::LocationConfidence::parse(&confidence)
                        .unwrap_or(crate::feeds::types::LocationConfidence::None),
                })
            }
            Ok(None) => None,
            Err(e) => {
                warn!(target: "storage", uuid, error = %e, "Entry cache lookup failed");
                None
            }
        }
    }

    async fn lookup_geocode(&self, city: &str, country: &str) -> Option<(f64, f64)> {
        let result = sqlx::query(
            "SELECT latitude, longitude FROM geocode_cache WHERE city = $1 AND country = $2",
        )
        .bind(city.to_lowercase())
        .bind(country.to_lowercase())
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(Some(row)) => Some((row.get("latitude"), row.get("longitude"))),
            Ok(None) => None,
            Err(e) => {
                warn!(target: "storage", city, country, error = %e, "Geocode lookup failed");
                None
            }
        }
    }

    async fn store_geocode(&self, city: &str, country: &str, latitude: f64, longitude: f64) {
        let result = sqlx::query(
            r#"
            INSERT INTO geocode_cache (city, country, latitude, longitude)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (city, country) DO UPDATE SET
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                cached_at = NOW()
            "#,
        )
        .bind(city.to_lowercase())
        .bind(country.to_lowercase())
        .bind(latitude)
        .bind(longitude)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(target: "storage", city, country, error = %e, "Geocode store failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_error_display() {
        let err = DatabaseError::ConnectionFailed("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_save_report_default_is_zero() {
        let report = SaveReport::default();
        assert_eq!(report.saved, 0);
        assert_eq!(report.rejected, 0);
    }
}
