//! Database schema statements.
//!
//! All statements are idempotent (`IF NOT EXISTS`) and applied in order by
//! the migration runner. The two unique indexes carry the pipeline's
//! idempotency invariants: `raw_items.content_hash` makes duplicate inserts
//! a no-op, `alerts.uuid` (primary key) makes enriched writes an upsert.

/// Named schema statements in application order.
pub fn all_statements() -> &'static [(&'static str, &'static str)] {
    STATEMENTS
}

static STATEMENTS: &[(&str, &str)] = &[
    (
        "create_raw_items",
        r#"
        CREATE TABLE IF NOT EXISTS raw_items (
            uuid TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            link TEXT NOT NULL,
            summary TEXT NOT NULL DEFAULT '',
            published TIMESTAMPTZ NOT NULL,
            source_url TEXT NOT NULL,
            source_tag TEXT NOT NULL,
            language TEXT NOT NULL DEFAULT 'en',
            country TEXT,
            city TEXT,
            region TEXT,
            latitude DOUBLE PRECISION,
            longitude DOUBLE PRECISION,
            location_method TEXT NOT NULL DEFAULT 'unknown',
            location_confidence TEXT NOT NULL DEFAULT 'none',
            tags TEXT[] NOT NULL DEFAULT '{}',
            kw_match JSONB,
            content_hash TEXT NOT NULL,
            ingested_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "idx_raw_items_content_hash",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_raw_items_content_hash ON raw_items (content_hash)",
    ),
    (
        "idx_raw_items_published",
        "CREATE INDEX IF NOT EXISTS idx_raw_items_published ON raw_items (published)",
    ),
    (
        "create_alerts",
        r#"
        CREATE TABLE IF NOT EXISTS alerts (
            uuid TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            link TEXT NOT NULL,
            summary TEXT NOT NULL DEFAULT '',
            published TIMESTAMPTZ NOT NULL,
            source_url TEXT NOT NULL,
            source_tag TEXT NOT NULL,
            language TEXT NOT NULL DEFAULT 'en',
            country TEXT,
            city TEXT,
            region TEXT,
            latitude DOUBLE PRECISION,
            longitude DOUBLE PRECISION,
            location_method TEXT NOT NULL DEFAULT 'unknown',
            location_confidence TEXT NOT NULL DEFAULT 'none',
            tags TEXT[] NOT NULL DEFAULT '{}',
            kw_match JSONB,
            content_hash TEXT NOT NULL,
            category TEXT NOT NULL,
            subcategory TEXT,
            threat_label TEXT NOT NULL,
            score DOUBLE PRECISION NOT NULL,
            confidence DOUBLE PRECISION NOT NULL,
            reasoning TEXT NOT NULL DEFAULT '',
            threat_score_components JSONB,
            sentiment DOUBLE PRECISION,
            forecast TEXT,
            cyber_score DOUBLE PRECISION,
            physical_score DOUBLE PRECISION,
            embedding REAL[],
            model_used TEXT NOT NULL DEFAULT '',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "idx_alerts_threat_label",
        "CREATE INDEX IF NOT EXISTS idx_alerts_threat_label ON alerts (threat_label)",
    ),
    (
        "idx_alerts_category",
        "CREATE INDEX IF NOT EXISTS idx_alerts_category ON alerts (category)",
    ),
    (
        "idx_alerts_created_at",
        "CREATE INDEX IF NOT EXISTS idx_alerts_created_at ON alerts (created_at)",
    ),
    (
        "idx_alerts_location_method",
        "CREATE INDEX IF NOT EXISTS idx_alerts_location_method ON alerts (location_method)",
    ),
    (
        "create_geocode_cache",
        r#"
        CREATE TABLE IF NOT EXISTS geocode_cache (
            city TEXT NOT NULL,
            country TEXT NOT NULL,
            latitude DOUBLE PRECISION NOT NULL,
            longitude DOUBLE PRECISION NOT NULL,
            cached_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (city, country)
        )
        "#,
    ),
];
