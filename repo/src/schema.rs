//! DDL for the tables this crate owns. Segments and their analysis rows
//! belong to the external project subsystem (spec.md §3.2 Non-goals) and
//! are deliberately absent here — this crate only persists what
//! `forge-store` and `forge-common::Settings` need.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id                  TEXT PRIMARY KEY,
    kind                TEXT NOT NULL,
    chapter_id          TEXT NOT NULL,
    status              TEXT NOT NULL,
    total_segments      INTEGER NOT NULL,
    processed_segments  INTEGER NOT NULL,
    failed_segments     INTEGER NOT NULL,
    created_at          TEXT NOT NULL,
    started_at          TEXT,
    completed_at        TEXT,
    engine_variant_id   TEXT,
    model               TEXT,
    work_items          TEXT NOT NULL,
    error               TEXT,
    trigger_source      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_jobs_kind_status ON jobs(kind, status);
CREATE INDEX IF NOT EXISTS idx_jobs_chapter ON jobs(chapter_id);

CREATE TABLE IF NOT EXISTS engines (
    variant_id      TEXT PRIMARY KEY,
    kind            TEXT NOT NULL,
    runner          TEXT NOT NULL,
    target          TEXT NOT NULL,
    default_model   TEXT,
    capabilities    TEXT NOT NULL,
    enabled         INTEGER NOT NULL,
    is_default      INTEGER NOT NULL DEFAULT 0,
    config_hash     TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS engine_models (
    variant_id  TEXT NOT NULL,
    model_name  TEXT NOT NULL,
    is_default  INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (variant_id, model_name)
);

CREATE TABLE IF NOT EXISTS global_settings (
    key     TEXT PRIMARY KEY,
    value   TEXT NOT NULL
);
"#;
