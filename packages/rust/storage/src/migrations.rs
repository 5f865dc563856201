//! SQL migration definitions for the intake database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed as one batch.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: routines, routine_steps",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Store-resident named routines
CREATE TABLE IF NOT EXISTS routines (
    name        TEXT PRIMARY KEY,
    description TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

-- Ordered steps of each routine, run in one transaction per call
CREATE TABLE IF NOT EXISTS routine_steps (
    routine_name TEXT NOT NULL REFERENCES routines(name) ON DELETE CASCADE,
    step         INTEGER NOT NULL,
    kind         TEXT NOT NULL CHECK (kind IN ('exec', 'query')),
    sql          TEXT NOT NULL,
    PRIMARY KEY (routine_name, step)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Staging and canonical tables for products and datasheets",
            sql: r#"
-- Products: high-write staging area
CREATE TABLE IF NOT EXISTS product_staging (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    record_key   TEXT NOT NULL,
    payload      TEXT NOT NULL,
    payload_hash TEXT NOT NULL,
    staged_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_product_staging_key ON product_staging(record_key);

-- Products: canonical store
CREATE TABLE IF NOT EXISTS products (
    record_key   TEXT PRIMARY KEY,
    payload      TEXT NOT NULL,
    payload_hash TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

-- Datasheets: high-write staging area
CREATE TABLE IF NOT EXISTS datasheet_staging (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    record_key   TEXT NOT NULL,
    payload      TEXT NOT NULL,
    payload_hash TEXT NOT NULL,
    staged_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_datasheet_staging_key ON datasheet_staging(record_key);

-- Datasheets: canonical store
CREATE TABLE IF NOT EXISTS datasheets (
    record_key   TEXT PRIMARY KEY,
    payload      TEXT NOT NULL,
    payload_hash TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
