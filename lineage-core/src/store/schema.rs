/// Current schema version.
pub const SCHEMA_VERSION: &str = "1";

/// Full SQL schema for the lineage `SQLite` database.
pub const SCHEMA_SQL: &str = r"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS lineage_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Batch registry
CREATE TABLE IF NOT EXISTS batches (
    id INTEGER PRIMARY KEY,
    batch_number TEXT NOT NULL UNIQUE,
    batch_type TEXT NOT NULL,
    status TEXT NOT NULL,
    product_name TEXT NOT NULL,
    quantity REAL NOT NULL,
    unit TEXT NOT NULL,
    production_date TEXT NOT NULL,
    expiry_date TEXT,
    lot_number TEXT,
    quality_status TEXT NOT NULL DEFAULT 'pending'
);

-- Directed used-in edges; rows are append-only
CREATE TABLE IF NOT EXISTS lineage_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_batch_id INTEGER NOT NULL REFERENCES batches(id),
    target_batch_id INTEGER NOT NULL REFERENCES batches(id),
    link_type TEXT NOT NULL,
    quantity_used REAL NOT NULL,
    process_step TEXT NOT NULL DEFAULT '',
    process_date TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_links_source ON lineage_links(source_batch_id, id);
CREATE INDEX IF NOT EXISTS idx_links_target ON lineage_links(target_batch_id, id);
";
