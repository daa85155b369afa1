//! Database schema definitions.
//!
//! Plans are the only relational state; checkpoints are JSON metadata files
//! plus content-addressed backup blobs.

pub const PLANS_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS plans (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        status TEXT NOT NULL,
        phases TEXT NOT NULL,
        current_phase_index INTEGER NOT NULL DEFAULT 0,
        affected_files TEXT NOT NULL,
        metadata TEXT NOT NULL,
        complexity TEXT NOT NULL,
        created_at TEXT NOT NULL,
        approved_at TEXT,
        completed_at TEXT,
        lock_checksum TEXT
    )
";

pub const PLANS_DB_HAS_LOCK_CHECKSUM: &str =
    "SELECT COUNT(*) FROM pragma_table_info('plans') WHERE name='lock_checksum'";

pub const PLANS_DB_ADD_LOCK_CHECKSUM: &str = "ALTER TABLE plans ADD COLUMN lock_checksum TEXT";

pub const PLANS_DB_INDEX_STATUS: &str =
    "CREATE INDEX IF NOT EXISTS idx_plans_status ON plans(status)";
