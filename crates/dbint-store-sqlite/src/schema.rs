//! SQL schema for the reference index.
//!
//! Record tables belong to the host application and are never created here,
//! except through [`crate::SqliteStore::create_table`] for fixtures.

/// Index DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per (source record, field, position) reference.
CREATE TABLE IF NOT EXISTS sys_refindex (
    hash        TEXT PRIMARY KEY,   -- hex SHA-256 over all other columns
    tablename   TEXT NOT NULL,
    recuid      INTEGER NOT NULL,
    field       TEXT NOT NULL,
    sorting     INTEGER NOT NULL,
    ref_table   TEXT NOT NULL,      -- '_FILE' for file references
    ref_uid     INTEGER NOT NULL,
    ref_string  TEXT NOT NULL DEFAULT '',
    ref_usage   TEXT NOT NULL       -- 'select' | 'group' | 'file'
);

CREATE INDEX IF NOT EXISTS refindex_source_idx ON sys_refindex(tablename, recuid);
CREATE INDEX IF NOT EXISTS refindex_target_idx ON sys_refindex(ref_table, ref_uid);

PRAGMA user_version = 1;
";
