//! Table layout and migrations.
//!
//! | Table | Key | Columns |
//! |-------|-----|---------|
//! | `containers` | `(owner, ordinal)` | `row_count`, `contents` |
//! | `backups` | `name` | `created_at`, `sequence`, `owners`, `containers` |
//! | `backup_owners` | `(backup, owner)` | |
//! | `backup_containers` | `(backup, owner, ordinal)` | `row_count`, `contents` |
//!
//! Owners are stored in their 32-hex-digit simple form. `contents` is the
//! JSON encoding of the slot map with items as hex strings.

use rusqlite::Connection;
use tracing::debug;

/// Schema version written to `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 1;

const MIGRATION_V1: &str = "
    CREATE TABLE IF NOT EXISTS containers (
        owner      TEXT    NOT NULL,
        ordinal    INTEGER NOT NULL,
        row_count  INTEGER NOT NULL,
        contents   TEXT    NOT NULL,
        PRIMARY KEY (owner, ordinal)
    );

    CREATE TABLE IF NOT EXISTS backups (
        name        TEXT    PRIMARY KEY,
        created_at  TEXT    NOT NULL,
        sequence    INTEGER NOT NULL,
        owners      INTEGER NOT NULL,
        containers  INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS backup_owners (
        backup  TEXT NOT NULL REFERENCES backups(name) ON DELETE CASCADE,
        owner   TEXT NOT NULL,
        PRIMARY KEY (backup, owner)
    );

    CREATE TABLE IF NOT EXISTS backup_containers (
        backup     TEXT    NOT NULL,
        owner      TEXT    NOT NULL,
        ordinal    INTEGER NOT NULL,
        row_count  INTEGER NOT NULL,
        contents   TEXT    NOT NULL,
        PRIMARY KEY (backup, owner, ordinal),
        FOREIGN KEY (backup, owner) REFERENCES backup_owners(backup, owner) ON DELETE CASCADE
    );
";

/// Applies pragmas and any pending migrations.
pub(crate) fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;",
    )?;

    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < 1 {
        conn.execute_batch(MIGRATION_V1)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        debug!(from = version, to = SCHEMA_VERSION, "schema migrated");
    }
    Ok(())
}
