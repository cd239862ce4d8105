//! Database schema migrations for SQLite.
//!
//! Each migration transforms the schema from version N to N+1. Applied
//! versions are recorded in `schema_migrations`.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Schema steps, in order. Entry `i` takes the schema from version `i` to
/// `i + 1`. Append only.
const MIGRATIONS: &[&str] = &[
    // v1: keys and sessions
    r#"
    -- One serialized secret key per device (CBOR, includes renewal history)
    CREATE TABLE secret_keys (
        device_id TEXT PRIMARY KEY,
        key_bytes BLOB NOT NULL,
        issued_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    -- One row per (device, update) installation attempt
    CREATE TABLE update_sessions (
        device_id TEXT NOT NULL,
        uid TEXT NOT NULL,
        state INTEGER NOT NULL,           -- SessionState discriminant
        artifact_path TEXT,
        failure BLOB,                     -- CBOR FailureRecord
        refund_tx TEXT,
        confirm_tx TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,

        PRIMARY KEY (device_id, uid)
    );

    CREATE INDEX idx_sessions_device_updated ON update_sessions(device_id, updated_at);
    "#,
];

/// Current schema version.
pub const CURRENT_VERSION: u32 = MIGRATIONS.len() as u32;

/// Bring the schema up to [`CURRENT_VERSION`]. Idempotent.
///
/// A database written by a newer build is refused rather than downgraded.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        );",
    )?;

    let found = schema_version(conn)?;
    if found > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema v{} is newer than supported v{}",
            found, CURRENT_VERSION
        )));
    }

    let tx = conn.transaction()?;
    for (step, sql) in MIGRATIONS.iter().enumerate().skip(found as usize) {
        let version = step as u32 + 1;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![version, fadeabe_core::now_millis()],
        )?;
        tracing::debug!(version, "applied schema migration");
    }
    tx.commit()?;
    Ok(())
}

/// Highest applied migration, zero for a fresh database.
pub fn schema_version(conn: &Connection) -> Result<u32> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?)
}
