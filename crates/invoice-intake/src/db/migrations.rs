//! Versioned schema migrations, recorded in `schema_migrations`.

use rusqlite::{params, Connection};

use super::error::DatabaseError;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "analysis_jobs",
        sql: include_str!("sql/001_create_analysis_jobs.sql"),
    },
    Migration {
        version: 2,
        name: "invoices",
        sql: include_str!("sql/002_create_invoices.sql"),
    },
];

/// Highest version the binary knows about.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Version recorded in the database, 0 for a fresh file.
pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |r| r.get(0),
    )?;
    Ok(version)
}

/// Applies every migration newer than the recorded version. Each one runs
/// in its own transaction together with its bookkeeping row.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current = schema_version(conn)?;
    if current > latest_version() {
        log::warn!(
            "Database schema v{} is newer than this build (v{})",
            current,
            latest_version()
        );
        return Ok(());
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![migration.version, migration.name],
        )?;
        tx.commit()?;
        log::info!("Applied migration v{} ({})", migration.version, migration.name);
    }

    Ok(())
}
