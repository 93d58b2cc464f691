use rusqlite::Connection;

use crate::db::DbError;

/// Stored in SQLite's `user_version` header field.
pub const SCHEMA_VERSION: i64 = 1;

const INTEGRATIONS_V1: &str = r#"
    CREATE TABLE IF NOT EXISTS integrations (
        merchant_id TEXT NOT NULL,
        provider TEXT NOT NULL,
        document TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
        updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
        PRIMARY KEY (merchant_id, provider)
    );

    CREATE INDEX IF NOT EXISTS idx_integrations_provider ON integrations(provider);
"#;

/// Bring the integrations table up to [`SCHEMA_VERSION`].
///
/// A database written by a newer build is refused rather than touched.
pub fn ensure_schema(conn: &Connection) -> Result<(), DbError> {
    let version = user_version(conn)?;
    if version > SCHEMA_VERSION {
        return Err(DbError::Config(format!(
            "integration store is at schema {version}; this build understands up to {SCHEMA_VERSION}"
        )));
    }
    if version == SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(INTEGRATIONS_V1)?;
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(())
}

pub fn user_version(conn: &Connection) -> Result<i64, DbError> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}
