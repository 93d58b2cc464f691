use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use self::models::IntegrationPatch;
use self::seal::SealingKey;

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("json serialization: {0}")]
    Json(#[from] serde_json::Error),

    #[error("filesystem: {0}")]
    Io(#[from] std::io::Error),

    #[error("sealed document: {0}")]
    Seal(String),

    #[error("{0}")]
    Config(String),
}

pub mod models;
pub mod schema;
pub mod seal;

#[derive(Debug, Clone, Serialize)]
pub struct IntegrationSummary {
    pub merchant_id: String,
    pub provider: String,
    pub updated_at: String,
}

pub struct Database {
    conn: Connection,
    path: Option<PathBuf>,
    sealing_key: Option<SealingKey>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let mut db = Self {
            conn,
            path: Some(path.to_path_buf()),
            sealing_key: None,
        };
        db.initialize()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        let mut db = Self {
            conn: Connection::open_in_memory()?,
            path: None,
            sealing_key: None,
        };
        db.initialize()?;
        Ok(db)
    }

    /// Seal documents written from now on; existing plaintext documents stay readable.
    pub fn with_sealing_key(mut self, key: Option<SealingKey>) -> Self {
        self.sealing_key = key;
        self
    }

    pub fn initialize(&mut self) -> Result<(), DbError> {
        schema::ensure_schema(&self.conn)
    }

    pub fn default_db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir()
            .ok_or_else(|| DbError::Config("failed to determine home directory".to_string()))?;
        Ok(home.join(".inboxlink").join("inboxlink.db"))
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get_integration(
        &self,
        merchant_id: &str,
        provider: &str,
    ) -> Result<Option<Map<String, Value>>, DbError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT document FROM integrations WHERE merchant_id = ?1 AND provider = ?2 LIMIT 1",
                params![merchant_id, provider],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|raw| self.decode_document(&raw)).transpose()
    }

    /// Upsert with field-level merge; returns the document as stored.
    pub fn merge_integration(
        &self,
        merchant_id: &str,
        provider: &str,
        patch: &IntegrationPatch,
    ) -> Result<Map<String, Value>, DbError> {
        let tx = self.conn.unchecked_transaction()?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT document FROM integrations WHERE merchant_id = ?1 AND provider = ?2 LIMIT 1",
                params![merchant_id, provider],
                |row| row.get(0),
            )
            .optional()?;

        let mut document = match existing {
            Some(raw) => self.decode_document(&raw)?,
            None => Map::new(),
        };
        patch.apply_to(&mut document);

        let encoded = self.encode_document(&document)?;
        tx.execute(
            r#"
            INSERT INTO integrations (merchant_id, provider, document, updated_at)
            VALUES (?1, ?2, ?3, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            ON CONFLICT(merchant_id, provider) DO UPDATE SET
                document = excluded.document,
                updated_at = excluded.updated_at
            "#,
            params![merchant_id, provider, encoded],
        )?;
        tx.commit()?;

        Ok(document)
    }

    pub fn list_integrations(&self, provider: &str) -> Result<Vec<IntegrationSummary>, DbError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT merchant_id, provider, updated_at
            FROM integrations
            WHERE provider = ?
            ORDER BY merchant_id ASC
            "#,
        )?;

        let rows = stmt
            .query_map([provider], |row| {
                Ok(IntegrationSummary {
                    merchant_id: row.get(0)?,
                    provider: row.get(1)?,
                    updated_at: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn decode_document(&self, raw: &str) -> Result<Map<String, Value>, DbError> {
        let plaintext = match &self.sealing_key {
            Some(key) => seal::unseal(raw, key)?.unwrap_or_else(|| raw.to_string()),
            None if seal::looks_sealed(raw) => {
                return Err(DbError::Config(
                    "integration document is sealed but no sealing key is configured".to_string(),
                ))
            }
            None => raw.to_string(),
        };

        match serde_json::from_str::<Value>(&plaintext)? {
            Value::Object(map) => Ok(map),
            other => Err(DbError::Config(format!(
                "integration document is not a JSON object: {other}"
            ))),
        }
    }

    fn encode_document(&self, document: &Map<String, Value>) -> Result<String, DbError> {
        let plaintext = serde_json::to_string(document)?;
        match &self.sealing_key {
            Some(key) => seal::seal(&plaintext, key),
            None => Ok(plaintext),
        }
    }
}
