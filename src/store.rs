use std::sync::Mutex;

use async_trait::async_trait;

use crate::db::models::{IntegrationPatch, IntegrationRecord};
use crate::db::{Database, DbError};
use crate::error::MailboxError;

pub const PROVIDER_GMAIL: &str = "gmail";

/// Document store holding one integration record per merchant.
///
/// Writes go through [`IntegrationStore::merge`] only, so concurrent writers
/// touching disjoint fields do not clobber each other.
#[async_trait]
pub trait IntegrationStore: Send + Sync {
    /// Fails with [`MailboxError::IntegrationNotFound`] when no record exists.
    async fn get(&self, merchant_id: &str) -> Result<IntegrationRecord, MailboxError>;

    async fn merge(&self, merchant_id: &str, patch: &IntegrationPatch) -> Result<(), MailboxError>;
}

pub struct SqliteIntegrationStore {
    db: Mutex<Database>,
    provider: String,
}

impl SqliteIntegrationStore {
    pub fn new(db: Database) -> Self {
        Self::for_provider(db, PROVIDER_GMAIL)
    }

    pub fn for_provider(db: Database, provider: &str) -> Self {
        Self {
            db: Mutex::new(db),
            provider: provider.to_string(),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn with_db<T>(
        &self,
        f: impl FnOnce(&Database) -> Result<T, DbError>,
    ) -> Result<T, MailboxError> {
        let db = self
            .db
            .lock()
            .map_err(|_| DbError::Config("integration store lock poisoned".to_string()))?;
        Ok(f(&db)?)
    }
}

#[async_trait]
impl IntegrationStore for SqliteIntegrationStore {
    async fn get(&self, merchant_id: &str) -> Result<IntegrationRecord, MailboxError> {
        let document = self
            .with_db(|db| db.get_integration(merchant_id, &self.provider))?
            .ok_or_else(|| MailboxError::IntegrationNotFound {
                merchant_id: merchant_id.to_string(),
            })?;

        IntegrationRecord::from_document(document)
            .map_err(|e| MailboxError::decode("integration record", e))
    }

    async fn merge(&self, merchant_id: &str, patch: &IntegrationPatch) -> Result<(), MailboxError> {
        if patch.is_empty() {
            return Ok(());
        }
        self.with_db(|db| db.merge_integration(merchant_id, &self.provider, patch))?;
        Ok(())
    }
}
