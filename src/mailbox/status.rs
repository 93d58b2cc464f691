use chrono::Utc;
use serde::Serialize;

use crate::db::models::IntegrationRecord;
use crate::error::MailboxError;
use crate::store::IntegrationStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationState {
    Connected,
    /// Access token expired but a refresh token is stored.
    Expired,
    /// Access token expired and nothing to refresh it with.
    Invalid,
    Disconnected,
    NotFound,
}

impl IntegrationState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Expired => "expired",
            Self::Invalid => "invalid",
            Self::Disconnected => "disconnected",
            Self::NotFound => "not_found",
        }
    }

    pub fn needs_reconnect(self) -> bool {
        matches!(self, Self::Invalid | Self::Disconnected | Self::NotFound)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationStatus {
    pub merchant_id: String,
    pub state: IntegrationState,
    pub email_address: Option<String>,
    pub has_access_token: bool,
    pub has_refresh_token: bool,
    pub token_expired: bool,
    /// Seconds until expiry; negative once expired.
    pub expires_in: Option<i64>,
    pub connected_at: Option<i64>,
}

impl IntegrationStatus {
    /// Read the stored record and evaluate it against the current time.
    /// A missing record is reported as `not_found`, not as an error.
    pub async fn load(store: &dyn IntegrationStore, merchant_id: &str) -> Result<Self, MailboxError> {
        let record = match store.get(merchant_id).await {
            Ok(record) => Some(record),
            Err(MailboxError::IntegrationNotFound { .. }) => None,
            Err(err) => return Err(err),
        };
        Ok(Self::evaluate(merchant_id, record.as_ref(), Utc::now().timestamp()))
    }

    pub fn evaluate(merchant_id: &str, record: Option<&IntegrationRecord>, now: i64) -> Self {
        let Some(record) = record else {
            return Self {
                merchant_id: merchant_id.to_string(),
                state: IntegrationState::NotFound,
                email_address: None,
                has_access_token: false,
                has_refresh_token: false,
                token_expired: false,
                expires_in: None,
                connected_at: None,
            };
        };

        let has_access_token = !record.access_token.trim().is_empty();
        let has_refresh_token = record.refresh_token().is_some();
        let token_expired = record.is_expired(now);

        let state = if !record.connected {
            IntegrationState::Disconnected
        } else if has_access_token && !token_expired {
            IntegrationState::Connected
        } else if has_refresh_token {
            IntegrationState::Expired
        } else {
            IntegrationState::Invalid
        };

        Self {
            merchant_id: merchant_id.to_string(),
            state,
            email_address: record.email_address().map(str::to_string),
            has_access_token,
            has_refresh_token,
            token_expired,
            expires_in: (record.expires_at > 0).then(|| record.remaining_seconds(now)),
            connected_at: record.connected_at,
        }
    }
}
