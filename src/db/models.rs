use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Per-merchant OAuth integration document.
///
/// Field names match the persisted document exactly; `emailAddress` is the
/// only camelCase key because that is how existing documents spell it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrationRecord {
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Absolute expiry instant in unix seconds.
    #[serde(default)]
    pub expires_at: i64,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(
        rename = "emailAddress",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub email_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(rename = "connectedAt", default, skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<i64>,
    #[serde(rename = "lastUpdated", default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<i64>,
}

impl IntegrationRecord {
    pub fn from_document(document: Map<String, Value>) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(document))
    }

    /// Stored refresh token, ignoring empty strings left by older writers.
    pub fn refresh_token(&self) -> Option<&str> {
        non_empty(self.refresh_token.as_deref())
    }

    pub fn email_address(&self) -> Option<&str> {
        non_empty(self.email_address.as_deref())
    }

    pub fn id_token(&self) -> Option<&str> {
        non_empty(self.id_token.as_deref())
    }

    pub fn remaining_seconds(&self, now: i64) -> i64 {
        self.expires_at - now
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.remaining_seconds(now) <= 0
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Partial update for an [`IntegrationRecord`].
///
/// Only the fields set on the patch are written; a field set to `null`
/// (see [`IntegrationPatch::clear_email_address`]) is removed from the
/// stored document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegrationPatch {
    fields: Map<String, Value>,
}

impl IntegrationPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connected(self, connected: bool) -> Self {
        self.set("connected", Value::Bool(connected))
    }

    pub fn access_token(self, token: impl Into<String>) -> Self {
        self.set("access_token", Value::String(token.into()))
    }

    pub fn refresh_token(self, token: impl Into<String>) -> Self {
        self.set("refresh_token", Value::String(token.into()))
    }

    pub fn expires_at(self, unix_seconds: i64) -> Self {
        self.set("expires_at", Value::from(unix_seconds))
    }

    pub fn scope(self, scope: impl Into<String>) -> Self {
        self.set("scope", Value::String(scope.into()))
    }

    pub fn token_type(self, token_type: impl Into<String>) -> Self {
        self.set("token_type", Value::String(token_type.into()))
    }

    pub fn email_address(self, email: impl Into<String>) -> Self {
        self.set("emailAddress", Value::String(email.into()))
    }

    pub fn clear_email_address(self) -> Self {
        self.set("emailAddress", Value::Null)
    }

    pub fn id_token(self, token: impl Into<String>) -> Self {
        self.set("id_token", Value::String(token.into()))
    }

    pub fn connected_at(self, unix_seconds: i64) -> Self {
        self.set("connectedAt", Value::from(unix_seconds))
    }

    pub fn last_updated(self, unix_seconds: i64) -> Self {
        self.set("lastUpdated", Value::from(unix_seconds))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Field-level merge onto an existing document.
    pub fn apply_to(&self, document: &mut Map<String, Value>) {
        for (key, value) in &self.fields {
            if value.is_null() {
                document.remove(key);
            } else {
                document.insert(key.clone(), value.clone());
            }
        }
    }

    fn set(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }
}
