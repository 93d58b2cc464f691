use thiserror::Error;

use crate::db::DbError;

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("mailbox integration not found for merchant '{merchant_id}'")]
    IntegrationNotFound { merchant_id: String },

    #[error("mailbox integration for merchant '{merchant_id}' is not connected")]
    NotConnected { merchant_id: String },

    #[error("access token refresh failed: {cause}")]
    RefreshFailed { cause: RefreshCause },

    #[error("authorization code exchange failed: status={status} body={body}")]
    AuthorizationFailed { status: u16, body: String },

    #[error("network error calling {endpoint}: {message}")]
    TransientNetwork { endpoint: String, message: String },

    #[error("provider rejected the access token: {body}")]
    Unauthorized { body: String },

    #[error("provider request failed: status={status} body={body}")]
    Provider { status: u16, body: String },

    #[error("invalid base64url input: {0}")]
    InvalidEncoding(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no resolver tier produced an email address")]
    ResolutionExhausted,

    #[error(transparent)]
    Storage(#[from] DbError),

    #[error("decode {context}: {source}")]
    Decode {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("configuration: {0}")]
    Config(String),
}

#[derive(Debug, Error)]
pub enum RefreshCause {
    #[error("no refresh token stored")]
    MissingRefreshToken,

    #[error("token endpoint returned status={status} body={body}")]
    Rejected {
        status: u16,
        oauth_error: Option<String>,
        body: String,
    },

    #[error("{0}")]
    Network(String),
}

/// What a user-facing surface should offer after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    /// Setup or authorization is missing or revoked.
    Reconnect,
    TryAgain,
    None,
}

impl MailboxError {
    pub fn decode(context: &'static str, source: serde_json::Error) -> Self {
        Self::Decode { context, source }
    }

    /// Safe to retry with a small, bounded backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransientNetwork { .. } | Self::Unauthorized { .. } => true,
            Self::RefreshFailed {
                cause: RefreshCause::Network(_),
            } => true,
            Self::Provider { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Failures that every later call in the same operation would repeat.
    pub fn aborts_operation(&self) -> bool {
        matches!(
            self,
            Self::IntegrationNotFound { .. }
                | Self::NotConnected { .. }
                | Self::RefreshFailed { .. }
                | Self::AuthorizationFailed { .. }
                | Self::Unauthorized { .. }
                | Self::Storage(_)
                | Self::Config(_)
        )
    }

    pub fn user_action(&self) -> UserAction {
        match self {
            Self::IntegrationNotFound { .. }
            | Self::NotConnected { .. }
            | Self::AuthorizationFailed { .. } => UserAction::Reconnect,
            Self::RefreshFailed {
                cause: RefreshCause::Network(_),
            } => UserAction::TryAgain,
            Self::RefreshFailed { .. } => UserAction::Reconnect,
            _ if self.is_retryable() => UserAction::TryAgain,
            _ => UserAction::None,
        }
    }
}
