use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use reqwest::Url;
use tracing::{debug, info, warn};

use crate::config::OAuthConfig;
use crate::db::models::{IntegrationPatch, IntegrationRecord};
use crate::error::{MailboxError, RefreshCause};
use crate::mailbox::models::{OAuthErrorBody, TokenGrant, TokenResponse};
use crate::mailbox::provider::ProviderApi;
use crate::store::IntegrationStore;

/// Hands out access tokens that are valid at the moment of return.
///
/// The expiry check is local; the token endpoint is only called once the
/// stored token has expired. Refreshes are serialized per merchant so
/// concurrent callers that all observe an expired token share one
/// token-endpoint call.
pub struct TokenRefresher {
    config: Arc<OAuthConfig>,
    store: Arc<dyn IntegrationStore>,
    provider: Arc<dyn ProviderApi>,
    refresh_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TokenRefresher {
    pub fn new(
        config: Arc<OAuthConfig>,
        store: Arc<dyn IntegrationStore>,
        provider: Arc<dyn ProviderApi>,
    ) -> Self {
        Self {
            config,
            store,
            provider,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn ensure_valid_access_token(&self, merchant_id: &str) -> Result<String, MailboxError> {
        let record = self.load_connected(merchant_id).await?;
        if self.is_fresh(&record) {
            return Ok(record.access_token);
        }

        let lock = self.refresh_lock(merchant_id);
        let _guard = lock.lock().await;

        // Another caller may have refreshed while we waited.
        let record = self.load_connected(merchant_id).await?;
        if self.is_fresh(&record) {
            debug!(merchant_id, "access token refreshed by concurrent caller");
            return Ok(record.access_token);
        }

        self.refresh(merchant_id, &record).await
    }

    /// Mark the stored access token expired so the next
    /// [`ensure_valid_access_token`](Self::ensure_valid_access_token) refreshes
    /// it. Used when the provider rejects a token before its `expires_at`.
    pub async fn invalidate_access_token(&self, merchant_id: &str) -> Result<(), MailboxError> {
        self.store.get(merchant_id).await?;
        let patch = IntegrationPatch::new()
            .expires_at(0)
            .last_updated(Utc::now().timestamp());
        self.store.merge(merchant_id, &patch).await?;
        info!(merchant_id, "access token rejected by provider; next call refreshes");
        Ok(())
    }

    /// Hand `err` back unchanged, expiring the stored token first on a 401.
    pub async fn note_provider_error(&self, merchant_id: &str, err: MailboxError) -> MailboxError {
        if matches!(err, MailboxError::Unauthorized { .. }) {
            if let Err(store_err) = self.invalidate_access_token(merchant_id).await {
                warn!(merchant_id, error = %store_err, "failed to expire rejected access token");
            }
        }
        err
    }

    /// Consent URL for the provider; `state` carries the merchant id back to
    /// the redirect handler.
    pub fn authorization_url(
        &self,
        merchant_id: &str,
        login_hint: Option<&str>,
    ) -> Result<String, MailboxError> {
        let scopes = self.config.effective_scopes().join(" ");
        let mut params = vec![
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", scopes.as_str()),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("include_granted_scopes", "true"),
            ("state", merchant_id),
        ];
        if let Some(hint) = login_hint.map(str::trim).filter(|hint| !hint.is_empty()) {
            params.push(("login_hint", hint));
        }

        let url = Url::parse_with_params(&self.config.endpoints.auth_url, &params)
            .map_err(|e| MailboxError::Config(format!("invalid auth url: {e}")))?;
        Ok(url.into())
    }

    /// Exchange an authorization code and mark the integration connected.
    pub async fn complete_authorization(
        &self,
        merchant_id: &str,
        code: &str,
    ) -> Result<IntegrationRecord, MailboxError> {
        let grant = TokenGrant::AuthorizationCode {
            code: code.trim().to_string(),
            redirect_uri: self.config.redirect_uri.clone(),
        };
        let response = self
            .provider
            .exchange_token(grant)
            .await
            .map_err(|err| match err {
                MailboxError::Provider { status, body } => {
                    MailboxError::AuthorizationFailed { status, body }
                }
                other => other,
            })?;

        let now = Utc::now().timestamp();
        let patch = token_patch(&response, now)
            .connected(true)
            .connected_at(now);

        if non_empty(response.refresh_token.as_deref()).is_none() {
            let existing = match self.store.get(merchant_id).await {
                Ok(record) => record.refresh_token().is_some(),
                Err(MailboxError::IntegrationNotFound { .. }) => false,
                Err(err) => return Err(err),
            };
            if !existing {
                warn!(
                    merchant_id,
                    "authorization grant returned no refresh token; access will lapse at expiry"
                );
            }
        }

        self.store.merge(merchant_id, &patch).await?;
        info!(merchant_id, "mailbox integration connected");
        self.store.get(merchant_id).await
    }

    async fn load_connected(&self, merchant_id: &str) -> Result<IntegrationRecord, MailboxError> {
        let record = self.store.get(merchant_id).await?;
        if !record.connected {
            return Err(MailboxError::NotConnected {
                merchant_id: merchant_id.to_string(),
            });
        }
        Ok(record)
    }

    fn is_fresh(&self, record: &IntegrationRecord) -> bool {
        let now = Utc::now().timestamp();
        record.remaining_seconds(now) > self.config.refresh_skew_seconds
    }

    fn refresh_lock(&self, merchant_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .refresh_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(merchant_id.to_string()).or_default().clone()
    }

    async fn refresh(
        &self,
        merchant_id: &str,
        record: &IntegrationRecord,
    ) -> Result<String, MailboxError> {
        let refresh_token = record.refresh_token().ok_or(MailboxError::RefreshFailed {
            cause: RefreshCause::MissingRefreshToken,
        })?;

        info!(merchant_id, "refreshing expired access token");
        let response = match self
            .provider
            .exchange_token(TokenGrant::RefreshToken(refresh_token.to_string()))
            .await
        {
            Ok(response) => response,
            Err(err) => return Err(self.refresh_failure(merchant_id, err).await),
        };

        let now = Utc::now().timestamp();
        self.store
            .merge(merchant_id, &token_patch(&response, now))
            .await?;
        debug!(
            merchant_id,
            expires_in = response.expires_in,
            rotated = response.refresh_token.is_some(),
            "access token refreshed"
        );
        Ok(response.access_token)
    }

    async fn refresh_failure(&self, merchant_id: &str, err: MailboxError) -> MailboxError {
        match err {
            MailboxError::Provider { status, body } | MailboxError::AuthorizationFailed { status, body } => {
                let oauth = OAuthErrorBody::parse(&body);
                if oauth.is_invalid_grant() {
                    warn!(merchant_id, "refresh token revoked; marking integration disconnected");
                    let patch = IntegrationPatch::new()
                        .connected(false)
                        .last_updated(Utc::now().timestamp());
                    if let Err(store_err) = self.store.merge(merchant_id, &patch).await {
                        warn!(merchant_id, error = %store_err, "failed to record disconnect");
                    }
                } else {
                    warn!(merchant_id, status, "token endpoint rejected refresh");
                }
                MailboxError::RefreshFailed {
                    cause: RefreshCause::Rejected {
                        status,
                        oauth_error: oauth.error,
                        body,
                    },
                }
            }
            MailboxError::Unauthorized { body } => MailboxError::RefreshFailed {
                cause: RefreshCause::Rejected {
                    status: 401,
                    oauth_error: OAuthErrorBody::parse(&body).error,
                    body,
                },
            },
            MailboxError::TransientNetwork { endpoint, message } => {
                warn!(merchant_id, endpoint = %endpoint, "token endpoint unreachable");
                MailboxError::RefreshFailed {
                    cause: RefreshCause::Network(format!("{endpoint}: {message}")),
                }
            }
            other => other,
        }
    }
}

/// Token fields from a grant response; `refresh_token` only when one was issued.
fn token_patch(response: &TokenResponse, now: i64) -> IntegrationPatch {
    let mut patch = IntegrationPatch::new()
        .access_token(response.access_token.as_str())
        .expires_at(now + response.expires_in)
        .last_updated(now);

    if let Some(refresh_token) = non_empty(response.refresh_token.as_deref()) {
        patch = patch.refresh_token(refresh_token);
    }
    if let Some(token_type) = non_empty(response.token_type.as_deref()) {
        patch = patch.token_type(token_type);
    }
    if let Some(scope) = non_empty(response.scope.as_deref()) {
        patch = patch.scope(scope);
    }
    if let Some(id_token) = non_empty(response.id_token.as_deref()) {
        patch = patch.id_token(id_token);
    }
    patch
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
