use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::{Endpoints, OAuthConfig, Timeouts};
use crate::error::MailboxError;
use crate::mailbox::models::{
    GmailMessage, GmailProfile, ListQuery, MessageFormat, MessageList, PeopleProfile, TokenGrant,
    TokenResponse, UserInfo,
};

const MAX_RATE_LIMIT_RETRIES: usize = 2;
const MAX_BACKOFF_SECONDS: u64 = 8;
const REDACTED_BODY_MAX_LEN: usize = 200;
const METADATA_HEADERS: &[&str] = &["Subject", "From", "To", "Date"];

/// Outbound calls to the mail provider.
///
/// Error mapping is part of the contract: a rejected bearer token is
/// [`MailboxError::Unauthorized`], timeouts and connection failures are
/// [`MailboxError::TransientNetwork`], and any other non-2xx is
/// [`MailboxError::Provider`]. The token endpoint never reports
/// `Unauthorized`.
#[async_trait]
pub trait ProviderApi: Send + Sync {
    async fn exchange_token(&self, grant: TokenGrant) -> Result<TokenResponse, MailboxError>;

    async fn list_messages(
        &self,
        access_token: &str,
        query: &ListQuery,
    ) -> Result<MessageList, MailboxError>;

    async fn get_message(
        &self,
        access_token: &str,
        message_id: &str,
        format: MessageFormat,
    ) -> Result<GmailMessage, MailboxError>;

    async fn userinfo(&self, access_token: &str) -> Result<UserInfo, MailboxError>;

    async fn profile(&self, access_token: &str) -> Result<GmailProfile, MailboxError>;

    async fn people_me(&self, access_token: &str) -> Result<PeopleProfile, MailboxError>;
}

/// `reqwest` implementation against Google's OAuth and Gmail REST endpoints.
#[derive(Debug, Clone)]
pub struct GoogleClient {
    client: Client,
    client_id: String,
    client_secret: String,
    endpoints: Endpoints,
    timeouts: Timeouts,
}

impl GoogleClient {
    pub fn new(config: &OAuthConfig) -> Result<Self, MailboxError> {
        let client = Client::builder()
            .user_agent(concat!("inboxlink/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MailboxError::Config(format!("build http client: {e}")))?;

        Ok(Self {
            client,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            endpoints: config.endpoints.clone(),
            timeouts: config.timeouts,
        })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/users/me/messages",
            self.endpoints.gmail_api_base.trim_end_matches('/')
        )
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        context: &'static str,
        url: &str,
        access_token: &str,
        timeout: Duration,
        query: &[(&str, String)],
    ) -> Result<T, MailboxError> {
        let body = self
            .fetch_with_retry(url, || {
                self.client
                    .get(url)
                    .bearer_auth(access_token)
                    .header("accept", "application/json")
                    .query(query)
                    .timeout(timeout)
            })
            .await?;
        serde_json::from_str(&body).map_err(|e| MailboxError::decode(context, e))
    }

    /// Send with a bounded retry on 429, honoring `Retry-After` when present.
    async fn fetch_with_retry(
        &self,
        url: &str,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<String, MailboxError> {
        let mut backoff_seconds = 1u64;

        for attempt in 0..=MAX_RATE_LIMIT_RETRIES {
            let response = build()
                .send()
                .await
                .map_err(|e| network_error(url, &e))?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS && attempt < MAX_RATE_LIMIT_RETRIES {
                let retry_after_seconds = response
                    .headers()
                    .get("retry-after")
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse::<u64>().ok())
                    .unwrap_or(backoff_seconds)
                    .min(MAX_BACKOFF_SECONDS);

                warn!(url, retry_after_seconds, "provider rate limited request");
                sleep(Duration::from_secs(retry_after_seconds)).await;
                backoff_seconds = (backoff_seconds * 2).min(MAX_BACKOFF_SECONDS);
                continue;
            }

            let body = response.text().await.map_err(|e| network_error(url, &e))?;
            if status == StatusCode::UNAUTHORIZED {
                return Err(MailboxError::Unauthorized {
                    body: redact_response_body(&body),
                });
            }
            if !status.is_success() {
                return Err(MailboxError::Provider {
                    status: status.as_u16(),
                    body: redact_response_body(&body),
                });
            }
            return Ok(body);
        }

        Err(MailboxError::Provider {
            status: StatusCode::TOO_MANY_REQUESTS.as_u16(),
            body: "rate limit retries exhausted".to_string(),
        })
    }
}

#[async_trait]
impl ProviderApi for GoogleClient {
    async fn exchange_token(&self, grant: TokenGrant) -> Result<TokenResponse, MailboxError> {
        let url = self.endpoints.token_url.as_str();
        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        match &grant {
            TokenGrant::RefreshToken(refresh_token) => {
                form.push(("refresh_token", refresh_token.as_str()));
                form.push(("grant_type", "refresh_token"));
            }
            TokenGrant::AuthorizationCode { code, redirect_uri } => {
                form.push(("code", code.as_str()));
                form.push(("redirect_uri", redirect_uri.as_str()));
                form.push(("grant_type", "authorization_code"));
            }
        }

        debug!(url, "requesting oauth token");
        let response = self
            .client
            .post(url)
            .form(&form)
            .timeout(self.timeouts.token_exchange)
            .send()
            .await
            .map_err(|e| network_error(url, &e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| network_error(url, &e))?;
        if !status.is_success() {
            return Err(MailboxError::Provider {
                status: status.as_u16(),
                body: redact_response_body(&body),
            });
        }

        serde_json::from_str(&body).map_err(|e| MailboxError::decode("oauth token response", e))
    }

    async fn list_messages(
        &self,
        access_token: &str,
        query: &ListQuery,
    ) -> Result<MessageList, MailboxError> {
        let mut params = vec![("maxResults", query.max_results.to_string())];
        params.extend(query.label_ids.iter().map(|label| ("labelIds", label.clone())));

        self.get_json(
            "gmail message list",
            &self.messages_url(),
            access_token,
            self.timeouts.metadata_fetch,
            &params,
        )
        .await
    }

    async fn get_message(
        &self,
        access_token: &str,
        message_id: &str,
        format: MessageFormat,
    ) -> Result<GmailMessage, MailboxError> {
        let url = format!("{}/{message_id}", self.messages_url());
        let mut params = vec![("format", format.as_query_value().to_string())];
        let timeout = match format {
            MessageFormat::Metadata => {
                params.extend(
                    METADATA_HEADERS
                        .iter()
                        .map(|header| ("metadataHeaders", header.to_string())),
                );
                self.timeouts.metadata_fetch
            }
            MessageFormat::Full => self.timeouts.full_fetch,
        };

        self.get_json("gmail message", &url, access_token, timeout, &params)
            .await
    }

    async fn userinfo(&self, access_token: &str) -> Result<UserInfo, MailboxError> {
        self.get_json(
            "openid userinfo",
            &self.endpoints.userinfo_url,
            access_token,
            self.timeouts.identity,
            &[],
        )
        .await
    }

    async fn profile(&self, access_token: &str) -> Result<GmailProfile, MailboxError> {
        let url = format!(
            "{}/users/me/profile",
            self.endpoints.gmail_api_base.trim_end_matches('/')
        );
        self.get_json(
            "gmail profile",
            &url,
            access_token,
            self.timeouts.identity,
            &[],
        )
        .await
    }

    async fn people_me(&self, access_token: &str) -> Result<PeopleProfile, MailboxError> {
        self.get_json(
            "people profile",
            &self.endpoints.people_url,
            access_token,
            self.timeouts.identity,
            &[("personFields", "emailAddresses".to_string())],
        )
        .await
    }
}

fn network_error(url: &str, err: &reqwest::Error) -> MailboxError {
    let message = if err.is_timeout() {
        "request timed out".to_string()
    } else {
        err.to_string()
    };
    MailboxError::TransientNetwork {
        endpoint: url.to_string(),
        message,
    }
}

/// Trimmed body cut to a short prefix on a char boundary.
pub(crate) fn redact_response_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= REDACTED_BODY_MAX_LEN {
        return trimmed.to_string();
    }

    let mut cut = REDACTED_BODY_MAX_LEN;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}…[truncated {} bytes]",
        &trimmed[..cut],
        trimmed.len()
    )
}
