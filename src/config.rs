use std::time::Duration;

use crate::error::MailboxError;

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";
pub const OPENID_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";
pub const PEOPLE_ME_URL: &str = "https://people.googleapis.com/v1/people/me";

pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 8;

/// Scopes requested at authorization; `openid` and `email` are always added.
pub const DEFAULT_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/userinfo.profile",
    "openid",
    "email",
    "profile",
];

const ENV_CLIENT_ID: &str = "INBOXLINK_CLIENT_ID";
const ENV_CLIENT_SECRET: &str = "INBOXLINK_CLIENT_SECRET";
const ENV_REDIRECT_URI: &str = "INBOXLINK_REDIRECT_URI";
const ENV_AUTH_URL: &str = "INBOXLINK_AUTH_URL";
const ENV_TOKEN_URL: &str = "INBOXLINK_TOKEN_URL";
const ENV_GMAIL_API_BASE: &str = "INBOXLINK_GMAIL_API_BASE";
const ENV_USERINFO_URL: &str = "INBOXLINK_USERINFO_URL";
const ENV_PEOPLE_URL: &str = "INBOXLINK_PEOPLE_URL";
const ENV_MAX_CONCURRENT_FETCHES: &str = "INBOXLINK_MAX_CONCURRENT_FETCHES";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub auth_url: String,
    pub token_url: String,
    pub gmail_api_base: String,
    pub userinfo_url: String,
    pub people_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            gmail_api_base: GMAIL_API_BASE.to_string(),
            userinfo_url: OPENID_USERINFO_URL.to_string(),
            people_url: PEOPLE_ME_URL.to_string(),
        }
    }
}

impl Endpoints {
    /// Every provider URL rooted at one base, for tests against a local mock server.
    pub fn rooted_at(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            auth_url: format!("{base}/o/oauth2/v2/auth"),
            token_url: format!("{base}/token"),
            gmail_api_base: format!("{base}/gmail/v1"),
            userinfo_url: format!("{base}/v1/userinfo"),
            people_url: format!("{base}/v1/people/me"),
        }
    }
}

/// Per-call-class request timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub token_exchange: Duration,
    pub metadata_fetch: Duration,
    pub full_fetch: Duration,
    pub identity: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            token_exchange: Duration::from_secs(15),
            metadata_fetch: Duration::from_secs(10),
            full_fetch: Duration::from_secs(30),
            identity: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub endpoints: Endpoints,
    pub timeouts: Timeouts,
    pub max_concurrent_fetches: usize,
    /// Seconds before `expires_at` at which a token already counts as expired.
    pub refresh_skew_seconds: i64,
}

impl OAuthConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            scopes: DEFAULT_SCOPES.iter().map(|scope| scope.to_string()).collect(),
            endpoints: Endpoints::default(),
            timeouts: Timeouts::default(),
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            refresh_skew_seconds: 0,
        }
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_max_concurrent_fetches(mut self, limit: usize) -> Self {
        self.max_concurrent_fetches = limit;
        self
    }

    pub fn from_env() -> Result<Self, MailboxError> {
        let required = |key: &str| {
            env_value(key).ok_or_else(|| MailboxError::Config(format!("missing {key}")))
        };

        let config = Self::new(
            required(ENV_CLIENT_ID)?,
            required(ENV_CLIENT_SECRET)?,
            required(ENV_REDIRECT_URI)?,
        )
        .with_env_overrides()?;

        config.validate()?;
        Ok(config)
    }

    /// Apply endpoint and concurrency overrides from the environment.
    pub fn with_env_overrides(mut self) -> Result<Self, MailboxError> {
        let endpoints = &mut self.endpoints;
        for (key, slot) in [
            (ENV_AUTH_URL, &mut endpoints.auth_url),
            (ENV_TOKEN_URL, &mut endpoints.token_url),
            (ENV_GMAIL_API_BASE, &mut endpoints.gmail_api_base),
            (ENV_USERINFO_URL, &mut endpoints.userinfo_url),
            (ENV_PEOPLE_URL, &mut endpoints.people_url),
        ] {
            if let Some(value) = env_value(key) {
                *slot = value;
            }
        }

        if let Some(raw) = env_value(ENV_MAX_CONCURRENT_FETCHES) {
            self.max_concurrent_fetches = raw.parse().map_err(|_| {
                MailboxError::Config(format!("{ENV_MAX_CONCURRENT_FETCHES} must be a positive integer"))
            })?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), MailboxError> {
        let mut missing = Vec::new();
        if self.client_id.trim().is_empty() {
            missing.push("client_id");
        }
        if self.client_secret.trim().is_empty() {
            missing.push("client_secret");
        }
        if self.redirect_uri.trim().is_empty() {
            missing.push("redirect_uri");
        }
        if !missing.is_empty() {
            return Err(MailboxError::Config(format!(
                "missing required oauth settings: {}",
                missing.join(", ")
            )));
        }

        if self.max_concurrent_fetches == 0 {
            return Err(MailboxError::Config(
                "max_concurrent_fetches must be at least 1".to_string(),
            ));
        }
        if self.refresh_skew_seconds < 0 {
            return Err(MailboxError::Config(
                "refresh_skew_seconds must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Requested scopes with `openid` and `email` guaranteed present.
    pub fn effective_scopes(&self) -> Vec<String> {
        let mut scopes = self.scopes.clone();
        for required in ["openid", "email"] {
            if !scopes.iter().any(|scope| scope == required) {
                scopes.push(required.to_string());
            }
        }
        scopes
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
