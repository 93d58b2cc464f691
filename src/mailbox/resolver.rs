use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::models::{IntegrationPatch, IntegrationRecord};
use crate::error::MailboxError;
use crate::mailbox::codec;
use crate::mailbox::models::{GmailProfile, PeopleProfile, UserInfo};
use crate::mailbox::provider::ProviderApi;
use crate::mailbox::token::TokenRefresher;
use crate::store::IntegrationStore;

/// One strategy in the email-resolution chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverTier {
    /// `emailAddress` already on the record.
    Cached,
    /// `email` claim of the stored OpenID token.
    IdToken,
    UserInfo,
    GmailProfile,
    People,
    /// `email` claim of the access token, when it happens to be a JWT.
    AccessTokenJwt,
}

impl ResolverTier {
    pub const DEFAULT_ORDER: [ResolverTier; 6] = [
        ResolverTier::Cached,
        ResolverTier::IdToken,
        ResolverTier::UserInfo,
        ResolverTier::GmailProfile,
        ResolverTier::People,
        ResolverTier::AccessTokenJwt,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Cached => "cached",
            Self::IdToken => "id_token",
            Self::UserInfo => "userinfo",
            Self::GmailProfile => "gmail_profile",
            Self::People => "people",
            Self::AccessTokenJwt => "access_token_jwt",
        }
    }
}

#[derive(Debug, Error)]
pub enum TierError {
    #[error("not attempted: {0}")]
    Unavailable(String),

    #[error("request failed: {0}")]
    Request(#[source] MailboxError),

    #[error("undecodable: {0}")]
    Decode(String),

    #[error("response carried no email address")]
    NoEmail,
}

#[derive(Debug)]
pub struct TierAttempt {
    pub tier: ResolverTier,
    pub outcome: Result<String, TierError>,
}

/// Outcome of one run through the chain, with every tier's result in order.
#[derive(Debug)]
pub struct Resolution {
    pub email: Option<String>,
    pub tier: Option<ResolverTier>,
    pub attempts: Vec<TierAttempt>,
}

impl Resolution {
    pub fn into_result(self) -> Result<String, MailboxError> {
        self.email.ok_or(MailboxError::ResolutionExhausted)
    }
}

pub struct EmailAddressResolver {
    store: Arc<dyn IntegrationStore>,
    provider: Arc<dyn ProviderApi>,
    tokens: Arc<TokenRefresher>,
    tiers: Vec<ResolverTier>,
}

impl EmailAddressResolver {
    pub fn new(
        store: Arc<dyn IntegrationStore>,
        provider: Arc<dyn ProviderApi>,
        tokens: Arc<TokenRefresher>,
    ) -> Self {
        Self {
            store,
            provider,
            tokens,
            tiers: ResolverTier::DEFAULT_ORDER.to_vec(),
        }
    }

    pub fn with_tiers(mut self, tiers: Vec<ResolverTier>) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn tiers(&self) -> &[ResolverTier] {
        &self.tiers
    }

    /// Email address of the mailbox, or `None` once every tier came up empty.
    pub async fn resolve_email(&self, merchant_id: &str) -> Result<Option<String>, MailboxError> {
        Ok(self.resolve_with_diagnostics(merchant_id).await?.email)
    }

    /// Run the chain and report every tier attempted. A newly resolved
    /// address is persisted before this returns.
    pub async fn resolve_with_diagnostics(
        &self,
        merchant_id: &str,
    ) -> Result<Resolution, MailboxError> {
        let record = self.store.get(merchant_id).await?;
        let mut access_token = None;
        let mut attempts = Vec::with_capacity(self.tiers.len());

        for &tier in &self.tiers {
            let outcome = self
                .attempt(tier, merchant_id, &record, &mut access_token)
                .await;

            match outcome {
                Ok(email) => {
                    if tier != ResolverTier::Cached {
                        let patch = IntegrationPatch::new()
                            .email_address(email.as_str())
                            .last_updated(Utc::now().timestamp());
                        self.store.merge(merchant_id, &patch).await?;
                        info!(merchant_id, tier = tier.name(), "resolved mailbox email address");
                    }
                    attempts.push(TierAttempt {
                        tier,
                        outcome: Ok(email.clone()),
                    });
                    return Ok(Resolution {
                        email: Some(email),
                        tier: Some(tier),
                        attempts,
                    });
                }
                Err(err) => {
                    match &err {
                        TierError::Unavailable(reason) => {
                            debug!(merchant_id, tier = tier.name(), reason = %reason, "resolver tier skipped")
                        }
                        other => {
                            warn!(merchant_id, tier = tier.name(), error = %other, "resolver tier failed")
                        }
                    }
                    attempts.push(TierAttempt {
                        tier,
                        outcome: Err(err),
                    });
                }
            }
        }

        warn!(merchant_id, "every resolver tier exhausted");
        Ok(Resolution {
            email: None,
            tier: None,
            attempts,
        })
    }

    /// Manual override of the cached address.
    pub async fn set_email(&self, merchant_id: &str, email: &str) -> Result<(), MailboxError> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(MailboxError::InvalidInput(format!(
                "'{email}' is not an email address"
            )));
        }
        // Only existing integrations get an address.
        self.store.get(merchant_id).await?;

        let patch = IntegrationPatch::new()
            .email_address(email)
            .last_updated(Utc::now().timestamp());
        self.store.merge(merchant_id, &patch).await
    }

    /// Drop the cached address so the next resolution runs the chain again.
    pub async fn invalidate_email(&self, merchant_id: &str) -> Result<(), MailboxError> {
        self.store.get(merchant_id).await?;
        let patch = IntegrationPatch::new()
            .clear_email_address()
            .last_updated(Utc::now().timestamp());
        self.store.merge(merchant_id, &patch).await
    }

    async fn attempt(
        &self,
        tier: ResolverTier,
        merchant_id: &str,
        record: &IntegrationRecord,
        access_token: &mut Option<Result<String, String>>,
    ) -> Result<String, TierError> {
        match tier {
            ResolverTier::Cached => record
                .email_address()
                .map(str::to_string)
                .ok_or_else(|| TierError::Unavailable("no cached address".to_string())),
            ResolverTier::IdToken => {
                let id_token = record
                    .id_token()
                    .ok_or_else(|| TierError::Unavailable("no id_token stored".to_string()))?;
                email_from_jwt(id_token)
            }
            ResolverTier::AccessTokenJwt => {
                let token = record.access_token.trim();
                if !codec::is_jwt(token) {
                    return Err(TierError::Unavailable("access token is opaque".to_string()));
                }
                email_from_jwt(token)
            }
            ResolverTier::UserInfo => {
                let token = self.bearer_token(merchant_id, access_token).await?;
                let info = self
                    .provider
                    .userinfo(&token)
                    .await
                    .map_err(TierError::Request)?;
                email_from_userinfo(&info)
            }
            ResolverTier::GmailProfile => {
                let token = self.bearer_token(merchant_id, access_token).await?;
                let profile = self
                    .provider
                    .profile(&token)
                    .await
                    .map_err(TierError::Request)?;
                email_from_profile(&profile)
            }
            ResolverTier::People => {
                let token = self.bearer_token(merchant_id, access_token).await?;
                let people = self
                    .provider
                    .people_me(&token)
                    .await
                    .map_err(TierError::Request)?;
                email_from_people(&people)
            }
        }
    }

    /// Valid access token, fetched at most once per resolution.
    async fn bearer_token(
        &self,
        merchant_id: &str,
        cached: &mut Option<Result<String, String>>,
    ) -> Result<String, TierError> {
        if cached.is_none() {
            let fetched = self
                .tokens
                .ensure_valid_access_token(merchant_id)
                .await
                .map_err(|err| err.to_string());
            *cached = Some(fetched);
        }

        match cached {
            Some(Ok(token)) => Ok(token.clone()),
            Some(Err(reason)) => Err(TierError::Unavailable(format!(
                "no valid access token: {reason}"
            ))),
            None => Err(TierError::Unavailable("no valid access token".to_string())),
        }
    }
}

pub fn email_from_jwt(token: &str) -> Result<String, TierError> {
    let claims =
        codec::decode_jwt_claims(token).map_err(|err| TierError::Decode(err.to_string()))?;
    non_empty_email(claims.email.as_deref())
}

pub fn email_from_userinfo(info: &UserInfo) -> Result<String, TierError> {
    non_empty_email(info.email.as_deref())
}

pub fn email_from_profile(profile: &GmailProfile) -> Result<String, TierError> {
    non_empty_email(profile.email_address.as_deref())
}

/// Entry flagged primary, else the first entry with a value.
pub fn email_from_people(people: &PeopleProfile) -> Result<String, TierError> {
    let entries = people.email_addresses.as_deref().unwrap_or_default();
    let primary = entries.iter().find(|entry| {
        entry
            .metadata
            .as_ref()
            .and_then(|meta| meta.primary)
            .unwrap_or(false)
            && non_empty_email(entry.value.as_deref()).is_ok()
    });

    primary
        .or_else(|| {
            entries
                .iter()
                .find(|entry| non_empty_email(entry.value.as_deref()).is_ok())
        })
        .map_or(Err(TierError::NoEmail), |entry| {
            non_empty_email(entry.value.as_deref())
        })
}

fn non_empty_email(value: Option<&str>) -> Result<String, TierError> {
    value
        .map(str::trim)
        .filter(|email| !email.is_empty())
        .map(str::to_string)
        .ok_or(TierError::NoEmail)
}
