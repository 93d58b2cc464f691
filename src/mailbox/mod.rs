use std::sync::Arc;

use crate::config::OAuthConfig;
use crate::db::models::IntegrationRecord;
use crate::error::MailboxError;
use crate::store::IntegrationStore;

pub mod codec;
pub mod messages;
pub mod mime;
pub mod models;
pub mod provider;
pub mod resolver;
pub mod status;
pub mod token;

#[cfg(test)]
pub(crate) mod testing;

pub use messages::{MessageBodyDecoder, MessageLister};
pub use models::{AttachmentRef, FullMessage, ListOptions, MessageBody, MessageSummary};
pub use provider::{GoogleClient, ProviderApi};
pub use resolver::{EmailAddressResolver, Resolution, ResolverTier, TierAttempt, TierError};
pub use status::{IntegrationState, IntegrationStatus};
pub use token::TokenRefresher;

/// One merchant-facing entry point wiring the store and provider into
/// every mailbox component.
pub struct Mailbox {
    store: Arc<dyn IntegrationStore>,
    tokens: Arc<TokenRefresher>,
    resolver: EmailAddressResolver,
    lister: MessageLister,
    decoder: MessageBodyDecoder,
}

impl Mailbox {
    pub fn new(
        config: OAuthConfig,
        store: Arc<dyn IntegrationStore>,
        provider: Arc<dyn ProviderApi>,
    ) -> Result<Self, MailboxError> {
        config.validate()?;
        let max_concurrent = config.max_concurrent_fetches;
        let config = Arc::new(config);

        let tokens = Arc::new(TokenRefresher::new(
            config,
            store.clone(),
            provider.clone(),
        ));
        Ok(Self {
            resolver: EmailAddressResolver::new(store.clone(), provider.clone(), tokens.clone()),
            lister: MessageLister::new(provider.clone(), tokens.clone(), max_concurrent),
            decoder: MessageBodyDecoder::new(provider, tokens.clone()),
            tokens,
            store,
        })
    }

    /// Wire the real Google client.
    pub fn connect(config: OAuthConfig, store: Arc<dyn IntegrationStore>) -> Result<Self, MailboxError> {
        let provider = Arc::new(GoogleClient::new(&config)?);
        Self::new(config, store, provider)
    }

    pub fn tokens(&self) -> &TokenRefresher {
        &self.tokens
    }

    pub fn resolver(&self) -> &EmailAddressResolver {
        &self.resolver
    }

    pub fn authorization_url(
        &self,
        merchant_id: &str,
        login_hint: Option<&str>,
    ) -> Result<String, MailboxError> {
        self.tokens.authorization_url(merchant_id, login_hint)
    }

    pub async fn complete_authorization(
        &self,
        merchant_id: &str,
        code: &str,
    ) -> Result<IntegrationRecord, MailboxError> {
        self.tokens.complete_authorization(merchant_id, code).await
    }

    pub async fn ensure_valid_access_token(&self, merchant_id: &str) -> Result<String, MailboxError> {
        self.tokens.ensure_valid_access_token(merchant_id).await
    }

    pub async fn resolve_email(&self, merchant_id: &str) -> Result<Option<String>, MailboxError> {
        self.resolver.resolve_email(merchant_id).await
    }

    pub async fn resolve_with_diagnostics(
        &self,
        merchant_id: &str,
    ) -> Result<Resolution, MailboxError> {
        self.resolver.resolve_with_diagnostics(merchant_id).await
    }

    pub async fn set_email(&self, merchant_id: &str, email: &str) -> Result<(), MailboxError> {
        self.resolver.set_email(merchant_id, email).await
    }

    pub async fn invalidate_email(&self, merchant_id: &str) -> Result<(), MailboxError> {
        self.resolver.invalidate_email(merchant_id).await
    }

    pub async fn list_messages(
        &self,
        merchant_id: &str,
        options: &ListOptions,
    ) -> Result<Vec<MessageSummary>, MailboxError> {
        self.lister.list_messages(merchant_id, options).await
    }

    pub async fn fetch_full_message(
        &self,
        merchant_id: &str,
        message_id: &str,
    ) -> Result<FullMessage, MailboxError> {
        self.decoder.fetch_full_message(merchant_id, message_id).await
    }

    /// Health of the stored integration; never touches the network.
    pub async fn status(&self, merchant_id: &str) -> Result<IntegrationStatus, MailboxError> {
        IntegrationStatus::load(self.store.as_ref(), merchant_id).await
    }
}
