use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::error::MailboxError;
use crate::mailbox::mime;
use crate::mailbox::models::{
    FullMessage, GmailMessage, ListOptions, ListQuery, MessageFormat, MessagePart, MessageSummary,
};
use crate::mailbox::provider::ProviderApi;
use crate::mailbox::token::TokenRefresher;

const NO_SUBJECT: &str = "(No Subject)";

/// Lists a mailbox and fetches per-message metadata with bounded fan-out.
pub struct MessageLister {
    provider: Arc<dyn ProviderApi>,
    tokens: Arc<TokenRefresher>,
    max_concurrent: usize,
}

impl MessageLister {
    pub fn new(
        provider: Arc<dyn ProviderApi>,
        tokens: Arc<TokenRefresher>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            provider,
            tokens,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Summaries in list order. A message whose detail fetch fails is
    /// dropped; token and authorization failures abort the listing.
    pub async fn list_messages(
        &self,
        merchant_id: &str,
        options: &ListOptions,
    ) -> Result<Vec<MessageSummary>, MailboxError> {
        let access_token = self.tokens.ensure_valid_access_token(merchant_id).await?;
        let query = ListQuery {
            max_results: options.max_results,
            label_ids: options
                .label_ids
                .iter()
                .map(|label| label.trim().to_string())
                .filter(|label| !label.is_empty())
                .collect(),
        };

        let listed = match self.provider.list_messages(&access_token, &query).await {
            Ok(listed) => listed,
            Err(err) => return Err(self.tokens.note_provider_error(merchant_id, err).await),
        };
        let refs = listed.messages.unwrap_or_default();
        debug!(merchant_id, count = refs.len(), "listed message ids");

        let token = access_token.as_str();
        let fetched: Vec<(String, Result<GmailMessage, MailboxError>)> = stream::iter(refs)
            .map(|message_ref| async move {
                let result = self
                    .provider
                    .get_message(token, &message_ref.id, MessageFormat::Metadata)
                    .await;
                (message_ref.id, result)
            })
            .buffered(self.max_concurrent)
            .collect()
            .await;

        let mut summaries = Vec::with_capacity(fetched.len());
        for (id, result) in fetched {
            match result {
                Ok(message) => summaries.push(summarize(message)),
                Err(err) if err.aborts_operation() => {
                    return Err(self.tokens.note_provider_error(merchant_id, err).await)
                }
                Err(err) => {
                    warn!(merchant_id, message_id = %id, error = %err, "dropping message after detail fetch failed");
                }
            }
        }
        Ok(summaries)
    }
}

/// Fetches one message in full format and walks its MIME tree.
pub struct MessageBodyDecoder {
    provider: Arc<dyn ProviderApi>,
    tokens: Arc<TokenRefresher>,
}

impl MessageBodyDecoder {
    pub fn new(provider: Arc<dyn ProviderApi>, tokens: Arc<TokenRefresher>) -> Self {
        Self { provider, tokens }
    }

    pub async fn fetch_full_message(
        &self,
        merchant_id: &str,
        message_id: &str,
    ) -> Result<FullMessage, MailboxError> {
        let access_token = self.tokens.ensure_valid_access_token(merchant_id).await?;
        match self
            .provider
            .get_message(&access_token, message_id, MessageFormat::Full)
            .await
        {
            Ok(message) => decode_full(message),
            Err(err) => Err(self.tokens.note_provider_error(merchant_id, err).await),
        }
    }
}

pub fn summarize(message: GmailMessage) -> MessageSummary {
    let payload = message.payload.unwrap_or_default();
    let headers = HeaderFields::read(&payload, Utc::now());

    MessageSummary {
        id: message.id,
        thread_id: message.thread_id,
        snippet: message.snippet.unwrap_or_default(),
        from: headers.from,
        subject: headers.subject,
        date: headers.date,
        has_attachments: mime::top_level_has_attachments(&payload),
    }
}

pub fn decode_full(message: GmailMessage) -> Result<FullMessage, MailboxError> {
    let payload = message.payload.unwrap_or_default();
    let headers = HeaderFields::read(&payload, Utc::now());
    let (body, attachments) = mime::walk_payload(&payload)?.into_parts();

    Ok(FullMessage {
        id: message.id,
        thread_id: message.thread_id,
        snippet: message.snippet.unwrap_or_default(),
        from: headers.from,
        to: headers.to,
        subject: headers.subject,
        date: headers.date,
        body,
        has_attachments: !attachments.is_empty(),
        attachments,
    })
}

struct HeaderFields {
    subject: String,
    from: String,
    to: String,
    date: DateTime<Utc>,
}

impl HeaderFields {
    fn read(payload: &MessagePart, now: DateTime<Utc>) -> Self {
        let text = |name: &str| payload.header(name).map(str::trim).unwrap_or("").to_string();
        let subject = text("Subject");

        Self {
            subject: if subject.is_empty() {
                NO_SUBJECT.to_string()
            } else {
                subject
            },
            from: text("From"),
            to: text("To"),
            date: payload
                .header("Date")
                .and_then(parse_header_date)
                .unwrap_or(now),
        }
    }
}

/// RFC 2822 date, tolerating a trailing comment such as `(UTC)`.
pub fn parse_header_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc2822(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    let without_comment = match raw.rfind('(') {
        Some(start) if raw.ends_with(')') => raw[..start].trim_end(),
        _ => return None,
    };
    DateTime::parse_from_rfc2822(without_comment)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}
