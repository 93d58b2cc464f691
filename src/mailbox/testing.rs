//! Scripted in-process provider used by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::MailboxError;
use crate::mailbox::models::{
    GmailMessage, GmailProfile, ListQuery, MessageFormat, MessageList, PeopleProfile, TokenGrant,
    TokenResponse, UserInfo,
};
use crate::mailbox::provider::ProviderApi;

/// A scripted reply. A failure status of 401 maps to `Unauthorized`,
/// 0 maps to `TransientNetwork`, anything else to `Provider`.
#[derive(Debug, Clone)]
pub(crate) enum Reply<T> {
    Ok(T),
    Fail(u16, String),
}

impl<T: Clone> Reply<T> {
    fn resolve(&self, endpoint: &str) -> Result<T, MailboxError> {
        match self {
            Reply::Ok(value) => Ok(value.clone()),
            Reply::Fail(0, message) => Err(MailboxError::TransientNetwork {
                endpoint: endpoint.to_string(),
                message: message.clone(),
            }),
            Reply::Fail(401, body) => Err(MailboxError::Unauthorized { body: body.clone() }),
            Reply::Fail(status, body) => Err(MailboxError::Provider {
                status: *status,
                body: body.clone(),
            }),
        }
    }
}

fn missing<T>(endpoint: &str) -> Reply<T> {
    Reply::Fail(404, format!("no scripted reply for {endpoint}"))
}

#[derive(Default)]
pub(crate) struct FakeProvider {
    tokens: Mutex<VecDeque<Reply<TokenResponse>>>,
    list: Mutex<Option<Reply<MessageList>>>,
    messages: Mutex<HashMap<String, Reply<GmailMessage>>>,
    userinfo: Mutex<Option<Reply<UserInfo>>>,
    profile: Mutex<Option<Reply<GmailProfile>>>,
    people: Mutex<Option<Reply<PeopleProfile>>>,
    token_delay: Mutex<Option<Duration>>,
    message_delay: Mutex<Option<Duration>>,
    messages_in_flight: AtomicUsize,
    peak_messages_in_flight: AtomicUsize,
    calls: Mutex<Vec<String>>,
    grants: Mutex<Vec<TokenGrant>>,
    list_queries: Mutex<Vec<ListQuery>>,
    bearer_tokens: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_token(&self, reply: Reply<TokenResponse>) {
        self.tokens.lock().expect("lock").push_back(reply);
    }

    pub(crate) fn set_token_delay(&self, delay: Duration) {
        *self.token_delay.lock().expect("lock") = Some(delay);
    }

    /// Hold every message fetch open for `delay` so overlap is observable.
    pub(crate) fn set_message_delay(&self, delay: Duration) {
        *self.message_delay.lock().expect("lock") = Some(delay);
    }

    /// Most message fetches that were in flight at the same moment.
    pub(crate) fn peak_messages_in_flight(&self) -> usize {
        self.peak_messages_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn set_list(&self, reply: Reply<MessageList>) {
        *self.list.lock().expect("lock") = Some(reply);
    }

    pub(crate) fn set_message(&self, id: &str, reply: Reply<GmailMessage>) {
        self.messages
            .lock()
            .expect("lock")
            .insert(id.to_string(), reply);
    }

    pub(crate) fn set_userinfo(&self, reply: Reply<UserInfo>) {
        *self.userinfo.lock().expect("lock") = Some(reply);
    }

    pub(crate) fn set_profile(&self, reply: Reply<GmailProfile>) {
        *self.profile.lock().expect("lock") = Some(reply);
    }

    pub(crate) fn set_people(&self, reply: Reply<PeopleProfile>) {
        *self.people.lock().expect("lock") = Some(reply);
    }

    /// Every call in order, e.g. `token`, `list`, `get:m1:metadata`, `userinfo`.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock").clone()
    }

    pub(crate) fn call_count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub(crate) fn grants(&self) -> Vec<TokenGrant> {
        self.grants.lock().expect("lock").clone()
    }

    pub(crate) fn list_queries(&self) -> Vec<ListQuery> {
        self.list_queries.lock().expect("lock").clone()
    }

    pub(crate) fn bearer_tokens(&self) -> Vec<String> {
        self.bearer_tokens.lock().expect("lock").clone()
    }

    fn record(&self, call: String, access_token: Option<&str>) {
        self.calls.lock().expect("lock").push(call);
        if let Some(token) = access_token {
            self.bearer_tokens
                .lock()
                .expect("lock")
                .push(token.to_string());
        }
    }
}

#[async_trait]
impl ProviderApi for FakeProvider {
    async fn exchange_token(&self, grant: TokenGrant) -> Result<TokenResponse, MailboxError> {
        self.record("token".to_string(), None);
        self.grants.lock().expect("lock").push(grant);

        let delay = *self.token_delay.lock().expect("lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self
            .tokens
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| missing("token"));
        reply.resolve("token")
    }

    async fn list_messages(
        &self,
        access_token: &str,
        query: &ListQuery,
    ) -> Result<MessageList, MailboxError> {
        self.record("list".to_string(), Some(access_token));
        self.list_queries.lock().expect("lock").push(query.clone());
        let reply = self
            .list
            .lock()
            .expect("lock")
            .clone()
            .unwrap_or_else(|| missing("list"));
        reply.resolve("list")
    }

    async fn get_message(
        &self,
        access_token: &str,
        message_id: &str,
        format: MessageFormat,
    ) -> Result<GmailMessage, MailboxError> {
        self.record(
            format!("get:{message_id}:{}", format.as_query_value()),
            Some(access_token),
        );

        let in_flight = self.messages_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_messages_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);
        let delay = *self.message_delay.lock().expect("lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.messages_in_flight.fetch_sub(1, Ordering::SeqCst);

        let reply = self
            .messages
            .lock()
            .expect("lock")
            .get(message_id)
            .cloned()
            .unwrap_or_else(|| missing("message"));
        reply.resolve("message")
    }

    async fn userinfo(&self, access_token: &str) -> Result<UserInfo, MailboxError> {
        self.record("userinfo".to_string(), Some(access_token));
        let reply = self
            .userinfo
            .lock()
            .expect("lock")
            .clone()
            .unwrap_or_else(|| missing("userinfo"));
        reply.resolve("userinfo")
    }

    async fn profile(&self, access_token: &str) -> Result<GmailProfile, MailboxError> {
        self.record("profile".to_string(), Some(access_token));
        let reply = self
            .profile
            .lock()
            .expect("lock")
            .clone()
            .unwrap_or_else(|| missing("profile"));
        reply.resolve("profile")
    }

    async fn people_me(&self, access_token: &str) -> Result<PeopleProfile, MailboxError> {
        self.record("people".to_string(), Some(access_token));
        let reply = self
            .people
            .lock()
            .expect("lock")
            .clone()
            .unwrap_or_else(|| missing("people"));
        reply.resolve("people")
    }
}

pub(crate) fn token_response(access_token: &str, refresh_token: Option<&str>) -> TokenResponse {
    TokenResponse {
        access_token: access_token.to_string(),
        refresh_token: refresh_token.map(str::to_string),
        expires_in: 3600,
        token_type: Some("Bearer".to_string()),
        scope: Some("openid email https://www.googleapis.com/auth/gmail.readonly".to_string()),
        id_token: None,
    }
}
