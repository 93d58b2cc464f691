use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use inboxlink::config::{Endpoints, OAuthConfig, Timeouts};
use inboxlink::db::models::IntegrationPatch;
use inboxlink::db::seal::SealingKey;
use inboxlink::db::Database;
use inboxlink::error::{MailboxError, RefreshCause};
use inboxlink::mailbox::codec::encode;
use inboxlink::mailbox::{IntegrationState, ListOptions, Mailbox, ResolverTier};
use inboxlink::store::{IntegrationStore, SqliteIntegrationStore};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MERCHANT: &str = "merchant-1";

fn temp_db_path() -> PathBuf {
    let root = std::env::temp_dir().join(format!("inboxlink-it-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&root).expect("create temp test root");
    root.join("inboxlink.db")
}

fn open_store(path: &Path, key: Option<SealingKey>) -> Arc<SqliteIntegrationStore> {
    let db = Database::open(path)
        .expect("open database")
        .with_sealing_key(key);
    Arc::new(SqliteIntegrationStore::new(db))
}

fn mailbox(server: &MockServer, store: Arc<SqliteIntegrationStore>) -> Mailbox {
    mailbox_with_timeouts(server, store, Timeouts::default())
}

fn mailbox_with_timeouts(
    server: &MockServer,
    store: Arc<SqliteIntegrationStore>,
    timeouts: Timeouts,
) -> Mailbox {
    let config = OAuthConfig::new("client-id", "client-secret", "https://app.example.com/callback")
        .with_endpoints(Endpoints::rooted_at(&server.uri()))
        .with_timeouts(timeouts);
    Mailbox::connect(config, store).expect("mailbox")
}

fn short_timeouts() -> Timeouts {
    Timeouts {
        token_exchange: Duration::from_millis(300),
        metadata_fetch: Duration::from_millis(300),
        full_fetch: Duration::from_millis(300),
        identity: Duration::from_millis(300),
    }
}

async fn seed(store: &SqliteIntegrationStore, access_token: &str, expires_at: i64) {
    store
        .merge(
            MERCHANT,
            &IntegrationPatch::new()
                .connected(true)
                .access_token(access_token)
                .refresh_token("refresh-1")
                .expires_at(expires_at)
                .scope("https://www.googleapis.com/auth/gmail.readonly")
                .token_type("Bearer"),
        )
        .await
        .expect("seed integration");
}

fn metadata_message(id: &str, subject: &str) -> serde_json::Value {
    json!({
        "id": id,
        "threadId": format!("thread-{id}"),
        "snippet": format!("Preview of {id}"),
        "payload": {
            "mimeType": "multipart/mixed",
            "headers": [
                { "name": "Subject", "value": subject },
                { "name": "From", "value": "Supplier <orders@supplier.example>" },
                { "name": "Date", "value": "Tue, 1 Jul 2025 10:52:37 +0000" }
            ],
            "parts": [
                { "partId": "0", "mimeType": "multipart/alternative", "filename": "" },
                { "partId": "1", "mimeType": "application/pdf", "filename": "order.pdf" }
            ]
        }
    })
}

#[tokio::test]
async fn expired_token_is_refreshed_before_listing() {
    let server = MockServer::start().await;
    let path_db = temp_db_path();
    let store = open_store(&path_db, None);
    seed(&store, "stale-token", Utc::now().timestamp() - 10).await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-1"))
        .and(body_string_contains("client_secret=client-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh-token",
            "expires_in": 3599,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages"))
        .and(header("authorization", "Bearer fresh-token"))
        .and(query_param("maxResults", "10"))
        .and(query_param("labelIds", "INBOX"))
        .and(query_param("labelIds", "UNREAD"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messages": [
                { "id": "a1", "threadId": "thread-a1" },
                { "id": "a2", "threadId": "thread-a2" },
                { "id": "a3", "threadId": "thread-a3" }
            ],
            "resultSizeEstimate": 3
        })))
        .expect(1)
        .mount(&server)
        .await;

    for (id, subject) in [("a1", "First order"), ("a3", "Third order")] {
        Mock::given(method("GET"))
            .and(path(format!("/gmail/v1/users/me/messages/{id}")))
            .and(query_param("format", "metadata"))
            .and(header("authorization", "Bearer fresh-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(metadata_message(id, subject)))
            .expect(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages/a2"))
        .respond_with(ResponseTemplate::new(500).set_body_string("backend error"))
        .mount(&server)
        .await;

    let mailbox = mailbox(&server, store.clone());
    let summaries = mailbox
        .list_messages(
            MERCHANT,
            &ListOptions {
                label_ids: vec!["INBOX".to_string(), "UNREAD".to_string()],
                max_results: 10,
            },
        )
        .await
        .expect("list messages");

    let ids: Vec<&str> = summaries.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["a1", "a3"]);
    assert_eq!(summaries[0].subject, "First order");
    assert_eq!(summaries[0].from, "Supplier <orders@supplier.example>");
    assert!(summaries[0].has_attachments);

    let record = store.get(MERCHANT).await.expect("record");
    assert_eq!(record.access_token, "fresh-token");
    assert_eq!(record.refresh_token(), Some("refresh-1"));
    assert!(record.expires_at > Utc::now().timestamp() + 3000);
}

#[tokio::test]
async fn full_message_is_decoded_from_the_mime_tree() {
    let server = MockServer::start().await;
    let store = open_store(&temp_db_path(), None);
    seed(&store, "valid-token", Utc::now().timestamp() + 600).await;

    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages/m-full"))
        .and(query_param("format", "full"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "m-full",
            "threadId": "t-full",
            "snippet": "Thanks for your order",
            "payload": {
                "mimeType": "multipart/mixed",
                "headers": [
                    { "name": "Subject", "value": "Order confirmation" },
                    { "name": "From", "value": "shop@example.com" },
                    { "name": "To", "value": "merchant@example.com" }
                ],
                "parts": [
                    {
                        "mimeType": "multipart/alternative",
                        "parts": [
                            { "mimeType": "text/plain", "body": { "size": 21, "data": encode("Thanks for your order".as_bytes()) } },
                            { "mimeType": "text/html", "body": { "size": 28, "data": encode("<p>Thanks for your order</p>".as_bytes()) } }
                        ]
                    },
                    {
                        "mimeType": "image/png",
                        "filename": "receipt.png",
                        "body": { "size": 5120, "attachmentId": "ANGjdJ8" }
                    }
                ]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let message = mailbox(&server, store)
        .fetch_full_message(MERCHANT, "m-full")
        .await
        .expect("full message");

    assert_eq!(message.subject, "Order confirmation");
    assert_eq!(message.to, "merchant@example.com");
    assert_eq!(message.body.plain.as_deref(), Some("Thanks for your order"));
    assert_eq!(message.body.html.as_deref(), Some("<p>Thanks for your order</p>"));
    assert_eq!(message.attachments.len(), 1);
    assert_eq!(message.attachments[0].attachment_id.as_deref(), Some("ANGjdJ8"));
    assert_eq!(message.attachments[0].size, 5120);
}

#[tokio::test]
async fn resolver_falls_back_to_gmail_profile_and_caches() {
    let server = MockServer::start().await;
    let store = open_store(&temp_db_path(), None);
    seed(&store, "valid-token", Utc::now().timestamp() + 600).await;

    Mock::given(method("GET"))
        .and(path("/v1/userinfo"))
        .respond_with(ResponseTemplate::new(403).set_body_string("insufficient scope"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/profile"))
        .and(header("authorization", "Bearer valid-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "emailAddress": "orders@merchant.example",
            "messagesTotal": 42,
            "historyId": "1234"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/people/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let mailbox = mailbox(&server, store.clone());
    let resolution = mailbox
        .resolve_with_diagnostics(MERCHANT)
        .await
        .expect("resolve");
    assert_eq!(resolution.email.as_deref(), Some("orders@merchant.example"));
    assert_eq!(resolution.tier, Some(ResolverTier::GmailProfile));

    // Cached: no further requests reach the mock server.
    let again = mailbox.resolve_email(MERCHANT).await.expect("cached");
    assert_eq!(again.as_deref(), Some("orders@merchant.example"));
    assert_eq!(
        store.get(MERCHANT).await.expect("record").email_address(),
        Some("orders@merchant.example")
    );
}

#[tokio::test]
async fn revoked_refresh_token_disconnects_the_integration() {
    let server = MockServer::start().await;
    let store = open_store(&temp_db_path(), None);
    seed(&store, "stale-token", 0).await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Token has been expired or revoked."
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mailbox = mailbox(&server, store);
    let err = mailbox
        .list_messages(MERCHANT, &ListOptions::default())
        .await
        .expect_err("refresh must fail");
    assert!(matches!(
        err,
        MailboxError::RefreshFailed {
            cause: RefreshCause::Rejected { status: 400, .. }
        }
    ));

    let status = mailbox.status(MERCHANT).await.expect("status");
    assert_eq!(status.state, IntegrationState::Disconnected);
}

#[tokio::test]
async fn rejected_bearer_token_surfaces_as_unauthorized() {
    let server = MockServer::start().await;
    let store = open_store(&temp_db_path(), None);
    seed(&store, "valid-token", Utc::now().timestamp() + 600).await;

    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "code": 401, "message": "Invalid Credentials" }
        })))
        .mount(&server)
        .await;

    let err = mailbox(&server, store.clone())
        .list_messages(MERCHANT, &ListOptions::default())
        .await
        .expect_err("401");
    assert!(matches!(err, MailboxError::Unauthorized { .. }));
    assert!(err.is_retryable());

    // The next call must refresh instead of replaying the rejected token.
    let record = store.get(MERCHANT).await.expect("record");
    assert_eq!(record.expires_at, 0);
    assert_eq!(record.access_token, "valid-token");
}

#[tokio::test]
async fn authorization_code_grant_stores_a_sealed_integration() {
    let server = MockServer::start().await;
    let db_path = temp_db_path();
    let key = SealingKey::from_bytes([7u8; 32]);
    let store = open_store(&db_path, Some(key.clone()));

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=4%2F0AX"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.first",
            "refresh_token": "1//refresh",
            "expires_in": 3599,
            "scope": "openid email https://www.googleapis.com/auth/gmail.readonly",
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let record = mailbox(&server, store.clone())
        .complete_authorization(MERCHANT, "4/0AX")
        .await
        .expect("authorize");
    assert!(record.connected);
    assert_eq!(record.refresh_token(), Some("1//refresh"));

    let raw: String = store
        .with_db(|db| {
            Ok(db.conn().query_row(
                "SELECT document FROM integrations WHERE merchant_id = ?1",
                [MERCHANT],
                |row| row.get(0),
            )?)
        })
        .expect("raw document");
    assert!(!raw.contains("ya29.first"));
    assert!(!raw.contains("1//refresh"));

    // A fresh handle with the same key reads the same record.
    let reopened = open_store(&db_path, Some(key));
    let record = reopened.get(MERCHANT).await.expect("reopened record");
    assert_eq!(record.access_token, "ya29.first");

    // Without the key the sealed document is unreadable.
    let keyless = open_store(&db_path, None);
    assert!(keyless.get(MERCHANT).await.is_err());
}

#[tokio::test]
async fn slow_full_fetch_times_out_as_transient_network() {
    let server = MockServer::start().await;
    let store = open_store(&temp_db_path(), None);
    seed(&store, "valid-token", Utc::now().timestamp() + 600).await;

    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages/slow"))
        .and(query_param("format", "full"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(metadata_message("slow", "Late"))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let err = mailbox_with_timeouts(&server, store, short_timeouts())
        .fetch_full_message(MERCHANT, "slow")
        .await
        .expect_err("timeout");
    assert!(matches!(err, MailboxError::TransientNetwork { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn slow_metadata_fetch_is_dropped_from_the_listing() {
    let server = MockServer::start().await;
    let store = open_store(&temp_db_path(), None);
    seed(&store, "valid-token", Utc::now().timestamp() + 600).await;

    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messages": [
                { "id": "fast", "threadId": "thread-fast" },
                { "id": "slow", "threadId": "thread-slow" }
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages/fast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(metadata_message("fast", "Quick")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(metadata_message("slow", "Late"))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let summaries = mailbox_with_timeouts(&server, store, short_timeouts())
        .list_messages(MERCHANT, &ListOptions::default())
        .await
        .expect("list messages");
    let ids: Vec<&str> = summaries.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["fast"]);
}

#[tokio::test]
async fn slow_token_endpoint_is_a_network_refresh_failure() {
    let server = MockServer::start().await;
    let store = open_store(&temp_db_path(), None);
    seed(&store, "stale-token", Utc::now().timestamp() - 10).await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access_token": "late", "expires_in": 3599 }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let mailbox = mailbox_with_timeouts(&server, store, short_timeouts());
    let err = mailbox
        .ensure_valid_access_token(MERCHANT)
        .await
        .expect_err("timeout");
    assert!(matches!(
        err,
        MailboxError::RefreshFailed {
            cause: RefreshCause::Network(_)
        }
    ));

    // A network failure does not disconnect the integration.
    let status = mailbox.status(MERCHANT).await.expect("status");
    assert_eq!(status.state, IntegrationState::Expired);
}

#[tokio::test]
async fn rate_limited_request_waits_for_retry_after() {
    let server = MockServer::start().await;
    let store = open_store(&temp_db_path(), None);
    seed(&store, "valid-token", Utc::now().timestamp() + 600).await;

    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "resultSizeEstimate": 0 })))
        .expect(1)
        .mount(&server)
        .await;

    let started = Instant::now();
    let summaries = mailbox(&server, store)
        .list_messages(MERCHANT, &ListOptions::default())
        .await
        .expect("list after retry");
    assert!(summaries.is_empty());
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn rate_limit_retries_are_bounded() {
    let server = MockServer::start().await;
    let store = open_store(&temp_db_path(), None);
    seed(&store, "valid-token", Utc::now().timestamp() + 600).await;

    // One attempt plus two retries.
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "0")
                .set_body_string("rate limited"),
        )
        .expect(3)
        .mount(&server)
        .await;

    let err = mailbox(&server, store)
        .list_messages(MERCHANT, &ListOptions::default())
        .await
        .expect_err("rate limited");
    assert!(matches!(err, MailboxError::Provider { status: 429, .. }));
    assert!(err.is_retryable());
}
