use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Caller-facing values ---

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageSummary {
    pub id: String,
    pub thread_id: String,
    pub snippet: String,
    pub from: String,
    pub subject: String,
    pub date: DateTime<Utc>,
    /// Top-level parts only; see `mime::top_level_has_attachments`.
    pub has_attachments: bool,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MessageBody {
    pub html: Option<String>,
    pub plain: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    pub attachment_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FullMessage {
    pub id: String,
    pub thread_id: String,
    pub snippet: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub date: DateTime<Utc>,
    pub body: MessageBody,
    /// Computed from the full recursive attachment list.
    pub has_attachments: bool,
    pub attachments: Vec<AttachmentRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOptions {
    pub label_ids: Vec<String>,
    pub max_results: u32,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            label_ids: Vec::new(),
            max_results: 20,
        }
    }
}

// --- OAuth wire types ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct OAuthErrorBody {
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl OAuthErrorBody {
    pub fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }

    pub fn is_invalid_grant(&self) -> bool {
        self.error.as_deref() == Some("invalid_grant")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenGrant {
    RefreshToken(String),
    AuthorizationCode { code: String, redirect_uri: String },
}

// --- Gmail API wire types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFormat {
    Metadata,
    Full,
}

impl MessageFormat {
    pub fn as_query_value(self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::Full => "full",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub max_results: u32,
    pub label_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageList {
    pub messages: Option<Vec<MessageRef>>,
    #[serde(rename = "nextPageToken")]
    pub next_page_token: Option<String>,
    #[serde(rename = "resultSizeEstimate")]
    pub result_size_estimate: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageRef {
    pub id: String,
    #[serde(rename = "threadId", default)]
    pub thread_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GmailMessage {
    pub id: String,
    #[serde(rename = "threadId", default)]
    pub thread_id: String,
    #[serde(rename = "labelIds", default)]
    pub label_ids: Option<Vec<String>>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub payload: Option<MessagePart>,
    #[serde(rename = "internalDate", default)]
    pub internal_date: Option<String>,
}

/// One node of the provider's MIME tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagePart {
    #[serde(rename = "partId", default)]
    pub part_id: Option<String>,
    #[serde(rename = "mimeType", default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub headers: Option<Vec<Header>>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Option<Vec<MessagePart>>,
}

impl MessagePart {
    pub fn mime_type(&self) -> String {
        self.mime_type
            .as_deref()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase()
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref().filter(|name| !name.is_empty())
    }

    pub fn inline_data(&self) -> Option<&str> {
        self.body
            .as_ref()
            .and_then(|body| body.data.as_deref())
            .filter(|data| !data.is_empty())
    }

    pub fn children(&self) -> &[MessagePart] {
        self.parts.as_deref().unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartBody {
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(rename = "attachmentId", default)]
    pub attachment_id: Option<String>,
}

// --- Identity endpoints ---

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GmailProfile {
    #[serde(rename = "emailAddress", default)]
    pub email_address: Option<String>,
    #[serde(rename = "messagesTotal", default)]
    pub messages_total: Option<u64>,
    #[serde(rename = "historyId", default)]
    pub history_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserInfo {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeopleProfile {
    #[serde(rename = "emailAddresses", default)]
    pub email_addresses: Option<Vec<PersonEmail>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersonEmail {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub metadata: Option<FieldMetadata>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldMetadata {
    #[serde(default)]
    pub primary: Option<bool>,
}
