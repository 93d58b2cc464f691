//! Recursive walk over a message's MIME tree.
//!
//! The walker is a pure function: every call returns its own
//! [`WalkedBody`] and parents merge children in provider order, so
//! "last text part of a type wins" depends only on input order.

use crate::error::MailboxError;
use crate::mailbox::codec;
use crate::mailbox::models::{AttachmentRef, MessageBody, MessagePart};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkedBody {
    pub html: Option<String>,
    pub plain: Option<String>,
    pub attachments: Vec<AttachmentRef>,
}

impl WalkedBody {
    /// Fold `later` into `self`; text fields from `later` replace ours.
    fn merge(mut self, later: WalkedBody) -> Self {
        if later.html.is_some() {
            self.html = later.html;
        }
        if later.plain.is_some() {
            self.plain = later.plain;
        }
        self.attachments.extend(later.attachments);
        self
    }

    pub fn has_text(&self) -> bool {
        self.html.is_some() || self.plain.is_some()
    }

    pub fn into_parts(self) -> (MessageBody, Vec<AttachmentRef>) {
        (
            MessageBody {
                html: self.html,
                plain: self.plain,
            },
            self.attachments,
        )
    }
}

/// Walk a full-format payload into html/plain bodies and attachment refs.
pub fn walk_payload(root: &MessagePart) -> Result<WalkedBody, MailboxError> {
    let children = root.children();
    if children.is_empty() {
        // Single-part message: the root's data is the body even when the
        // part also carries a filename.
        let mut walked = classify_text(root)?;
        if let Some(filename) = root.filename() {
            walked.attachments.push(attachment_ref(root, filename));
        }
        return Ok(walked);
    }

    let mut walked = WalkedBody::default();
    for child in children {
        walked = walked.merge(walk_part(child)?);
    }

    // Some providers put the text on the container itself next to
    // attachment children.
    if !walked.has_text() && root.inline_data().is_some() {
        walked = walked.merge(classify_text(root)?);
    }
    Ok(walked)
}

fn walk_part(part: &MessagePart) -> Result<WalkedBody, MailboxError> {
    if let Some(filename) = part.filename() {
        return Ok(WalkedBody {
            attachments: vec![attachment_ref(part, filename)],
            ..WalkedBody::default()
        });
    }

    if part.mime_type().starts_with("multipart/") {
        let mut walked = WalkedBody::default();
        for child in part.children() {
            walked = walked.merge(walk_part(child)?);
        }
        return Ok(walked);
    }

    classify_text(part)
}

fn classify_text(part: &MessagePart) -> Result<WalkedBody, MailboxError> {
    let Some(data) = part.inline_data() else {
        return Ok(WalkedBody::default());
    };

    let mut walked = WalkedBody::default();
    match part.mime_type().as_str() {
        "text/html" => walked.html = Some(codec::decode(data)?),
        "text/plain" => walked.plain = Some(codec::decode(data)?),
        _ => {}
    }
    Ok(walked)
}

fn attachment_ref(part: &MessagePart, filename: &str) -> AttachmentRef {
    let body = part.body.as_ref();
    AttachmentRef {
        filename: filename.to_string(),
        mime_type: part
            .mime_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string()),
        size: body.and_then(|b| b.size).unwrap_or(0),
        attachment_id: body.and_then(|b| b.attachment_id.clone()),
    }
}

/// Metadata-path heuristic: only the root's direct children are checked.
/// Attachments nested deeper than one level are not counted.
pub fn top_level_has_attachments(root: &MessagePart) -> bool {
    root.filename().is_some() || root.children().iter().any(|part| part.filename().is_some())
}
