use chrono::{DateTime, Utc};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::db::IntegrationSummary;
use crate::mailbox::{FullMessage, IntegrationStatus, MessageSummary};
use crate::output::ResolutionReport;

const FROM_WIDTH: usize = 28;
const SUBJECT_WIDTH: usize = 52;
const DATE_WIDTH: usize = 12;
const ATTACHMENT_WIDTH: usize = 3;
const TIER_WIDTH: usize = 18;

pub fn format_message_list(messages: &[MessageSummary]) -> String {
    if messages.is_empty() {
        return "No messages found.".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{:<from$}  {:<subject$}  {:<date$}  {:>att$}\n",
        "From",
        "Subject",
        "Date",
        "Att",
        from = FROM_WIDTH,
        subject = SUBJECT_WIDTH,
        date = DATE_WIDTH,
        att = ATTACHMENT_WIDTH
    ));
    out.push_str(&format!(
        "{}  {}  {}  {}\n",
        "-".repeat(FROM_WIDTH),
        "-".repeat(SUBJECT_WIDTH),
        "-".repeat(DATE_WIDTH),
        "-".repeat(ATTACHMENT_WIDTH)
    ));

    for message in messages {
        let from = if message.from.is_empty() {
            "(unknown)"
        } else {
            message.from.as_str()
        };
        out.push_str(&format!(
            "{}  {}  {}  {:>att$}\n",
            pad_to_width(&truncate_for_width(from, FROM_WIDTH), FROM_WIDTH),
            pad_to_width(&truncate_for_width(&message.subject, SUBJECT_WIDTH), SUBJECT_WIDTH),
            pad_to_width(&relative_date(&message.date), DATE_WIDTH),
            if message.has_attachments { "yes" } else { "" },
            att = ATTACHMENT_WIDTH
        ));
    }

    out
}

pub fn format_full_message(message: &FullMessage) -> String {
    let mut out = String::new();
    out.push_str(&format!("ID: {}\n", message.id));
    out.push_str(&format!("Thread: {}\n", message.thread_id));
    out.push_str(&format!("Subject: {}\n", message.subject));
    out.push_str(&format!("From: {}\n", or_unknown(&message.from)));
    if !message.to.is_empty() {
        out.push_str(&format!("To: {}\n", message.to));
    }
    out.push_str(&format!(
        "Date: {} ({})\n",
        message.date.to_rfc3339(),
        relative_date(&message.date)
    ));

    if !message.attachments.is_empty() {
        out.push('\n');
        out.push_str("Attachments\n");
        out.push_str("-----------\n");
        for attachment in &message.attachments {
            out.push_str(&format!(
                "{}  {}  {} bytes\n",
                attachment.filename, attachment.mime_type, attachment.size
            ));
        }
    }

    out.push('\n');
    out.push_str("Body\n");
    out.push_str("----\n");
    let body = message
        .body
        .plain
        .as_deref()
        .or(message.body.html.as_deref())
        .unwrap_or("(empty)");
    out.push_str(body);
    out.push('\n');
    out
}

pub fn format_status(status: &IntegrationStatus) -> String {
    let mut out = String::new();
    out.push_str(&format!("Merchant: {}\n", status.merchant_id));
    out.push_str(&format!("State:    {}\n", status.state.as_str()));
    out.push_str(&format!(
        "Email:    {}\n",
        status.email_address.as_deref().unwrap_or("(unresolved)")
    ));
    out.push_str(&format!("Access token:  {}\n", yes_no(status.has_access_token)));
    out.push_str(&format!("Refresh token: {}\n", yes_no(status.has_refresh_token)));
    if let Some(expires_in) = status.expires_in {
        if expires_in > 0 {
            out.push_str(&format!("Expires in:    {expires_in}s\n"));
        } else {
            out.push_str(&format!("Expired:       {}s ago\n", -expires_in));
        }
    }
    if status.state.needs_reconnect() {
        out.push_str("\nReconnect the mailbox to restore access.\n");
    }
    out
}

pub fn format_resolution(report: &ResolutionReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Email: {}\n",
        report.email.as_deref().unwrap_or("(unresolved)")
    ));
    if let Some(tier) = report.tier {
        out.push_str(&format!("Resolved by: {tier}\n"));
    }

    out.push('\n');
    out.push_str(&format!("{:<width$}  Result\n", "Tier", width = TIER_WIDTH));
    out.push_str(&format!("{}  {}\n", "-".repeat(TIER_WIDTH), "-".repeat(40)));
    for method in &report.methods {
        let detail = match (&method.email, &method.error) {
            (Some(email), _) => email.clone(),
            (None, Some(error)) => truncate_for_width(error, 72),
            (None, None) => "-".to_string(),
        };
        out.push_str(&format!(
            "{:<width$}  {}\n",
            method.tier,
            detail,
            width = TIER_WIDTH
        ));
    }
    out
}

pub fn format_integrations(integrations: &[IntegrationSummary]) -> String {
    if integrations.is_empty() {
        return "No integrations stored.".to_string();
    }

    let mut out = String::new();
    out.push_str("Merchant                    Provider  Updated\n");
    out.push_str("--------------------------  --------  ------------\n");
    for integration in integrations {
        let updated = DateTime::parse_from_rfc3339(&integration.updated_at)
            .map(|value| relative_date(&value.with_timezone(&Utc)))
            .unwrap_or_else(|_| integration.updated_at.clone());
        out.push_str(&format!(
            "{}  {:<8}  {}\n",
            pad_to_width(&truncate_for_width(&integration.merchant_id, 26), 26),
            integration.provider,
            updated
        ));
    }
    out
}

fn or_unknown(value: &str) -> &str {
    if value.is_empty() {
        "(unknown)"
    } else {
        value
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn relative_date(value: &DateTime<Utc>) -> String {
    let delta = Utc::now().signed_duration_since(*value);
    if delta.num_seconds() < 0 {
        return "in future".to_string();
    }
    if delta.num_minutes() < 1 {
        return "just now".to_string();
    }
    if delta.num_hours() < 1 {
        return format!("{}m ago", delta.num_minutes());
    }
    if delta.num_hours() < 24 {
        return format!("{}h ago", delta.num_hours());
    }
    if delta.num_days() == 1 {
        return "yesterday".to_string();
    }
    if delta.num_days() < 7 {
        return format!("{}d ago", delta.num_days());
    }
    value.format("%Y-%m-%d").to_string()
}

fn truncate_for_width(value: &str, max_width: usize) -> String {
    if UnicodeWidthStr::width(value) <= max_width {
        return value.to_string();
    }

    if max_width <= 1 {
        return "…".to_string();
    }

    let mut out = String::new();
    let mut width = 0usize;
    for c in value.chars() {
        let cw = UnicodeWidthChar::width(c).unwrap_or(0);
        if width + cw + 1 > max_width {
            break;
        }
        out.push(c);
        width += cw;
    }
    out.push('…');
    out
}

/// Pad by display width; `format!` pads by char count.
fn pad_to_width(value: &str, width: usize) -> String {
    let current = UnicodeWidthStr::width(value);
    if current >= width {
        return value.to_string();
    }
    format!("{value}{}", " ".repeat(width - current))
}
