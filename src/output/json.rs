use anyhow::Result;

use crate::db::IntegrationSummary;
use crate::mailbox::{FullMessage, IntegrationStatus, MessageSummary};
use crate::output::ResolutionReport;

pub fn format_message_list(messages: &[MessageSummary]) -> Result<String> {
    Ok(serde_json::to_string_pretty(messages)?)
}

pub fn format_full_message(message: &FullMessage) -> Result<String> {
    Ok(serde_json::to_string_pretty(message)?)
}

pub fn format_status(status: &IntegrationStatus) -> Result<String> {
    Ok(serde_json::to_string_pretty(status)?)
}

pub fn format_resolution(report: &ResolutionReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

pub fn format_integrations(integrations: &[IntegrationSummary]) -> Result<String> {
    Ok(serde_json::to_string_pretty(integrations)?)
}
