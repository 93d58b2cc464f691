pub mod json;
pub mod table;

use anyhow::Result;
use serde::Serialize;

use crate::db::IntegrationSummary;
use crate::mailbox::{FullMessage, IntegrationStatus, MessageSummary, Resolution};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Table
        }
    }
}

/// Serializable view of a resolver run, one entry per tier attempted.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionReport {
    pub email: Option<String>,
    pub tier: Option<&'static str>,
    pub methods: Vec<TierReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TierReport {
    pub tier: &'static str,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Resolution> for ResolutionReport {
    fn from(resolution: &Resolution) -> Self {
        Self {
            email: resolution.email.clone(),
            tier: resolution.tier.map(|tier| tier.name()),
            methods: resolution
                .attempts
                .iter()
                .map(|attempt| match &attempt.outcome {
                    Ok(email) => TierReport {
                        tier: attempt.tier.name(),
                        success: true,
                        email: Some(email.clone()),
                        error: None,
                    },
                    Err(err) => TierReport {
                        tier: attempt.tier.name(),
                        success: false,
                        email: None,
                        error: Some(err.to_string()),
                    },
                })
                .collect(),
        }
    }
}

pub fn format_message_list(format: OutputFormat, messages: &[MessageSummary]) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_message_list(messages)),
        OutputFormat::Json => json::format_message_list(messages),
    }
}

pub fn format_full_message(format: OutputFormat, message: &FullMessage) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_full_message(message)),
        OutputFormat::Json => json::format_full_message(message),
    }
}

pub fn format_status(format: OutputFormat, status: &IntegrationStatus) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_status(status)),
        OutputFormat::Json => json::format_status(status),
    }
}

pub fn format_resolution(format: OutputFormat, resolution: &Resolution) -> Result<String> {
    let report = ResolutionReport::from(resolution);
    match format {
        OutputFormat::Table => Ok(table::format_resolution(&report)),
        OutputFormat::Json => json::format_resolution(&report),
    }
}

pub fn format_integrations(format: OutputFormat, integrations: &[IntegrationSummary]) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_integrations(integrations)),
        OutputFormat::Json => json::format_integrations(integrations),
    }
}
