//! Output formatting for CLI results.
//!
//! Three formats: human-readable tables (default), JSON for scripting,
//! and quiet for exit-code-only use.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;

use tether_core::types::{HostRecord, Workload};

use crate::ops::StatusReport;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Quiet,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "quiet" => Ok(Self::Quiet),
            _ => Err(format!("unknown output format: {s}")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Json => write!(f, "json"),
            Self::Quiet => write!(f, "quiet"),
        }
    }
}

/// JSON envelope wrapping every `--output json` result.
#[derive(Serialize)]
pub struct JsonResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

impl<T: Serialize> JsonResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

impl JsonResponse<()> {
    pub fn error(message: &str) -> JsonResponse<()> {
        JsonResponse {
            success: false,
            data: None,
            error: Some(message.to_string()),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

pub fn print_json<T: Serialize>(response: &JsonResponse<T>) {
    match serde_json::to_string_pretty(response) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("Error: could not encode output: {e}"),
    }
}

/// Epoch millis as RFC 3339, or the raw number if out of range.
pub fn format_timestamp(ms: u64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ms as i64) {
        Some(ts) => ts.to_rfc3339_opts(SecondsFormat::Secs, true),
        None => ms.to_string(),
    }
}

fn workload_summary(workloads: &[Workload]) -> String {
    if workloads.is_empty() {
        return "-".to_string();
    }
    workloads
        .iter()
        .map(|w| format!("{}:{}", w.path, w.port))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn hosts_table(hosts: &[HostRecord]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Host ID",
        "Status",
        "Workloads",
        "Version",
        "Platform",
        "Last Seen",
    ]);
    for host in hosts {
        table.add_row(vec![
            host.host_id.clone(),
            host.status.to_string(),
            workload_summary(&host.active_workloads),
            host.version.clone(),
            host.platform.clone(),
            format_timestamp(host.last_seen),
        ]);
    }
    table
}

pub fn status_table(report: &StatusReport) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.add_row(vec![
        "Host".to_string(),
        report.host_id.clone().unwrap_or_else(|| "-".to_string()),
    ]);
    table.add_row(vec!["State".to_string(), report.state.clone()]);
    table.add_row(vec![
        "Credential".to_string(),
        if report.credential_present {
            "present".to_string()
        } else {
            "absent".to_string()
        },
    ]);
    match &report.host {
        Some(host) => {
            table.add_row(vec!["Presence".to_string(), host.status.to_string()]);
            table.add_row(vec![
                "Last Seen".to_string(),
                format_timestamp(host.last_seen),
            ]);
            table.add_row(vec![
                "Workloads".to_string(),
                workload_summary(&host.active_workloads),
            ]);
        }
        None => {
            table.add_row(vec!["Presence".to_string(), "unknown".to_string()]);
        }
    }
    table
}
