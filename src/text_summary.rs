//! Text rendering for CLI output.
//!
//! Every builder returns plain lines; the caller decides where they go.

use crate::model::{HealthState, PollResponse, RunOutputs, RunRecord, SubmitResponse};
use crate::orchestrator::{PollKey, PollSnapshot, Refreshed};
use crate::qbo::record::ClientRecord;
use crate::qbo::status::ConnectionStatus;
use time::macros::format_description;
use time::OffsetDateTime;

const PLACEHOLDER: &str = "—";

fn format_started(at: OffsetDateTime) -> String {
    let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]Z");
    at.to_offset(time::UtcOffset::UTC)
        .format(&fmt)
        .unwrap_or_else(|_| at.to_string())
}

pub(crate) fn submitted_lines(resp: &SubmitResponse) -> Vec<String> {
    vec![
        format!("Submitted {} run {}", resp.run_kind, resp.run_id),
        format!("Status: {}", resp.status),
    ]
}

fn output_lines(outputs: &RunOutputs) -> Vec<String> {
    match outputs {
        RunOutputs::List(items) => items.iter().map(|i| format!("  - {i}")).collect(),
        RunOutputs::Map(map) => map.iter().map(|(k, v)| format!("  {k}: {v}")).collect(),
    }
}

/// Full status of one run as returned by a single query.
pub(crate) fn status_lines(resp: &PollResponse) -> Vec<String> {
    let mut lines = vec![
        format!("Run:   {} ({})", resp.run_id, resp.run_kind),
        format!("State: {}", resp.state),
    ];
    if let Some(outputs) = resp.outputs.as_ref().filter(|o| !o.is_empty()) {
        lines.push("Outputs:".to_string());
        lines.extend(output_lines(outputs));
    }
    if let Some(err) = resp.error.as_deref().filter(|e| !e.is_empty()) {
        lines.push(format!("Error: {err}"));
    }
    lines
}

/// One progress line per observed snapshot while watching.
pub(crate) fn progress_line(key: &PollKey, snap: &PollSnapshot) -> String {
    match &snap.error {
        Some(err) => format!("[{}] {}: polling stopped: {err}", key.kind, key.run_id),
        None => format!("[{}] {}: {}", key.kind, key.run_id, snap.state),
    }
}

/// Closing summary once a watched run stops.
pub(crate) fn final_lines(snap: &PollSnapshot) -> Vec<String> {
    match &snap.details {
        Some(details) => status_lines(details),
        None => vec![format!("State: {}", snap.state)],
    }
}

pub(crate) fn history_lines(records: &[RunRecord]) -> Vec<String> {
    if records.is_empty() {
        return vec!["No runs yet.".to_string()];
    }
    records
        .iter()
        .map(|r| {
            format!(
                "{:<6} {:<40} {:<10} {}",
                r.workflow_kind,
                r.run_id,
                r.state,
                format_started(r.started_at)
            )
        })
        .collect()
}

pub(crate) fn refreshed_history_lines(refreshed: &[Refreshed]) -> Vec<String> {
    let records: Vec<RunRecord> = refreshed.iter().map(|r| r.record.clone()).collect();
    let mut lines = history_lines(&records);
    for r in refreshed {
        if let Some(err) = &r.error {
            lines.push(format!("warning: could not refresh {}: {err}", r.record.run_id));
        }
    }
    lines
}

pub(crate) fn health_line(state: HealthState, message: Option<&str>) -> String {
    let label = match state {
        HealthState::Healthy => "healthy",
        HealthState::Unreachable => "unreachable",
    };
    match message.filter(|m| !m.is_empty()) {
        Some(m) => format!("Backend: {label} ({m})"),
        None => format!("Backend: {label}"),
    }
}

fn environments(record: &ClientRecord) -> String {
    if record.environments.is_empty() {
        return PLACEHOLDER.to_string();
    }
    record
        .environments
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn client_rows(rows: &[(ClientRecord, ConnectionStatus)]) -> Vec<String> {
    if rows.is_empty() {
        return vec!["No clients yet.".to_string()];
    }
    let mut lines = vec![format!(
        "{:<28} {:<24} {:<16} {:<10} {}",
        "NAME", "CLIENT ID", "ENVIRONMENTS", "STATUS", "CONNECTION"
    )];
    for (record, status) in rows {
        lines.push(format!(
            "{:<28} {:<24} {:<16} {:<10} {}",
            record.display_name,
            if record.client_id.is_empty() { PLACEHOLDER } else { record.client_id.as_str() },
            environments(record),
            record.display_status.as_deref().unwrap_or(PLACEHOLDER),
            status.label
        ));
    }
    lines
}

pub(crate) fn client_detail_lines(record: &ClientRecord, status: ConnectionStatus) -> Vec<String> {
    let mut lines = vec![
        format!("Name:         {}", record.display_name),
        format!("Client ID:    {}", record.client_id),
        format!("Environments: {}", environments(record)),
        format!("Status:       {}", record.coarse_status()),
        format!("Connection:   {}", status.label),
    ];
    if let Some(realm) = &record.realm_id {
        lines.push(format!("Realm ID:     {realm}"));
    }
    if let Some(err) = &record.last_error {
        lines.push(format!("Last error:   {err}"));
    }
    lines
}
