use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use time::OffsetDateTime;

/// Backend workflow that produced a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowKind {
    /// Bank-statement ingestion
    Part1,
    /// QuickBooks export
    Part2,
}

impl WorkflowKind {
    /// Value used in the `dag` query parameter and the submission path.
    pub fn as_query_str(self) -> &'static str {
        match self {
            WorkflowKind::Part1 => "part1",
            WorkflowKind::Part2 => "part2",
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_query_str())
    }
}

/// Run state as reported by the backend. Unknown values pass through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RunState {
    #[default]
    Idle,
    Queued,
    Running,
    Success,
    Failed,
    Other(String),
}

impl RunState {
    pub fn as_str(&self) -> &str {
        match self {
            RunState::Idle => "idle",
            RunState::Queued => "queued",
            RunState::Running => "running",
            RunState::Success => "success",
            RunState::Failed => "failed",
            RunState::Other(s) => s,
        }
    }

    /// No further state change is expected once a run is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Success | RunState::Failed)
    }
}

impl From<String> for RunState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "idle" => RunState::Idle,
            "queued" => RunState::Queued,
            "running" => RunState::Running,
            "success" => RunState::Success,
            "failed" => RunState::Failed,
            _ => RunState::Other(s),
        }
    }
}

impl From<&str> for RunState {
    fn from(s: &str) -> Self {
        RunState::from(s.to_string())
    }
}

impl From<RunState> for String {
    fn from(state: RunState) -> Self {
        match state {
            RunState::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One submitted run as kept in the local history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub workflow_kind: WorkflowKind,
    pub run_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(default)]
    pub state: RunState,
}

impl RunRecord {
    /// Record for a run the backend just accepted.
    pub fn queued(workflow_kind: WorkflowKind, run_id: impl Into<String>) -> Self {
        Self {
            workflow_kind,
            run_id: run_id.into(),
            started_at: OffsetDateTime::now_utc(),
            state: RunState::Queued,
        }
    }
}

/// Structured outputs attached to a run status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunOutputs {
    List(Vec<String>),
    Map(BTreeMap<String, String>),
}

impl RunOutputs {
    pub fn is_empty(&self) -> bool {
        match self {
            RunOutputs::List(items) => items.is_empty(),
            RunOutputs::Map(map) => map.is_empty(),
        }
    }
}

/// Payload of the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollResponse {
    #[serde(alias = "dag")]
    pub run_kind: String,
    pub run_id: String,
    pub state: RunState,
    #[serde(default)]
    pub outputs: Option<RunOutputs>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Payload of the submission endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    #[serde(alias = "dag")]
    pub run_kind: String,
    #[serde(alias = "dag_run_id")]
    pub run_id: String,
    pub status: String,
}

/// Data source for the QuickBooks export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportSource {
    #[default]
    Warehouse,
    Samples,
}

impl ExportSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportSource::Warehouse => "warehouse",
            ExportSource::Samples => "samples",
        }
    }
}

/// Parameters for a workflow submission, validated before sending.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub kind: WorkflowKind,
    pub week_year: i32,
    pub week_num: u8,
    pub notify_email: String,
    pub files: Vec<PathBuf>,
    /// Only meaningful for part2.
    pub source: Option<ExportSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    #[serde(default)]
    pub status: Option<serde_json::Value>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unreachable,
}

impl HealthResponse {
    /// A missing or non-string status counts as healthy.
    pub fn health_state(&self) -> HealthState {
        match self.status.as_ref().and_then(|s| s.as_str()) {
            Some(s) if !s.eq_ignore_ascii_case("ok") => HealthState::Unreachable,
            _ => HealthState::Healthy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_state_round_trips_unknown_values() {
        let state: RunState = serde_json::from_value(json!("up_for_retry")).unwrap();
        assert_eq!(state, RunState::Other("up_for_retry".into()));
        assert!(!state.is_terminal());
        assert_eq!(serde_json::to_value(&state).unwrap(), json!("up_for_retry"));
    }

    #[test]
    fn only_success_and_failed_are_terminal() {
        assert!(RunState::Success.is_terminal());
        assert!(RunState::Failed.is_terminal());
        for s in ["idle", "queued", "running", "SUCCESS"] {
            assert!(!RunState::from(s).is_terminal(), "{s}");
        }
    }

    #[test]
    fn poll_response_accepts_dag_alias_and_both_output_shapes() {
        let list: PollResponse = serde_json::from_value(json!({
            "dag": "part1",
            "run_id": "r-1",
            "state": "running",
            "outputs": ["a.csv", "b.csv"]
        }))
        .unwrap();
        assert_eq!(list.run_kind, "part1");
        assert_eq!(
            list.outputs,
            Some(RunOutputs::List(vec!["a.csv".into(), "b.csv".into()]))
        );

        let map: PollResponse = serde_json::from_value(json!({
            "run_kind": "part2",
            "run_id": "r-2",
            "state": "success",
            "outputs": {"report": "s3://bucket/report.csv"}
        }))
        .unwrap();
        match map.outputs {
            Some(RunOutputs::Map(m)) => assert_eq!(m["report"], "s3://bucket/report.csv"),
            other => panic!("unexpected outputs {other:?}"),
        }
    }

    #[test]
    fn submit_response_accepts_backend_field_names() {
        let resp: SubmitResponse = serde_json::from_value(json!({
            "dag": "part1_ingestion",
            "dag_run_id": "manual__2024",
            "status": "queued"
        }))
        .unwrap();
        assert_eq!(resp.run_id, "manual__2024");
    }

    #[test]
    fn health_state_classification() {
        let ok = HealthResponse {
            status: Some(json!("OK")),
            message: None,
        };
        assert_eq!(ok.health_state(), HealthState::Healthy);

        let degraded = HealthResponse {
            status: Some(json!("degraded")),
            message: Some("db down".into()),
        };
        assert_eq!(degraded.health_state(), HealthState::Unreachable);

        let missing = HealthResponse {
            status: None,
            message: None,
        };
        assert_eq!(missing.health_state(), HealthState::Healthy);
    }
}
