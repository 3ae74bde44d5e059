//! Keeps the run history in step with what a poll session observes.

use super::poller::{PollSession, PollSnapshot, StatusSource};
use crate::model::{RunRecord, RunState};
use crate::storage::HistoryStore;

/// Follow `session` to the end, writing each newly observed state into `history`.
///
/// `on_change` sees every published snapshot. The idle placeholder a session
/// starts with is never written.
pub(crate) async fn follow_run(
    session: &mut PollSession,
    history: &HistoryStore,
    mut on_change: impl FnMut(&PollSnapshot),
) -> PollSnapshot {
    let run_id = session.key().run_id.clone();
    let mut last_written: Option<RunState> = None;

    while let Some(snap) = session.next_change().await {
        if snap.details.is_some() && last_written.as_ref() != Some(&snap.state) {
            if let Err(e) = history.update_state(&run_id, &snap.state) {
                tracing::warn!(event = "history.update_failed", run_id = %run_id, error = %e);
            }
            last_written = Some(snap.state.clone());
        }
        on_change(&snap);
        if !snap.is_active {
            return snap;
        }
    }
    session.snapshot()
}

/// Result of re-querying one history entry.
#[derive(Debug)]
pub(crate) struct Refreshed {
    pub record: RunRecord,
    pub error: Option<String>,
}

/// Query the status of every non-terminal run once and store what comes back.
pub(crate) async fn refresh_history<S: StatusSource>(
    source: &S,
    history: &HistoryStore,
) -> Vec<Refreshed> {
    let mut out = Vec::new();
    for mut record in history.load() {
        if record.state.is_terminal() {
            out.push(Refreshed { record, error: None });
            continue;
        }
        match source.fetch_status(&record.run_id, record.workflow_kind).await {
            Ok(resp) => {
                if let Err(e) = history.update_state(&record.run_id, &resp.state) {
                    tracing::warn!(event = "history.update_failed", run_id = %record.run_id, error = %e);
                }
                record.state = resp.state;
                out.push(Refreshed { record, error: None });
            }
            Err(e) => {
                tracing::warn!(event = "history.refresh_failed", run_id = %record.run_id, error = %e);
                out.push(Refreshed {
                    record,
                    error: Some(e.to_string()),
                });
            }
        }
    }
    out
}
