//! Run status polling.
//!
//! A [`PollSession`] queries the status endpoint once immediately and then on a
//! fixed interval until the run reaches a terminal state, a query fails, or the
//! session is stopped. Failures are not retried: the error is recorded and the
//! session stops until someone starts a new one.

use crate::api::ingestion::IngestionClient;
use crate::errors::ApiError;
use crate::model::{PollResponse, RunState, WorkflowKind};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Anything that can report the state of a run.
pub trait StatusSource: Send + Sync + 'static {
    fn fetch_status(
        &self,
        run_id: &str,
        kind: WorkflowKind,
    ) -> impl Future<Output = Result<PollResponse, ApiError>> + Send;
}

impl StatusSource for IngestionClient {
    fn fetch_status(
        &self,
        run_id: &str,
        kind: WorkflowKind,
    ) -> impl Future<Output = Result<PollResponse, ApiError>> + Send {
        self.run_status(run_id, kind)
    }
}

/// What a session is polling.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PollKey {
    pub run_id: String,
    pub kind: WorkflowKind,
}

impl PollKey {
    pub fn new(run_id: impl Into<String>, kind: WorkflowKind) -> Self {
        Self {
            run_id: run_id.into(),
            kind,
        }
    }
}

/// Latest observations of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSnapshot {
    pub state: RunState,
    pub details: Option<PollResponse>,
    pub error: Option<String>,
    pub is_active: bool,
}

impl PollSnapshot {
    fn started() -> Self {
        Self {
            state: RunState::Idle,
            details: None,
            error: None,
            is_active: true,
        }
    }
}

pub struct RunPoller<S> {
    source: Arc<S>,
    interval: Duration,
}

impl<S> Clone for RunPoller<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            interval: self.interval,
        }
    }
}

impl<S: StatusSource> RunPoller<S> {
    pub fn new(source: Arc<S>, interval: Duration) -> Self {
        Self { source, interval }
    }

    /// Start polling `key`. The first query is issued right away.
    pub fn start(&self, key: PollKey) -> PollSession {
        let snapshot_tx = Arc::new(watch::Sender::new(PollSnapshot::started()));
        let snapshot_rx = snapshot_tx.subscribe();
        let (stop_tx, stop_rx) = watch::channel(false);

        tracing::info!(
            event = "poll.started",
            run_id = %key.run_id,
            kind = %key.kind,
            interval_ms = self.interval.as_millis() as u64
        );
        tokio::spawn(poll_loop(
            Arc::clone(&self.source),
            key.clone(),
            self.interval,
            Arc::clone(&snapshot_tx),
            stop_rx,
        ));

        PollSession {
            key,
            snapshot_tx,
            snapshot_rx,
            stop_tx,
        }
    }

    /// Point `session` at a new key, stopping its current timer first.
    pub fn restart(&self, session: &mut PollSession, key: PollKey) {
        session.stop();
        *session = self.start(key);
    }
}

/// Handle to one polling session. Dropping the handle stops the session.
pub struct PollSession {
    key: PollKey,
    snapshot_tx: Arc<watch::Sender<PollSnapshot>>,
    snapshot_rx: watch::Receiver<PollSnapshot>,
    stop_tx: watch::Sender<bool>,
}

impl PollSession {
    pub fn key(&self) -> &PollKey {
        &self.key
    }

    pub fn snapshot(&self) -> PollSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        self.snapshot_rx.borrow().is_active
    }

    /// Cancel the timer. A query already in flight completes but its result is discarded.
    /// Stopping an inactive session does nothing.
    pub fn stop(&mut self) {
        if *self.stop_tx.borrow() {
            return;
        }
        self.stop_tx.send_replace(true);
        let was_active = self.snapshot_tx.send_if_modified(|s| {
            let was_active = s.is_active;
            s.is_active = false;
            was_active
        });
        if was_active {
            tracing::info!(event = "poll.stopped", run_id = %self.key.run_id);
        }
    }

    /// Wait for the next published snapshot. `None` once nothing more can change.
    pub async fn next_change(&mut self) -> Option<PollSnapshot> {
        let active = self.snapshot_rx.borrow().is_active;
        if !active && !self.snapshot_rx.has_changed().unwrap_or(false) {
            return None;
        }
        self.snapshot_rx.changed().await.ok()?;
        Some(self.snapshot_rx.borrow_and_update().clone())
    }

    /// Wait until the session is no longer polling and return its final snapshot.
    pub async fn wait_until_stopped(&mut self) -> PollSnapshot {
        if let Ok(s) = self.snapshot_rx.wait_for(|s| !s.is_active).await {
            return s.clone();
        }
        self.snapshot()
    }
}

impl Drop for PollSession {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop<S: StatusSource>(
    source: Arc<S>,
    key: PollKey,
    interval: Duration,
    snapshot_tx: Arc<watch::Sender<PollSnapshot>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            // Either a stop request or the session handle is gone.
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {}
        }

        let result = source.fetch_status(&key.run_id, key.kind).await;

        // The session may have been stopped while the query was in flight.
        if *stop_rx.borrow() {
            tracing::debug!(event = "poll.result_discarded", run_id = %key.run_id);
            break;
        }

        match result {
            Ok(resp) => {
                let terminal = resp.state.is_terminal();
                let state = resp.state.clone();
                snapshot_tx.send_modify(|s| {
                    s.state = resp.state.clone();
                    s.details = Some(resp);
                    if terminal {
                        s.is_active = false;
                    }
                });
                tracing::debug!(event = "poll.observed", run_id = %key.run_id, state = %state);
                if terminal {
                    tracing::info!(event = "poll.terminal", run_id = %key.run_id, state = %state);
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(event = "poll.failed", run_id = %key.run_id, error = %e);
                snapshot_tx.send_modify(|s| {
                    s.error = Some(e.to_string());
                    s.is_active = false;
                });
                break;
            }
        }
    }

    snapshot_tx.send_if_modified(|s| std::mem::replace(&mut s.is_active, false));
}
