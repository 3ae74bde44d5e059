//! Run lifecycle: polling a submitted run and keeping the history in step.
//!
//! The CLI layer starts sessions through [`RunPoller`] and hands them to the
//! tracker, which owns the history writes.

pub mod poller;
mod tracker;

pub use poller::{PollKey, PollSession, PollSnapshot, RunPoller, StatusSource, DEFAULT_POLL_INTERVAL};
pub(crate) use tracker::{follow_run, refresh_history, Refreshed};
