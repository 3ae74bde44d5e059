//! Durable local state.
//!
//! Each piece of state lives in its own keyed blob under the data directory.
//! Writes go to a uniquely named sibling temp file and are renamed into place so readers never
//! see a partial blob.

use crate::model::{RunRecord, RunState};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

pub const HISTORY_KEY: &str = "hq_runs_history";
pub const AUTH_KEY: &str = "hq_finops_auth";
pub const HISTORY_CAPACITY: usize = 5;

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hq-finops")
}

/// File-backed key/value store: one file per key.
#[derive(Debug, Clone)]
pub struct KvStore {
    dir: PathBuf,
}

impl KvStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
        }
    }

    /// Replace the blob for `key`. Each write goes through its own temp file,
    /// so concurrent writers never clobber each other's half-written data.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir).context("create data dir")?;
        let path = self.path_for(key);
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{key}."))
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .with_context(|| format!("create temp file in {}", self.dir.display()))?;

        let written = tmp
            .write_all(value.as_bytes())
            .and_then(|()| tmp.as_file().sync_all());
        if let Err(e) = written {
            discard_temp(tmp, &e);
            return Err(e).context("write blob");
        }

        if let Err(e) = tmp.persist(&path) {
            discard_temp(e.file, &e.error);
            return Err(e.error).with_context(|| format!("replace {}", path.display()));
        }
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
        }
    }
}

fn discard_temp(tmp: NamedTempFile, original_error: &std::io::Error) {
    let temp_file = tmp.path().to_path_buf();
    if let Err(cleanup_err) = tmp.close() {
        tracing::warn!(
            event = "storage.temp_file_cleanup_failed",
            temp_file = %temp_file.display(),
            original_error = %original_error,
            cleanup_error = %cleanup_err
        );
    }
}

/// Capped, most-recent-first list of submitted runs.
pub struct HistoryStore {
    kv: KvStore,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(kv: KvStore) -> Self {
        Self {
            kv,
            lock: Mutex::new(()),
        }
    }

    /// Persisted runs, or an empty list if nothing is stored or the blob is corrupt.
    pub fn load(&self) -> Vec<RunRecord> {
        let raw = match self.kv.get(HISTORY_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!(event = "history.read_failed", error = %format!("{e:#}"));
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<RunRecord>>(&raw) {
            Ok(runs) => runs,
            Err(e) => {
                tracing::warn!(event = "history.corrupt", error = %e, "discarding unreadable run history");
                Vec::new()
            }
        }
    }

    /// Insert or replace by `run_id`, keeping the most recent runs only.
    pub fn save(&self, record: RunRecord) -> Result<()> {
        let _guard = self.lock.lock();
        let mut runs: Vec<RunRecord> = self
            .load()
            .into_iter()
            .filter(|r| r.run_id != record.run_id)
            .collect();
        tracing::debug!(event = "history.save", run_id = %record.run_id, state = %record.state);
        runs.insert(0, record);
        sort_recent_first(&mut runs);
        runs.truncate(HISTORY_CAPACITY);
        self.persist(&runs)
    }

    /// Replace the state of an existing run. Unknown run ids are ignored.
    pub fn update_state(&self, run_id: &str, state: &RunState) -> Result<()> {
        let _guard = self.lock.lock();
        let mut runs = self.load();
        let Some(run) = runs.iter_mut().find(|r| r.run_id == run_id) else {
            tracing::debug!(event = "history.update_skipped", run_id, "run not in history");
            return Ok(());
        };
        if run.state == *state {
            return Ok(());
        }
        run.state = state.clone();
        sort_recent_first(&mut runs);
        self.persist(&runs)
    }

    fn persist(&self, runs: &[RunRecord]) -> Result<()> {
        let body = serde_json::to_string_pretty(runs).context("serialize run history")?;
        self.kv.set(HISTORY_KEY, &body).context("persist run history")
    }
}

fn sort_recent_first(runs: &mut [RunRecord]) {
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
}

/// Persisted "logged in" flag for the operator.
#[derive(Debug, Clone)]
pub struct AuthStore {
    kv: KvStore,
}

impl AuthStore {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.kv.get(AUTH_KEY), Ok(Some(v)) if v.trim() == "1")
    }

    /// Check the supplied credentials and persist the flag on success.
    pub fn login(&self, username: &str, password: &str, expected: &Credentials) -> Result<()> {
        if username != expected.username || password != expected.password {
            tracing::warn!(event = "auth.login_rejected", username);
            anyhow::bail!("Invalid credentials");
        }
        self.kv.set(AUTH_KEY, "1")?;
        tracing::info!(event = "auth.login", username);
        Ok(())
    }

    pub fn logout(&self) -> Result<()> {
        self.kv.remove(AUTH_KEY)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}
