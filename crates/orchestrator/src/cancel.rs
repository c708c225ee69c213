//! Cancellation Monitor (C10).
//!
//! `CancelToken`/`CancelMap` generalize `crates/gateway/src/runtime/cancel.rs`
//! verbatim — per-session atomic flag plus parent→child cascading groups
//! for delegated sub-orchestrations. [`CancellationMonitor`] adds what the
//! gateway's version didn't need: a background task that polls
//! [`Persistence::retrieve_run`] and trips the token once the run reaches
//! `cancelling`/`cancelled`, so a run cancelled from outside the process
//! (another API call against the same store) still stops this turn loop.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::persistence::Persistence;
use ic_domain::run::RunStatus;

/// A cancellation token that can be checked by the turn loop.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks active cancellation tokens per run, with group support for
/// cascading parent→child cancellation (used by delegated sub-runs).
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
    groups: Mutex<HashMap<String, HashSet<String>>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, run_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(run_id.to_owned(), token.clone());
        token
    }

    pub fn cancel(&self, run_id: &str) -> bool {
        let found = if let Some(token) = self.tokens.lock().get(run_id) {
            token.cancel();
            true
        } else {
            false
        };

        if let Some(children) = self.groups.lock().get(run_id) {
            let tokens = self.tokens.lock();
            for child_key in children {
                if let Some(child_token) = tokens.get(child_key) {
                    child_token.cancel();
                }
            }
        }

        found
    }

    pub fn remove(&self, run_id: &str) {
        self.tokens.lock().remove(run_id);
        self.groups.lock().remove(run_id);
    }

    pub fn is_running(&self, run_id: &str) -> bool {
        self.tokens.lock().contains_key(run_id)
    }

    pub fn add_to_group(&self, parent_run_id: &str, child_run_id: &str) {
        self.groups
            .lock()
            .entry(parent_run_id.to_owned())
            .or_default()
            .insert(child_run_id.to_owned());
    }

    pub fn remove_from_group(&self, parent_run_id: &str, child_run_id: &str) {
        let mut groups = self.groups.lock();
        if let Some(children) = groups.get_mut(parent_run_id) {
            children.remove(child_run_id);
            if children.is_empty() {
                groups.remove(parent_run_id);
            }
        }
    }
}

/// How often the background monitor re-checks the run's status against
/// the persistence boundary.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Watches one run's persisted status and trips its `CancelToken` the
/// moment the run leaves the active set (`cancelling`/`cancelled`) —
/// e.g. because a different process called `DELETE /runs/{id}`.
pub struct CancellationMonitor {
    handle: tokio::task::JoinHandle<()>,
}

impl CancellationMonitor {
    /// Spawn the polling task. Stops on its own once `token` is cancelled
    /// or the run reaches any terminal status, so callers don't need to
    /// explicitly join it on the happy path — dropping the returned
    /// monitor aborts it regardless.
    pub fn spawn(persistence: Arc<dyn Persistence>, run_id: String, token: CancelToken) -> Self {
        Self::spawn_with_interval(persistence, run_id, token, DEFAULT_POLL_INTERVAL)
    }

    pub fn spawn_with_interval(
        persistence: Arc<dyn Persistence>,
        run_id: String,
        token: CancelToken,
        interval: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                if token.is_cancelled() {
                    return;
                }
                match persistence.retrieve_run(&run_id).await {
                    Ok(run) => {
                        if matches!(run.status, RunStatus::Cancelling | RunStatus::Cancelled) {
                            token.cancel();
                            return;
                        }
                        if run.status.is_terminal() {
                            return;
                        }
                    }
                    Err(_) => return,
                }
                tokio::time::sleep(interval).await;
            }
        });
        Self { handle }
    }
}

impl Drop for CancellationMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
