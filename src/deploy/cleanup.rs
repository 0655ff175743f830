//! Deferred removal of transient working directories.
//!
//! A published deployment's working directory is removed after a grace
//! period. Pending removals are keyed by clean project name: publishing the
//! same name again cancels the stale task, which then removes its directory
//! right away instead of racing the newer one.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct Pending {
    ticket: u64,
    token: CancellationToken,
}

#[derive(Clone, Default)]
pub struct CleanupScheduler {
    pending: Arc<Mutex<HashMap<String, Pending>>>,
    tickets: Arc<AtomicU64>,
}

impl CleanupScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove `dir` after `grace`, or sooner if `key` is scheduled again or
    /// the scheduler is flushed. Removal failures are only logged.
    pub fn schedule(&self, key: &str, dir: PathBuf, grace: Duration) -> JoinHandle<()> {
        let ticket = self.tickets.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();

        let stale = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.to_string(),
                Pending {
                    ticket,
                    token: token.clone(),
                },
            );
        if let Some(stale) = stale {
            debug!(project = %key, "superseding pending cleanup");
            stale.token.cancel();
        }

        let pending = Arc::clone(&self.pending);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(grace) => {}
                _ = token.cancelled() => {
                    debug!(project = %key, dir = %dir.display(), "cleanup brought forward");
                }
            }

            let target = dir.clone();
            let result = tokio::task::spawn_blocking(move || std::fs::remove_dir_all(&target)).await;
            match result {
                Ok(Ok(())) => info!(project = %key, dir = %dir.display(), "removed working directory"),
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
                Ok(Err(e)) => warn!(project = %key, dir = %dir.display(), error = %e, "failed to remove working directory"),
                Err(e) => warn!(project = %key, error = %e, "cleanup task panicked"),
            }

            let mut pending = pending.lock().unwrap_or_else(PoisonError::into_inner);
            if pending.get(&key).is_some_and(|p| p.ticket == ticket) {
                pending.remove(&key);
            }
        })
    }

    /// Number of removals still waiting.
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Bring every pending removal forward.
    pub fn flush(&self) {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        for p in pending.values() {
            p.token.cancel();
        }
    }

    /// Flush, then wait until every removal task has finished.
    pub async fn drain(&self) {
        self.flush();
        while self.pending() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
