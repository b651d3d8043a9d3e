//! Worker supervisor - owns every component worker thread.
//!
//! Workers are plain OS threads because guest hooks block. Each thread holds
//! an exit guard whose drop fires a oneshot, so shutdown can await all
//! workers from async code with one overall deadline, and abandon whatever
//! is still stuck in guest code when it passes.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;

struct WorkerEntry {
    name: String,
    exited: oneshot::Receiver<()>,
}

/// Fires the exit signal and drops the registry entry when the worker ends,
/// including by panic.
struct ExitGuard {
    id: u64,
    supervisor: Arc<Supervisor>,
    _signal: oneshot::Sender<()>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.supervisor.workers.remove(&self.id);
    }
}

#[derive(Default)]
pub struct Supervisor {
    workers: DashMap<u64, WorkerEntry>,
    next_id: AtomicU64,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of workers still running.
    pub fn active(&self) -> usize {
        self.workers.len()
    }

    /// Run `f` on a new named worker thread.
    pub fn spawn<F>(self: &Arc<Self>, name: impl Into<String>, f: F) -> io::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (signal, exited) = oneshot::channel();
        self.workers.insert(
            id,
            WorkerEntry {
                name: name.clone(),
                exited,
            },
        );

        let guard = ExitGuard {
            id,
            supervisor: Arc::clone(self),
            _signal: signal,
        };
        let spawned = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _guard = guard;
                f();
            });
        if let Err(e) = spawned {
            // The closure (and its guard) was dropped, which removed the entry.
            tracing::error!(worker = %name, error = %e, "Failed to spawn worker thread");
            return Err(e);
        }
        tracing::trace!(worker = %name, id, "Worker spawned");
        Ok(())
    }

    /// Wait for every worker to exit, up to `timeout` overall.
    ///
    /// Returns how many workers were abandoned.
    pub async fn join_all(&self, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;
        let ids: Vec<u64> = self.workers.iter().map(|e| *e.key()).collect();
        let mut abandoned = 0;

        for id in ids {
            // Entries vanish as workers exit; only wait on those still here.
            let Some((_, entry)) = self.workers.remove(&id) else {
                continue;
            };
            match tokio::time::timeout_at(deadline, entry.exited).await {
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!(worker = %entry.name, "Worker did not exit before shutdown deadline");
                    abandoned += 1;
                }
            }
        }

        if abandoned > 0 {
            tracing::warn!(abandoned, "Abandoning stuck workers");
        } else {
            tracing::debug!("All workers exited");
        }
        abandoned
    }
}
