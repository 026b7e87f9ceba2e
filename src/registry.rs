//! Process-wide shared state
//!
//! The health table and the stage dispatch queue are the only mutable state
//! shared across sessions. Both sit behind one coarse lock that is only held
//! for short bookkeeping, never while a stage or probe runs.

use crate::health::{Component, ComponentStatus, HealthRecord};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A stage attempt that holds (or waits for) a dispatch slot
#[derive(Debug, Clone)]
pub struct RunningAttempt {
    pub session_id: String,
    pub stage: String,
    pub attempt: u32,
    pub started: Instant,
    /// Cancels this attempt only, not the session
    pub cancel: CancellationToken,
}

struct HealthEntry {
    last_beat: Instant,
    last_beat_at: DateTime<Utc>,
    status: ComponentStatus,
    detail: Option<String>,
}

struct Waiter {
    id: u64,
    attempt: RunningAttempt,
    tx: oneshot::Sender<Slot>,
}

struct Inner {
    health: BTreeMap<Component, HealthEntry>,
    ceiling: usize,
    running: HashMap<u64, RunningAttempt>,
    waiting: VecDeque<Waiter>,
    next_id: u64,
    peak_running: usize,
}

pub struct Registry {
    inner: Mutex<Inner>,
}

/// Permission to execute one stage attempt; released on drop
pub struct Slot {
    registry: Arc<Registry>,
    id: u64,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}

/// Takes a queued waiter out of line when its acquire is dropped
struct QueuedWaiter<'a> {
    registry: &'a Registry,
    id: u64,
}

impl Drop for QueuedWaiter<'_> {
    fn drop(&mut self) {
        let id = self.id;
        self.registry.lock().waiting.retain(|w| w.id != id);
    }
}

impl Registry {
    /// Create a registry whose dispatch queue admits `ceiling` concurrent attempts
    pub fn new(ceiling: usize) -> Arc<Self> {
        let now = Instant::now();
        let health = Component::ALL
            .iter()
            .map(|c| {
                (
                    *c,
                    HealthEntry {
                        last_beat: now,
                        last_beat_at: Utc::now(),
                        status: ComponentStatus::Healthy,
                        detail: None,
                    },
                )
            })
            .collect();

        Arc::new(Self {
            inner: Mutex::new(Inner {
                health,
                ceiling: ceiling.max(1),
                running: HashMap::new(),
                waiting: VecDeque::new(),
                next_id: 0,
                peak_running: 0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves plain bookkeeping behind, keep going
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ------------------------------------------------------------------
    // Health table
    // ------------------------------------------------------------------

    /// Record activity for a component
    pub fn beat(&self, component: Component) {
        let mut inner = self.lock();
        if let Some(entry) = inner.health.get_mut(&component) {
            entry.last_beat = Instant::now();
            entry.last_beat_at = Utc::now();
        }
    }

    /// Time since the component last reported activity
    pub fn idle_for(&self, component: Component) -> Duration {
        let inner = self.lock();
        inner
            .health
            .get(&component)
            .map(|e| e.last_beat.elapsed())
            .unwrap_or_default()
    }

    pub fn set_status(&self, component: Component, status: ComponentStatus, detail: Option<String>) {
        let mut inner = self.lock();
        if let Some(entry) = inner.health.get_mut(&component) {
            entry.status = status;
            entry.detail = detail;
        }
    }

    pub fn status(&self, component: Component) -> Option<ComponentStatus> {
        self.lock().health.get(&component).map(|e| e.status)
    }

    pub fn health(&self) -> Vec<HealthRecord> {
        let inner = self.lock();
        inner
            .health
            .iter()
            .map(|(component, entry)| HealthRecord {
                component: *component,
                last_heartbeat: entry.last_beat_at,
                status: entry.status,
                detail: entry.detail.clone(),
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Dispatch queue
    // ------------------------------------------------------------------

    /// Wait for a dispatch slot. Waiters are admitted in FIFO order.
    pub async fn acquire(self: &Arc<Self>, attempt: RunningAttempt) -> Slot {
        let (rx, id) = {
            let mut inner = self.lock();
            let id = inner.next_id;
            inner.next_id += 1;

            if inner.running.len() < inner.ceiling && inner.waiting.is_empty() {
                inner.running.insert(id, attempt);
                inner.peak_running = inner.peak_running.max(inner.running.len());
                return Slot {
                    registry: Arc::clone(self),
                    id,
                };
            }

            debug!(
                "Queueing {}/{} attempt {} (running={}, queued={})",
                attempt.session_id,
                attempt.stage,
                attempt.attempt,
                inner.running.len(),
                inner.waiting.len()
            );
            let (tx, rx) = oneshot::channel();
            inner.waiting.push_back(Waiter { id, attempt, tx });
            (rx, id)
        };

        let _queued = QueuedWaiter { registry: self, id };
        match rx.await {
            Ok(slot) => slot,
            // The registry never drops a waiter's sender without sending
            Err(_) => unreachable!("dispatch waiter dropped without a slot"),
        }
    }

    fn release(self: &Arc<Self>, id: u64) {
        let handoff = {
            let mut inner = self.lock();
            inner.running.remove(&id);

            if inner.running.len() < inner.ceiling {
                inner.waiting.pop_front().map(|waiter| {
                    let mut attempt = waiter.attempt;
                    attempt.started = Instant::now();
                    inner.running.insert(waiter.id, attempt);
                    inner.peak_running = inner.peak_running.max(inner.running.len());
                    (waiter.tx, waiter.id)
                })
            } else {
                None
            }
        };

        // Hand off outside the lock. If the waiter is gone the slot comes back
        // and dropping it releases to the next waiter.
        if let Some((tx, next_id)) = handoff {
            let slot = Slot {
                registry: Arc::clone(self),
                id: next_id,
            };
            let _ = tx.send(slot);
        }
    }

    /// Attempts currently holding a slot
    pub fn running(&self) -> Vec<RunningAttempt> {
        self.lock().running.values().cloned().collect()
    }

    /// Attempts that have held a slot longer than `threshold`
    pub fn stale_attempts(&self, threshold: Duration) -> Vec<RunningAttempt> {
        self.lock()
            .running
            .values()
            .filter(|a| a.started.elapsed() > threshold && !a.cancel.is_cancelled())
            .cloned()
            .collect()
    }

    pub fn queued(&self) -> usize {
        self.lock().waiting.len()
    }

    /// Highest number of simultaneously running attempts observed
    pub fn peak_running(&self) -> usize {
        self.lock().peak_running
    }

    pub fn ceiling(&self) -> usize {
        self.lock().ceiling
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(stage: &str) -> RunningAttempt {
        RunningAttempt {
            session_id: "s".to_string(),
            stage: stage.to_string(),
            attempt: 1,
            started: Instant::now(),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_ceiling_queues_in_fifo_order() {
        let registry = Registry::new(1);
        let first = registry.acquire(attempt("a")).await;

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for (queued, name) in [(1, "b"), (2, "c")] {
            let registry_task = Arc::clone(&registry);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _slot = registry_task.acquire(attempt(name)).await;
                order.lock().unwrap().push(name);
            }));
            // Each waiter must be queued before the next one is spawned
            while registry.queued() < queued {
                tokio::task::yield_now().await;
            }
        }

        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec!["b", "c"]);
        assert_eq!(registry.peak_running(), 1);
        assert!(registry.running().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_waiter_leaves_the_queue() {
        let registry = Registry::new(1);
        let first = registry.acquire(attempt("a")).await;

        let waiting = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let _slot = registry.acquire(attempt("b")).await;
            })
        };
        while registry.queued() < 1 {
            tokio::task::yield_now().await;
        }

        waiting.abort();
        let _ = waiting.await;
        assert_eq!(registry.queued(), 0);

        // The freed slot is not handed to the abandoned waiter
        drop(first);
        assert!(registry.running().is_empty());
        let _next = registry.acquire(attempt("c")).await;
        assert_eq!(registry.running().len(), 1);
    }

    #[tokio::test]
    async fn test_health_defaults_to_healthy() {
        let registry = Registry::new(2);
        let records = registry.health();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.status == ComponentStatus::Healthy));
    }
}
