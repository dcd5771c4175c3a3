//! Priority-aware admission for the global worker pool.
//!
//! Running targets are never interrupted; when a slot frees up at a
//! target boundary, the highest-priority waiter (FIFO within a class)
//! takes it.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

pub struct PriorityGate {
    permits: Arc<Semaphore>,
    /// Waiters keyed by (negated rank, arrival); the smallest key is the
    /// next admission.
    waiting: Mutex<BTreeSet<(i64, u64)>>,
    arrivals: AtomicU64,
    released: Notify,
}

/// Held for the duration of one target; dropping it frees the slot and
/// wakes the queue.
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    gate: Arc<PriorityGate>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.released.notify_waiters();
    }
}

impl PriorityGate {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            permits: Arc::new(Semaphore::new(capacity.max(1))),
            waiting: Mutex::new(BTreeSet::new()),
            arrivals: AtomicU64::new(0),
            released: Notify::new(),
        })
    }

    /// Wait for a slot; higher `rank` wins, ties go to earlier arrivals.
    pub async fn acquire(self: &Arc<Self>, rank: i64) -> GatePermit {
        let key = (-rank, self.arrivals.fetch_add(1, Ordering::SeqCst));
        self.waiting.lock().expect("gate waiting lock").insert(key);

        loop {
            let first = self
                .waiting
                .lock()
                .expect("gate waiting lock")
                .iter()
                .next()
                .copied();
            if first == Some(key) {
                if let Ok(permit) = self.permits.clone().try_acquire_owned() {
                    self.waiting.lock().expect("gate waiting lock").remove(&key);
                    // Let the next-best waiter re-check.
                    self.released.notify_waiters();
                    return GatePermit {
                        _permit: permit,
                        gate: self.clone(),
                    };
                }
            }
            // Woken by a release; the timeout covers missed wakeups.
            let _ = tokio::time::timeout(Duration::from_millis(50), self.released.notified()).await;
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn higher_priority_waiter_admits_first() {
        let gate = PriorityGate::new(1);
        let held = gate.acquire(1).await;

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        // A low-priority waiter arrives before an urgent one.
        for (rank, tag) in [(0i64, "low"), (3, "urgent")] {
            let gate = gate.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let permit = gate.acquire(rank).await;
                order.lock().unwrap().push(tag);
                drop(permit);
            }));
            // Deterministic arrival order.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        drop(held);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec!["urgent", "low"]);
    }

    #[tokio::test(start_paused = true)]
    async fn fifo_within_a_priority_class() {
        let gate = PriorityGate::new(1);
        let held = gate.acquire(2).await;

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for tag in ["first", "second", "third"] {
            let gate = gate.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let permit = gate.acquire(1).await;
                order.lock().unwrap().push(tag);
                drop(permit);
            }));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        drop(held);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_bounds_concurrent_holders() {
        let gate = PriorityGate::new(2);
        let a = gate.acquire(0).await;
        let _b = gate.acquire(0).await;
        assert_eq!(gate.available(), 0);
        drop(a);
        let _c = gate.acquire(0).await;
        assert_eq!(gate.available(), 0);
    }
}
