//! Request Tracker
//!
//! Correlates outbound request IDs with their waiters and enforces
//! per-request timeouts. IDs are allocated from a monotonically increasing
//! counter starting at 1 and are never reused within a connection's
//! lifetime.
//!
//! The entry map is touched from the connection task (complete/fail) and
//! from timer tasks (timeout fires), so it sits behind a plain mutex that is
//! never held across an await point. Exactly one of complete, fail, cancel,
//! or timeout resolves any given entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{trace, warn};

use crate::protocol::error::{McpError, McpResult};

/// One-shot reply channel for a pending request.
pub type Waiter = oneshot::Sender<McpResult<Value>>;

/// Counter snapshot for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    /// Requests ever tracked
    pub tracked: u64,
    /// Requests completed with a response
    pub completed: u64,
    /// Requests failed (including bulk fail-all)
    pub failed: u64,
    /// Requests cancelled by the caller
    pub cancelled: u64,
    /// Requests whose timer fired
    pub timed_out: u64,
}

struct Pending {
    method: String,
    waiter: Option<Waiter>,
    timer: Option<JoinHandle<()>>,
    started: Instant,
}

#[derive(Default)]
struct Counters {
    tracked: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    timed_out: AtomicU64,
}

/// Allocates request IDs and resolves them exactly once.
pub struct RequestTracker {
    next_id: AtomicU64,
    entries: Arc<Mutex<HashMap<u64, Pending>>>,
    counters: Arc<Counters>,
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestTracker {
    /// Create an empty tracker. The first allocated ID is 1.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Allocate the next request ID.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Register a pending request and arm its timeout timer.
    ///
    /// `waiter` may be `None` for requests whose completion drives a state
    /// transition instead of replying to a caller (the initialize request).
    /// The timer delivers the timeout error itself, since no external caller
    /// is involved when it fires.
    pub fn track(&self, id: u64, method: impl Into<String>, waiter: Option<Waiter>, timeout: Duration) {
        let method = method.into();
        trace!(id, method = %method, timeout_ms = timeout.as_millis() as u64, "tracking request");

        {
            let mut entries = lock(&self.entries);
            entries.insert(
                id,
                Pending {
                    method,
                    waiter,
                    timer: None,
                    started: Instant::now(),
                },
            );
        }
        self.counters.tracked.fetch_add(1, Ordering::Relaxed);

        let entries = Arc::clone(&self.entries);
        let counters = Arc::clone(&self.counters);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let removed = lock(&entries).remove(&id);
            if let Some(pending) = removed {
                counters.timed_out.fetch_add(1, Ordering::Relaxed);
                warn!(
                    id,
                    method = %pending.method,
                    elapsed_ms = pending.started.elapsed().as_millis() as u64,
                    "request timed out"
                );
                if let Some(waiter) = pending.waiter {
                    let _ = waiter.send(Err(McpError::Timeout(timeout)));
                }
            }
        });

        // The entry may already have been resolved between insert and spawn;
        // in that case the timer has nothing to guard.
        let mut entries = lock(&self.entries);
        match entries.get_mut(&id) {
            Some(pending) => pending.timer = Some(timer),
            None => timer.abort(),
        }
    }

    /// Resolve an entry successfully, returning its waiter for the caller to
    /// notify.
    pub fn complete(&self, id: u64) -> Option<(Option<Waiter>, String)> {
        let pending = lock(&self.entries).remove(&id)?;
        if let Some(timer) = pending.timer {
            timer.abort();
        }
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
        trace!(
            id,
            method = %pending.method,
            elapsed_ms = pending.started.elapsed().as_millis() as u64,
            "request completed"
        );
        Some((pending.waiter, pending.method))
    }

    /// Resolve an entry as failed, returning its waiter for the caller to
    /// notify with the error.
    pub fn fail(&self, id: u64) -> Option<(Option<Waiter>, String)> {
        let pending = lock(&self.entries).remove(&id)?;
        if let Some(timer) = pending.timer {
            timer.abort();
        }
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        Some((pending.waiter, pending.method))
    }

    /// Drop an entry because its caller stopped waiting. The waiter is
    /// discarded; a late server reply will simply find nothing to resolve.
    pub fn cancel(&self, id: u64) -> bool {
        let removed = lock(&self.entries).remove(&id);
        match removed {
            Some(pending) => {
                if let Some(timer) = pending.timer {
                    timer.abort();
                }
                self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                trace!(id, method = %pending.method, "request cancelled");
                true
            }
            None => false,
        }
    }

    /// Atomically remove every entry, returning the waiters for the caller
    /// to notify (used when the transport closes underneath us).
    pub fn fail_all(&self) -> Vec<(u64, Option<Waiter>, String)> {
        let drained: Vec<(u64, Pending)> = lock(&self.entries).drain().collect();
        let mut waiters = Vec::with_capacity(drained.len());
        for (id, pending) in drained {
            if let Some(timer) = pending.timer {
                timer.abort();
            }
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            waiters.push((id, pending.waiter, pending.method));
        }
        waiters
    }

    /// Number of requests currently in flight.
    pub fn pending_count(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            tracked: self.counters.tracked.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for RequestTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestTracker")
            .field("pending", &self.pending_count())
            .field("stats", &self.stats())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // Entries are plain data; a poisoned lock only means a panicking thread
    // died mid-update, and the map is still structurally sound.
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const LONG: Duration = Duration::from_secs(30);

    #[test]
    fn test_ids_strictly_monotonic_from_one() {
        let tracker = RequestTracker::new();
        assert_eq!(tracker.next_id(), 1);
        assert_eq!(tracker.next_id(), 2);
        assert_eq!(tracker.next_id(), 3);
    }

    #[tokio::test]
    async fn test_complete_delivers_to_waiter() {
        let tracker = RequestTracker::new();
        let id = tracker.next_id();
        let (tx, rx) = oneshot::channel();
        tracker.track(id, "tools/list", Some(tx), LONG);
        assert_eq!(tracker.pending_count(), 1);

        let (waiter, method) = tracker.complete(id).unwrap();
        assert_eq!(method, "tools/list");
        waiter.unwrap().send(Ok(json!({"tools": []}))).unwrap();

        let result = rx.await.unwrap().unwrap();
        assert_eq!(result, json!({"tools": []}));
        assert_eq!(tracker.pending_count(), 0);
        assert_eq!(tracker.stats().completed, 1);
    }

    #[tokio::test]
    async fn test_at_most_one_resolution() {
        let tracker = RequestTracker::new();
        let id = tracker.next_id();
        let (tx, _rx) = oneshot::channel();
        tracker.track(id, "ping", Some(tx), LONG);

        assert!(tracker.complete(id).is_some());
        assert!(tracker.complete(id).is_none());
        assert!(tracker.fail(id).is_none());
        assert!(!tracker.cancel(id));
    }

    #[tokio::test]
    async fn test_fail_returns_waiter() {
        let tracker = RequestTracker::new();
        let id = tracker.next_id();
        let (tx, rx) = oneshot::channel();
        tracker.track(id, "tools/call", Some(tx), LONG);

        let (waiter, _) = tracker.fail(id).unwrap();
        waiter
            .unwrap()
            .send(Err(McpError::connection_closed("gone")))
            .unwrap();

        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, McpError::ConnectionClosed(_)));
        assert_eq!(tracker.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_timeout_delivers_itself() {
        let tracker = RequestTracker::new();
        let id = tracker.next_id();
        let (tx, rx) = oneshot::channel();
        tracker.track(id, "slow", Some(tx), Duration::from_millis(20));

        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, McpError::Timeout(_)));
        assert_eq!(tracker.pending_count(), 0);
        assert_eq!(tracker.stats().timed_out, 1);
    }

    #[tokio::test]
    async fn test_complete_disarms_timer() {
        let tracker = RequestTracker::new();
        let id = tracker.next_id();
        let (tx, rx) = oneshot::channel();
        tracker.track(id, "fast", Some(tx), Duration::from_millis(30));

        let (waiter, _) = tracker.complete(id).unwrap();
        waiter.unwrap().send(Ok(json!({}))).unwrap();
        assert!(rx.await.unwrap().is_ok());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(tracker.stats().timed_out, 0);
    }

    #[tokio::test]
    async fn test_cancel_removes_entry() {
        let tracker = RequestTracker::new();
        let id = tracker.next_id();
        let (tx, rx) = oneshot::channel();
        tracker.track(id, "tools/call", Some(tx), Duration::from_millis(30));

        assert!(tracker.cancel(id));
        assert_eq!(tracker.pending_count(), 0);
        assert_eq!(tracker.stats().cancelled, 1);

        // The waiter was dropped, not completed.
        assert!(rx.await.is_err());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(tracker.stats().timed_out, 0);
    }

    #[tokio::test]
    async fn test_fail_all_drains_everything() {
        let tracker = RequestTracker::new();
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let id = tracker.next_id();
            let (tx, rx) = oneshot::channel();
            tracker.track(id, "tools/call", Some(tx), LONG);
            receivers.push(rx);
        }
        assert_eq!(tracker.pending_count(), 3);

        let waiters = tracker.fail_all();
        assert_eq!(waiters.len(), 3);
        for (_, waiter, _) in waiters {
            let _ = waiter
                .unwrap()
                .send(Err(McpError::connection_closed("transport closed")));
        }

        for rx in receivers {
            let err = rx.await.unwrap().unwrap_err();
            assert_eq!(err.code(), crate::protocol::codes::CONNECTION_CLOSED);
        }
        assert_eq!(tracker.pending_count(), 0);
        assert_eq!(tracker.stats().failed, 3);
    }

    #[tokio::test]
    async fn test_waiterless_entry() {
        // The initialize request is tracked with no waiter.
        let tracker = RequestTracker::new();
        let id = tracker.next_id();
        tracker.track(id, "initialize", None, LONG);

        let (waiter, method) = tracker.complete(id).unwrap();
        assert!(waiter.is_none());
        assert_eq!(method, "initialize");
    }

    #[tokio::test]
    async fn test_dead_waiter_is_not_a_leak() {
        let tracker = RequestTracker::new();
        let id = tracker.next_id();
        let (tx, rx) = oneshot::channel();
        tracker.track(id, "tools/call", Some(tx), LONG);
        drop(rx);

        // Delivery to a dead waiter is a lost wake, but the entry still
        // resolves normally.
        let (waiter, _) = tracker.complete(id).unwrap();
        assert!(waiter.unwrap().send(Ok(json!({}))).is_err());
        assert_eq!(tracker.pending_count(), 0);
    }
}
