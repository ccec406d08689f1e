//! Request/response correlation by integer JSON-RPC id.
//!
//! Flow:
//! 1. Caller calls `allocate()` and gets a [`PendingCall`] guard
//! 2. Caller sends the request carrying `PendingCall::id()`
//! 3. Read loop receives the response and calls `resolve()`
//! 4. Caller awaits the guard, or times out
//! 5. Guard drop removes the entry on every exit path
//!
//! Each entry owns the only sender of a oneshot channel, so a response is
//! delivered at most once. Dropping the entry (via `release_all`) wakes the
//! waiter with [`WaitResult::Released`].

use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// How one wait ended
#[derive(Debug, Clone, PartialEq)]
pub enum WaitResult {
    /// The response envelope arrived
    Resolved(Value),
    /// Nothing arrived within the timeout
    TimedOut,
    /// The socket was torn down while waiting
    Released,
}

struct PendingRequest {
    sender: oneshot::Sender<Value>,
    created_at: Instant,
    method: String,
}

/// Statistics for the correlator
#[derive(Debug, Default)]
pub struct CorrelatorStats {
    /// Ids handed out
    pub total_allocated: AtomicU64,
    /// Responses delivered to a waiting entry
    pub total_resolved: AtomicU64,
    /// Responses with no entry, usually late after a timeout
    pub total_unmatched: AtomicU64,
    /// Entries dropped by socket teardown
    pub total_released: AtomicU64,
}

/// Correlation table plus id counter.
///
/// Ids start at 0 and are never reused within the process.
pub struct RpcCorrelator {
    pending: DashMap<u64, PendingRequest>,
    next_id: AtomicU64,
    stats: CorrelatorStats,
}

impl RpcCorrelator {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            next_id: AtomicU64::new(0),
            stats: CorrelatorStats::default(),
        }
    }

    /// Reserve a fresh id and register a waiter for it.
    pub fn allocate(&self, method: &str) -> PendingCall<'_> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingRequest {
                sender: tx,
                created_at: Instant::now(),
                method: method.to_string(),
            },
        );
        self.stats.total_allocated.fetch_add(1, Ordering::Relaxed);

        PendingCall {
            correlator: self,
            id,
            receiver: Some(rx),
        }
    }

    /// Hand a response to its waiter.
    ///
    /// Returns false for an unknown id; a response that arrives after its
    /// caller gave up is logged and dropped.
    pub fn resolve(&self, id: u64, body: Value) -> bool {
        let Some((_, pending)) = self.pending.remove(&id) else {
            self.stats.total_unmatched.fetch_add(1, Ordering::Relaxed);
            warn!(
                request_id = id,
                "Moonraker RPC response received, but there is no waiting context"
            );
            return false;
        };

        debug!(
            request_id = id,
            method = %pending.method,
            response_time_ms = pending.created_at.elapsed().as_millis() as u64,
            "Resolved pending request"
        );
        self.stats.total_resolved.fetch_add(1, Ordering::Relaxed);
        // A dropped receiver means the caller already timed out
        pending.sender.send(body).is_ok()
    }

    /// Wake every waiter with [`WaitResult::Released`].
    ///
    /// Called whenever the socket is torn down.
    pub fn release_all(&self) -> usize {
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut released = 0;
        for id in ids {
            // Dropping the sender is the wake-up
            if self.pending.remove(&id).is_some() {
                released += 1;
            }
        }
        if released > 0 {
            self.stats
                .total_released
                .fetch_add(released as u64, Ordering::Relaxed);
            debug!(released, "Released pending requests on socket close");
        }
        released
    }

    /// Drop the entry for `id`, if it is still there.
    pub fn free(&self, id: u64) -> bool {
        self.pending.remove(&id).is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn stats(&self) -> &CorrelatorStats {
        &self.stats
    }
}

impl Default for RpcCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

/// One in-flight request. Frees its table entry when dropped.
pub struct PendingCall<'a> {
    correlator: &'a RpcCorrelator,
    id: u64,
    receiver: Option<oneshot::Receiver<Value>>,
}

impl PendingCall<'_> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the response, the timeout, or a release.
    ///
    /// Only the first call waits; later calls report `Released`.
    pub async fn wait(&mut self, timeout: Duration) -> WaitResult {
        let Some(receiver) = self.receiver.take() else {
            return WaitResult::Released;
        };
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(body)) => WaitResult::Resolved(body),
            Ok(Err(_)) => WaitResult::Released,
            Err(_) => WaitResult::TimedOut,
        }
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        self.correlator.free(self.id);
    }
}
