//! Pending request store.
//!
//! Maps correlation ids to callers awaiting a reply. Every way a request can
//! end (reply, timeout, cancellation, connection close, failed write) goes
//! through [`PendingRequestStore::complete`], which removes the entry before
//! resolving it. Whoever removes the entry first decides the outcome and every
//! later attempt is a no-op.
//!
//! Flow:
//! 1. The outgoing pipeline calls `register()` and keeps the receiver
//! 2. It writes the request and records the connection with `bind_connection()`
//! 3. The inbound pipeline calls `complete()` when a reply arrives
//! 4. If the caller's timer or cancellation fires first, the caller itself
//!    calls `complete()` and then reads whatever won from the receiver

use crate::transport::{ConnectionId, SendOutcome};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ocpp_types::{CorrelationId, Frame};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How a pending request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// A reply frame (response, request error or response error) arrived.
    Reply(Frame),
    /// The timeout elapsed.
    TimedOut,
    /// The caller cancelled.
    Cancelled,
    /// The connection carrying the request closed.
    ConnectionClosed,
    /// Writing the request did not succeed.
    SendFailed(SendOutcome),
}

impl Resolution {
    fn label(&self) -> &'static str {
        match self {
            Self::Reply(_) => "reply",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::ConnectionClosed => "connection_closed",
            Self::SendFailed(_) => "send_failed",
        }
    }
}

/// What the awaiting caller receives.
#[derive(Debug)]
pub struct Resolved {
    /// Correlation id of the request.
    pub correlation_id: CorrelationId,
    /// Action of the request.
    pub action: String,
    /// How it ended.
    pub resolution: Resolution,
    /// Time since registration.
    pub elapsed: Duration,
}

/// Correlation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrelationError {
    /// A request with this id is already outstanding.
    #[error("correlation id {0} is already pending")]
    DuplicateId(CorrelationId),
}

/// A pending request waiting for its reply.
struct PendingRequest {
    /// Channel to resolve the caller
    sender: oneshot::Sender<Resolved>,
    /// When the request was registered
    created_at: Instant,
    /// Action name (for logging and the verification policy)
    action: String,
    /// Timeout for this request
    timeout: Duration,
    /// Connection the request was written to
    connection: Option<ConnectionId>,
}

/// Statistics for the pending request store.
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Total requests registered
    pub total_registered: AtomicU64,
    /// Total requests resolved by a reply
    pub total_completed: AtomicU64,
    /// Total requests timed out
    pub total_timeouts: AtomicU64,
    /// Total requests cancelled by the caller
    pub total_cancelled: AtomicU64,
    /// Total requests ended by a closed connection or failed write
    pub total_connection_closed: AtomicU64,
    /// Replies that arrived for no pending request (late or duplicate)
    pub total_late_replies: AtomicU64,
}

/// Point-in-time copy of [`PendingStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingSnapshot {
    /// Total requests registered
    pub registered: u64,
    /// Total requests resolved by a reply
    pub completed: u64,
    /// Total requests timed out
    pub timeouts: u64,
    /// Total requests cancelled
    pub cancelled: u64,
    /// Total requests ended by transport failure
    pub connection_closed: u64,
    /// Late or duplicate replies discarded
    pub late_replies: u64,
}

impl PendingStats {
    /// Copy the counters.
    pub fn snapshot(&self) -> PendingSnapshot {
        PendingSnapshot {
            registered: self.total_registered.load(Ordering::Relaxed),
            completed: self.total_completed.load(Ordering::Relaxed),
            timeouts: self.total_timeouts.load(Ordering::Relaxed),
            cancelled: self.total_cancelled.load(Ordering::Relaxed),
            connection_closed: self.total_connection_closed.load(Ordering::Relaxed),
            late_replies: self.total_late_replies.load(Ordering::Relaxed),
        }
    }
}

/// Pending request store.
pub struct PendingRequestStore {
    /// Map of correlation ID to pending request
    pending: DashMap<CorrelationId, PendingRequest>,
    /// Default timeout
    default_timeout: Duration,
    /// Statistics
    stats: Arc<PendingStats>,
}

impl PendingRequestStore {
    /// Create a new pending request store
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            default_timeout,
            stats: Arc::new(PendingStats::default()),
        }
    }

    /// Register a pending request and get a receiver for its resolution.
    pub fn register(
        &self,
        correlation_id: CorrelationId,
        action: &str,
        timeout: Option<Duration>,
    ) -> Result<oneshot::Receiver<Resolved>, CorrelationError> {
        let (tx, rx) = oneshot::channel();
        let timeout = timeout.unwrap_or(self.default_timeout);

        match self.pending.entry(correlation_id.clone()) {
            Entry::Occupied(_) => return Err(CorrelationError::DuplicateId(correlation_id)),
            Entry::Vacant(slot) => {
                slot.insert(PendingRequest {
                    sender: tx,
                    created_at: Instant::now(),
                    action: action.to_string(),
                    timeout,
                    connection: None,
                });
            }
        }
        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);

        debug!(
            correlation_id = %correlation_id,
            action = action,
            timeout_ms = timeout.as_millis(),
            "Registered pending request"
        );

        Ok(rx)
    }

    /// Record the connection a pending request was written to.
    pub fn bind_connection(&self, correlation_id: &CorrelationId, connection: ConnectionId) {
        if let Some(mut pending) = self.pending.get_mut(correlation_id) {
            pending.connection = Some(connection);
        }
    }

    /// Action of a pending request.
    pub fn action_of(&self, correlation_id: &CorrelationId) -> Option<String> {
        self.pending.get(correlation_id).map(|p| p.action.clone())
    }

    /// Resolve a pending request.
    ///
    /// Returns true if this call resolved it, false if it was already resolved
    /// or never existed.
    pub fn complete(&self, correlation_id: &CorrelationId, resolution: Resolution) -> bool {
        let Some((correlation_id, pending)) = self.pending.remove(correlation_id) else {
            if matches!(resolution, Resolution::Reply(_)) {
                self.stats.total_late_replies.fetch_add(1, Ordering::Relaxed);
                warn!(
                    correlation_id = %correlation_id,
                    "Reply for unknown or already resolved correlation ID"
                );
            }
            return false;
        };

        let counter = match &resolution {
            Resolution::Reply(_) => &self.stats.total_completed,
            Resolution::TimedOut => &self.stats.total_timeouts,
            Resolution::Cancelled => &self.stats.total_cancelled,
            Resolution::ConnectionClosed | Resolution::SendFailed(_) => {
                &self.stats.total_connection_closed
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let elapsed = pending.created_at.elapsed();
        debug!(
            correlation_id = %correlation_id,
            action = pending.action,
            resolution = resolution.label(),
            elapsed_ms = elapsed.as_millis(),
            "Resolved pending request"
        );

        let resolved = Resolved {
            correlation_id,
            action: pending.action,
            resolution,
            elapsed,
        };
        if pending.sender.send(resolved).is_err() {
            // The caller went away (its task was dropped); the entry is gone either way.
            debug!("Pending request receiver dropped");
        }
        true
    }

    /// Cancel a pending request on behalf of its caller.
    pub fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        self.complete(correlation_id, Resolution::Cancelled)
    }

    /// Remove an entry without resolving it (the request was never sent).
    pub fn discard(&self, correlation_id: &CorrelationId) -> bool {
        self.pending.remove(correlation_id).is_some()
    }

    /// Resolve every request written to `connection` as connection-closed.
    ///
    /// Returns the number of requests resolved.
    pub fn connection_closed(&self, connection: ConnectionId) -> usize {
        let affected: Vec<CorrelationId> = self
            .pending
            .iter()
            .filter(|entry| entry.connection == Some(connection))
            .map(|entry| entry.key().clone())
            .collect();

        affected
            .iter()
            .filter(|id| self.complete(id, Resolution::ConnectionClosed))
            .count()
    }

    /// Resolve expired requests as timed out.
    ///
    /// Backstop for callers that stopped waiting; returns the number resolved.
    pub fn remove_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<CorrelationId> = self
            .pending
            .iter()
            .filter(|entry| now.duration_since(entry.created_at) > entry.timeout)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for id in &expired {
            if self.complete(id, Resolution::TimedOut) {
                warn!(correlation_id = %id, "Removed expired pending request");
                removed += 1;
            }
        }
        removed
    }

    /// Get number of currently pending requests
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Get statistics
    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }

    /// Check if a correlation ID is pending
    pub fn is_pending(&self, correlation_id: &CorrelationId) -> bool {
        self.pending.contains_key(correlation_id)
    }
}

/// Background task resolving expired requests until `shutdown` fires.
pub async fn cleanup_task(
    store: Arc<PendingRequestStore>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut cleanup_interval = tokio::time::interval(interval);
    cleanup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Pending request sweeper stopped");
                break;
            }
            _ = cleanup_interval.tick() => {
                let removed = store.remove_expired();
                if removed > 0 {
                    debug!(removed = removed, "Cleaned up expired pending requests");
                }
            }
        }
    }
}
