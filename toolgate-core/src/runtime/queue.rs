// toolgate-core/src/runtime/queue.rs
// ============================================================================
// Module: Toolgate Approval Queue
// Description: In-memory rendezvous between suspended callers and deciders.
// Purpose: Deliver exactly one terminal transition per pending entry.
// Dependencies: crate::{core, events}, tokio, uuid
// ============================================================================

//! ## Overview
//! The approval queue suspends a caller until a human decision, a timeout, or
//! a cancellation resolves the entry. Each entry carries a single-producer
//! rendezvous slot; `decide` removes the entry inside the index lock and
//! delivers the decision outside it, so the index lock is never held across a
//! send. The queue is in-memory: a process restart abandons pending entries,
//! which is a documented limitation rather than a defect.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde_json::value::RawValue;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::sync::watch;
use uuid::Uuid;

use crate::core::ApprovalStatus;
use crate::core::HumanDecision;
use crate::core::PendingApproval;
use crate::core::ToolName;
use crate::events::EventSink;
use crate::events::GateEvent;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default wait before a pending entry times out.
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Approval queue errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    /// The waiting caller was cancelled before a decision arrived.
    #[error("request cancelled")]
    Cancelled,
    /// The entry is unknown or already terminal.
    #[error("approval request not found: {0}")]
    NotFound(Uuid),
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Configuration for the approval queue.
#[derive(Debug, Clone)]
pub struct ApprovalQueueConfig {
    /// Wait budget per entry; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for ApprovalQueueConfig {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_APPROVAL_TIMEOUT),
        }
    }
}

// ============================================================================
// SECTION: Queue
// ============================================================================

/// Pending entry bookkeeping: the listed snapshot plus its rendezvous slot.
struct PendingSlot {
    /// Snapshot exposed through `get_pending`.
    entry: PendingApproval,
    /// Single-use decision slot for the waiting caller.
    slot: oneshot::Sender<HumanDecision>,
}

/// Shared queue state.
struct QueueInner {
    /// Pending entries keyed by id.
    pending: Mutex<HashMap<Uuid, PendingSlot>>,
    /// Configured wait budget.
    timeout: Option<Duration>,
    /// Coalescing change signal for external watchers.
    changes: watch::Sender<u64>,
    /// Set once `close` has run; rejects further enqueues.
    closed: AtomicBool,
    /// Sink for operational events.
    events: Arc<dyn EventSink>,
}

impl QueueInner {
    /// Removes a pending entry, returning its slot when it was still pending.
    fn remove(&self, id: Uuid) -> Option<PendingSlot> {
        let Ok(mut pending) = self.pending.lock() else {
            return None;
        };
        pending.remove(&id)
    }

    /// Bumps the change signal; receivers coalesce missed bumps.
    fn notify(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }
}

/// Removes the entry when the enqueue future is dropped mid-wait.
struct PendingGuard {
    /// Shared queue state.
    inner: Arc<QueueInner>,
    /// Entry owned by this guard.
    id: Uuid,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.inner.remove(self.id).is_some() {
            self.inner.events.record(&GateEvent::new(
                "approval_cancelled",
                "approval",
                Some(self.id.to_string()),
            ));
            self.inner.notify();
        }
    }
}

/// In-memory approval queue.
#[derive(Clone)]
pub struct ApprovalQueue {
    /// Shared queue state.
    inner: Arc<QueueInner>,
}

impl ApprovalQueue {
    /// Creates a new approval queue.
    #[must_use]
    pub fn new(config: ApprovalQueueConfig, events: Arc<dyn EventSink>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(QueueInner {
                pending: Mutex::new(HashMap::new()),
                timeout: config.timeout,
                changes,
                closed: AtomicBool::new(false),
                events,
            }),
        }
    }

    /// Suspends the caller until a terminal transition.
    ///
    /// Returns the human decision on approval or denial, a synthesized
    /// timeout denial when the wait budget expires, and
    /// [`ApprovalError::Cancelled`] when the queue shuts down mid-wait.
    /// Dropping the returned future cancels the entry.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Cancelled`] when the queue is closed or the
    /// rendezvous slot is torn down before a decision is delivered.
    pub async fn enqueue(
        &self,
        tool_name: ToolName,
        args: Option<Box<RawValue>>,
        reason: String,
    ) -> Result<HumanDecision, ApprovalError> {
        let id = Uuid::new_v4();
        let created_at = now_millis();
        let expires_at = self
            .inner
            .timeout
            .and_then(|timeout| u64::try_from(timeout.as_millis()).ok())
            .map(|timeout_ms| created_at.saturating_add(timeout_ms));
        let entry = PendingApproval {
            id,
            tool_name,
            args,
            reason,
            created_at,
            expires_at,
            status: ApprovalStatus::Pending,
        };

        let (slot, mut decision_rx) = oneshot::channel();
        {
            let Ok(mut pending) = self.inner.pending.lock() else {
                return Err(ApprovalError::Cancelled);
            };
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(ApprovalError::Cancelled);
            }
            pending.insert(id, PendingSlot {
                entry,
                slot,
            });
        }
        self.inner.notify();
        self.inner.events.record(&GateEvent::new(
            "approval_enqueued",
            "approval",
            Some(id.to_string()),
        ));

        let guard = PendingGuard {
            inner: Arc::clone(&self.inner),
            id,
        };
        let outcome = match self.inner.timeout {
            Some(timeout) => {
                tokio::select! {
                    decision = &mut decision_rx => {
                        decision.map_err(|_| ApprovalError::Cancelled)
                    }
                    () = tokio::time::sleep(timeout) => {
                        if self.inner.remove(id).is_some() {
                            self.inner.events.record(&GateEvent::new(
                                "approval_timeout",
                                "approval",
                                Some(id.to_string()),
                            ));
                            self.inner.notify();
                            Ok(HumanDecision::timeout())
                        } else {
                            // A decider removed the entry first; its decision
                            // is on the slot or the queue is shutting down.
                            decision_rx.await.map_err(|_| ApprovalError::Cancelled)
                        }
                    }
                }
            }
            None => decision_rx.await.map_err(|_| ApprovalError::Cancelled),
        };
        drop(guard);
        outcome
    }

    /// Returns a consistent snapshot of the pending entries.
    #[must_use]
    pub fn get_pending(&self) -> Vec<PendingApproval> {
        let Ok(pending) = self.inner.pending.lock() else {
            return Vec::new();
        };
        let mut entries: Vec<PendingApproval> =
            pending.values().map(|slot| slot.entry.clone()).collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        entries
    }

    /// Delivers a human decision to a pending entry.
    ///
    /// At most one decide succeeds per id: the winner removes the entry
    /// atomically, every later attempt observes `NotFound`.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::NotFound`] when the id is unknown or already
    /// terminal.
    pub fn decide(&self, id: Uuid, decision: HumanDecision) -> Result<(), ApprovalError> {
        let Some(slot) = self.inner.remove(id) else {
            return Err(ApprovalError::NotFound(id));
        };
        // The send happens outside the index lock. A caller that vanished
        // mid-decide drops its receiver; the decision is then discarded.
        if slot.slot.send(decision).is_err() {
            self.inner.events.record(&GateEvent::new(
                "approval_decision_dropped",
                "approval",
                Some(id.to_string()),
            ));
        } else {
            self.inner.events.record(&GateEvent::new(
                "approval_decided",
                "approval",
                Some(id.to_string()),
            ));
        }
        self.inner.notify();
        Ok(())
    }

    /// Subscribes to the coalescing change signal for the pending set.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.changes.subscribe()
    }

    /// Cancels every pending entry and rejects further enqueues.
    ///
    /// Waiting callers observe [`ApprovalError::Cancelled`].
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let drained: Vec<PendingSlot> = {
            let Ok(mut pending) = self.inner.pending.lock() else {
                return;
            };
            pending.drain().map(|(_, slot)| slot).collect()
        };
        // Dropping the slots outside the lock fails every waiting receiver.
        drop(drained);
        self.inner.notify();
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Current time in milliseconds since the Unix epoch.
fn now_millis() -> u64 {
    u64::try_from(
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis(),
    )
    .unwrap_or(u64::MAX)
}
