// toolgate-core/src/core/approval.rs
// ============================================================================
// Module: Toolgate Approval Types
// Description: Pending approval entries and human decisions.
// Purpose: Model the suspension of a tool call awaiting an operator.
// Dependencies: serde, serde_json, uuid
// ============================================================================

//! ## Overview
//! A suspended tool call becomes a [`PendingApproval`] visible to external
//! deciders. A [`HumanDecision`] resolves it; timeout and caller cancellation
//! are the other terminal transitions. Terminal transitions happen exactly
//! once per entry.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::value::RawValue;
use uuid::Uuid;

use crate::core::identifiers::ToolName;

// ============================================================================
// SECTION: Status
// ============================================================================

/// Lifecycle status of a pending approval entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Awaiting a decision.
    Pending,
    /// Approved by a human decider.
    Approved,
    /// Denied by a human decider.
    Denied,
    /// Expired before any decision arrived.
    TimedOut,
    /// Abandoned because the waiting caller went away.
    Cancelled,
}

// ============================================================================
// SECTION: Pending Entry
// ============================================================================

/// Snapshot of a suspended request awaiting a human decision.
#[derive(Debug, Clone, Serialize)]
pub struct PendingApproval {
    /// Unique entry identifier.
    pub id: Uuid,
    /// Name of the suspended tool call.
    pub tool_name: ToolName,
    /// Verbatim tool arguments for decider display.
    pub args: Option<Box<RawValue>>,
    /// Policy reason that triggered the suspension.
    pub reason: String,
    /// Creation time, milliseconds since the Unix epoch.
    pub created_at: u64,
    /// Expiry time when a timeout is configured, milliseconds since epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    /// Current status; always `pending` for listed entries.
    pub status: ApprovalStatus,
}

// ============================================================================
// SECTION: Human Decision
// ============================================================================

/// Decision delivered to a suspended caller.
///
/// # Invariants
/// - Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanDecision {
    /// Whether the call was approved.
    pub approved: bool,
    /// Reason supplied by the decider or synthesized on timeout.
    pub reason: String,
    /// Identity of the decider when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
}

impl HumanDecision {
    /// Synthesized denial for an expired entry.
    #[must_use]
    pub fn timeout() -> Self {
        Self {
            approved: false,
            reason: "approval timeout".to_string(),
            decided_by: None,
        }
    }

    /// Synthesized denial for a cancelled caller.
    #[must_use]
    pub fn cancelled() -> Self {
        Self {
            approved: false,
            reason: "request cancelled".to_string(),
            decided_by: None,
        }
    }
}
