// toolgate-core/src/interfaces/mod.rs
// ============================================================================
// Module: Toolgate Interfaces
// Description: Backend-agnostic interfaces for policy evaluation and audit.
// Purpose: Define the contract surfaces used by the Toolgate runtime.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Interfaces define how the core integrates with the policy sandbox and the
//! audit store without embedding backend-specific details. Implementations
//! must fail closed: a failed evaluation denies and a missing evaluator set
//! denies.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::core::AuditEntry;
use crate::core::AuditOutcome;
use crate::core::PolicyDecision;
use crate::core::PolicyInput;
use crate::core::PolicyName;

// ============================================================================
// SECTION: Policy Evaluator
// ============================================================================

/// Failures produced by a single policy evaluation.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The evaluation exhausted its CPU budget.
    #[error("policy cpu budget exhausted")]
    Timeout,
    /// The sandbox aborted execution.
    #[error("policy trapped: {0}")]
    Trap(String),
    /// The decision JSON produced by the policy was invalid.
    #[error("policy produced invalid output: {0}")]
    BadOutput(String),
    /// The host failed to allocate or transfer sandbox memory.
    #[error("policy host error: {0}")]
    HostError(String),
}

/// One compiled policy, evaluated against a policy input.
///
/// # Invariants
/// - Implementations serialize access internally; callers may share an
///   evaluator across tasks but must tolerate blocking.
pub trait PolicyEvaluator: Send + Sync {
    /// Evaluates the policy input into a decision.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] when the sandbox fails, traps, exceeds its
    /// budget, or yields malformed output.
    fn evaluate(&self, input: &PolicyInput) -> Result<PolicyDecision, PolicyError>;
}

// ============================================================================
// SECTION: Evaluator Snapshots
// ============================================================================

/// Immutable mapping of policy name to evaluator, iterated in name order.
pub type EvaluatorSet = BTreeMap<PolicyName, Arc<dyn PolicyEvaluator>>;

/// Source of evaluator-set snapshots.
///
/// A snapshot is a reference-counted, immutable set: once handed out it is
/// never modified, and the evaluators it names are not torn down while any
/// holder remains. Writers install a replacement set and let the previous
/// one retire when its last snapshot drops.
pub trait PolicySnapshotSource: Send + Sync {
    /// Returns the current evaluator-set snapshot.
    fn snapshot(&self) -> Arc<EvaluatorSet>;
}

// ============================================================================
// SECTION: Audit Store
// ============================================================================

/// Audit store errors.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The entry failed validation before reaching storage.
    #[error("invalid audit input: {0}")]
    InvalidInput(String),
    /// The storage layer reported contention that outlived the retry budget.
    #[error("audit store contention: {0}")]
    Transient(String),
    /// The storage layer failed.
    #[error("audit store failure: {0}")]
    Storage(String),
}

/// Append-only store for terminal decisions.
pub trait AuditStore: Send + Sync {
    /// Appends one entry.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::InvalidInput`] when `tool_input` is empty or not
    /// well-formed JSON or when `reason` is empty, [`AuditError::Transient`]
    /// when storage contention persists past the retry budget, and
    /// [`AuditError::Storage`] otherwise.
    fn log(&self, tool_input: &str, outcome: AuditOutcome, reason: &str)
    -> Result<(), AuditError>;

    /// Returns all entries ordered by `timestamp DESC, id DESC`.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Storage`] when the query fails.
    fn get_all(&self) -> Result<Vec<AuditEntry>, AuditError>;
}
