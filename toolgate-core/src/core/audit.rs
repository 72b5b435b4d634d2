// toolgate-core/src/core/audit.rs
// ============================================================================
// Module: Toolgate Audit Types
// Description: Audit entries for terminal decisions.
// Purpose: Define the append-only record shape shared with storage backends.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every terminal decision produces one audit entry: the verbatim tool input,
//! the outcome, and the reason. Entries are never mutated after write;
//! identifiers increase monotonically and timestamps never decrease.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Outcome
// ============================================================================

/// Terminal outcome recorded for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// The call was allowed to proceed upstream.
    Allow,
    /// The call was denied.
    Deny,
}

impl AuditOutcome {
    /// Returns the stable storage label for the outcome.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Entry
// ============================================================================

/// One immutable audit log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonic entry identifier assigned by the store.
    pub id: i64,
    /// Insertion timestamp as recorded by the store.
    pub timestamp: String,
    /// Verbatim request envelope as JSON.
    pub tool_input: String,
    /// Terminal outcome.
    pub decision: AuditOutcome,
    /// Reason attached to the decision.
    pub reason: String,
}
