// toolgate-core/src/core/policy.rs
// ============================================================================
// Module: Toolgate Policy Types
// Description: Policy input, per-policy decision, and composed verdict.
// Purpose: Define the contract between the decision engine and evaluators.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Each evaluation derives a fresh [`PolicyInput`] from the request envelope,
//! hands it to every loaded evaluator, and folds the per-policy
//! [`PolicyDecision`] values into one [`Verdict`]. The decision table is
//! deny-biased: any explicit deny wins, any approval requirement suspends,
//! and evaluator failure denies (fail-closed).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::value::RawValue;

use crate::core::envelope::ToolCallRequest;
use crate::core::identifiers::ToolName;

// ============================================================================
// SECTION: Policy Input
// ============================================================================

/// Input handed to a single policy evaluation.
///
/// # Invariants
/// - Constructed fresh per evaluation; never retained by an evaluator.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyInput {
    /// Name of the tool being invoked.
    pub tool_name: ToolName,
    /// Opaque tool arguments, passed through verbatim.
    pub args: Option<Box<RawValue>>,
    /// Out-of-band context for the evaluation (e.g. resolved upstream).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl PolicyInput {
    /// Derives a policy input from a request envelope.
    #[must_use]
    pub fn from_request(request: &ToolCallRequest) -> Self {
        let mut metadata = BTreeMap::new();
        if let Some(upstream) = &request.upstream {
            metadata.insert("upstream".to_string(), Value::String(upstream.clone()));
        }
        Self {
            tool_name: request.tool_name.clone(),
            args: request.args.clone(),
            metadata,
        }
    }
}

// ============================================================================
// SECTION: Policy Decision
// ============================================================================

/// Decision returned by a single policy evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    /// Whether the policy allows the call.
    pub allow: bool,
    /// Whether the policy requires a human decision.
    #[serde(default)]
    pub human_required: bool,
    /// Human-readable reason for the decision.
    pub reason: String,
    /// Optional confidence in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

// ============================================================================
// SECTION: Verdict
// ============================================================================

/// Composed outcome of one full policy evaluation for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The call may proceed to the upstream tool.
    Allow {
        /// Reason recorded in the audit log.
        reason: String,
    },
    /// The call is rejected.
    Deny {
        /// Reason surfaced to the caller and the audit log.
        reason: String,
    },
    /// The call is suspended pending a human decision.
    Suspend {
        /// Reason shown to the human decider.
        reason: String,
    },
}

impl Verdict {
    /// Returns the verdict reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::Allow {
                reason,
            }
            | Self::Deny {
                reason,
            }
            | Self::Suspend {
                reason,
            } => reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_carries_upstream_metadata() {
        let request: ToolCallRequest = serde_json::from_str(
            r#"{"tool_name":"calc","args":{"a":1},"upstream":"http://tools:9000"}"#,
        )
        .unwrap();
        let input = PolicyInput::from_request(&request);
        assert_eq!(input.metadata.get("upstream"), Some(&Value::String("http://tools:9000".into())));
        let json = serde_json::to_string(&input).unwrap();
        assert!(json.contains(r#""args":{"a":1}"#));
    }

    #[test]
    fn decision_defaults_omitted_fields() {
        let decision: PolicyDecision =
            serde_json::from_str(r#"{"allow":true,"reason":"ok"}"#).unwrap();
        assert!(decision.allow);
        assert!(!decision.human_required);
        assert!(decision.confidence.is_none());
    }

    #[test]
    fn empty_metadata_is_not_serialized() {
        let request: ToolCallRequest = serde_json::from_str(r#"{"tool_name":"calc"}"#).unwrap();
        let input = PolicyInput::from_request(&request);
        let json = serde_json::to_string(&input).unwrap();
        assert!(!json.contains("metadata"));
    }
}
