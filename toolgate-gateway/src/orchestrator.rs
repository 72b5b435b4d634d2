// toolgate-gateway/src/orchestrator.rs
// ============================================================================
// Module: Proxy Orchestrator
// Description: End-to-end lifecycle of one governed tool call.
// Purpose: Compose engine, approval queue, audit store, and forwarder.
// Dependencies: toolgate-core, crate::forwarder, tokio
// ============================================================================

//! ## Overview
//! One call flows parse -> evaluate -> audit -> (suspend) -> forward ->
//! respond. The pre-forward audit writes `allow` for an allow verdict and
//! `deny` otherwise; a suspension is not terminal and is audited only once
//! the human decision resolves it. Audit writes precede any observable
//! effect but never abort the request: a failed write is reported to the
//! event sink and the call proceeds. Every policy-layer failure surfaces as a
//! denial (fail-closed); upstream failures surface as gateway errors, not
//! denials.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde_json::value::RawValue;
use toolgate_core::ApprovalError;
use toolgate_core::ApprovalQueue;
use toolgate_core::AuditOutcome;
use toolgate_core::AuditStore;
use toolgate_core::DecisionEngine;
use toolgate_core::EventSink;
use toolgate_core::GateEvent;
use toolgate_core::HumanDecision;
use toolgate_core::PolicyInput;
use toolgate_core::ToolCallRequest;
use toolgate_core::Verdict;

use crate::forwarder::Forwarder;

// ============================================================================
// SECTION: Outcome
// ============================================================================

/// Terminal outcome of one tool call, as seen by the edge.
#[derive(Debug)]
pub enum ToolCallOutcome {
    /// The upstream body, returned verbatim.
    Success {
        /// Upstream response body.
        result: Box<RawValue>,
    },
    /// The call was denied by policy, human decision, or timeout.
    Denied {
        /// Machine-readable denial reason.
        reason: String,
    },
    /// The inbound envelope failed validation.
    ClientError {
        /// Validation failure detail.
        message: String,
    },
    /// The upstream call failed after an allow decision.
    UpstreamError {
        /// Failure detail.
        message: String,
    },
}

// ============================================================================
// SECTION: Service
// ============================================================================

/// Proxy orchestrator composing the decision pipeline.
pub struct ProxyService {
    /// Decision engine (policy composition).
    engine: DecisionEngine,
    /// Approval queue for suspended calls.
    queue: ApprovalQueue,
    /// Append-only audit store.
    audit: Arc<dyn AuditStore>,
    /// Upstream forwarder.
    forwarder: Forwarder,
    /// Default upstream URL for envelopes without an override.
    default_upstream: String,
    /// Sink for operational events.
    events: Arc<dyn EventSink>,
}

impl ProxyService {
    /// Creates the orchestrator from its collaborators.
    #[must_use]
    pub fn new(
        engine: DecisionEngine,
        queue: ApprovalQueue,
        audit: Arc<dyn AuditStore>,
        forwarder: Forwarder,
        default_upstream: String,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            engine,
            queue,
            audit,
            forwarder,
            default_upstream,
            events,
        }
    }

    /// Runs one tool call through the full lifecycle.
    pub async fn handle(&self, request: ToolCallRequest) -> ToolCallOutcome {
        // Parse step: the edge delivers a syntactically valid envelope; the
        // semantic checks live here.
        if request.tool_name.is_empty() {
            return ToolCallOutcome::ClientError {
                message: "tool_name is required".to_string(),
            };
        }
        let request = self.normalize(request);
        let upstream = match &request.upstream {
            Some(upstream) => upstream.clone(),
            None => {
                return ToolCallOutcome::ClientError {
                    message: "upstream could not be resolved".to_string(),
                };
            }
        };

        // Evaluate: one snapshot, deny-biased composition.
        let input = PolicyInput::from_request(&request);
        let verdict = self.engine.decide(&input).await;

        match verdict {
            Verdict::Deny {
                reason,
            } => {
                self.record_audit(&request, AuditOutcome::Deny, &reason).await;
                ToolCallOutcome::Denied {
                    reason,
                }
            }
            Verdict::Allow {
                reason,
            } => {
                self.record_audit(&request, AuditOutcome::Allow, &reason).await;
                self.forward(&upstream, &request).await
            }
            Verdict::Suspend {
                reason,
            } => self.suspend(&upstream, request, reason).await,
        }
    }

    /// Resolves the effective upstream into the envelope.
    fn normalize(&self, request: ToolCallRequest) -> ToolCallRequest {
        let upstream = request
            .upstream
            .filter(|upstream| !upstream.is_empty())
            .unwrap_or_else(|| self.default_upstream.clone());
        ToolCallRequest {
            tool_name: request.tool_name,
            args: request.args,
            upstream: Some(upstream),
        }
    }

    /// Suspends the call on the approval queue and resumes on a decision.
    async fn suspend(
        &self,
        upstream: &str,
        request: ToolCallRequest,
        reason: String,
    ) -> ToolCallOutcome {
        let enqueue = self.queue.enqueue(request.tool_name.clone(), request.args.clone(), reason);
        match enqueue.await {
            Ok(HumanDecision {
                approved: true,
                reason,
                decided_by,
            }) => {
                let reason = match decided_by {
                    Some(decided_by) => format!("approved by {decided_by}: {reason}"),
                    None => reason,
                };
                self.record_audit(&request, AuditOutcome::Allow, &reason).await;
                self.forward(upstream, &request).await
            }
            Ok(HumanDecision {
                approved: false,
                reason,
                decided_by,
            }) => {
                let reason = match decided_by {
                    Some(decided_by) => format!("denied by {decided_by}: {reason}"),
                    None => reason,
                };
                self.record_audit(&request, AuditOutcome::Deny, &reason).await;
                ToolCallOutcome::Denied {
                    reason,
                }
            }
            Err(ApprovalError::Cancelled | ApprovalError::NotFound(_)) => {
                let reason = "request cancelled".to_string();
                self.record_audit(&request, AuditOutcome::Deny, &reason).await;
                ToolCallOutcome::Denied {
                    reason,
                }
            }
        }
    }

    /// Forwards the approved call and wraps the result.
    async fn forward(&self, upstream: &str, request: &ToolCallRequest) -> ToolCallOutcome {
        match self.forwarder.forward(upstream, request).await {
            Ok(result) => ToolCallOutcome::Success {
                result,
            },
            Err(err) => {
                self.events.record(&GateEvent::new(
                    "upstream_forward_failed",
                    "proxy",
                    Some(format!("{upstream}: {err}")),
                ));
                ToolCallOutcome::UpstreamError {
                    message: "upstream request failed".to_string(),
                }
            }
        }
    }

    /// Writes one audit entry; failures are reported but never abort.
    async fn record_audit(&self, request: &ToolCallRequest, outcome: AuditOutcome, reason: &str) {
        let tool_input = match serde_json::to_string(request) {
            Ok(tool_input) => tool_input,
            Err(err) => {
                self.events.record(&GateEvent::new(
                    "audit_serialization_failed",
                    "proxy",
                    Some(err.to_string()),
                ));
                return;
            }
        };
        let audit = Arc::clone(&self.audit);
        let reason = reason.to_string();
        let write = tokio::task::spawn_blocking(move || audit.log(&tool_input, outcome, &reason));
        let result = match write.await {
            Ok(result) => result,
            Err(err) => {
                self.events.record(&GateEvent::new(
                    "audit_write_failed",
                    "proxy",
                    Some(format!("audit task failed: {err}")),
                ));
                return;
            }
        };
        if let Err(err) = result {
            self.events.record(&GateEvent::new(
                "audit_write_failed",
                "proxy",
                Some(err.to_string()),
            ));
        }
    }
}
