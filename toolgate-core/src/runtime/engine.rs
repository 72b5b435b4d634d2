// toolgate-core/src/runtime/engine.rs
// ============================================================================
// Module: Toolgate Decision Engine
// Description: Evaluate-all, deny-biased verdict composition.
// Purpose: Fold per-policy decisions into one verdict under a time budget.
// Dependencies: crate::{core, events, interfaces}, tokio
// ============================================================================

//! ## Overview
//! The decision engine obtains one evaluator-set snapshot per request and
//! composes the policies in ascending name order. Composition short-circuits
//! on the first terminating outcome: an explicit deny wins, an approval
//! requirement suspends, and an evaluator failure denies. An empty set
//! denies, and exceeding the wall-clock budget denies. Security posture:
//! every failure on the decision path resolves to deny.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use crate::core::PolicyInput;
use crate::core::Verdict;
use crate::events::EventSink;
use crate::events::GateEvent;
use crate::interfaces::EvaluatorSet;
use crate::interfaces::PolicySnapshotSource;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default wall-clock budget for one full composition.
pub const DEFAULT_EVALUATION_BUDGET: Duration = Duration::from_secs(5);

/// Reason reported when the evaluator set is empty.
const REASON_NO_POLICIES: &str = "no policies loaded";
/// Reason reported when every policy allowed the call.
const REASON_ALL_PASSED: &str = "all policies passed";
/// Reason reported when composition exceeded the wall-clock budget.
const REASON_BUDGET_EXCEEDED: &str = "policy evaluation timeout";
/// Reason reported when the composition task failed to complete.
const REASON_COMPOSITION_FAILED: &str = "policy evaluation failed";

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Configuration for the decision engine.
#[derive(Debug, Clone)]
pub struct DecisionEngineConfig {
    /// Wall-clock budget for evaluating all policies for one request.
    pub budget: Duration,
}

impl Default for DecisionEngineConfig {
    fn default() -> Self {
        Self {
            budget: DEFAULT_EVALUATION_BUDGET,
        }
    }
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Composes per-policy decisions into a single verdict.
pub struct DecisionEngine {
    /// Source of evaluator-set snapshots.
    source: Arc<dyn PolicySnapshotSource>,
    /// Engine configuration.
    config: DecisionEngineConfig,
    /// Sink for operational events.
    events: Arc<dyn EventSink>,
}

impl DecisionEngine {
    /// Creates a new decision engine.
    #[must_use]
    pub fn new(
        source: Arc<dyn PolicySnapshotSource>,
        config: DecisionEngineConfig,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            source,
            config,
            events,
        }
    }

    /// Evaluates the input against the current evaluator set.
    ///
    /// The snapshot is taken once; a reload that begins after this point has
    /// no effect on the returned verdict, and no evaluator in the snapshot is
    /// torn down before composition returns.
    pub async fn decide(&self, input: &PolicyInput) -> Verdict {
        let snapshot = self.source.snapshot();
        if snapshot.is_empty() {
            return Verdict::Deny {
                reason: REASON_NO_POLICIES.to_string(),
            };
        }

        let input = input.clone();
        let events = Arc::clone(&self.events);
        let task =
            tokio::task::spawn_blocking(move || compose(snapshot.as_ref(), &input, events.as_ref()));
        match tokio::time::timeout(self.config.budget, task).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(_)) => Verdict::Deny {
                reason: REASON_COMPOSITION_FAILED.to_string(),
            },
            Err(_) => Verdict::Deny {
                reason: REASON_BUDGET_EXCEEDED.to_string(),
            },
        }
    }
}

// ============================================================================
// SECTION: Composition
// ============================================================================

/// Folds the evaluator set into one verdict, short-circuiting on the first
/// terminating outcome.
fn compose(set: &EvaluatorSet, input: &PolicyInput, events: &dyn EventSink) -> Verdict {
    for (name, evaluator) in set {
        let decision = match evaluator.evaluate(input) {
            Ok(decision) => decision,
            Err(err) => {
                events.record(&GateEvent::new(
                    "policy_evaluation_failed",
                    "engine",
                    Some(format!("{name}: {err}")),
                ));
                return Verdict::Deny {
                    reason: format!("policy error: {name}"),
                };
            }
        };
        if !decision.allow && !decision.human_required {
            return Verdict::Deny {
                reason: decision.reason,
            };
        }
        if decision.human_required {
            return Verdict::Suspend {
                reason: decision.reason,
            };
        }
    }
    Verdict::Allow {
        reason: REASON_ALL_PASSED.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::RwLock;

    use super::*;
    use crate::core::PolicyDecision;
    use crate::core::PolicyName;
    use crate::core::ToolCallRequest;
    use crate::events::NoopEventSink;
    use crate::interfaces::PolicyError;
    use crate::interfaces::PolicyEvaluator;

    /// Evaluator returning a fixed decision or error.
    struct StaticEvaluator {
        outcome: fn() -> Result<PolicyDecision, PolicyError>,
    }

    impl PolicyEvaluator for StaticEvaluator {
        fn evaluate(&self, _input: &PolicyInput) -> Result<PolicyDecision, PolicyError> {
            (self.outcome)()
        }
    }

    /// Evaluator that sleeps past any reasonable budget.
    struct StallingEvaluator;

    impl PolicyEvaluator for StallingEvaluator {
        fn evaluate(&self, _input: &PolicyInput) -> Result<PolicyDecision, PolicyError> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(allow("slow"))
        }
    }

    /// Fixed snapshot source over a swappable set.
    struct FixedSource {
        set: RwLock<Arc<EvaluatorSet>>,
    }

    impl PolicySnapshotSource for FixedSource {
        fn snapshot(&self) -> Arc<EvaluatorSet> {
            Arc::clone(&self.set.read().expect("snapshot lock"))
        }
    }

    fn allow(reason: &str) -> PolicyDecision {
        PolicyDecision {
            allow: true,
            human_required: false,
            reason: reason.to_string(),
            confidence: None,
        }
    }

    fn engine_over(entries: Vec<(&str, Arc<dyn PolicyEvaluator>)>) -> DecisionEngine {
        engine_with_budget(entries, DEFAULT_EVALUATION_BUDGET)
    }

    fn engine_with_budget(
        entries: Vec<(&str, Arc<dyn PolicyEvaluator>)>,
        budget: Duration,
    ) -> DecisionEngine {
        let set: EvaluatorSet =
            entries.into_iter().map(|(name, eval)| (PolicyName::new(name), eval)).collect();
        let source = Arc::new(FixedSource {
            set: RwLock::new(Arc::new(set)),
        });
        DecisionEngine::new(
            source,
            DecisionEngineConfig {
                budget,
            },
            Arc::new(NoopEventSink),
        )
    }

    fn sample_input() -> PolicyInput {
        let request: ToolCallRequest =
            serde_json::from_str(r#"{"tool_name":"calc","args":{"a":1}}"#).unwrap();
        PolicyInput::from_request(&request)
    }

    #[tokio::test]
    async fn empty_set_denies() {
        let engine = engine_over(Vec::new());
        let verdict = engine.decide(&sample_input()).await;
        assert_eq!(verdict, Verdict::Deny {
            reason: "no policies loaded".to_string(),
        });
    }

    #[tokio::test]
    async fn all_allowing_policies_compose_to_allow() {
        let engine = engine_over(vec![
            ("first", Arc::new(StaticEvaluator {
                outcome: || Ok(allow("ok")),
            })),
            ("second", Arc::new(StaticEvaluator {
                outcome: || Ok(allow("ok")),
            })),
        ]);
        let verdict = engine.decide(&sample_input()).await;
        assert_eq!(verdict, Verdict::Allow {
            reason: "all policies passed".to_string(),
        });
    }

    #[tokio::test]
    async fn deny_short_circuits_with_policy_reason() {
        let engine = engine_over(vec![
            ("deny_sensitive", Arc::new(StaticEvaluator {
                outcome: || {
                    Ok(PolicyDecision {
                        allow: false,
                        human_required: false,
                        reason: "contains password".to_string(),
                        confidence: None,
                    })
                },
            })),
            ("later", Arc::new(StallingEvaluator)),
        ]);
        let verdict = engine.decide(&sample_input()).await;
        assert_eq!(verdict, Verdict::Deny {
            reason: "contains password".to_string(),
        });
    }

    #[tokio::test]
    async fn human_required_suspends() {
        let engine = engine_over(vec![("require_approval", Arc::new(StaticEvaluator {
            outcome: || {
                Ok(PolicyDecision {
                    allow: true,
                    human_required: true,
                    reason: "sensitive op".to_string(),
                    confidence: Some(0.8),
                })
            },
        }))]);
        let verdict = engine.decide(&sample_input()).await;
        assert_eq!(verdict, Verdict::Suspend {
            reason: "sensitive op".to_string(),
        });
    }

    #[tokio::test]
    async fn deny_with_human_override_suspends() {
        let engine = engine_over(vec![("escalate", Arc::new(StaticEvaluator {
            outcome: || {
                Ok(PolicyDecision {
                    allow: false,
                    human_required: true,
                    reason: "needs review".to_string(),
                    confidence: None,
                })
            },
        }))]);
        let verdict = engine.decide(&sample_input()).await;
        assert_eq!(verdict, Verdict::Suspend {
            reason: "needs review".to_string(),
        });
    }

    #[tokio::test]
    async fn evaluator_failure_denies_with_policy_name() {
        let engine = engine_over(vec![("broken", Arc::new(StaticEvaluator {
            outcome: || Err(PolicyError::Trap("unreachable".to_string())),
        }))]);
        let verdict = engine.decide(&sample_input()).await;
        assert_eq!(verdict, Verdict::Deny {
            reason: "policy error: broken".to_string(),
        });
    }

    #[tokio::test]
    async fn composition_iterates_in_name_order() {
        // "aa" denies before "zz" would suspend.
        let engine = engine_over(vec![
            ("zz", Arc::new(StaticEvaluator {
                outcome: || {
                    Ok(PolicyDecision {
                        allow: true,
                        human_required: true,
                        reason: "suspend".to_string(),
                        confidence: None,
                    })
                },
            })),
            ("aa", Arc::new(StaticEvaluator {
                outcome: || {
                    Ok(PolicyDecision {
                        allow: false,
                        human_required: false,
                        reason: "deny first".to_string(),
                        confidence: None,
                    })
                },
            })),
        ]);
        let verdict = engine.decide(&sample_input()).await;
        assert_eq!(verdict, Verdict::Deny {
            reason: "deny first".to_string(),
        });
    }

    #[tokio::test]
    async fn budget_overrun_denies_with_timeout_reason() {
        let engine = engine_with_budget(
            vec![("slow", Arc::new(StallingEvaluator))],
            Duration::from_millis(50),
        );
        let verdict = engine.decide(&sample_input()).await;
        assert_eq!(verdict, Verdict::Deny {
            reason: "policy evaluation timeout".to_string(),
        });
    }
}
