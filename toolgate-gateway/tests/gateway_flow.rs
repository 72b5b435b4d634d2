// toolgate-gateway/tests/gateway_flow.rs
// ============================================================================
// Module: Gateway Flow Tests
// Description: End-to-end request lifecycle scenarios for the proxy.
// Purpose: Validate allow, deny, approval, timeout, and failure paths.
// Dependencies: toolgate-gateway, toolgate-core, toolgate-store-sqlite
// ============================================================================

//! ## Overview
//! Drives the proxy orchestrator through the canonical scenarios: straight
//! allow, policy deny, human approval and timeout, client errors, upstream
//! failures, and the fail-closed composition cases. A stub upstream records
//! what was forwarded; the audit store is the real SQLite implementation.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use axum::http::StatusCode;
use common::FixedSource;
use common::UpstreamStub;
use common::build_service;
use common::static_evaluator;
use toolgate_core::AuditOutcome;
use toolgate_core::AuditStore;
use toolgate_core::HumanDecision;
use toolgate_core::PolicySnapshotSource;
use toolgate_core::ToolCallRequest;
use toolgate_gateway::ToolCallOutcome;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn envelope(body: &str) -> ToolCallRequest {
    serde_json::from_str(body).unwrap()
}

async fn wait_for_pending(queue: &toolgate_core::ApprovalQueue) -> toolgate_core::PendingApproval {
    let deadline = Instant::now() + Duration::from_secs(1);
    loop {
        if let Some(entry) = queue.get_pending().into_iter().next() {
            return entry;
        }
        assert!(Instant::now() < deadline, "no pending entry within 1s");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ============================================================================
// SECTION: Scenarios
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn allow_verdict_forwards_and_audits() {
    let upstream = UpstreamStub::spawn(StatusCode::OK, r#"{"ok":true}"#).await;
    let source = FixedSource::new(vec![("allow_all", static_evaluator(true, false, "ok"))]);
    let service = build_service(
        source as Arc<dyn PolicySnapshotSource>,
        upstream.url(),
        Duration::from_secs(5),
    );

    let outcome =
        service.proxy.handle(envelope(r#"{"tool_name":"calc","args":{"a":1,"b":2}}"#)).await;
    let ToolCallOutcome::Success {
        result,
    } = outcome
    else {
        panic!("expected success, got {outcome:?}");
    };
    assert_eq!(result.get(), r#"{"ok":true}"#);
    assert_eq!(upstream.call_count(), 1);

    // The forwarded body is the `{tool_name, args}` envelope, verbatim args.
    let forwarded = upstream.last_body.lock().unwrap().clone().unwrap();
    assert!(forwarded.contains(r#""tool_name":"calc""#));
    assert!(forwarded.contains(r#""args":{"a":1,"b":2}"#));

    let entries = service.audit.get_all().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].decision, AuditOutcome::Allow);
    assert_eq!(entries[0].reason, "all policies passed");
    assert!(entries[0].tool_input.contains(r#""tool_name":"calc""#));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deny_verdict_blocks_the_upstream_call() {
    let upstream = UpstreamStub::spawn(StatusCode::OK, r#"{"ok":true}"#).await;
    let source =
        FixedSource::new(vec![("deny_sensitive", static_evaluator(false, false, "contains password"))]);
    let service = build_service(
        source as Arc<dyn PolicySnapshotSource>,
        upstream.url(),
        Duration::from_secs(5),
    );

    let outcome = service
        .proxy
        .handle(envelope(r#"{"tool_name":"db","args":{"q":"SELECT password FROM users"}}"#))
        .await;
    let ToolCallOutcome::Denied {
        reason,
    } = outcome
    else {
        panic!("expected denial, got {outcome:?}");
    };
    assert_eq!(reason, "contains password");
    assert_eq!(upstream.call_count(), 0, "denied calls must not reach upstream");

    let entries = service.audit.get_all().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].decision, AuditOutcome::Deny);
    assert_eq!(entries[0].reason, "contains password");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn approval_grant_resumes_the_forward() {
    let upstream = UpstreamStub::spawn(StatusCode::OK, r#"{"rows":[]}"#).await;
    let source =
        FixedSource::new(vec![("require_approval", static_evaluator(true, true, "sensitive op"))]);
    let service = build_service(
        source as Arc<dyn PolicySnapshotSource>,
        upstream.url(),
        Duration::from_secs(5),
    );

    let proxy = Arc::clone(&service.proxy);
    let call = tokio::spawn(async move {
        proxy.handle(envelope(r#"{"tool_name":"db","args":{"q":"DROP TABLE users"}}"#)).await
    });

    let entry = wait_for_pending(&service.queue).await;
    assert_eq!(entry.tool_name.as_str(), "db");
    assert_eq!(entry.reason, "sensitive op");

    service
        .queue
        .decide(entry.id, HumanDecision {
            approved: true,
            reason: "ok by Admin".to_string(),
            decided_by: Some("Admin".to_string()),
        })
        .unwrap();

    let outcome = call.await.unwrap();
    assert!(matches!(outcome, ToolCallOutcome::Success { .. }));
    assert_eq!(upstream.call_count(), 1);

    let entries = service.audit.get_all().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].decision, AuditOutcome::Allow);
    assert!(entries[0].reason.contains("Admin"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn approval_timeout_denies_and_clears_the_entry() {
    let upstream = UpstreamStub::spawn(StatusCode::OK, r#"{"ok":true}"#).await;
    let source =
        FixedSource::new(vec![("require_approval", static_evaluator(true, true, "sensitive op"))]);
    let service = build_service(
        source as Arc<dyn PolicySnapshotSource>,
        upstream.url(),
        Duration::from_millis(500),
    );

    let start = Instant::now();
    let outcome = service.proxy.handle(envelope(r#"{"tool_name":"db","args":{}}"#)).await;
    let elapsed = start.elapsed();

    let ToolCallOutcome::Denied {
        reason,
    } = outcome
    else {
        panic!("expected denial, got {outcome:?}");
    };
    assert_eq!(reason, "approval timeout");
    assert!(elapsed >= Duration::from_millis(450), "timeout fired early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "timeout fired late: {elapsed:?}");
    assert!(service.queue.get_pending().is_empty());
    assert_eq!(upstream.call_count(), 0);

    let entries = service.audit.get_all().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].decision, AuditOutcome::Deny);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn human_denial_surfaces_the_reason() {
    let upstream = UpstreamStub::spawn(StatusCode::OK, r#"{"ok":true}"#).await;
    let source =
        FixedSource::new(vec![("require_approval", static_evaluator(true, true, "sensitive op"))]);
    let service = build_service(
        source as Arc<dyn PolicySnapshotSource>,
        upstream.url(),
        Duration::from_secs(5),
    );

    let proxy = Arc::clone(&service.proxy);
    let call =
        tokio::spawn(async move { proxy.handle(envelope(r#"{"tool_name":"db","args":{}}"#)).await });

    let entry = wait_for_pending(&service.queue).await;
    service
        .queue
        .decide(entry.id, HumanDecision {
            approved: false,
            reason: "not during business hours".to_string(),
            decided_by: Some("Ops".to_string()),
        })
        .unwrap();

    let outcome = call.await.unwrap();
    let ToolCallOutcome::Denied {
        reason,
    } = outcome
    else {
        panic!("expected denial, got {outcome:?}");
    };
    assert!(reason.contains("not during business hours"));
    assert_eq!(upstream.call_count(), 0);

    let entries = service.audit.get_all().unwrap();
    assert_eq!(entries[0].decision, AuditOutcome::Deny);
    assert!(entries[0].reason.contains("Ops"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn empty_tool_name_is_a_client_error_and_not_audited() {
    let upstream = UpstreamStub::spawn(StatusCode::OK, r#"{"ok":true}"#).await;
    let source = FixedSource::new(vec![("allow_all", static_evaluator(true, false, "ok"))]);
    let service = build_service(
        source as Arc<dyn PolicySnapshotSource>,
        upstream.url(),
        Duration::from_secs(5),
    );

    let outcome = service.proxy.handle(envelope(r#"{"tool_name":"","args":{}}"#)).await;
    assert!(matches!(outcome, ToolCallOutcome::ClientError { .. }));
    assert!(service.audit.get_all().unwrap().is_empty());
    assert_eq!(upstream.call_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn upstream_failure_is_a_gateway_error_after_an_allow_audit() {
    let upstream = UpstreamStub::spawn(StatusCode::INTERNAL_SERVER_ERROR, r#"{"err":1}"#).await;
    let source = FixedSource::new(vec![("allow_all", static_evaluator(true, false, "ok"))]);
    let service = build_service(
        source as Arc<dyn PolicySnapshotSource>,
        upstream.url(),
        Duration::from_secs(5),
    );

    let outcome = service.proxy.handle(envelope(r#"{"tool_name":"calc","args":{}}"#)).await;
    assert!(matches!(outcome, ToolCallOutcome::UpstreamError { .. }));

    // The allow decision was already terminal before the forward began.
    let entries = service.audit.get_all().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].decision, AuditOutcome::Allow);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn empty_policy_set_fails_closed() {
    let upstream = UpstreamStub::spawn(StatusCode::OK, r#"{"ok":true}"#).await;
    let source = FixedSource::new(Vec::new());
    let service = build_service(
        source as Arc<dyn PolicySnapshotSource>,
        upstream.url(),
        Duration::from_secs(5),
    );

    let outcome = service.proxy.handle(envelope(r#"{"tool_name":"calc","args":{}}"#)).await;
    let ToolCallOutcome::Denied {
        reason,
    } = outcome
    else {
        panic!("expected denial, got {outcome:?}");
    };
    assert_eq!(reason, "no policies loaded");
    assert_eq!(upstream.call_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn evaluator_failure_fails_closed_with_the_policy_name() {
    let upstream = UpstreamStub::spawn(StatusCode::OK, r#"{"ok":true}"#).await;
    let source = FixedSource::new(vec![("broken", Arc::new(common::BrokenEvaluator))]);
    let service = build_service(
        source as Arc<dyn PolicySnapshotSource>,
        upstream.url(),
        Duration::from_secs(5),
    );

    let outcome = service.proxy.handle(envelope(r#"{"tool_name":"calc","args":{}}"#)).await;
    let ToolCallOutcome::Denied {
        reason,
    } = outcome
    else {
        panic!("expected denial, got {outcome:?}");
    };
    assert_eq!(reason, "policy error: broken");

    let entries = service.audit.get_all().unwrap();
    assert_eq!(entries[0].decision, AuditOutcome::Deny);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn per_request_upstream_override_is_honored() {
    let default_upstream = UpstreamStub::spawn(StatusCode::OK, r#"{"from":"default"}"#).await;
    let override_upstream = UpstreamStub::spawn(StatusCode::OK, r#"{"from":"override"}"#).await;
    let source = FixedSource::new(vec![("allow_all", static_evaluator(true, false, "ok"))]);
    let service = build_service(
        source as Arc<dyn PolicySnapshotSource>,
        default_upstream.url(),
        Duration::from_secs(5),
    );

    let body = format!(
        r#"{{"tool_name":"calc","args":{{}},"upstream":"{}"}}"#,
        override_upstream.url()
    );
    let outcome = service.proxy.handle(envelope(&body)).await;
    let ToolCallOutcome::Success {
        result,
    } = outcome
    else {
        panic!("expected success, got {outcome:?}");
    };
    assert_eq!(result.get(), r#"{"from":"override"}"#);
    assert_eq!(default_upstream.call_count(), 0);
    assert_eq!(override_upstream.call_count(), 1);
}
