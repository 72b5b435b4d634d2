// toolgate-gateway/tests/common/mod.rs
// ============================================================================
// Module: Gateway Test Support
// Description: Shared fixtures for gateway integration tests.
// Purpose: Provide stub policies, a stub upstream, and service assembly.
// Dependencies: toolgate-gateway, toolgate-core, toolgate-store-sqlite, axum
// ============================================================================

//! ## Overview
//! Test doubles for the proxy's collaborators: fixed-decision policy
//! evaluators, a swappable snapshot source, and an in-process upstream server
//! that records the bodies it receives.

#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only helpers; not every test uses every fixture."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::http::StatusCode;
use axum::routing::post;
use tempfile::TempDir;
use toolgate_core::ApprovalQueue;
use toolgate_core::ApprovalQueueConfig;
use toolgate_core::DecisionEngine;
use toolgate_core::DecisionEngineConfig;
use toolgate_core::EvaluatorSet;
use toolgate_core::NoopEventSink;
use toolgate_core::PolicyDecision;
use toolgate_core::PolicyError;
use toolgate_core::PolicyEvaluator;
use toolgate_core::PolicyInput;
use toolgate_core::PolicyName;
use toolgate_core::PolicySnapshotSource;
use toolgate_gateway::Forwarder;
use toolgate_gateway::ProxyService;
use toolgate_store_sqlite::SqliteAuditStore;
use toolgate_store_sqlite::SqliteAuditStoreConfig;

// ============================================================================
// SECTION: Stub Policies
// ============================================================================

/// Evaluator returning a fixed decision.
pub struct StaticEvaluator {
    /// Decision returned for every input.
    pub decision: PolicyDecision,
}

impl PolicyEvaluator for StaticEvaluator {
    fn evaluate(&self, _input: &PolicyInput) -> Result<PolicyDecision, PolicyError> {
        Ok(self.decision.clone())
    }
}

/// Evaluator failing with a trap.
pub struct BrokenEvaluator;

impl PolicyEvaluator for BrokenEvaluator {
    fn evaluate(&self, _input: &PolicyInput) -> Result<PolicyDecision, PolicyError> {
        Err(PolicyError::Trap("stub trap".to_string()))
    }
}

/// Snapshot source over a fixed, swappable set.
pub struct FixedSource {
    /// Current set.
    set: RwLock<Arc<EvaluatorSet>>,
}

impl FixedSource {
    /// Creates a source over the given entries.
    pub fn new(entries: Vec<(&str, Arc<dyn PolicyEvaluator>)>) -> Arc<Self> {
        let set: EvaluatorSet =
            entries.into_iter().map(|(name, eval)| (PolicyName::new(name), eval)).collect();
        Arc::new(Self {
            set: RwLock::new(Arc::new(set)),
        })
    }
}

impl PolicySnapshotSource for FixedSource {
    fn snapshot(&self) -> Arc<EvaluatorSet> {
        Arc::clone(&*self.set.read().unwrap())
    }
}

/// Fixed decision helper.
pub fn decision(allow: bool, human_required: bool, reason: &str) -> PolicyDecision {
    PolicyDecision {
        allow,
        human_required,
        reason: reason.to_string(),
        confidence: None,
    }
}

/// Single-policy stub evaluator.
pub fn static_evaluator(
    allow: bool,
    human_required: bool,
    reason: &str,
) -> Arc<dyn PolicyEvaluator> {
    Arc::new(StaticEvaluator {
        decision: decision(allow, human_required, reason),
    })
}

// ============================================================================
// SECTION: Stub Upstream
// ============================================================================

/// In-process upstream capturing calls and bodies.
pub struct UpstreamStub {
    /// Bound address of the stub.
    pub addr: SocketAddr,
    /// Number of requests received.
    pub calls: Arc<AtomicUsize>,
    /// Body of the most recent request.
    pub last_body: Arc<Mutex<Option<String>>>,
}

impl UpstreamStub {
    /// Spawns a stub answering every POST with the given status and body.
    pub async fn spawn(status: StatusCode, body: &'static str) -> Self {
        let calls = Arc::new(AtomicUsize::new(0));
        let last_body = Arc::new(Mutex::new(None));
        let calls_handler = Arc::clone(&calls);
        let last_body_handler = Arc::clone(&last_body);
        let app = Router::new().route(
            "/",
            post(move |request_body: Bytes| {
                let calls = Arc::clone(&calls_handler);
                let last_body = Arc::clone(&last_body_handler);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    *last_body.lock().unwrap() =
                        Some(String::from_utf8_lossy(&request_body).into_owned());
                    (status, body)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            addr,
            calls,
            last_body,
        }
    }

    /// Returns the stub's URL.
    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// Returns the number of requests received so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

// ============================================================================
// SECTION: Service Assembly
// ============================================================================

/// Assembled service plus the handles tests poke at.
pub struct TestService {
    /// Proxy under test.
    pub proxy: Arc<ProxyService>,
    /// Approval queue shared with the proxy.
    pub queue: ApprovalQueue,
    /// Audit store shared with the proxy.
    pub audit: Arc<SqliteAuditStore>,
    /// Temp dir keeping the audit database alive.
    pub temp: TempDir,
}

/// Builds a proxy over the given snapshot source and upstream default.
pub fn build_service(
    source: Arc<dyn PolicySnapshotSource>,
    default_upstream: String,
    approval_timeout: Duration,
) -> TestService {
    let temp = TempDir::new().unwrap();
    let audit = Arc::new(
        SqliteAuditStore::new(&SqliteAuditStoreConfig::new(temp.path().join("audit.db"))).unwrap(),
    );
    let queue = ApprovalQueue::new(
        ApprovalQueueConfig {
            timeout: Some(approval_timeout),
        },
        Arc::new(NoopEventSink),
    );
    let engine =
        DecisionEngine::new(source, DecisionEngineConfig::default(), Arc::new(NoopEventSink));
    let forwarder = Forwarder::new(Duration::from_secs(5)).unwrap();
    let proxy = Arc::new(ProxyService::new(
        engine,
        queue.clone(),
        audit.clone() as Arc<dyn toolgate_core::AuditStore>,
        forwarder,
        default_upstream,
        Arc::new(NoopEventSink),
    ));
    TestService {
        proxy,
        queue,
        audit,
        temp,
    }
}
