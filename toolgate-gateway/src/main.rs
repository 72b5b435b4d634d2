// toolgate-gateway/src/main.rs
// ============================================================================
// Module: Toolgate Sidecar Binary
// Description: Process entry point wiring the sidecar components.
// Purpose: Load config, assemble the pipeline, and serve until shutdown.
// Dependencies: toolgate-core, toolgate-policy-wasm, toolgate-store-sqlite
// ============================================================================

//! ## Overview
//! The binary assembles the sidecar: audit store, policy set with watcher,
//! approval queue, decision engine, forwarder, and the HTTP edge. Shutdown on
//! SIGINT cancels pending approvals and stops the watcher before the process
//! exits.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::process::ExitCode;
use std::sync::Arc;

use toolgate_core::ApprovalQueue;
use toolgate_core::ApprovalQueueConfig;
use toolgate_core::DecisionEngine;
use toolgate_core::DecisionEngineConfig;
use toolgate_core::EventSink;
use toolgate_core::GateEvent;
use toolgate_core::PolicySnapshotSource;
use toolgate_core::StderrEventSink;
use toolgate_gateway::AppState;
use toolgate_gateway::Forwarder;
use toolgate_gateway::GatewayConfig;
use toolgate_gateway::ProxyService;
use toolgate_policy_wasm::PolicyLoader;
use toolgate_policy_wasm::PolicySet;
use toolgate_policy_wasm::PolicyWatcher;
use toolgate_policy_wasm::PolicyWatcherConfig;
use toolgate_policy_wasm::WasmLimits;
use toolgate_store_sqlite::SqliteAuditStore;
use toolgate_store_sqlite::SqliteAuditStoreConfig;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let events: Arc<dyn EventSink> = Arc::new(StderrEventSink);
    match run(Arc::clone(&events)).await {
        Ok(()) => {
            events.record(&GateEvent::new("sidecar_stopped", "main", None));
            ExitCode::SUCCESS
        }
        Err(detail) => {
            events.record(&GateEvent::new("sidecar_failed", "main", Some(detail)));
            ExitCode::FAILURE
        }
    }
}

/// Assembles and runs the sidecar until shutdown.
async fn run(events: Arc<dyn EventSink>) -> Result<(), String> {
    let config = GatewayConfig::from_env().map_err(|err| err.to_string())?;
    events.record(&GateEvent::new(
        "sidecar_starting",
        "main",
        Some(format!("bind {} policies {}", config.bind, config.policy_dir.display())),
    ));

    let audit = Arc::new(
        SqliteAuditStore::new(&SqliteAuditStoreConfig::new(&config.audit_db))
            .map_err(|err| format!("audit store init failed: {err}"))?,
    );

    let limits = WasmLimits {
        fuel: config.policy_fuel,
        ..WasmLimits::default()
    };
    let loader = PolicyLoader::new(limits, Arc::clone(&events))
        .map_err(|err| format!("policy loader init failed: {err}"))?;
    let policies = PolicySet::open(&config.policy_dir, loader, Arc::clone(&events))
        .map_err(|err| format!("policy load failed: {err}"))?;
    let watcher = PolicyWatcher::spawn(Arc::clone(&policies), PolicyWatcherConfig::default());

    let queue = ApprovalQueue::new(
        ApprovalQueueConfig {
            timeout: Some(config.approval_timeout),
        },
        Arc::clone(&events),
    );
    let engine = DecisionEngine::new(
        Arc::clone(&policies) as Arc<dyn PolicySnapshotSource>,
        DecisionEngineConfig {
            budget: config.policy_budget,
        },
        Arc::clone(&events),
    );
    let forwarder = Forwarder::new(config.upstream_timeout)
        .map_err(|err| format!("forwarder init failed: {err}"))?;

    let proxy = Arc::new(ProxyService::new(
        engine,
        queue.clone(),
        audit.clone(),
        forwarder,
        config.default_upstream.clone(),
        Arc::clone(&events),
    ));
    let state = AppState {
        proxy,
        approvals: queue.clone(),
        audit,
        policies: Arc::clone(&policies) as Arc<dyn PolicySnapshotSource>,
    };

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let served = toolgate_gateway::serve(config.bind, state, shutdown).await;

    // Pending approvals do not survive the process; fail them now so waiting
    // callers observe a cancellation instead of a hang.
    queue.close();
    watcher.shutdown().await;

    served.map_err(|err| err.to_string())
}
