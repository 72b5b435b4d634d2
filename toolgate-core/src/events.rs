// toolgate-core/src/events.rs
// ============================================================================
// Module: Toolgate Operational Events
// Description: Structured operational events for sidecar subsystems.
// Purpose: Emit JSON-line events without a hard logging dependency.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! This module defines a thin event interface used by the gateway, the
//! policy reload controller, and the approval queue for operational logging.
//! It is intentionally dependency-light so deployments can route events to
//! their preferred logging pipeline without redesign. Security posture:
//! events must not carry raw tool arguments or secrets.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;

// ============================================================================
// SECTION: Event
// ============================================================================

/// One operational event payload.
#[derive(Debug, Clone, Serialize)]
pub struct GateEvent {
    /// Stable event identifier (e.g. `policy_reloaded`).
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Subsystem that emitted the event.
    pub component: &'static str,
    /// Free-form detail string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl GateEvent {
    /// Creates a new event with a consistent timestamp.
    #[must_use]
    pub fn new(event: &'static str, component: &'static str, detail: Option<String>) -> Self {
        let timestamp_ms =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        Self {
            event,
            timestamp_ms,
            component,
            detail,
        }
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Sink for operational events.
pub trait EventSink: Send + Sync {
    /// Records an event.
    fn record(&self, event: &GateEvent);
}

/// Sink that logs JSON lines to stderr.
pub struct StderrEventSink;

impl EventSink for StderrEventSink {
    fn record(&self, event: &GateEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(io::stderr(), "{payload}");
        }
    }
}

/// Sink that logs JSON lines to an append-only file.
pub struct FileEventSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileEventSink {
    /// Opens the event log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl EventSink for FileEventSink {
    fn record(&self, event: &GateEvent) {
        let Ok(payload) = serde_json::to_string(event) else {
            return;
        };
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{payload}");
        }
    }
}

/// Sink that discards all events.
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn record(&self, _event: &GateEvent) {}
}
