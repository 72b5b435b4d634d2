// toolgate-core/src/core/envelope.rs
// ============================================================================
// Module: Toolgate Request Envelope
// Description: Inbound tool-call envelope accepted by the proxy.
// Purpose: Carry tool name, verbatim arguments, and upstream override.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A tool call arrives as `{tool_name, args, upstream?}`. Arguments are
//! opaque JSON preserved byte-for-byte: the same bytes the agent sent are
//! forwarded upstream and recorded in the audit log. The envelope is
//! immutable once parsed. Security posture: envelope contents are untrusted
//! agent input and are never interpreted by the core beyond policy handoff.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::value::RawValue;

use crate::core::identifiers::ToolName;

// ============================================================================
// SECTION: Envelope
// ============================================================================

/// One tool-call request as accepted by the proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Name of the tool being invoked.
    pub tool_name: ToolName,
    /// Opaque tool arguments, preserved verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Box<RawValue>>,
    /// Optional per-request upstream override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,
}

impl ToolCallRequest {
    /// Creates an envelope from its parts.
    #[must_use]
    pub fn new(tool_name: ToolName, args: Option<Box<RawValue>>, upstream: Option<String>) -> Self {
        Self {
            tool_name,
            args,
            upstream,
        }
    }

    /// Returns the raw argument JSON, or `null` when absent.
    #[must_use]
    pub fn args_json(&self) -> &str {
        self.args.as_deref().map_or("null", RawValue::get)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_bytes_survive_a_roundtrip() {
        let body = r#"{"tool_name":"db","args":{"q":"SELECT 1","limit":10},"upstream":"http://localhost:9000"}"#;
        let request: ToolCallRequest = serde_json::from_str(body).unwrap();
        assert_eq!(request.args_json(), r#"{"q":"SELECT 1","limit":10}"#);
        let back = serde_json::to_string(&request).unwrap();
        assert_eq!(back, body);
    }

    #[test]
    fn missing_args_read_as_null() {
        let request: ToolCallRequest = serde_json::from_str(r#"{"tool_name":"calc"}"#).unwrap();
        assert_eq!(request.args_json(), "null");
        assert!(request.upstream.is_none());
    }
}
