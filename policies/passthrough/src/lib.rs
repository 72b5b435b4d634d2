// policies/passthrough/src/lib.rs
// ============================================================================
// Module: Passthrough Policy
// Description: Permissive policy module allowing every tool call.
// Purpose: Provide the baseline artifact for deny-by-default deployments.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! The sidecar fails closed: with no policies loaded, every call is denied.
//! Deployments that want an open posture install this module, which allows
//! every syntactically valid input. Build it with
//! `cargo build -p toolgate-passthrough-policy --target wasm32-unknown-unknown --release`
//! and drop the resulting `.wasm` into the policy directory.
//!
//! Module ABI (shared by every Toolgate policy):
//! - `allocate(size) -> ptr` reserves linear memory for host buffers;
//! - `evaluate(input_ptr, input_len, output_ptr, output_max_len) -> status`
//!   reads the JSON policy input, writes a NUL-terminated JSON decision into
//!   the output buffer, and returns zero on success.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Policy input handed over by the sidecar host.
#[derive(Debug, Deserialize)]
pub struct PolicyInput {
    /// Name of the tool being invoked.
    pub tool_name: String,
    /// Opaque tool arguments.
    #[serde(default)]
    pub args: Value,
    /// Out-of-band context supplied by the host.
    #[serde(default)]
    pub metadata: Value,
}

/// Decision returned to the sidecar host.
#[derive(Debug, Serialize)]
pub struct PolicyResult {
    /// Whether the call is allowed.
    pub allow: bool,
    /// Whether a human decision is required.
    pub human_required: bool,
    /// Human-readable reason.
    pub reason: String,
    /// Confidence in the decision.
    pub confidence: f64,
}

impl PolicyResult {
    /// Unconditional allow.
    #[must_use]
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allow: true,
            human_required: false,
            reason: reason.into(),
            confidence: 1.0,
        }
    }

    /// Unconditional deny.
    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allow: false,
            human_required: false,
            reason: reason.into(),
            confidence: 1.0,
        }
    }
}

// ============================================================================
// SECTION: Module ABI
// ============================================================================

/// Reserves `size` bytes of module memory for the host.
#[no_mangle]
pub extern "C" fn allocate(size: usize) -> *mut u8 {
    let mut buffer = Vec::with_capacity(size);
    let ptr = buffer.as_mut_ptr();
    std::mem::forget(buffer);
    ptr
}

/// Evaluates the policy input; status zero denotes success.
///
/// # Safety
///
/// The host guarantees `input_ptr..input_ptr+input_len` and
/// `output_ptr..output_ptr+output_max_len` are valid module-memory ranges.
#[no_mangle]
pub unsafe extern "C" fn evaluate(
    input_ptr: *const u8,
    input_len: usize,
    output_ptr: *mut u8,
    output_max_len: usize,
) -> i32 {
    let input = std::slice::from_raw_parts(input_ptr, input_len);
    let result = match serde_json::from_slice::<PolicyInput>(input) {
        Ok(_) => PolicyResult::allow("passthrough"),
        Err(err) => PolicyResult::deny(format!("invalid input JSON: {err}")),
    };
    write_result(&result, output_ptr, output_max_len)
}

/// Serializes a decision NUL-terminated into the output buffer.
///
/// # Safety
///
/// `output_ptr..output_ptr+output_max_len` must be a valid writable range.
unsafe fn write_result(result: &PolicyResult, output_ptr: *mut u8, output_max_len: usize) -> i32 {
    let Ok(bytes) = serde_json::to_vec(result) else {
        return 1;
    };
    if bytes.len() + 1 > output_max_len {
        return 1;
    }
    std::ptr::copy_nonoverlapping(bytes.as_ptr(), output_ptr, bytes.len());
    *output_ptr.add(bytes.len()) = 0;
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drives the ABI the way the host does, on native pointers.
    fn run_evaluate(input: &str) -> (i32, String) {
        let mut output = vec![0u8; 8192];
        let status = unsafe {
            evaluate(input.as_ptr(), input.len(), output.as_mut_ptr(), output.len())
        };
        let len = output.iter().position(|byte| *byte == 0).unwrap_or(output.len());
        (status, String::from_utf8_lossy(&output[..len]).into_owned())
    }

    #[test]
    fn valid_input_is_allowed() {
        let (status, body) = run_evaluate(r#"{"tool_name":"calc","args":{"a":1}}"#);
        assert_eq!(status, 0);
        let decision: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(decision["allow"], Value::Bool(true));
        assert_eq!(decision["reason"], Value::String("passthrough".into()));
    }

    #[test]
    fn malformed_input_is_denied() {
        let (status, body) = run_evaluate("{not json");
        assert_eq!(status, 0);
        let decision: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(decision["allow"], Value::Bool(false));
    }

    #[test]
    fn oversized_output_reports_failure() {
        let input = r#"{"tool_name":"calc"}"#;
        let mut output = vec![0u8; 4];
        let status = unsafe {
            evaluate(input.as_ptr(), input.len(), output.as_mut_ptr(), output.len())
        };
        assert_eq!(status, 1);
    }
}
