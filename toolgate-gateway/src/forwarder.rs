// toolgate-gateway/src/forwarder.rs
// ============================================================================
// Module: Upstream Forwarder
// Description: Bounded POST delivery of approved tool calls.
// Purpose: Forward `{tool_name, args}` upstream and return the body verbatim.
// Dependencies: toolgate-core, reqwest, serde, serde_json
// ============================================================================

//! ## Overview
//! The forwarder issues one POST per approved call with the envelope
//! `{tool_name, args}` as the JSON body and a configured timeout. A non-2xx
//! status, a network failure, or a non-JSON body all surface as
//! [`ForwardError`]; the orchestrator maps these to gateway errors rather
//! than policy denials. Delivery is at-most-once: the forwarder never
//! retries.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use serde::Serialize;
use serde_json::value::RawValue;
use thiserror::Error;
use toolgate_core::ToolCallRequest;
use toolgate_core::ToolName;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// User agent for outbound requests.
const USER_AGENT: &str = concat!("toolgate/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Upstream forwarding errors.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The HTTP client could not be constructed.
    #[error("forwarder client build failed: {0}")]
    Client(String),
    /// The request failed at the network layer or timed out.
    #[error("upstream request failed: {0}")]
    Network(String),
    /// The upstream answered outside the 2xx range.
    #[error("upstream returned status {0}")]
    Status(u16),
    /// The upstream body was not valid JSON.
    #[error("upstream returned invalid JSON: {0}")]
    InvalidBody(String),
}

// ============================================================================
// SECTION: Payload
// ============================================================================

/// Wire payload forwarded upstream; `args` bytes pass through verbatim.
#[derive(Serialize)]
struct ForwardPayload<'a> {
    /// Name of the tool being invoked.
    tool_name: &'a ToolName,
    /// Opaque tool arguments; absent arguments forward as `null`.
    args: Option<&'a RawValue>,
}

// ============================================================================
// SECTION: Forwarder
// ============================================================================

/// HTTP forwarder for approved tool calls.
pub struct Forwarder {
    /// Client with the configured per-request timeout.
    client: reqwest::Client,
}

impl Forwarder {
    /// Creates a forwarder with the given upstream timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ForwardError::Client`] when the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| ForwardError::Client(err.to_string()))?;
        Ok(Self {
            client,
        })
    }

    /// Forwards the envelope to the upstream URL and returns the body.
    ///
    /// # Errors
    ///
    /// Returns [`ForwardError`] on network failure, non-2xx status, or a
    /// body that is not valid JSON.
    pub async fn forward(
        &self,
        upstream: &str,
        request: &ToolCallRequest,
    ) -> Result<Box<RawValue>, ForwardError> {
        let payload = ForwardPayload {
            tool_name: &request.tool_name,
            args: request.args.as_deref(),
        };
        let response = self
            .client
            .post(upstream)
            .json(&payload)
            .send()
            .await
            .map_err(|err| ForwardError::Network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ForwardError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(|err| ForwardError::Network(err.to_string()))?;
        serde_json::from_slice::<Box<RawValue>>(&body)
            .map_err(|err| ForwardError::InvalidBody(err.to_string()))
    }
}
