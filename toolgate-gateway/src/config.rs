// toolgate-gateway/src/config.rs
// ============================================================================
// Module: Gateway Configuration
// Description: Environment-variable configuration for the sidecar.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! The sidecar is configured entirely through environment variables so it can
//! slot into container deployments without a config file. Unset variables
//! fall back to documented defaults; set-but-invalid values are an error, not
//! a silent fallback. Security posture: configuration inputs are untrusted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Listen address for the HTTP edge.
pub const ENV_BIND: &str = "TOOLGATE_BIND";
/// Directory scanned for policy artifacts.
pub const ENV_POLICY_DIR: &str = "TOOLGATE_POLICY_DIR";
/// Path of the audit database file.
pub const ENV_AUDIT_DB: &str = "TOOLGATE_AUDIT_DB";
/// Default upstream URL for tool calls without an override.
pub const ENV_UPSTREAM: &str = "TOOLGATE_UPSTREAM";
/// Upstream request timeout in seconds.
pub const ENV_UPSTREAM_TIMEOUT_SECS: &str = "TOOLGATE_UPSTREAM_TIMEOUT_SECS";
/// Approval wait budget in seconds.
pub const ENV_APPROVAL_TIMEOUT_SECS: &str = "TOOLGATE_APPROVAL_TIMEOUT_SECS";
/// Policy evaluation wall-clock budget in milliseconds.
pub const ENV_POLICY_BUDGET_MS: &str = "TOOLGATE_POLICY_BUDGET_MS";
/// Fuel budget per policy invocation.
pub const ENV_POLICY_FUEL: &str = "TOOLGATE_POLICY_FUEL";

/// Default listen address.
const DEFAULT_BIND: &str = "127.0.0.1:8080";
/// Default policy directory.
const DEFAULT_POLICY_DIR: &str = "./policies";
/// Default audit database path.
const DEFAULT_AUDIT_DB: &str = "./db/audit.db";
/// Default upstream URL.
const DEFAULT_UPSTREAM: &str = "http://localhost:9000";
/// Default upstream timeout in seconds.
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;
/// Default approval timeout in seconds.
const DEFAULT_APPROVAL_TIMEOUT_SECS: u64 = 300;
/// Default policy evaluation budget in milliseconds.
const DEFAULT_POLICY_BUDGET_MS: u64 = 5_000;
/// Default fuel budget per policy invocation.
const DEFAULT_POLICY_FUEL: u64 = 10_000_000;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held an unparseable value.
    #[error("invalid value for {key}: {detail}")]
    Invalid {
        /// Variable name.
        key: &'static str,
        /// Parse failure detail.
        detail: String,
    },
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Gateway configuration resolved from the environment.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Listen address for the HTTP edge.
    pub bind: SocketAddr,
    /// Directory scanned for policy artifacts.
    pub policy_dir: PathBuf,
    /// Path of the audit database file.
    pub audit_db: PathBuf,
    /// Default upstream URL.
    pub default_upstream: String,
    /// Upstream request timeout.
    pub upstream_timeout: Duration,
    /// Approval wait budget.
    pub approval_timeout: Duration,
    /// Policy evaluation wall-clock budget.
    pub policy_budget: Duration,
    /// Fuel budget per policy invocation.
    pub policy_fuel: u64,
}

impl GatewayConfig {
    /// Loads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind = parse_env::<SocketAddr>(ENV_BIND, DEFAULT_BIND)?;
        let policy_dir = PathBuf::from(string_env(ENV_POLICY_DIR, DEFAULT_POLICY_DIR));
        let audit_db = PathBuf::from(string_env(ENV_AUDIT_DB, DEFAULT_AUDIT_DB));
        let default_upstream = string_env(ENV_UPSTREAM, DEFAULT_UPSTREAM);
        validate_upstream(&default_upstream)?;
        let upstream_timeout = Duration::from_secs(parse_env(
            ENV_UPSTREAM_TIMEOUT_SECS,
            &DEFAULT_UPSTREAM_TIMEOUT_SECS.to_string(),
        )?);
        let approval_timeout = Duration::from_secs(parse_env(
            ENV_APPROVAL_TIMEOUT_SECS,
            &DEFAULT_APPROVAL_TIMEOUT_SECS.to_string(),
        )?);
        let policy_budget = Duration::from_millis(parse_env(
            ENV_POLICY_BUDGET_MS,
            &DEFAULT_POLICY_BUDGET_MS.to_string(),
        )?);
        let policy_fuel = parse_env(ENV_POLICY_FUEL, &DEFAULT_POLICY_FUEL.to_string())?;
        Ok(Self {
            bind,
            policy_dir,
            audit_db,
            default_upstream,
            upstream_timeout,
            approval_timeout,
            policy_budget,
            policy_fuel,
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads a string variable with a default for the unset case.
fn string_env(key: &'static str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

/// Reads and parses a variable, failing closed on invalid values. The
/// default is parsed the same way, so defaults stay in one place as strings.
fn parse_env<T>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = match env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    };
    raw.parse().map_err(|err: T::Err| ConfigError::Invalid {
        key,
        detail: err.to_string(),
    })
}

/// Validates that the upstream URL uses an HTTP scheme.
fn validate_upstream(upstream: &str) -> Result<(), ConfigError> {
    if upstream.starts_with("http://") || upstream.starts_with("https://") {
        return Ok(());
    }
    Err(ConfigError::Invalid {
        key: ENV_UPSTREAM,
        detail: "upstream must be an http(s) URL".to_string(),
    })
}
