// toolgate-policy-wasm/src/loader.rs
// ============================================================================
// Module: WASM Policy Loader
// Description: Directory discovery and compilation of policy artifacts.
// Purpose: Produce a named evaluator set from on-disk modules.
// Dependencies: toolgate-core, wasmtime
// ============================================================================

//! ## Overview
//! The loader scans a directory for policy artifacts by extension, compiles
//! each candidate, and returns a `{name -> evaluator}` mapping. Compilation
//! failures are logged and skipped rather than propagated; an empty result is
//! an error distinguishable from a missing directory. The loader never
//! installs the mapping itself; installation belongs to the reload
//! controller.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use toolgate_core::EvaluatorSet;
use toolgate_core::EventSink;
use toolgate_core::GateEvent;
use toolgate_core::PolicyEvaluator;
use toolgate_core::PolicyName;
use wasmtime::Config;
use wasmtime::Engine;
use wasmtime::Module;

use crate::evaluator::WasmLimits;
use crate::evaluator::WasmPolicy;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default policy-module extension, matched case-insensitively.
pub const DEFAULT_POLICY_EXTENSION: &str = "wasm";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Policy loader errors.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// The policy directory does not exist.
    #[error("policy directory missing: {0}")]
    DirectoryMissing(PathBuf),
    /// The directory exists but yielded no valid policies.
    #[error("no valid policies found in {0}")]
    NoPolicies(PathBuf),
    /// Directory enumeration failed.
    #[error("policy directory read failed: {0}")]
    Io(String),
    /// The WASM engine could not be constructed.
    #[error("wasm engine init failed: {0}")]
    Engine(String),
}

// ============================================================================
// SECTION: Loader
// ============================================================================

/// Compiles policy artifacts into evaluators.
pub struct PolicyLoader {
    /// Shared compilation engine; fuel metering is enabled globally.
    engine: Engine,
    /// Extension (without dot) accepted as a policy artifact.
    extension: String,
    /// Resource limits applied to each evaluator.
    limits: WasmLimits,
    /// Sink for operational events.
    events: Arc<dyn EventSink>,
}

impl PolicyLoader {
    /// Creates a loader with the default `.wasm` extension.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::Engine`] when the WASM engine rejects the
    /// configuration.
    pub fn new(limits: WasmLimits, events: Arc<dyn EventSink>) -> Result<Self, LoaderError> {
        let mut config = Config::new();
        config.consume_fuel(true);
        let engine = Engine::new(&config).map_err(|err| LoaderError::Engine(err.to_string()))?;
        Ok(Self {
            engine,
            extension: DEFAULT_POLICY_EXTENSION.to_string(),
            limits,
            events,
        })
    }

    /// Scans the directory and compiles every candidate artifact.
    ///
    /// Subdirectories are ignored. A candidate's policy name is its filename
    /// stem, lowercased. Artifacts that fail to compile or instantiate are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::DirectoryMissing`] when the directory does not
    /// exist and [`LoaderError::NoPolicies`] when no valid candidate remains.
    pub fn load_dir(&self, dir: &Path) -> Result<EvaluatorSet, LoaderError> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(LoaderError::DirectoryMissing(dir.to_path_buf()));
            }
            Err(err) => return Err(LoaderError::Io(err.to_string())),
        };

        let mut set = EvaluatorSet::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => return Err(LoaderError::Io(err.to_string())),
            };
            let path = entry.path();
            if path.is_dir() || !self.is_policy_file(&path) {
                continue;
            }
            let Some(name) = policy_name_of(&path) else {
                continue;
            };
            match self.load_file(&path, name.clone()) {
                Ok(policy) => {
                    self.events.record(&GateEvent::new(
                        "policy_loaded",
                        "loader",
                        Some(name.to_string()),
                    ));
                    set.insert(name, Arc::new(policy) as Arc<dyn PolicyEvaluator>);
                }
                Err(detail) => {
                    self.events.record(&GateEvent::new(
                        "policy_load_failed",
                        "loader",
                        Some(format!("{}: {detail}", path.display())),
                    ));
                }
            }
        }

        if set.is_empty() {
            return Err(LoaderError::NoPolicies(dir.to_path_buf()));
        }
        Ok(set)
    }

    /// Compiles and instantiates one artifact.
    fn load_file(&self, path: &Path, name: PolicyName) -> Result<WasmPolicy, String> {
        let bytes = std::fs::read(path).map_err(|err| format!("read failed: {err}"))?;
        let module =
            Module::new(&self.engine, &bytes).map_err(|err| format!("compile failed: {err}"))?;
        WasmPolicy::instantiate(&self.engine, &module, name, self.limits, Arc::clone(&self.events))
            .map_err(|err| format!("instantiate failed: {err}"))
    }

    /// Returns true when the filename extension matches, case-insensitively.
    fn is_policy_file(&self, path: &Path) -> bool {
        path.extension()
            .map(|extension| extension.to_string_lossy().to_lowercase())
            .is_some_and(|extension| extension == self.extension)
    }
}

/// Derives the policy name from an artifact path.
fn policy_name_of(path: &Path) -> Option<PolicyName> {
    let stem = path.file_stem()?.to_string_lossy();
    if stem.is_empty() {
        return None;
    }
    Some(PolicyName::new(stem.into_owned()))
}
