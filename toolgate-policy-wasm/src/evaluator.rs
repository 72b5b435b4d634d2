// toolgate-policy-wasm/src/evaluator.rs
// ============================================================================
// Module: WASM Policy Evaluator
// Description: Fuel-bounded execution of a single policy module.
// Purpose: Run evaluate(input) -> decision inside a memory-capped sandbox.
// Dependencies: toolgate-core, wasmtime, serde_json
// ============================================================================

//! ## Overview
//! A [`WasmPolicy`] wraps one instantiated policy module. The module exports
//! `memory`, `allocate(size) -> ptr`, and
//! `evaluate(input_ptr, input_len, output_ptr, output_max_len) -> status`;
//! status zero denotes success. The host writes the policy input as JSON into
//! module memory, invokes `evaluate`, and reads back a NUL-terminated JSON
//! decision from the output buffer (the output convention of this host).
//! Each invocation runs under a fuel budget; exhausting it fails the
//! evaluation. Instances are not reentrant: an internal mutex serializes
//! callers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;

use toolgate_core::EventSink;
use toolgate_core::GateEvent;
use toolgate_core::PolicyDecision;
use toolgate_core::PolicyError;
use toolgate_core::PolicyEvaluator;
use toolgate_core::PolicyInput;
use toolgate_core::PolicyName;
use wasmtime::Caller;
use wasmtime::Engine;
use wasmtime::Extern;
use wasmtime::Linker;
use wasmtime::Memory;
use wasmtime::Module;
use wasmtime::Store;
use wasmtime::StoreLimits;
use wasmtime::StoreLimitsBuilder;
use wasmtime::Trap;
use wasmtime::TypedFunc;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default fuel budget per invocation.
pub const DEFAULT_FUEL_BUDGET: u64 = 10_000_000;
/// Default linear-memory cap per instance.
pub const DEFAULT_MEMORY_LIMIT_BYTES: usize = 64 * 1024 * 1024;
/// Size of the output buffer handed to `evaluate`.
const OUTPUT_BUFFER_BYTES: usize = 8_192;
/// Sentinel returned by `get_env` when the key is absent or oversized.
const GET_ENV_MISSING: i32 = -1;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Resource limits applied to each policy invocation.
#[derive(Debug, Clone, Copy)]
pub struct WasmLimits {
    /// Fuel budget per invocation.
    pub fuel: u64,
    /// Linear-memory cap per instance, in bytes.
    pub max_memory_bytes: usize,
}

impl Default for WasmLimits {
    fn default() -> Self {
        Self {
            fuel: DEFAULT_FUEL_BUDGET,
            max_memory_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
        }
    }
}

// ============================================================================
// SECTION: Host State
// ============================================================================

/// Per-store host state: memory limits plus the diagnostic sink.
struct HostState {
    /// Enforced linear-memory limits.
    limits: StoreLimits,
    /// Policy name used to label diagnostics.
    policy: PolicyName,
    /// Sink receiving `log` output from the module.
    events: Arc<dyn EventSink>,
}

// ============================================================================
// SECTION: Evaluator
// ============================================================================

/// Sandbox context for one instantiated policy module.
struct PolicyInstance {
    /// Store owning the instance; carries fuel and limits.
    store: Store<HostState>,
    /// Exported linear memory.
    memory: Memory,
    /// Exported allocator for host-visible buffers.
    allocate: TypedFunc<i32, i32>,
    /// Exported evaluation entry point.
    evaluate: TypedFunc<(i32, i32, i32, i32), i32>,
}

/// One compiled policy behind the [`PolicyEvaluator`] interface.
pub struct WasmPolicy {
    /// Policy name derived from the artifact filename.
    name: PolicyName,
    /// Fuel budget applied per invocation.
    fuel: u64,
    /// Serialized sandbox context; instances are not reentrant.
    instance: Mutex<PolicyInstance>,
}

impl WasmPolicy {
    /// Instantiates a compiled module into an evaluator.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::HostError`] when instantiation fails or the
    /// module is missing a required export.
    pub fn instantiate(
        engine: &Engine,
        module: &Module,
        name: PolicyName,
        limits: WasmLimits,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, PolicyError> {
        let state = HostState {
            limits: StoreLimitsBuilder::new().memory_size(limits.max_memory_bytes).build(),
            policy: name.clone(),
            events,
        };
        let mut store = Store::new(engine, state);
        store.limiter(|state| &mut state.limits);
        store
            .set_fuel(limits.fuel)
            .map_err(|err| PolicyError::HostError(format!("fuel init failed: {err}")))?;

        let mut linker = Linker::new(engine);
        define_host_functions(&mut linker)?;
        let instance = linker
            .instantiate(&mut store, module)
            .map_err(|err| PolicyError::HostError(format!("instantiate failed: {err}")))?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| PolicyError::HostError("memory export not found".to_string()))?;
        let allocate = instance
            .get_typed_func::<i32, i32>(&mut store, "allocate")
            .map_err(|_| PolicyError::HostError("allocate export not found".to_string()))?;
        let evaluate = instance
            .get_typed_func::<(i32, i32, i32, i32), i32>(&mut store, "evaluate")
            .map_err(|_| PolicyError::HostError("evaluate export not found".to_string()))?;

        Ok(Self {
            name,
            fuel: limits.fuel,
            instance: Mutex::new(PolicyInstance {
                store,
                memory,
                allocate,
                evaluate,
            }),
        })
    }

    /// Returns the policy name.
    #[must_use]
    pub fn name(&self) -> &PolicyName {
        &self.name
    }

    /// Runs the evaluate call against the serialized input bytes.
    fn call_evaluate(&self, input: &[u8]) -> Result<Vec<u8>, PolicyError> {
        let mut guard = self
            .instance
            .lock()
            .map_err(|_| PolicyError::HostError("evaluator mutex poisoned".to_string()))?;
        let instance = &mut *guard;

        instance
            .store
            .set_fuel(self.fuel)
            .map_err(|err| PolicyError::HostError(format!("fuel reset failed: {err}")))?;

        let input_len = i32::try_from(input.len())
            .map_err(|_| PolicyError::HostError("input too large for module memory".to_string()))?;
        let input_ptr = allocate_buffer(instance, input.len())?;
        instance
            .memory
            .write(&mut instance.store, input_ptr as usize, input)
            .map_err(|err| PolicyError::HostError(format!("input write failed: {err}")))?;

        let output_ptr = allocate_buffer(instance, OUTPUT_BUFFER_BYTES)?;
        let output_len = i32::try_from(OUTPUT_BUFFER_BYTES)
            .map_err(|_| PolicyError::HostError("output buffer size overflow".to_string()))?;
        // Zero the buffer so the NUL scan below is well defined even when the
        // allocator reuses memory.
        instance
            .memory
            .write(&mut instance.store, output_ptr as usize, &[0u8; OUTPUT_BUFFER_BYTES])
            .map_err(|err| PolicyError::HostError(format!("output clear failed: {err}")))?;

        let status = instance
            .evaluate
            .call(&mut instance.store, (input_ptr, input_len, output_ptr, output_len))
            .map_err(map_call_error)?;
        if status != 0 {
            return Err(PolicyError::Trap(format!("module returned status {status}")));
        }

        let data = instance.memory.data(&instance.store);
        let start = output_ptr as usize;
        let end = start.saturating_add(OUTPUT_BUFFER_BYTES).min(data.len());
        if start >= data.len() {
            return Err(PolicyError::HostError("output pointer out of bounds".to_string()));
        }
        let window = &data[start..end];
        let len = window.iter().position(|byte| *byte == 0).unwrap_or(window.len());
        Ok(window[..len].to_vec())
    }
}

impl PolicyEvaluator for WasmPolicy {
    fn evaluate(&self, input: &PolicyInput) -> Result<PolicyDecision, PolicyError> {
        let input_json = serde_json::to_vec(input)
            .map_err(|err| PolicyError::HostError(format!("input serialization failed: {err}")))?;
        let output = self.call_evaluate(&input_json)?;
        serde_json::from_slice(&output)
            .map_err(|err| PolicyError::BadOutput(format!("decision parse failed: {err}")))
    }
}

// ============================================================================
// SECTION: Host Functions
// ============================================================================

/// Defines the `env.log` and `env.get_env` host imports.
fn define_host_functions(linker: &mut Linker<HostState>) -> Result<(), PolicyError> {
    linker
        .func_wrap("env", "log", |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| {
            let Some(memory) = exported_memory(&mut caller) else {
                return;
            };
            let data = memory.data(&caller);
            let Some(bytes) = slice_at(data, ptr, len) else {
                return;
            };
            let message = String::from_utf8_lossy(bytes).into_owned();
            let policy = caller.data().policy.clone();
            caller.data().events.record(&GateEvent::new(
                "policy_log",
                "policy",
                Some(format!("{policy}: {message}")),
            ));
        })
        .map_err(|err| PolicyError::HostError(format!("define log failed: {err}")))?;

    linker
        .func_wrap(
            "env",
            "get_env",
            |mut caller: Caller<'_, HostState>,
             key_ptr: i32,
             key_len: i32,
             out_ptr: i32,
             out_max: i32|
             -> i32 {
                let Some(memory) = exported_memory(&mut caller) else {
                    return GET_ENV_MISSING;
                };
                let key = {
                    let data = memory.data(&caller);
                    let Some(bytes) = slice_at(data, key_ptr, key_len) else {
                        return GET_ENV_MISSING;
                    };
                    match std::str::from_utf8(bytes) {
                        Ok(key) => key.to_string(),
                        Err(_) => return GET_ENV_MISSING,
                    }
                };
                let Ok(value) = std::env::var(&key) else {
                    return GET_ENV_MISSING;
                };
                let value = value.into_bytes();
                let Ok(out_max) = usize::try_from(out_max) else {
                    return GET_ENV_MISSING;
                };
                if value.is_empty() || value.len() > out_max {
                    return GET_ENV_MISSING;
                }
                let Ok(out_ptr) = usize::try_from(out_ptr) else {
                    return GET_ENV_MISSING;
                };
                if memory.write(&mut caller, out_ptr, &value).is_err() {
                    return GET_ENV_MISSING;
                }
                i32::try_from(value.len()).unwrap_or(GET_ENV_MISSING)
            },
        )
        .map_err(|err| PolicyError::HostError(format!("define get_env failed: {err}")))?;

    Ok(())
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Allocates a module-memory buffer through the exported allocator.
fn allocate_buffer(instance: &mut PolicyInstance, size: usize) -> Result<i32, PolicyError> {
    let size = i32::try_from(size)
        .map_err(|_| PolicyError::HostError("allocation size overflow".to_string()))?;
    let ptr = instance.allocate.call(&mut instance.store, size).map_err(map_call_error)?;
    if ptr < 0 {
        return Err(PolicyError::HostError("allocator returned negative pointer".to_string()));
    }
    Ok(ptr)
}

/// Maps a wasmtime call failure onto the policy error taxonomy.
fn map_call_error(err: wasmtime::Error) -> PolicyError {
    if let Some(trap) = err.downcast_ref::<Trap>() {
        if *trap == Trap::OutOfFuel {
            return PolicyError::Timeout;
        }
        return PolicyError::Trap(trap.to_string());
    }
    PolicyError::Trap(err.to_string())
}

/// Resolves the caller's exported memory.
fn exported_memory(caller: &mut Caller<'_, HostState>) -> Option<Memory> {
    match caller.get_export("memory") {
        Some(Extern::Memory(memory)) => Some(memory),
        _ => None,
    }
}

/// Bounds-checked slice of module memory.
fn slice_at(data: &[u8], ptr: i32, len: i32) -> Option<&[u8]> {
    let start = usize::try_from(ptr).ok()?;
    let len = usize::try_from(len).ok()?;
    let end = start.checked_add(len)?;
    if end > data.len() {
        return None;
    }
    Some(&data[start..end])
}
