// toolgate-policy-wasm/src/reload.rs
// ============================================================================
// Module: Policy Hot-Reload Controller
// Description: Atomic evaluator-set swaps driven by directory changes.
// Purpose: Keep the installed set current without exposing partial updates.
// Dependencies: toolgate-core, tokio, crate::loader
// ============================================================================

//! ## Overview
//! [`PolicySet`] owns the installed evaluator set behind a reader-writer
//! lock over a reference-counted snapshot. Readers clone the snapshot and
//! evaluate against it; a reload builds a candidate set outside any lock and
//! installs it with a brief write, so in-flight evaluations keep their
//! snapshot and retired evaluators tear down only when the last holder
//! releases them. [`PolicyWatcher`] polls the policy directory, coalesces
//! change bursts through a debounce window, and triggers reloads. A failed
//! reload leaves the previous set in service.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use toolgate_core::EvaluatorSet;
use toolgate_core::EventSink;
use toolgate_core::GateEvent;
use toolgate_core::PolicySnapshotSource;

use crate::loader::LoaderError;
use crate::loader::PolicyLoader;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default interval between directory polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Default quiet window required before a change burst triggers a reload.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

// ============================================================================
// SECTION: Policy Set
// ============================================================================

/// Installed evaluator set with atomic swap semantics.
pub struct PolicySet {
    /// Current snapshot; readers clone the `Arc`, writers replace it.
    current: RwLock<Arc<EvaluatorSet>>,
    /// Loader producing candidate sets.
    loader: PolicyLoader,
    /// Watched policy directory.
    dir: PathBuf,
    /// Serializes reloads; concurrent triggers collapse onto one pass.
    reload_gate: tokio::sync::Mutex<()>,
    /// Sink for operational events.
    events: Arc<dyn EventSink>,
}

impl PolicySet {
    /// Loads the directory once and installs the initial evaluator set.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError`] when the initial load fails; the sidecar
    /// should not start without a valid policy set.
    pub fn open(
        dir: impl Into<PathBuf>,
        loader: PolicyLoader,
        events: Arc<dyn EventSink>,
    ) -> Result<Arc<Self>, LoaderError> {
        let dir = dir.into();
        let initial = loader.load_dir(&dir)?;
        events.record(&GateEvent::new(
            "policy_set_installed",
            "reload",
            Some(format!("{} policies", initial.len())),
        ));
        Ok(Arc::new(Self {
            current: RwLock::new(Arc::new(initial)),
            loader,
            dir,
            reload_gate: tokio::sync::Mutex::new(()),
            events,
        }))
    }

    /// Returns the watched policy directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rebuilds the evaluator set from disk and installs it atomically.
    ///
    /// The candidate set is built outside any lock; the previous set stays in
    /// service on failure. Returns the number of installed policies.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError`] when discovery or compilation leaves no valid
    /// policy.
    pub async fn reload(self: &Arc<Self>) -> Result<usize, LoaderError> {
        let _gate = self.reload_gate.lock().await;
        let this = Arc::clone(self);
        let candidate = tokio::task::spawn_blocking(move || this.loader.load_dir(&this.dir))
            .await
            .map_err(|err| LoaderError::Io(format!("reload task failed: {err}")))?;
        match candidate {
            Ok(set) => {
                let count = set.len();
                {
                    let Ok(mut current) = self.current.write() else {
                        return Err(LoaderError::Io("policy set lock poisoned".to_string()));
                    };
                    *current = Arc::new(set);
                }
                self.events.record(&GateEvent::new(
                    "policy_set_installed",
                    "reload",
                    Some(format!("{count} policies")),
                ));
                Ok(count)
            }
            Err(err) => {
                self.events.record(&GateEvent::new(
                    "policy_reload_failed",
                    "reload",
                    Some(err.to_string()),
                ));
                Err(err)
            }
        }
    }
}

impl PolicySnapshotSource for PolicySet {
    fn snapshot(&self) -> Arc<EvaluatorSet> {
        self.current.read().map_or_else(|_| Arc::new(EvaluatorSet::new()), |set| Arc::clone(&*set))
    }
}

// ============================================================================
// SECTION: Watcher
// ============================================================================

/// Configuration for the directory watcher.
#[derive(Debug, Clone)]
pub struct PolicyWatcherConfig {
    /// Interval between directory polls.
    pub poll_interval: Duration,
    /// Quiet window required before a change triggers a reload.
    pub debounce: Duration,
}

impl Default for PolicyWatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            debounce: DEFAULT_DEBOUNCE_WINDOW,
        }
    }
}

/// Background task polling the policy directory for changes.
///
/// The corpus of this sidecar is deliberately dependency-light, so change
/// detection polls a directory fingerprint (name, mtime, length per artifact)
/// rather than pulling in a filesystem notification backend. Create, write,
/// delete, and rename all perturb the fingerprint.
pub struct PolicyWatcher {
    /// Shutdown signal for the polling task.
    shutdown: watch::Sender<bool>,
    /// Handle for the polling task.
    task: JoinHandle<()>,
}

impl PolicyWatcher {
    /// Spawns the watcher over the given policy set.
    #[must_use]
    pub fn spawn(set: Arc<PolicySet>, config: PolicyWatcherConfig) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut last = fingerprint(&set.dir);
            let mut changed_at: Option<Instant> = None;
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    () = tokio::time::sleep(config.poll_interval) => {
                        let current = fingerprint(&set.dir);
                        if current != last {
                            last = current;
                            changed_at = Some(Instant::now());
                        }
                        if changed_at.is_some_and(|at| at.elapsed() >= config.debounce) {
                            changed_at = None;
                            let _ = set.reload().await;
                        }
                    }
                }
            }
        });
        Self {
            shutdown,
            task,
        }
    }

    /// Stops the watcher and waits for the polling task to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Directory fingerprint entry: file name, modification time, length.
type Fingerprint = Vec<(String, u128, u64)>;

/// Computes the fingerprint of the directory's regular files.
fn fingerprint(dir: &Path) -> Fingerprint {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Fingerprint::new();
    };
    let mut prints = Fingerprint::new();
    for entry in entries.flatten() {
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(std::time::UNIX_EPOCH).ok())
            .map_or(0, |duration| duration.as_millis());
        prints.push((entry.file_name().to_string_lossy().into_owned(), modified, metadata.len()));
    }
    prints.sort();
    prints
}
