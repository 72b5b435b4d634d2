// toolgate-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Audit Store
// Description: Durable append-only audit log backed by SQLite WAL.
// Purpose: Persist terminal decisions with storage-enforced immutability.
// Dependencies: toolgate-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This module implements a durable [`AuditStore`] using `SQLite`. Entries are
//! written to a single append-only table; UPDATE and DELETE are rejected by
//! triggers at the storage layer. Writers contend on one shared connection
//! with short transactions and bounded retry on busy errors. Security
//! posture: database contents are untrusted on read and validated on write.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OpenFlags;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;
use toolgate_core::AuditEntry;
use toolgate_core::AuditError;
use toolgate_core::AuditOutcome;
use toolgate_core::AuditStore;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Write attempts before surfacing contention to the caller.
const WRITE_RETRY_ATTEMPTS: u32 = 3;
/// Base backoff between write attempts; scales linearly per attempt.
const WRITE_RETRY_BACKOFF: Duration = Duration::from_millis(10);
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

/// Audit table schema. The CHECK constraint mirrors [`AuditOutcome`].
const SCHEMA_TABLE: &str = "CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    tool_input TEXT NOT NULL,
    decision TEXT NOT NULL CHECK(decision IN ('allow', 'deny')),
    reason TEXT NOT NULL
)";

/// Trigger rejecting UPDATE at the storage layer.
const SCHEMA_PREVENT_UPDATE: &str = "CREATE TRIGGER IF NOT EXISTS prevent_update
    BEFORE UPDATE ON audit_log
    FOR EACH ROW
    BEGIN
        SELECT RAISE(FAIL, 'updates not allowed on audit_log');
    END";

/// Trigger rejecting DELETE at the storage layer.
const SCHEMA_PREVENT_DELETE: &str = "CREATE TRIGGER IF NOT EXISTS prevent_delete
    BEFORE DELETE ON audit_log
    FOR EACH ROW
    BEGIN
        SELECT RAISE(FAIL, 'deletes not allowed on audit_log');
    END";

/// Index supporting descending-time reads.
const SCHEMA_INDEX_TIMESTAMP: &str =
    "CREATE INDEX IF NOT EXISTS idx_timestamp ON audit_log(timestamp DESC)";

/// Insert statement for one entry.
const QUERY_INSERT: &str = "INSERT INTO audit_log (tool_input, decision, reason) VALUES (?1, ?2, ?3)";

/// Select statement returning all entries, newest first.
const QUERY_SELECT_ALL: &str = "SELECT id, timestamp, tool_input, decision, reason FROM audit_log \
                                ORDER BY timestamp DESC, id DESC";

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Normal synchronous mode (balanced; WAL keeps this durable enough).
    #[default]
    Normal,
    /// Full synchronous mode (safest).
    Full,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Full => "full",
        }
    }
}

/// Configuration for the `SQLite` audit store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteAuditStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl SqliteAuditStoreConfig {
    /// Creates a configuration with defaults for the given path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` audit store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Write contention outlived the retry budget.
    #[error("sqlite store busy after {0} attempts")]
    Busy(u32),
    /// Invalid input or corrupt stored data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
}

impl From<SqliteStoreError> for AuditError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) | SqliteStoreError::Db(message) => Self::Storage(message),
            SqliteStoreError::Busy(attempts) => {
                Self::Transient(format!("write contention after {attempts} attempts"))
            }
            SqliteStoreError::Invalid(message) => Self::InvalidInput(message),
        }
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed append-only audit store.
#[derive(Clone)]
pub struct SqliteAuditStore {
    /// Shared `SQLite` connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteAuditStore {
    /// Opens an `SQLite`-backed audit store, creating the schema on first use.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn new(config: &SqliteAuditStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let connection = open_connection(config)?;
        initialize_schema(&connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Appends one audit entry with bounded retry on write contention.
    fn insert_entry(
        &self,
        tool_input: &str,
        outcome: AuditOutcome,
        reason: &str,
    ) -> Result<(), SqliteStoreError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = {
                let guard = self
                    .connection
                    .lock()
                    .map_err(|_| SqliteStoreError::Db("mutex poisoned".to_string()))?;
                guard.execute(QUERY_INSERT, params![tool_input, outcome.as_str(), reason])
            };
            match result {
                Ok(_) => return Ok(()),
                Err(err) if is_busy(&err) && attempt < WRITE_RETRY_ATTEMPTS => {
                    thread::sleep(WRITE_RETRY_BACKOFF * attempt);
                }
                Err(err) if is_busy(&err) => return Err(SqliteStoreError::Busy(attempt)),
                Err(err) => return Err(SqliteStoreError::Db(err.to_string())),
            }
        }
    }

    /// Reads all entries ordered newest first.
    fn select_all(&self) -> Result<Vec<AuditEntry>, SqliteStoreError> {
        let guard = self
            .connection
            .lock()
            .map_err(|_| SqliteStoreError::Db("mutex poisoned".to_string()))?;
        let mut statement =
            guard.prepare(QUERY_SELECT_ALL).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let rows = statement
            .query_map([], |row| {
                let id: i64 = row.get(0)?;
                let timestamp: String = row.get(1)?;
                let tool_input: String = row.get(2)?;
                let decision: String = row.get(3)?;
                let reason: String = row.get(4)?;
                Ok((id, timestamp, tool_input, decision, reason))
            })
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, timestamp, tool_input, decision, reason) =
                row.map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let decision = parse_outcome(&decision)?;
            entries.push(AuditEntry {
                id,
                timestamp,
                tool_input,
                decision,
                reason,
            });
        }
        Ok(entries)
    }
}

impl AuditStore for SqliteAuditStore {
    fn log(
        &self,
        tool_input: &str,
        outcome: AuditOutcome,
        reason: &str,
    ) -> Result<(), AuditError> {
        validate_log_input(tool_input, reason).map_err(AuditError::from)?;
        self.insert_entry(tool_input, outcome, reason).map_err(AuditError::from)
    }

    fn get_all(&self) -> Result<Vec<AuditEntry>, AuditError> {
        self.select_all().map_err(AuditError::from)
    }
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Validates log input before it reaches storage.
fn validate_log_input(tool_input: &str, reason: &str) -> Result<(), SqliteStoreError> {
    if tool_input.is_empty() {
        return Err(SqliteStoreError::Invalid("tool_input cannot be empty".to_string()));
    }
    if serde_json::from_str::<serde::de::IgnoredAny>(tool_input).is_err() {
        return Err(SqliteStoreError::Invalid("tool_input must be valid JSON".to_string()));
    }
    if reason.is_empty() {
        return Err(SqliteStoreError::Invalid("reason cannot be empty".to_string()));
    }
    Ok(())
}

/// Parses a stored decision label, failing closed on unknown values.
fn parse_outcome(label: &str) -> Result<AuditOutcome, SqliteStoreError> {
    match label {
        "allow" => Ok(AuditOutcome::Allow),
        "deny" => Ok(AuditOutcome::Deny),
        other => Err(SqliteStoreError::Invalid(format!("unknown decision label: {other}"))),
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns true when the error is `SQLite` write contention.
fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.exists() && path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with WAL journaling and durability pragmas.
fn open_connection(config: &SqliteAuditStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas for WAL-mode concurrent access.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteAuditStoreConfig,
) -> Result<(), SqliteStoreError> {
    let pragmas = [
        "PRAGMA journal_mode=WAL".to_string(),
        format!("PRAGMA synchronous={}", config.sync_mode.pragma_value()),
        format!("PRAGMA busy_timeout={}", config.busy_timeout_ms),
        "PRAGMA foreign_keys=ON".to_string(),
        "PRAGMA temp_store=MEMORY".to_string(),
    ];
    for pragma in &pragmas {
        connection
            .execute_batch(pragma)
            .map_err(|err| SqliteStoreError::Db(format!("pragma failed: {err}")))?;
    }
    Ok(())
}

/// Creates the audit table, immutability triggers, and timestamp index.
fn initialize_schema(connection: &Connection) -> Result<(), SqliteStoreError> {
    for statement in
        [SCHEMA_TABLE, SCHEMA_PREVENT_UPDATE, SCHEMA_PREVENT_DELETE, SCHEMA_INDEX_TIMESTAMP]
    {
        connection
            .execute_batch(statement)
            .map_err(|err| SqliteStoreError::Db(format!("schema init failed: {err}")))?;
    }
    Ok(())
}
