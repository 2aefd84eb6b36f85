//! Durable ledger snapshot stores.
//!
//! A store persists the whole [`LedgerState`] on every save. Nothing is
//! appended or patched in place, so a reader always sees one consistent
//! snapshot.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use super::LedgerState;
use crate::error::LedgerError;

/// Whole-snapshot persistence for the ledger.
pub trait LedgerStore: Send {
    /// Load the last saved snapshot, or `None` on a fresh start.
    fn load(&self) -> Result<Option<LedgerState>, LedgerError>;

    /// Atomically replace the saved snapshot.
    fn save(&mut self, state: &LedgerState) -> Result<(), LedgerError>;

    /// Store description for logging.
    fn describe(&self) -> String;
}

/// JSON file store using write-to-temp then rename.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store for the given snapshot path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Snapshot path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn io_err(&self, source: std::io::Error) -> LedgerError {
        LedgerError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl LedgerStore for JsonFileStore {
    fn load(&self) -> Result<Option<LedgerState>, LedgerError> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "No ledger snapshot found, starting fresh");
            return Ok(None);
        }

        let json = fs::read_to_string(&self.path).map_err(|e| self.io_err(e))?;
        let state: LedgerState =
            serde_json::from_str(&json).map_err(|e| LedgerError::Corrupt {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })?;

        info!(
            path = %self.path.display(),
            last_round = state.last_resolved_round,
            wager_cursor = state.last_wager_cursor,
            open_wagers = state.open_wagers.len(),
            "Ledger snapshot loaded"
        );
        Ok(Some(state))
    }

    fn save(&mut self, state: &LedgerState) -> Result<(), LedgerError> {
        let json = serde_json::to_vec_pretty(state)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
            }
        }

        let tmp = self.tmp_path();
        {
            let mut file = fs::File::create(&tmp).map_err(|e| self.io_err(e))?;
            file.write_all(&json).map_err(|e| self.io_err(e))?;
            file.sync_all().map_err(|e| self.io_err(e))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;

        debug!(
            path = %self.path.display(),
            last_round = state.last_resolved_round,
            open_wagers = state.open_wagers.len(),
            "Ledger snapshot saved"
        );
        Ok(())
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}

/// In-memory store for tests and simulation.
///
/// Clones share the same backing snapshot, so a test can drop an engine and
/// reopen a new one over the same "disk" to simulate a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    snapshot: Arc<Mutex<Option<LedgerState>>>,
    fail_saves: Arc<AtomicBool>,
    saves: Arc<Mutex<u64>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with a snapshot.
    pub fn with_state(state: LedgerState) -> Self {
        let store = Self::default();
        *store.snapshot.lock().unwrap_or_else(|e| e.into_inner()) = Some(state);
        store
    }

    /// Make every subsequent save fail (or succeed again).
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Currently persisted snapshot.
    pub fn snapshot(&self) -> Option<LedgerState> {
        self.snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> u64 {
        *self.saves.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl LedgerStore for MemoryStore {
    fn load(&self) -> Result<Option<LedgerState>, LedgerError> {
        Ok(self.snapshot())
    }

    fn save(&mut self, state: &LedgerState) -> Result<(), LedgerError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("memory store set to fail".to_string()));
        }
        *self.snapshot.lock().unwrap_or_else(|e| e.into_inner()) = Some(state.clone());
        *self.saves.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
