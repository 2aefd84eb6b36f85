//! Bettor directory lookup.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use super::DestinationLookup;
use crate::error::PayoutError;

static LIGHTNING_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9._+-]+@[a-z0-9-]+(\.[a-z0-9-]+)+$").expect("valid regex")
});

/// Maps bettor handles to payment targets.
///
/// Entries come from a JSON object `{"<bettor>": "<destination>"}`. A
/// bettor with no entry whose handle is itself a lightning address is paid
/// at that address.
#[derive(Debug, Clone, Default)]
pub struct DirectoryLookup {
    entries: HashMap<String, String>,
}

impl DirectoryLookup {
    /// Directory from in-memory entries.
    pub fn from_entries(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }

    /// Load the directory from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PayoutError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PayoutError::Lookup(format!("{}: {e}", path.display())))?;
        let entries: HashMap<String, String> = serde_json::from_str(&raw)
            .map_err(|e| PayoutError::Lookup(format!("{}: {e}", path.display())))?;
        info!(path = %path.display(), entries = entries.len(), "Payout directory loaded");
        Ok(Self { entries })
    }

    /// Number of explicit entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no explicit entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl DestinationLookup for DirectoryLookup {
    async fn lookup(&self, bettor: &str) -> Result<Option<String>, PayoutError> {
        if let Some(destination) = self.entries.get(bettor) {
            return Ok(Some(destination.clone()));
        }
        let handle = bettor.trim().to_lowercase();
        if LIGHTNING_ADDRESS.is_match(&handle) {
            return Ok(Some(handle));
        }
        Ok(None)
    }
}
