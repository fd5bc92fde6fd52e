//! Monitor state persistence
//!
//! The seen-fingerprint set and last-run timestamp live in a sidecar file,
//! never in the user-edited config. Writes go to a temp file first and
//! rename into place so a crash mid-write cannot corrupt the state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("state file corrupt: {0}")]
    CorruptState(#[from] serde_json::Error),
}

/// Persisted across runs; grows monotonically within a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorState {
    #[serde(default)]
    pub seen_fingerprints: HashSet<String>,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
}

impl MonitorState {
    pub fn path_for(state_dir: &Path, monitor_name: &str) -> PathBuf {
        state_dir.join(format!("{}.state", monitor_name))
    }

    /// Load state, or the empty default when no file exists yet
    pub fn load(state_dir: &Path, monitor_name: &str) -> Result<Self, StateError> {
        let path = Self::path_for(state_dir, monitor_name);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Persist atomically: write a temp sibling, then rename over the
    /// state file
    pub fn save(&self, state_dir: &Path, monitor_name: &str) -> Result<(), StateError> {
        fs::create_dir_all(state_dir)?;
        let path = Self::path_for(state_dir, monitor_name);
        let tmp = state_dir.join(format!(".{}.state.tmp", monitor_name));
        fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Union the fingerprints processed this run into the seen-set
    pub fn absorb(&mut self, processed: impl IntoIterator<Item = String>, ran_at: DateTime<Utc>) {
        self.seen_fingerprints.extend(processed);
        self.last_run_at = Some(ran_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let state = MonitorState::load(dir.path(), "fresh").unwrap();
        assert!(state.seen_fingerprints.is_empty());
        assert!(state.last_run_at.is_none());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = MonitorState::default();
        state.absorb(["fp1".to_string(), "fp2".to_string()], Utc::now());
        state.save(dir.path(), "watch").unwrap();

        let reloaded = MonitorState::load(dir.path(), "watch").unwrap();
        assert_eq!(reloaded.seen_fingerprints.len(), 2);
        assert!(reloaded.seen_fingerprints.contains("fp1"));
        assert!(reloaded.last_run_at.is_some());
        // No temp file left behind
        assert!(!dir.path().join(".watch.state.tmp").exists());
    }

    #[test]
    fn test_absorb_is_monotonic() {
        let mut state = MonitorState::default();
        state.absorb(["a".to_string()], Utc::now());
        state.absorb(["b".to_string()], Utc::now());
        assert_eq!(state.seen_fingerprints.len(), 2);
        assert!(state.seen_fingerprints.contains("a"));
    }

    #[test]
    fn test_corrupt_state_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(MonitorState::path_for(dir.path(), "bad"), "{not json").unwrap();
        assert!(matches!(
            MonitorState::load(dir.path(), "bad"),
            Err(StateError::CorruptState(_))
        ));
    }
}
