//! Durable checkpoint store.
//!
//! - State is persisted after every recorded product (write-then-rename)
//! - The previous file is kept as `<checkpoint>.bak` for recovery
//! - Unreadable files degrade to the backup, then to empty state
//! - Unreadable files are moved aside, never overwritten

use crate::checkpoint::{CHECKPOINT_VERSION, CheckpointState};
use crate::models::{Result, ScribeError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Serialized checkpoint document (owned, for reading).
#[derive(Debug, Deserialize)]
struct CheckpointDocument {
    version: u32,
    #[serde(default)]
    #[allow(dead_code)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    state: CheckpointState,
}

/// Serialized checkpoint document (borrowed, for writing).
#[derive(Debug, Serialize)]
struct CheckpointDocumentRef<'a> {
    version: u32,
    updated_at: DateTime<Utc>,
    #[serde(flatten)]
    state: &'a CheckpointState,
}

/// Checkpoint store backed by a single JSON file.
pub struct CheckpointStore {
    /// Path to main checkpoint file
    path: PathBuf,
    /// Path to backup file
    backup_path: PathBuf,
    /// Current state
    state: CheckpointState,
}

impl CheckpointStore {
    /// Create a store for `path` with empty state, without touching disk.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            backup_path: with_suffix(path, ".bak"),
            state: CheckpointState::new(),
        }
    }

    /// Create a store for `path` and load whatever is on disk.
    pub fn open(path: &Path) -> Self {
        let mut store = Self::new(path);
        store.load();
        store
    }

    /// Default checkpoint location for a source table: `<input>.progress.json`.
    pub fn default_path_for(input: &Path) -> PathBuf {
        with_suffix(input, ".progress.json")
    }

    /// Load checkpoint from disk.
    ///
    /// Never fails: a missing file is a fresh start, an unreadable file falls
    /// back to the backup and then to empty state.
    pub fn load(&mut self) -> &CheckpointState {
        self.state = match read_checkpoint(&self.path) {
            Ok(Some(state)) => {
                info!(
                    completed = state.completed.len(),
                    processed = state.processed_keys.len(),
                    path = %self.path.display(),
                    "Loaded checkpoint"
                );
                state
            }
            Ok(None) => {
                debug!(path = %self.path.display(), "No checkpoint, starting fresh");
                CheckpointState::new()
            }
            Err(err) => {
                warn!(error = %err, "Checkpoint unreadable, trying backup");
                self.quarantine();
                self.recover_from_backup()
            }
        };
        &self.state
    }

    fn recover_from_backup(&self) -> CheckpointState {
        match read_checkpoint(&self.backup_path) {
            Ok(Some(state)) => {
                warn!(
                    completed = state.completed.len(),
                    path = %self.backup_path.display(),
                    "Recovered checkpoint from backup"
                );
                // Restore the primary file so the next load does not start empty.
                let restored = write_checkpoint(&self.path, &state);
                if let Err(err) = restored {
                    warn!(error = %err, "Failed to restore checkpoint from backup");
                }
                state
            }
            Ok(None) => {
                warn!("No checkpoint backup, starting with empty state");
                CheckpointState::new()
            }
            Err(err) => {
                warn!(error = %err, "Checkpoint backup unreadable, starting with empty state");
                CheckpointState::new()
            }
        }
    }

    /// Move an unreadable checkpoint aside so a later persist cannot destroy it.
    fn quarantine(&self) {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
        let target = with_suffix(&self.path, &format!(".corrupt-{stamp}"));
        match fs::rename(&self.path, &target) {
            Ok(()) => warn!(path = %target.display(), "Moved unreadable checkpoint aside"),
            Err(err) => warn!(error = %err, "Failed to move unreadable checkpoint aside"),
        }
    }

    /// Save checkpoint to disk (atomic write).
    ///
    /// A failure is logged and returned; in-memory state is left intact.
    pub fn persist(&self) -> Result<()> {
        if self.path.exists() {
            if let Err(err) = fs::copy(&self.path, &self.backup_path) {
                warn!(error = %err, "Failed to back up checkpoint");
            }
        }

        write_checkpoint(&self.path, &self.state).map_err(|source| {
            warn!(
                error = %source,
                path = %self.path.display(),
                "Failed to persist checkpoint, progress kept in memory"
            );
            ScribeError::CheckpointPersist {
                path: self.path.clone(),
                source,
            }
        })?;

        debug!(completed = self.state.completed.len(), "Checkpoint saved");
        Ok(())
    }

    /// Record generated content for `key` and persist immediately.
    ///
    /// The in-memory mutation stands even when the persist fails.
    pub fn record(&mut self, key: &str, content: String) -> Result<()> {
        self.state.record(key, content);
        self.persist()
    }

    /// Repair `processed_keys` from `completed` and persist.
    ///
    /// Returns the stale keys that were discarded.
    pub fn reconcile(&mut self) -> Result<Vec<String>> {
        let removed = self.state.reconcile();
        if removed.is_empty() {
            debug!("Checkpoint already consistent");
        } else {
            info!(removed = removed.len(), "Discarded stale processed keys");
        }
        self.persist()?;
        Ok(removed)
    }

    /// Delete all durable state and clear memory. Irreversible.
    pub fn reset(&mut self) -> Result<()> {
        let mut targets = vec![
            self.path.clone(),
            self.backup_path.clone(),
            with_suffix(&self.path, ".tmp"),
        ];

        let pattern = format!(
            "{}.corrupt-*",
            glob::Pattern::escape(&self.path.to_string_lossy())
        );
        let leftovers = glob::glob(&pattern)
            .map_err(|e| ScribeError::Internal(format!("Invalid glob pattern: {e}")))?;
        targets.extend(leftovers.filter_map(|r| r.ok()));

        for target in targets {
            match fs::remove_file(&target) {
                Ok(()) => debug!(path = %target.display(), "Removed checkpoint file"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(ScribeError::io("removing checkpoint file", err)),
            }
        }

        self.state.clear();
        info!(path = %self.path.display(), "Checkpoint reset");
        Ok(())
    }

    /// Get reference to state.
    pub fn state(&self) -> &CheckpointState {
        &self.state
    }

    /// Whether content has been recorded for `key`.
    pub fn is_completed(&self, key: &str) -> bool {
        self.state.is_completed(key)
    }

    /// Path to the checkpoint file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read a checkpoint file. `Ok(None)` if it does not exist.
fn read_checkpoint(path: &Path) -> Result<Option<CheckpointState>> {
    let load_error = |reason: String| ScribeError::CheckpointLoad {
        path: path.to_path_buf(),
        reason,
    };

    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(load_error(err.to_string())),
    };

    let document: CheckpointDocument = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| load_error(format!("invalid checkpoint: {e}")))?;

    if document.version > CHECKPOINT_VERSION {
        return Err(load_error(format!(
            "unsupported checkpoint version {} (newest known is {CHECKPOINT_VERSION})",
            document.version
        )));
    }

    Ok(Some(document.state))
}

fn write_checkpoint(path: &Path, state: &CheckpointState) -> io::Result<()> {
    let document = CheckpointDocumentRef {
        version: CHECKPOINT_VERSION,
        updated_at: Utc::now(),
        state,
    };
    write_atomically(path, |writer| {
        serde_json::to_writer_pretty(&mut *writer, &document).map_err(io::Error::other)?;
        writer.write_all(b"\n")
    })
}

/// Write a file via `<path>.tmp` and rename it into place.
///
/// Readers observe either the old file or the complete new one.
pub(crate) fn write_atomically<F>(path: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let temp_path = with_suffix(path, ".tmp");
    let result = (|| {
        let mut writer = BufWriter::new(File::create(&temp_path)?);
        write(&mut writer)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

/// `products.csv` + `.bak` → `products.csv.bak`
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn checkpoint_path(dir: &TempDir) -> PathBuf {
        dir.path().join("products.csv.progress.json")
    }

    #[test]
    fn test_missing_file_is_empty_state() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::open(&checkpoint_path(&dir));
        assert!(store.state().is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_round_trip_empty_state() {
        let dir = TempDir::new().unwrap();
        let path = checkpoint_path(&dir);

        let store = CheckpointStore::new(&path);
        store.persist().unwrap();

        let reloaded = CheckpointStore::open(&path);
        assert_eq!(reloaded.state(), &CheckpointState::new());
    }

    #[test]
    fn test_round_trip_many_entries() {
        let dir = TempDir::new().unwrap();
        let path = checkpoint_path(&dir);

        let mut store = CheckpointStore::new(&path);
        for i in 0..150 {
            let content = format!("<div>\n  <p>Product \"{i}\", with commas</p>\n</div>");
            store.record(&format!("product-{i:03}"), content).unwrap();
        }
        let expected = store.state().clone();

        let reloaded = CheckpointStore::open(&path);
        assert_eq!(reloaded.state(), &expected);
        assert_eq!(reloaded.state().completed_count(), 150);
    }

    #[test]
    fn test_document_is_versioned_json() {
        let dir = TempDir::new().unwrap();
        let path = checkpoint_path(&dir);

        let mut store = CheckpointStore::new(&path);
        store.record("p1", "<p>one</p>".to_string()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], CHECKPOINT_VERSION);
        assert_eq!(raw["completed"]["p1"], "<p>one</p>");
        assert_eq!(raw["processed_keys"][0], "p1");
        assert!(raw["updated_at"].is_string());
    }

    #[test]
    fn test_crash_before_rename_keeps_previous_state() {
        let dir = TempDir::new().unwrap();
        let path = checkpoint_path(&dir);

        let mut store = CheckpointStore::new(&path);
        store.record("p1", "<p>one</p>".to_string()).unwrap();
        let before = store.state().clone();

        // A crash mid-write leaves only a partial temp file behind.
        fs::write(with_suffix(&path, ".tmp"), b"{\"version\": 1, \"comple").unwrap();

        let reloaded = CheckpointStore::open(&path);
        assert_eq!(reloaded.state(), &before);
    }

    #[test]
    fn test_truncated_primary_recovers_previous_state_from_backup() {
        let dir = TempDir::new().unwrap();
        let path = checkpoint_path(&dir);

        let mut store = CheckpointStore::new(&path);
        store.record("p1", "<p>one</p>".to_string()).unwrap();
        let before = store.state().clone();
        store.record("p2", "<p>two</p>".to_string()).unwrap();
        let after = store.state().clone();

        let full = fs::read(&path).unwrap();
        fs::write(&path, &full[..full.len() / 2]).unwrap();

        let reloaded = CheckpointStore::open(&path);
        let state = reloaded.state();
        assert!(state == &before || state == &after);
        assert_eq!(state, &before);

        // The primary file was restored, so a second load agrees.
        let again = CheckpointStore::open(&path);
        assert_eq!(again.state(), &before);
    }

    #[test]
    fn test_corrupt_without_backup_degrades_to_empty_and_is_kept() {
        let dir = TempDir::new().unwrap();
        let path = checkpoint_path(&dir);
        fs::write(&path, b"not json at all").unwrap();

        let store = CheckpointStore::open(&path);
        assert!(store.state().is_empty());

        let quarantined: Vec<_> = glob::glob(&format!("{}.corrupt-*", path.display()))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();
        assert_eq!(quarantined.len(), 1);
        assert_eq!(fs::read(&quarantined[0]).unwrap(), b"not json at all");
    }

    #[test]
    fn test_newer_version_is_not_loaded() {
        let dir = TempDir::new().unwrap();
        let path = checkpoint_path(&dir);
        fs::write(
            &path,
            r#"{"version": 99, "completed": {"p1": "x"}, "processed_keys": ["p1"]}"#,
        )
        .unwrap();

        let store = CheckpointStore::open(&path);
        assert!(store.state().is_empty());
    }

    #[test]
    fn test_stale_keys_survive_load_until_reconciled() {
        let dir = TempDir::new().unwrap();
        let path = checkpoint_path(&dir);
        fs::write(
            &path,
            r#"{"version": 1, "completed": {"p1": "<p>one</p>"}, "processed_keys": ["p1", "p2", "p3"]}"#,
        )
        .unwrap();

        let mut store = CheckpointStore::open(&path);
        assert_eq!(store.state().stale_keys().count(), 2);

        let removed = store.reconcile().unwrap();
        assert_eq!(removed, vec!["p2", "p3"]);

        let reloaded = CheckpointStore::open(&path);
        assert!(reloaded.state().is_consistent());
        assert_eq!(reloaded.state().processed_keys.len(), 1);
    }

    #[test]
    fn test_reset_then_load_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = checkpoint_path(&dir);

        let mut store = CheckpointStore::new(&path);
        store.record("p1", "<p>one</p>".to_string()).unwrap();
        store.record("p2", "<p>two</p>".to_string()).unwrap();
        assert!(path.exists());

        store.reset().unwrap();
        assert!(store.state().is_empty());
        assert!(!path.exists());
        assert!(!with_suffix(&path, ".bak").exists());

        let reloaded = CheckpointStore::open(&path);
        assert!(reloaded.state().is_empty());
    }

    #[test]
    fn test_reset_removes_quarantined_files() {
        let dir = TempDir::new().unwrap();
        let path = checkpoint_path(&dir);
        fs::write(&path, b"garbage").unwrap();

        let mut store = CheckpointStore::open(&path);
        store.reset().unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_persist_failure_keeps_memory_state() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"file").unwrap();
        let path = blocker.join("checkpoint.json");

        let mut store = CheckpointStore::new(&path);
        let err = store.record("p1", "<p>one</p>".to_string()).unwrap_err();
        assert!(matches!(err, ScribeError::CheckpointPersist { .. }));
        assert!(store.is_completed("p1"));
    }

    #[test]
    fn test_default_path_for_input() {
        assert_eq!(
            CheckpointStore::default_path_for(Path::new("data/products.csv")),
            PathBuf::from("data/products.csv.progress.json")
        );
    }
}
