//! Checkpoint store: file I/O under `.rlm-act-checkpoints/`.
//!
//! Single-file operations fail loudly; directory scans skip and count bad
//! files instead, so one corrupt or foreign file never blocks resume or
//! cleanup for the rest of the directory.

use crate::checkpoint::Checkpoint;
use crate::errors::CheckpointError;
use crate::tracker;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

/// Checkpoint directory name, created under the project root.
pub const CHECKPOINT_DIR: &str = ".rlm-act-checkpoints";

pub struct CheckpointStore {
    project_root: PathBuf,
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let dir = project_root.join(CHECKPOINT_DIR);
        Self { project_root, dir }
    }

    /// The checkpoints directory for this store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a snapshot and return the absolute path of the new file.
    ///
    /// Mints a fresh UUIDv4 id, stamps the current UTC time, records a
    /// best-effort commit hash, and normalizes `errors` to a non-null list.
    pub fn write_checkpoint(
        &self,
        state: &serde_json::Value,
        phase_label: &str,
        errors: &[String],
    ) -> Result<PathBuf, CheckpointError> {
        self.ensure_dir()?;

        let checkpoint = Checkpoint {
            id: Uuid::new_v4().to_string(),
            phase: phase_label.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            state: state.clone(),
            errors: errors.to_vec(),
            git_commit: tracker::git::get_commit(&self.project_root),
        };

        let path = self.dir.join(format!("{}.json", checkpoint.id));
        let json = serde_json::to_string_pretty(&checkpoint).map_err(|source| {
            CheckpointError::ParseFailed {
                path: path.clone(),
                source,
            }
        })?;

        fs::write(&path, json).map_err(|source| CheckpointError::WriteFailed {
            path: path.clone(),
            source,
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&path, fs::Permissions::from_mode(0o644));
        }

        Ok(path.canonicalize().unwrap_or(path))
    }

    /// Load a single checkpoint. Errors if the file is unreadable, is not
    /// valid JSON, or is missing any of id/phase/timestamp. An empty `state`
    /// is allowed.
    pub fn load_checkpoint(path: &Path) -> Result<Checkpoint, CheckpointError> {
        let content = fs::read_to_string(path).map_err(|source| CheckpointError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;

        let checkpoint: Checkpoint =
            serde_json::from_str(&content).map_err(|source| CheckpointError::ParseFailed {
                path: path.to_path_buf(),
                source,
            })?;

        checkpoint.validate(path)?;
        Ok(checkpoint)
    }

    /// Find the checkpoint to resume from: the newest parseable snapshot.
    ///
    /// A missing or empty directory yields `None`, not an error. Files that
    /// cannot be read, parsed, or validated are skipped. When two survivors
    /// carry the same timestamp, the one encountered later in directory-scan
    /// order wins.
    pub fn detect_resumable_checkpoint(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        if !self.dir.exists() {
            return Ok(None);
        }

        let entries = fs::read_dir(&self.dir).map_err(|source| CheckpointError::ReadFailed {
            path: self.dir.clone(),
            source,
        })?;

        let mut best: Option<(DateTime<Utc>, Checkpoint)> = None;
        for path in json_files(entries) {
            let checkpoint = match Self::load_checkpoint(&path) {
                Ok(cp) => cp,
                Err(e) => {
                    warn!("Skipping checkpoint {}: {}", path.display(), e);
                    continue;
                }
            };
            let Some(ts) = checkpoint.parsed_timestamp() else {
                warn!(
                    "Skipping checkpoint {}: unparseable timestamp '{}'",
                    path.display(),
                    checkpoint.timestamp
                );
                continue;
            };
            let ts = ts.with_timezone(&Utc);
            if best.as_ref().map(|(t, _)| ts >= *t).unwrap_or(true) {
                best = Some((ts, checkpoint));
            }
        }

        Ok(best.map(|(_, cp)| cp))
    }

    /// All loadable checkpoints with their paths, in directory-scan order.
    /// Unloadable files are skipped with a warning, like resume detection.
    pub fn list_checkpoints(&self) -> Vec<(PathBuf, Checkpoint)> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        json_files(entries)
            .filter_map(|path| match Self::load_checkpoint(&path) {
                Ok(cp) => Some((path, cp)),
                Err(e) => {
                    warn!("Skipping checkpoint {}: {}", path.display(), e);
                    None
                }
            })
            .collect()
    }

    /// Whole strict 24-hour periods since the checkpoint was written.
    /// 0 for an empty or unparseable timestamp.
    pub fn checkpoint_age_days(checkpoint: &Checkpoint) -> i64 {
        match checkpoint.parsed_timestamp() {
            Some(ts) => (Utc::now() - ts.with_timezone(&Utc)).num_days().max(0),
            None => 0,
        }
    }

    /// Delete checkpoints at or older than `days` strict 24-hour periods.
    ///
    /// Negative `days` clamps to 0 (delete everything). Unreadable or
    /// unparseable files count toward `failed` and are left alone; newer
    /// files are untouched and uncounted. Missing directory yields (0, 0).
    pub fn cleanup_by_age(&self, days: i64) -> (usize, usize) {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return (0, 0);
        };
        let cutoff = Utc::now() - Duration::hours(24 * days.max(0));

        let mut deleted = 0;
        let mut failed = 0;
        for path in json_files(entries) {
            let timestamp = Self::load_checkpoint(&path)
                .ok()
                .and_then(|cp| cp.parsed_timestamp());
            match timestamp {
                Some(ts) if ts.with_timezone(&Utc) <= cutoff => {
                    if fs::remove_file(&path).is_ok() {
                        deleted += 1;
                    } else {
                        failed += 1;
                    }
                }
                Some(_) => {}
                None => failed += 1,
            }
        }
        (deleted, failed)
    }

    /// Delete every `*.json` file, continuing past individual failures.
    /// The directory itself and non-JSON files are never touched.
    pub fn cleanup_all(&self) -> (usize, usize) {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return (0, 0);
        };

        let mut deleted = 0;
        let mut failed = 0;
        for path in json_files(entries) {
            if fs::remove_file(&path).is_ok() {
                deleted += 1;
            } else {
                failed += 1;
            }
        }
        (deleted, failed)
    }

    fn ensure_dir(&self) -> Result<(), CheckpointError> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).map_err(|source| CheckpointError::CreateDirFailed {
                path: self.dir.clone(),
                source,
            })?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = fs::set_permissions(&self.dir, fs::Permissions::from_mode(0o755));
            }
        }
        Ok(())
    }
}

/// The `*.json` entries of a directory listing, in scan order.
fn json_files(entries: fs::ReadDir) -> impl Iterator<Item = PathBuf> {
    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|s| s.to_str()) == Some("json"))
}
