//! Crash-recovery checkpoints.
//!
//! A checkpoint is a JSON snapshot of pipeline state written after a phase
//! finishes. The store only ever serializes and deserializes copies — it
//! never holds a live `PipelineState` — so a resumed process reconstructs
//! everything from disk.

mod store;

pub use store::{CHECKPOINT_DIR, CheckpointStore};

use crate::errors::CheckpointError;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One persisted snapshot. The `id` is a UUIDv4 and doubles as the filename
/// stem (`{id}.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub id: String,
    /// Free-form label, by convention `{phase}-{complete|failed}`.
    pub phase: String,
    /// RFC3339 with an explicit offset (`Z` or `±hh:mm`). Kept as the
    /// original string so a load returns exactly what was written.
    pub timestamp: String,
    /// Arbitrary JSON, normally a `PipelineState` snapshot.
    #[serde(default)]
    pub state: serde_json::Value,
    /// Never null: `[]` when empty.
    #[serde(default)]
    pub errors: Vec<String>,
    /// Best-effort commit hash, `""` when unavailable.
    #[serde(default)]
    pub git_commit: String,
}

impl Checkpoint {
    /// Require the fields a resume cannot work without.
    pub fn validate(&self, path: &Path) -> Result<(), CheckpointError> {
        for (field, value) in [
            ("id", &self.id),
            ("phase", &self.phase),
            ("timestamp", &self.timestamp),
        ] {
            if value.is_empty() {
                return Err(CheckpointError::MissingField {
                    path: path.to_path_buf(),
                    field,
                });
            }
        }
        Ok(())
    }

    /// Parse the timestamp, accepting both `Z` and explicit `±hh:mm` offsets.
    pub fn parsed_timestamp(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(&self.timestamp).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn checkpoint(id: &str, phase: &str, timestamp: &str) -> Checkpoint {
        Checkpoint {
            id: id.to_string(),
            phase: phase.to_string(),
            timestamp: timestamp.to_string(),
            state: serde_json::Value::Null,
            errors: Vec::new(),
            git_commit: String::new(),
        }
    }

    #[test]
    fn test_validate_accepts_complete_checkpoint() {
        let cp = checkpoint("abc", "research-complete", "2024-01-01T00:00:00Z");
        assert!(cp.validate(&PathBuf::from("x.json")).is_ok());
    }

    #[test]
    fn test_validate_rejects_each_missing_field() {
        let path = PathBuf::from("x.json");
        for field in ["id", "phase", "timestamp"] {
            let mut cp = checkpoint("abc", "research-complete", "2024-01-01T00:00:00Z");
            match field {
                "id" => cp.id.clear(),
                "phase" => cp.phase.clear(),
                _ => cp.timestamp.clear(),
            }
            let err = cp.validate(&path).unwrap_err();
            assert!(
                matches!(err, CheckpointError::MissingField { field: f, .. } if f == field),
                "expected missing {field}"
            );
        }
    }

    #[test]
    fn test_parsed_timestamp_accepts_both_offset_forms() {
        let zulu = checkpoint("a", "p", "2024-01-01T00:00:00Z");
        let offset = checkpoint("a", "p", "2024-01-01T05:30:00+05:30");
        let both = (
            zulu.parsed_timestamp().unwrap(),
            offset.parsed_timestamp().unwrap(),
        );
        // Same instant, different offsets
        assert_eq!(both.0, both.1);
    }

    #[test]
    fn test_parsed_timestamp_none_on_garbage() {
        let cp = checkpoint("a", "p", "yesterday-ish");
        assert!(cp.parsed_timestamp().is_none());
    }

    #[test]
    fn test_empty_errors_serialize_as_array_not_null() {
        let cp = checkpoint("a", "p", "2024-01-01T00:00:00Z");
        let json = serde_json::to_string(&cp).unwrap();
        assert!(json.contains("\"errors\":[]"));
        assert!(!json.contains("\"errors\":null"));
    }
}
