//! Aggregate pipeline state.
//!
//! `PipelineState` is the single record a run accumulates: per-phase results,
//! context entries, autonomy mode, and resume bookkeeping. It serializes to
//! and from a generic `serde_json::Value` tree — the form the checkpoint
//! store persists — so recovery never depends on a live object.

use crate::autonomy::AutonomyMode;
use crate::errors::ModelError;
use crate::phase::{PhaseResult, PhaseStatus, PhaseType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineState {
    /// Root of the project checkout this pipeline operates on. Never empty.
    project_root: String,
    /// Autonomy policy for this run.
    pub mode: AutonomyMode,
    /// Phase currently executing, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<PhaseType>,
    /// Results per phase, in phase order. Owned exclusively by this state.
    #[serde(default)]
    results: BTreeMap<PhaseType, PhaseResult>,
    /// Ordered context-entry ids per phase, fed by collaborator analyzers.
    #[serde(default)]
    context_entries: BTreeMap<PhaseType, Vec<String>>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Id of the most recent checkpoint written for this run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
    /// External issue-tracker epic id, if one was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic_id: Option<String>,
    /// Open metadata bag. The engine never interprets its contents.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl PipelineState {
    /// Create a fresh state for a run starting now.
    pub fn new(project_root: impl Into<String>, mode: AutonomyMode) -> Result<Self, ModelError> {
        let project_root = project_root.into();
        if project_root.is_empty() {
            return Err(ModelError::EmptyProjectRoot);
        }
        Ok(Self {
            project_root,
            mode,
            current_phase: None,
            results: BTreeMap::new(),
            context_entries: BTreeMap::new(),
            started_at: Utc::now(),
            checkpoint_id: None,
            epic_id: None,
            metadata: serde_json::Map::new(),
        })
    }

    pub fn project_root(&self) -> &str {
        &self.project_root
    }

    /// Change the project root. Rejects the empty string.
    pub fn set_project_root(&mut self, root: impl Into<String>) -> Result<(), ModelError> {
        let root = root.into();
        if root.is_empty() {
            return Err(ModelError::EmptyProjectRoot);
        }
        self.project_root = root;
        Ok(())
    }

    /// Store the result for a phase.
    ///
    /// A phase whose stored result is `complete` is final: overwriting it is
    /// a validation error, never a silent replace.
    pub fn record_result(&mut self, result: PhaseResult) -> Result<(), ModelError> {
        if let Some(existing) = self.results.get(&result.phase) {
            if existing.status == PhaseStatus::Complete {
                return Err(ModelError::PhaseAlreadyComplete(result.phase));
            }
        }
        self.results.insert(result.phase, result);
        Ok(())
    }

    pub fn result(&self, phase: PhaseType) -> Option<&PhaseResult> {
        self.results.get(&phase)
    }

    /// Discard the stored result for a phase so a deliberate revision or
    /// retry can replace it. The complete-is-final rule in `record_result`
    /// guards against accidental overwrites; removal is the explicit path.
    pub fn clear_result(&mut self, phase: PhaseType) -> Option<PhaseResult> {
        self.results.remove(&phase)
    }

    /// Results in phase order.
    pub fn results(&self) -> impl Iterator<Item = &PhaseResult> {
        self.results.values()
    }

    /// Append a context-entry id for a phase, preserving insertion order.
    pub fn add_context_entry(&mut self, phase: PhaseType, entry_id: impl Into<String>) {
        self.context_entries.entry(phase).or_default().push(entry_id.into());
    }

    pub fn context_entries(&self, phase: PhaseType) -> &[String] {
        self.context_entries
            .get(&phase)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Count of phases whose stored result is complete.
    pub fn completed_count(&self) -> usize {
        self.results
            .values()
            .filter(|r| r.status == PhaseStatus::Complete)
            .count()
    }

    /// Serialize to the generic tree form the checkpoint store persists.
    pub fn to_value(&self) -> Result<serde_json::Value, ModelError> {
        serde_json::to_value(self).map_err(ModelError::Serialize)
    }

    /// Rebuild from a checkpoint's state tree, re-validating the invariants
    /// the type normally enforces at construction.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ModelError> {
        let state: PipelineState =
            serde_json::from_value(value).map_err(ModelError::Deserialize)?;
        if state.project_root.is_empty() {
            return Err(ModelError::EmptyProjectRoot);
        }
        Ok(state)
    }
}
