//! Checkpoint persistence.

use super::state::{STATE_SCHEMA_VERSION, WorkflowState};
use crate::error::{Result, SpecrunError};
use crate::fs::atomic_write_json;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

/// Checkpoint file name inside a feature's state directory.
pub const STATE_FILE: &str = "workflow.json";

/// Copy of a checkpoint that could not be parsed, kept next to it.
pub const CORRUPT_FILE: &str = "workflow.json.corrupt";

/// A problem found while loading that did not prevent continuing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadWarning {
    /// Written by a different schema version; readable fields were kept.
    SchemaVersionMismatch { found: Option<u64>, expected: u32 },
    /// The checkpoint could not be parsed as a whole.
    Unreadable { reason: String },
}

impl fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadWarning::SchemaVersionMismatch { found, expected } => write!(
                f,
                "checkpoint schema version {} does not match expected {}; continuing with the fields that could be read",
                found
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "(missing)".to_string()),
                expected
            ),
            LoadWarning::Unreadable { reason } => {
                write!(f, "checkpoint could not be fully read ({}); continuing best-effort", reason)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedState {
    pub state: WorkflowState,
    pub warnings: Vec<LoadWarning>,
}

/// Where workflow state lives between runs.
pub trait StateStore: Send + Sync {
    /// `Ok(None)` when the feature has never been checkpointed.
    fn load(&self, feature: &str) -> Result<Option<LoadedState>>;

    fn save(&self, feature: &str, state: &WorkflowState) -> Result<()>;
}

/// `<features_dir>/<feature>/workflow.json`, written atomically.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    features_dir: PathBuf,
}

impl FileStateStore {
    pub fn new(features_dir: impl Into<PathBuf>) -> Self {
        Self {
            features_dir: features_dir.into(),
        }
    }

    pub fn path_for(&self, feature: &str) -> PathBuf {
        self.features_dir.join(feature).join(STATE_FILE)
    }
}

impl StateStore for FileStateStore {
    fn load(&self, feature: &str) -> Result<Option<LoadedState>> {
        let path = self.path_for(feature);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path).map_err(|e| {
            SpecrunError::StateError(format!("failed to read '{}': {}", path.display(), e))
        })?;
        let loaded = decode(feature, &text);
        if loaded
            .warnings
            .iter()
            .any(|w| matches!(w, LoadWarning::Unreadable { .. }))
        {
            let backup = path.with_file_name(CORRUPT_FILE);
            std::fs::copy(&path, &backup).map_err(|e| {
                SpecrunError::StateError(format!(
                    "failed to back up unreadable checkpoint to '{}': {}",
                    backup.display(),
                    e
                ))
            })?;
            tracing::warn!(backup = %backup.display(), "unreadable checkpoint copied aside");
        }
        for warning in &loaded.warnings {
            tracing::warn!(path = %path.display(), "{}", warning);
        }
        Ok(Some(loaded))
    }

    fn save(&self, feature: &str, state: &WorkflowState) -> Result<()> {
        let path = self.path_for(feature);
        atomic_write_json(&path, state)?;
        tracing::debug!(path = %path.display(), phase = %state.current_phase, "checkpoint written");
        Ok(())
    }
}

/// Parse checkpoint text, degrading instead of failing.
pub(crate) fn decode(feature: &str, text: &str) -> LoadedState {
    let raw: Value = match serde_json::from_str(text) {
        Ok(raw) => raw,
        Err(e) => {
            return LoadedState {
                state: WorkflowState::new(feature),
                warnings: vec![LoadWarning::Unreadable {
                    reason: e.to_string(),
                }],
            };
        }
    };

    let mut warnings = Vec::new();
    let found = raw.get("schema_version").and_then(Value::as_u64);
    if found != Some(STATE_SCHEMA_VERSION as u64) {
        warnings.push(LoadWarning::SchemaVersionMismatch {
            found,
            expected: STATE_SCHEMA_VERSION,
        });
        return LoadedState {
            state: WorkflowState::salvage(feature, &raw),
            warnings,
        };
    }

    match serde_json::from_value::<WorkflowState>(raw.clone()) {
        Ok(mut state) => {
            if state.feature_id != feature {
                tracing::warn!(
                    stored = %state.feature_id,
                    feature,
                    "checkpoint names a different feature; using the requested id"
                );
                state.feature_id = feature.to_string();
            }
            LoadedState { state, warnings }
        }
        Err(e) => {
            warnings.push(LoadWarning::Unreadable {
                reason: e.to_string(),
            });
            LoadedState {
                state: WorkflowState::salvage(feature, &raw),
                warnings,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{CommandKind, Phase};
    use serde_json::json;
    use tempfile::TempDir;

    fn store() -> (TempDir, FileStateStore) {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path().join("features"));
        (dir, store)
    }

    #[test]
    fn missing_checkpoint_loads_as_none() {
        let (_dir, store) = store();
        assert!(store.load("001-auth").unwrap().is_none());
    }

    #[test]
    fn load_of_save_is_identity() {
        let (_dir, store) = store();
        let mut state = WorkflowState::new("001-auth");
        state.record_command(CommandKind::Specify, Some("generic".into()));
        state.set_context("stack", json!(["rust", "tokio"]));
        state.mark_checkpoint();

        store.save("001-auth", &state).unwrap();
        let loaded = store.load("001-auth").unwrap().unwrap();

        assert_eq!(loaded.state, state);
        assert!(loaded.warnings.is_empty());
        assert!(store.path_for("001-auth").is_file());
    }

    #[test]
    fn schema_mismatch_is_a_warning() {
        let (_dir, store) = store();
        let path = store.path_for("001-auth");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            json!({"schema_version": 0, "feature_id": "001-auth", "current_phase": "tasked"})
                .to_string(),
        )
        .unwrap();

        let loaded = store.load("001-auth").unwrap().unwrap();
        assert_eq!(loaded.state.current_phase, Phase::Tasked);
        assert_eq!(
            loaded.warnings,
            vec![LoadWarning::SchemaVersionMismatch {
                found: Some(0),
                expected: STATE_SCHEMA_VERSION
            }]
        );
    }

    #[test]
    fn garbage_checkpoint_falls_back_to_fresh_state() {
        let loaded = decode("001-auth", "{ not json");
        assert_eq!(loaded.state.current_phase, Phase::Draft);
        assert!(matches!(loaded.warnings[0], LoadWarning::Unreadable { .. }));
        assert!(loaded.warnings[0].to_string().contains("best-effort"));
    }

    #[test]
    fn unreadable_checkpoint_is_backed_up_before_overwrite() {
        let (_dir, store) = store();
        let path = store.path_for("001-auth");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ truncated").unwrap();

        let loaded = store.load("001-auth").unwrap().unwrap();
        assert_eq!(loaded.state.current_phase, Phase::Draft);
        store.save("001-auth", &loaded.state).unwrap();

        let backup = path.with_file_name(CORRUPT_FILE);
        assert_eq!(std::fs::read_to_string(backup).unwrap(), "{ truncated");
        assert!(store.load("001-auth").unwrap().unwrap().warnings.is_empty());
    }

    #[test]
    fn readable_checkpoint_is_not_backed_up() {
        let (_dir, store) = store();
        store.save("001-auth", &WorkflowState::new("001-auth")).unwrap();
        store.load("001-auth").unwrap();
        assert!(!store.path_for("001-auth").with_file_name(CORRUPT_FILE).exists());
    }

    #[test]
    fn structurally_wrong_checkpoint_keeps_readable_fields() {
        let text = json!({
            "schema_version": 1,
            "feature_id": "001-auth",
            "current_phase": "planned",
            "last_updated": "not a timestamp"
        })
        .to_string();
        let loaded = decode("001-auth", &text);
        assert_eq!(loaded.state.current_phase, Phase::Planned);
        assert!(matches!(loaded.warnings[..], [LoadWarning::Unreadable { .. }]));
    }

    #[test]
    fn save_leaves_no_temp_files() {
        let (_dir, store) = store();
        store.save("001-auth", &WorkflowState::new("001-auth")).unwrap();
        let dir = store.path_for("001-auth").parent().unwrap().to_path_buf();
        let names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![STATE_FILE.to_string()]);
    }
}
