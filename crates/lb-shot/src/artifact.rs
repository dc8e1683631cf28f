//! Trial artifacts: unique naming, derivation from a template and variable
//! substitution.

use chrono::{DateTime, Local};
use serde_json::{Map, Number, Value};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use lb_types::{ShotError, ShotResult};

/// Process-wide artifact serial; keeps names unique across service restarts
/// within one process.
static ARTIFACT_SERIAL: AtomicU64 = AtomicU64::new(0);

/// Group each artifact records its session and trial under.
pub const TRIAL_GROUP: &str = "loopbridge";

/// `<stem>_<YYYY_mm_dd_HH_MM_SS>_loop<trial:05>_<serial:04>.<ext>`
pub fn artifact_name(template: &Path, trial_number: u64, now: DateTime<Local>) -> String {
    compose_name(template, &format!("loop{trial_number:05}"), now)
}

/// `<stem>_<YYYY_mm_dd_HH_MM_SS>_best_<serial:04>.<ext>`
pub fn best_artifact_name(template: &Path, now: DateTime<Local>) -> String {
    compose_name(template, "best", now)
}

fn compose_name(template: &Path, tag: &str, now: DateTime<Local>) -> String {
    let stem = template
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("artifact");
    let serial = ARTIFACT_SERIAL.fetch_add(1, Ordering::Relaxed);
    let mut name = format!(
        "{stem}_{}_{tag}_{serial:04}",
        now.format("%Y_%m_%d_%H_%M_%S")
    );
    if let Some(ext) = template.extension().and_then(|e| e.to_str()) {
        name.push('.');
        name.push_str(ext);
    }
    name
}

/// Storage backend for trial artifacts.
pub trait ArtifactStore: Send + Sync {
    /// Create `output` as a copy of `template`.
    fn derive(&self, template: &Path, output: &Path) -> ShotResult<()>;

    /// Assign `value` to an existing `group/variable` inside `artifact`.
    fn set_value(&self, artifact: &Path, group: &str, variable: &str, value: f64) -> ShotResult<()>;

    /// Record which session and trial produced `artifact`, creating the
    /// [`TRIAL_GROUP`] group if the template lacks it.
    fn record_trial(&self, artifact: &Path, session_id: Option<&str>, trial_number: u64) -> ShotResult<()>;

    /// Remove a partially written artifact.
    fn discard(&self, artifact: &Path);
}

/// Artifacts stored as JSON documents of the form `{group: {variable: value}}`.
#[derive(Debug, Clone, Default)]
pub struct JsonArtifactStore;

impl JsonArtifactStore {
    pub fn new() -> Self {
        Self
    }

    fn artifact_error(path: &Path, message: impl Into<String>) -> ShotError {
        ShotError::Artifact {
            path: path.display().to_string(),
            message: message.into(),
        }
    }

    fn read(path: &Path) -> ShotResult<Map<String, Value>> {
        let content = fs::read_to_string(path)?;
        match serde_json::from_str(&content) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(Self::artifact_error(path, "top level is not an object")),
            Err(e) => Err(Self::artifact_error(path, e.to_string())),
        }
    }

    fn write(path: &Path, doc: Map<String, Value>) -> ShotResult<()> {
        let content = serde_json::to_string_pretty(&Value::Object(doc))
            .map_err(|e| Self::artifact_error(path, e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }
}

impl ArtifactStore for JsonArtifactStore {
    fn derive(&self, template: &Path, output: &Path) -> ShotResult<()> {
        // parse before copying so a broken template fails the request early
        Self::read(template)?;
        if output.exists() {
            return Err(Self::artifact_error(output, "already exists"));
        }
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(template, output)?;
        debug!(template = %template.display(), output = %output.display(), "artifact derived");
        Ok(())
    }

    fn set_value(&self, artifact: &Path, group: &str, variable: &str, value: f64) -> ShotResult<()> {
        let mut doc = Self::read(artifact)?;
        let slot = doc
            .get_mut(group)
            .and_then(Value::as_object_mut)
            .and_then(|g| g.get_mut(variable))
            .ok_or_else(|| ShotError::UnsetTarget {
                group: group.to_string(),
                variable: variable.to_string(),
            })?;
        let number = Number::from_f64(value)
            .ok_or_else(|| Self::artifact_error(artifact, format!("{group}/{variable} is not finite")))?;
        *slot = Value::Number(number);
        Self::write(artifact, doc)
    }

    fn record_trial(&self, artifact: &Path, session_id: Option<&str>, trial_number: u64) -> ShotResult<()> {
        let mut doc = Self::read(artifact)?;
        doc.insert(
            TRIAL_GROUP.to_string(),
            serde_json::json!({ "session": session_id, "iteration": trial_number }),
        );
        Self::write(artifact, doc)
    }

    fn discard(&self, artifact: &Path) {
        if artifact.exists() {
            if let Err(e) = fs::remove_file(artifact) {
                warn!(artifact = %artifact.display(), error = %e, "failed to remove artifact");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_template(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("template.json");
        fs::write(
            &path,
            r#"{"cooling": {"x_global": 0.0, "detuning": 1.0}, "imaging": {"exposure": 5}}"#,
        )
        .unwrap();
        path
    }

    #[test]
    fn test_names_are_unique_and_carry_trial() {
        let template = Path::new("/data/template.json");
        let now = Local::now();
        let a = artifact_name(template, 7, now);
        let b = artifact_name(template, 7, now);
        assert_ne!(a, b);
        assert!(a.starts_with("template_"));
        assert!(a.contains("_loop00007_"));
        assert!(a.ends_with(".json"));
    }

    #[test]
    fn test_best_name() {
        let name = best_artifact_name(Path::new("/data/template.json"), Local::now());
        assert!(name.starts_with("template_"));
        assert!(name.contains("_best_"));
        assert!(!name.contains("_loop"));
    }

    #[test]
    fn test_record_trial_adds_group() {
        let dir = TempDir::new().unwrap();
        let template = write_template(&dir);
        let output = dir.path().join("trial.json");

        let store = JsonArtifactStore::new();
        store.derive(&template, &output).unwrap();
        store.record_trial(&output, Some("20240101T000000-beef"), 12).unwrap();
        store.record_trial(&output, Some("20240101T000000-beef"), 13).unwrap();

        let doc: Value = serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(doc[TRIAL_GROUP]["session"], "20240101T000000-beef");
        assert_eq!(doc[TRIAL_GROUP]["iteration"], 13);
        assert_eq!(doc["cooling"]["x_global"], 0.0);

        store.record_trial(&output, None, 1).unwrap();
        let doc: Value = serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert!(doc[TRIAL_GROUP]["session"].is_null());
    }

    #[test]
    fn test_name_without_extension() {
        let name = artifact_name(Path::new("shot"), 1, Local::now());
        assert!(name.starts_with("shot_"));
        assert!(!name.contains('.'));
    }

    #[test]
    fn test_derive_and_substitute() {
        let dir = TempDir::new().unwrap();
        let template = write_template(&dir);
        let output = dir.path().join("out").join("trial.json");

        let store = JsonArtifactStore::new();
        store.derive(&template, &output).unwrap();
        store.set_value(&output, "cooling", "detuning", 2.5).unwrap();

        let doc: Value = serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(doc["cooling"]["detuning"], 2.5);
        assert_eq!(doc["imaging"]["exposure"], 5);

        // template untouched
        let original: Value = serde_json::from_str(&fs::read_to_string(&template).unwrap()).unwrap();
        assert_eq!(original["cooling"]["detuning"], 1.0);
    }

    #[test]
    fn test_unset_target_rejected() {
        let dir = TempDir::new().unwrap();
        let template = write_template(&dir);
        let output = dir.path().join("trial.json");

        let store = JsonArtifactStore::new();
        store.derive(&template, &output).unwrap();
        let err = store.set_value(&output, "cooling", "ghost", 1.0).unwrap_err();
        assert!(matches!(err, ShotError::UnsetTarget { .. }));
        let err = store.set_value(&output, "nogroup", "x_global", 1.0).unwrap_err();
        assert!(matches!(err, ShotError::UnsetTarget { .. }));

        store.discard(&output);
        assert!(!output.exists());
    }

    #[test]
    fn test_non_finite_value_rejected() {
        let dir = TempDir::new().unwrap();
        let template = write_template(&dir);
        let output = dir.path().join("trial.json");
        let store = JsonArtifactStore::new();
        store.derive(&template, &output).unwrap();
        let err = store
            .set_value(&output, "cooling", "x_global", f64::NAN)
            .unwrap_err();
        assert!(matches!(err, ShotError::Artifact { .. }));
    }

    #[test]
    fn test_missing_template_fails() {
        let dir = TempDir::new().unwrap();
        let store = JsonArtifactStore::new();
        let err = store
            .derive(&dir.path().join("missing.json"), &dir.path().join("o.json"))
            .unwrap_err();
        assert!(matches!(err, ShotError::Io(_)));
    }
}
