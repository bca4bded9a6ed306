//! Run context and the artifacts stages hand to each other.
//!
//! Artifacts only carry paths produced inside the same run directory. They
//! have no setters: a stage receives the previous artifact by shared reference
//! and builds its own.

use crate::error::{MlError, Stage};
use chrono::{DateTime, Utc};
use netsentry_core::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const MAX_RUN_ID_SUFFIX: u32 = 1000;

/// Identity and root directory of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    run_id: String,
    root: PathBuf,
}

impl RunContext {
    /// Run rooted at `<artifact_dir>/<run_id>`. Without an explicit id the UTC
    /// timestamp of `now` is used.
    pub fn new(artifact_dir: &Path, run_id: Option<&str>, now: DateTime<Utc>) -> Self {
        let run_id = run_id.map_or_else(|| Self::timestamp_id(now), str::to_string);
        Self {
            root: artifact_dir.join(&run_id),
            run_id,
        }
    }

    /// Like [`RunContext::new`], but also claims the run directory on disk so
    /// no two runs share it. An explicit id whose directory already exists is
    /// rejected; a timestamp id that collides gets a `_1`, `_2`, ... suffix.
    pub fn create(
        artifact_dir: &Path,
        run_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Self, MlError> {
        std::fs::create_dir_all(artifact_dir)
            .map_err(|e| MlError::persistence(artifact_dir, e))?;

        if let Some(id) = run_id {
            let run = Self::new(artifact_dir, Some(id), now);
            return match std::fs::create_dir(&run.root) {
                Ok(()) => Ok(run),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    Err(MlError::invalid_input(format!(
                        "Run directory {} already exists; choose another run_id",
                        run.root.display()
                    )))
                }
                Err(e) => Err(MlError::persistence(&run.root, e)),
            };
        }

        let base = Self::timestamp_id(now);
        for attempt in 0..MAX_RUN_ID_SUFFIX {
            let run_id = if attempt == 0 {
                base.clone()
            } else {
                format!("{base}_{attempt}")
            };
            let root = artifact_dir.join(&run_id);
            match std::fs::create_dir(&root) {
                Ok(()) => return Ok(Self { run_id, root }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(MlError::persistence(&root, e)),
            }
        }
        Err(MlError::invalid_input(format!(
            "No free run directory for '{base}' under {}",
            artifact_dir.display()
        )))
    }

    pub fn timestamp_id(now: DateTime<Utc>) -> String {
        now.format("%Y_%m_%d_%H_%M_%S").to_string()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stage_dir(&self, stage: Stage) -> PathBuf {
        self.root.join(stage.as_str())
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("run.json")
    }
}

/// Output of the ingestion stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionArtifact {
    feature_store_path: PathBuf,
    train_path: PathBuf,
    test_path: PathBuf,
}

impl IngestionArtifact {
    pub fn new(feature_store_path: PathBuf, train_path: PathBuf, test_path: PathBuf) -> Self {
        Self {
            feature_store_path,
            train_path,
            test_path,
        }
    }

    pub fn feature_store_path(&self) -> &Path {
        &self.feature_store_path
    }

    pub fn train_path(&self) -> &Path {
        &self.train_path
    }

    pub fn test_path(&self) -> &Path {
        &self.test_path
    }
}

/// Output of the validation stage. `validation_status` is the drift verdict;
/// structural failures abort the stage instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationArtifact {
    validation_status: bool,
    valid_train_path: PathBuf,
    valid_test_path: PathBuf,
    invalid_train_path: Option<PathBuf>,
    invalid_test_path: Option<PathBuf>,
    drift_report_path: PathBuf,
}

impl ValidationArtifact {
    pub fn new(
        validation_status: bool,
        valid_train_path: PathBuf,
        valid_test_path: PathBuf,
        drift_report_path: PathBuf,
    ) -> Self {
        Self {
            validation_status,
            valid_train_path,
            valid_test_path,
            invalid_train_path: None,
            invalid_test_path: None,
            drift_report_path,
        }
    }

    pub fn validation_status(&self) -> bool {
        self.validation_status
    }

    pub fn valid_train_path(&self) -> &Path {
        &self.valid_train_path
    }

    pub fn valid_test_path(&self) -> &Path {
        &self.valid_test_path
    }

    /// Always `None`: rows are never quarantined.
    pub fn invalid_train_path(&self) -> Option<&Path> {
        self.invalid_train_path.as_deref()
    }

    /// Always `None`: rows are never quarantined.
    pub fn invalid_test_path(&self) -> Option<&Path> {
        self.invalid_test_path.as_deref()
    }

    pub fn drift_report_path(&self) -> &Path {
        &self.drift_report_path
    }
}

/// Output of the transformation stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformationArtifact {
    transformer_path: PathBuf,
    label_encoder_path: PathBuf,
    transformed_train_path: PathBuf,
    transformed_test_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exported_model_dir: Option<PathBuf>,
}

impl TransformationArtifact {
    pub fn new(
        transformer_path: PathBuf,
        label_encoder_path: PathBuf,
        transformed_train_path: PathBuf,
        transformed_test_path: PathBuf,
        exported_model_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            transformer_path,
            label_encoder_path,
            transformed_train_path,
            transformed_test_path,
            exported_model_dir,
        }
    }

    pub fn transformer_path(&self) -> &Path {
        &self.transformer_path
    }

    pub fn label_encoder_path(&self) -> &Path {
        &self.label_encoder_path
    }

    pub fn transformed_train_path(&self) -> &Path {
        &self.transformed_train_path
    }

    pub fn transformed_test_path(&self) -> &Path {
        &self.transformed_test_path
    }

    /// Stable directory the transformer and encoder were copied to, if any.
    pub fn exported_model_dir(&self) -> Option<&Path> {
        self.exported_model_dir.as_deref()
    }
}

/// Record of a successful run, written to `<run>/run.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub config: PipelineConfig,
    pub ingestion: IngestionArtifact,
    pub validation: ValidationArtifact,
    pub transformation: TransformationArtifact,
    /// SHA-256 of every data file, keyed by path relative to the run root.
    pub sha256: BTreeMap<String, String>,
}

impl RunManifest {
    pub fn save(&self, path: &Path) -> Result<(), MlError> {
        netsentry_core::atomic_write_json(path, self).map_err(|e| MlError::persistence(path, e))
    }

    pub fn load(path: &Path) -> Result<Self, MlError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_run_context_timestamp_id() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let run = RunContext::new(Path::new("artifacts"), None, now);
        assert_eq!(run.run_id(), "2024_03_09_14_05_07");
        assert_eq!(run.root(), Path::new("artifacts/2024_03_09_14_05_07"));
        assert_eq!(
            run.stage_dir(Stage::DataValidation),
            PathBuf::from("artifacts/2024_03_09_14_05_07/data_validation")
        );
    }

    #[test]
    fn test_run_context_explicit_id() {
        let run = RunContext::new(Path::new("/tmp/a"), Some("nightly"), Utc::now());
        assert_eq!(run.run_id(), "nightly");
        assert_eq!(run.manifest_path(), PathBuf::from("/tmp/a/nightly/run.json"));
    }

    #[test]
    fn test_create_suffixes_colliding_timestamp_ids() {
        let dir = tempfile::TempDir::new().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();

        let first = RunContext::create(dir.path(), None, now).unwrap();
        let second = RunContext::create(dir.path(), None, now).unwrap();
        let third = RunContext::create(dir.path(), None, now).unwrap();
        assert_eq!(first.run_id(), "2024_03_09_14_05_07");
        assert_eq!(second.run_id(), "2024_03_09_14_05_07_1");
        assert_eq!(third.run_id(), "2024_03_09_14_05_07_2");
        assert!(second.root().is_dir());
    }

    #[test]
    fn test_create_rejects_existing_explicit_id() {
        let dir = tempfile::TempDir::new().unwrap();
        RunContext::create(dir.path(), Some("nightly"), Utc::now()).unwrap();
        let result = RunContext::create(dir.path(), Some("nightly"), Utc::now());
        assert!(matches!(result, Err(MlError::InvalidInput(_))));
    }

    #[test]
    fn test_validation_artifact_never_quarantines() {
        let artifact = ValidationArtifact::new(
            false,
            "v/train.csv".into(),
            "v/test.csv".into(),
            "v/report.yaml".into(),
        );
        assert!(!artifact.validation_status());
        assert!(artifact.invalid_train_path().is_none());
        assert!(artifact.invalid_test_path().is_none());
    }
}
