//! Training pipeline orchestrator.

use crate::data::drift::DriftReport;
use crate::data::schema::SchemaDefinition;
use crate::data::source::{RecordStore, open_store};
use crate::data::storage::sha256_file;
use crate::error::{InStage, MlError, Stage, StageError};
use crate::pipeline::artifact::{RunContext, RunManifest, TransformationArtifact};
use crate::pipeline::{fit_and_transform, ingest, validate};
use chrono::Utc;
use netsentry_core::PipelineConfig;
use std::collections::BTreeMap;
use std::path::Path;

/// Runs ingestion, validation and transformation in sequence against one
/// record store.
pub struct TrainingPipeline {
    config: PipelineConfig,
    store: Box<dyn RecordStore>,
}

impl TrainingPipeline {
    pub fn new(config: PipelineConfig, store: Box<dyn RecordStore>) -> Self {
        Self { config, store }
    }

    /// Pipeline reading from the store described by `config.source`.
    pub fn from_config(config: PipelineConfig) -> Self {
        let store = open_store(&config.source);
        Self::new(config, store)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage and return the transformation artifact.
    pub async fn run(&self) -> Result<TransformationArtifact, StageError> {
        Ok(self.run_detailed().await?.transformation)
    }

    /// Run every stage and return the manifest written to `<run>/run.json`.
    ///
    /// Files written by completed stages are left in place when a later stage
    /// fails.
    pub async fn run_detailed(&self) -> Result<RunManifest, StageError> {
        let started_at = Utc::now();
        let run = RunContext::create(
            &self.config.artifact_dir,
            self.config.run_id.as_deref(),
            started_at,
        )
        .in_stage(Stage::DataIngestion)?;
        tracing::info!(
            run_id = run.run_id(),
            root = %run.root().display(),
            "Starting training pipeline"
        );

        let ingestion = ingest(self.store.as_ref(), &self.config, &run)
            .await
            .in_stage(Stage::DataIngestion)?;

        let validation = SchemaDefinition::load(&self.config.validation.schema_path)
            .and_then(|schema| validate(&ingestion, &schema, &self.config.validation, &run))
            .in_stage(Stage::DataValidation)?;
        if self.config.validation.block_on_drift && !validation.validation_status() {
            let columns = DriftReport::load(validation.drift_report_path())
                .map(|report| report.drifted_columns())
                .in_stage(Stage::DataValidation)?;
            return Err(StageError::new(
                Stage::DataValidation,
                MlError::DriftDetected { columns },
            ));
        }

        let transformation =
            fit_and_transform(&validation, &self.config, &run).in_stage(Stage::DataTransformation)?;

        let files = [
            ingestion.feature_store_path(),
            ingestion.train_path(),
            ingestion.test_path(),
            validation.valid_train_path(),
            validation.valid_test_path(),
            transformation.transformed_train_path(),
            transformation.transformed_test_path(),
        ];
        let sha256 = checksums(run.root(), &files).in_stage(Stage::DataTransformation)?;

        let manifest = RunManifest {
            run_id: run.run_id().to_string(),
            started_at,
            finished_at: Utc::now(),
            config: self.config.clone(),
            ingestion,
            validation,
            transformation,
            sha256,
        };
        manifest
            .save(&run.manifest_path())
            .in_stage(Stage::DataTransformation)?;

        tracing::info!(
            run_id = run.run_id(),
            elapsed_ms = (manifest.finished_at - manifest.started_at).num_milliseconds(),
            "Training pipeline complete"
        );
        Ok(manifest)
    }
}

fn checksums(root: &Path, files: &[&Path]) -> Result<BTreeMap<String, String>, MlError> {
    files
        .iter()
        .map(|&path| {
            let key = path
                .strip_prefix(root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");
            Ok((key, sha256_file(path)?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::source::{Document, JsonlRecordStore};
    use tempfile::TempDir;

    fn document(i: usize, shifted: bool) -> Document {
        let mut doc = Document::new();
        // Distinct values make any two random halves differ in distribution.
        let rate = if shifted { i as f64 * 1.5 } else { (i % 6) as f64 };
        doc.insert("rate".into(), serde_json::json!(rate));
        doc.insert("hops".into(), serde_json::json!(i % 4));
        doc.insert("Result".into(), serde_json::json!(if i % 3 == 0 { 1 } else { -1 }));
        doc
    }

    async fn setup(dir: &TempDir, shifted: bool) -> (PipelineConfig, Box<dyn RecordStore>) {
        let store = JsonlRecordStore::new(dir.path().join("store"));
        let docs = (0..120).map(|i| document(i, shifted)).collect();
        store.insert_many("network_data", docs).await.unwrap();

        let schema_path = dir.path().join("schema.yaml");
        std::fs::write(
            &schema_path,
            "columns:\n  - rate: float64\n  - hops: int64\n  - Result: int64\n",
        )
        .unwrap();

        let mut config = PipelineConfig::default();
        config.artifact_dir = dir.path().join("artifacts");
        config.final_model_dir = Some(dir.path().join("final_model"));
        config.run_id = Some("test_run".into());
        config.validation.schema_path = schema_path;
        (config, Box::new(store))
    }

    #[tokio::test]
    async fn test_run_writes_manifest() {
        let dir = TempDir::new().unwrap();
        let (config, store) = setup(&dir, false).await;
        let pipeline = TrainingPipeline::new(config, store);

        let manifest = pipeline.run_detailed().await.unwrap();
        let run_root = dir.path().join("artifacts").join("test_run");
        assert_eq!(manifest.run_id, "test_run");
        assert_eq!(
            RunManifest::load(&run_root.join("run.json")).unwrap(),
            manifest
        );
        assert_eq!(manifest.sha256.len(), 7);
        assert!(manifest
            .sha256
            .contains_key("data_transformation/transformed/train.npy"));
        assert!(manifest.transformation.transformer_path().starts_with(&run_root));
    }

    #[tokio::test]
    async fn test_missing_collection_fails_in_ingestion() {
        let dir = TempDir::new().unwrap();
        let (mut config, store) = setup(&dir, false).await;
        config.source.collection = "absent".into();

        let err = TrainingPipeline::new(config, store).run().await.unwrap_err();
        assert_eq!(err.stage, Stage::DataIngestion);
        assert!(matches!(err.cause, MlError::EmptyDataset { .. }));
    }

    #[tokio::test]
    async fn test_missing_schema_fails_in_validation() {
        let dir = TempDir::new().unwrap();
        let (mut config, store) = setup(&dir, false).await;
        config.validation.schema_path = dir.path().join("nope.yaml");

        let err = TrainingPipeline::new(config, store).run().await.unwrap_err();
        assert_eq!(err.stage, Stage::DataValidation);
        // Ingestion output survives the failure.
        assert!(dir
            .path()
            .join("artifacts/test_run/data_ingestion/ingested/train.csv")
            .exists());
    }

    #[tokio::test]
    async fn test_block_on_drift() {
        let dir = TempDir::new().unwrap();
        let (mut config, store) = setup(&dir, true).await;
        config.ingestion.train_fraction = 0.5;
        config.validation.drift_threshold = 0.999;

        let permissive = TrainingPipeline::new(config.clone(), store);
        let manifest = permissive.run_detailed().await.unwrap();
        assert!(!manifest.validation.validation_status());

        config.validation.block_on_drift = true;
        config.run_id = Some("blocked".into());
        let store = Box::new(JsonlRecordStore::new(dir.path().join("store")));
        let err = TrainingPipeline::new(config, store).run().await.unwrap_err();
        assert_eq!(err.stage, Stage::DataValidation);
        assert!(matches!(err.cause, MlError::DriftDetected { ref columns } if !columns.is_empty()));
        assert!(!dir.path().join("artifacts/blocked/data_transformation").exists());
    }

    #[tokio::test]
    async fn test_back_to_back_runs_get_separate_directories() {
        let dir = TempDir::new().unwrap();
        let (mut config, store) = setup(&dir, false).await;
        config.run_id = None;
        let pipeline = TrainingPipeline::new(config, store);

        let first = pipeline.run_detailed().await.unwrap();
        let second = pipeline.run_detailed().await.unwrap();
        assert_ne!(first.run_id, second.run_id);

        let runs = std::fs::read_dir(dir.path().join("artifacts")).unwrap().count();
        assert_eq!(runs, 2);
        for manifest in [&first, &second] {
            let root = dir.path().join("artifacts").join(&manifest.run_id);
            assert_eq!(RunManifest::load(&root.join("run.json")).unwrap(), *manifest);
        }
    }

    #[tokio::test]
    async fn test_rerun_with_same_run_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (config, store) = setup(&dir, false).await;
        let pipeline = TrainingPipeline::new(config, store);

        pipeline.run().await.unwrap();
        let err = pipeline.run().await.unwrap_err();
        assert_eq!(err.stage, Stage::DataIngestion);
        assert!(matches!(err.cause, MlError::InvalidInput(_)));
        assert!(dir.path().join("artifacts/test_run/run.json").exists());
    }
}
