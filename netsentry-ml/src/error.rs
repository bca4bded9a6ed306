//! Error types for the netsentry-ml crate.
//!
//! [`MlError`] names the underlying condition; [`StageError`] adds which pipeline
//! stage failed and the call site that attached the stage (the orchestrator
//! step), so a failed run surfaces exactly one error that identifies both.

use std::fmt;
use std::panic::Location;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Top-level error type for pipeline operations.
#[derive(Debug, Error)]
pub enum MlError {
    #[error("Record store unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Collection '{collection}' returned no records")]
    EmptyDataset { collection: String },

    #[error("Schema mismatch in {dataset}: {detail}")]
    SchemaMismatch { dataset: String, detail: String },

    #[error("Test split label '{label}' was not present in the training split")]
    UnseenLabel { label: String },

    #[error("No feature columns left to transform (skewed and regular routes are both empty)")]
    EmptyFeatureSet,

    #[error("Failed to persist {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Drift detected in columns {columns:?} and drift blocking is enabled")]
    DriftDetected { columns: Vec<String> },

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl MlError {
    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn source_unavailable(msg: impl Into<String>) -> Self {
        Self::SourceUnavailable(msg.into())
    }

    pub fn persistence(path: &Path, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn schema_mismatch(dataset: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            dataset: dataset.into(),
            detail: detail.into(),
        }
    }
}

/// Pipeline stage names, as they appear in logs and in the artifact tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    DataIngestion,
    DataValidation,
    DataTransformation,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::DataIngestion => "data_ingestion",
            Stage::DataValidation => "data_validation",
            Stage::DataTransformation => "data_transformation",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An [`MlError`] tagged with the stage that raised it and the call site that
/// attached the stage.
#[derive(Debug, Error)]
#[error("stage '{stage}' failed ({location}): {cause}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub cause: MlError,
    pub location: &'static Location<'static>,
}

impl StageError {
    #[track_caller]
    pub fn new(stage: Stage, cause: MlError) -> Self {
        Self {
            stage,
            cause,
            location: Location::caller(),
        }
    }
}

/// Attach a [`Stage`] to a fallible stage result.
pub trait InStage<T> {
    fn in_stage(self, stage: Stage) -> Result<T, StageError>;
}

impl<T> InStage<T> for Result<T, MlError> {
    #[track_caller]
    fn in_stage(self, stage: Stage) -> Result<T, StageError> {
        match self {
            Ok(value) => Ok(value),
            Err(cause) => Err(StageError::new(stage, cause)),
        }
    }
}
