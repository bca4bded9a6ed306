//! # netsentry-ml: training-data pipeline for network intrusion classifiers
//!
//! Turns a collection of raw network-traffic records into model-ready numeric
//! tensors in three stages:
//!
//! 1. **Ingestion**: export the collection from a [`RecordStore`], normalize
//!    missing-value placeholders, persist a feature-store snapshot and a
//!    stratified train/test split.
//! 2. **Validation**: check both splits against the declared schema and test
//!    every column for distributional drift between them.
//! 3. **Transformation**: route numeric columns by skewness, fit imputation,
//!    power transform and standardization on train only, encode labels and
//!    persist the tensors together with the fitted transformer.
//!
//! [`pipeline::TrainingPipeline`] chains the stages; each stage is also usable on
//! its own through the functions in [`pipeline`].

pub mod data;
pub mod error;
pub mod pipeline;

pub use data::{Dataset, DriftReport, FittedTransformer, LabelEncoder, RecordStore, Scalar};
pub use error::{InStage, MlError, Stage, StageError};
pub use pipeline::{
    IngestionArtifact, RunContext, TrainingPipeline, TransformationArtifact, ValidationArtifact,
};
