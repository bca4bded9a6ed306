//! Pipeline stages and the orchestrator that chains them.
//!
//! Each stage consumes the previous stage's artifact by reference and returns
//! its own. Every file a stage writes lives under the run's
//! `<artifact_dir>/<run_id>/<stage>/` directory.

pub mod artifact;
pub mod ingestion;
pub mod orchestrator;
pub mod transformation;
pub mod validation;

pub use artifact::{
    IngestionArtifact, RunContext, RunManifest, TransformationArtifact, ValidationArtifact,
};
pub use ingestion::{export_collection, ingest};
pub use orchestrator::TrainingPipeline;
pub use transformation::{TransformationOutput, build_tensors, fit_and_transform, replay};
pub use validation::validate;
