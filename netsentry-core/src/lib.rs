//! # netsentry-core
//!
//! Shared foundation for the netsentry workspace: the layered pipeline
//! configuration and the atomic persistence helpers every stage writes through.

pub mod config;
pub mod error;
pub mod persistence;

pub use config::{
    IngestionConfig, PipelineConfig, SourceConfig, StoreKind, TransformationConfig,
    UnseenLabelPolicy, ValidationConfig, config_exists, load_config,
};
pub use error::ConfigError;
pub use persistence::{atomic_write, atomic_write_json, atomic_write_yaml, load_json, load_yaml};
