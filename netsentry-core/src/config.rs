//! Configuration system for netsentry.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> explicit config file -> environment -> CLI overrides.
//! The resulting [`PipelineConfig`] is built once per invocation and handed to
//! each stage by reference; stages never consult the process environment.

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root directory under which every run gets its own `<run_id>/` tree.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    /// Fixed run identifier. A UTC timestamp is generated when unset.
    #[serde(default)]
    pub run_id: Option<String>,
    /// Stable export location for the fitted transformer and label encoder.
    #[serde(default = "default_final_model_dir")]
    pub final_model_dir: Option<PathBuf>,
    /// Record store the ingestion stage reads from.
    #[serde(default)]
    pub source: SourceConfig,
    /// Ingestion stage settings.
    #[serde(default)]
    pub ingestion: IngestionConfig,
    /// Validation stage settings.
    #[serde(default)]
    pub validation: ValidationConfig,
    /// Transformation stage settings.
    #[serde(default)]
    pub transformation: TransformationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            artifact_dir: default_artifact_dir(),
            run_id: None,
            final_model_dir: default_final_model_dir(),
            source: SourceConfig::default(),
            ingestion: IngestionConfig::default(),
            validation: ValidationConfig::default(),
            transformation: TransformationConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fraction = self.ingestion.train_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(ConfigError::invalid(format!(
                "ingestion.train_fraction must be in (0, 1), got {fraction}"
            )));
        }
        let threshold = self.validation.drift_threshold;
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(ConfigError::invalid(format!(
                "validation.drift_threshold must be in (0, 1), got {threshold}"
            )));
        }
        if !self.transformation.skew_threshold.is_finite() || self.transformation.skew_threshold < 0.0
        {
            return Err(ConfigError::invalid(
                "transformation.skew_threshold must be a non-negative number",
            ));
        }
        if self.ingestion.target_column.trim().is_empty() {
            return Err(ConfigError::invalid("ingestion.target_column must not be empty"));
        }
        if self.source.collection.trim().is_empty() {
            return Err(ConfigError::invalid("source.collection must not be empty"));
        }
        if self.source.insert_batch_size == 0 {
            return Err(ConfigError::invalid("source.insert_batch_size must be at least 1"));
        }
        if let Some(run_id) = &self.run_id {
            let valid = !run_id.is_empty()
                && run_id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
                && run_id != "."
                && run_id != "..";
            if !valid {
                return Err(ConfigError::invalid(format!(
                    "run_id '{run_id}' must be a single path component of letters, digits, '_', '-' or '.'"
                )));
            }
        }
        Ok(())
    }
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_final_model_dir() -> Option<PathBuf> {
    Some(PathBuf::from("final_model"))
}

/// Kind of record store backing the source collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// One JSON document per line, `<root>/<database>/<collection>.jsonl`.
    #[default]
    Jsonl,
    /// SQLite file `<root>/<database>.db`, one table per collection.
    Sqlite,
}

/// Record store location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub store: StoreKind,
    /// Root directory of the store.
    #[serde(default = "default_store_root")]
    pub root: PathBuf,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Documents per insert batch when loading records into the store.
    #[serde(default = "default_insert_batch_size")]
    pub insert_batch_size: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            store: StoreKind::default(),
            root: default_store_root(),
            database: default_database(),
            collection: default_collection(),
            insert_batch_size: default_insert_batch_size(),
        }
    }
}

fn default_store_root() -> PathBuf {
    PathBuf::from(".netsentry/store")
}

fn default_database() -> String {
    "network_security".to_string()
}

fn default_collection() -> String {
    "network_data".to_string()
}

fn default_insert_batch_size() -> usize {
    1000
}

/// Ingestion stage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Class column used for stratification and label encoding.
    #[serde(default = "default_target_column")]
    pub target_column: String,
    /// Fraction of rows assigned to the training split.
    #[serde(default = "default_train_fraction")]
    pub train_fraction: f64,
    /// Seed for the stratified shuffle.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// File name of the unsplit feature-store snapshot.
    #[serde(default = "default_feature_store_file")]
    pub feature_store_file: String,
    /// Placeholder tokens normalized to a missing value (compared case-insensitively).
    #[serde(default = "default_missing_tokens")]
    pub missing_tokens: Vec<String>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            target_column: default_target_column(),
            train_fraction: default_train_fraction(),
            seed: default_seed(),
            feature_store_file: default_feature_store_file(),
            missing_tokens: default_missing_tokens(),
        }
    }
}

fn default_target_column() -> String {
    "Result".to_string()
}

fn default_train_fraction() -> f64 {
    0.8
}

fn default_seed() -> u64 {
    42
}

fn default_feature_store_file() -> String {
    "network_data.csv".to_string()
}

fn default_missing_tokens() -> Vec<String> {
    ["na", "n/a", "nan", "null", "none", "unknown", "?", "-", ""]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Validation stage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// YAML schema listing the expected columns.
    #[serde(default = "default_schema_path")]
    pub schema_path: PathBuf,
    /// Columns with a p-value below this are flagged as drifted.
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold: f64,
    /// Abort the run after validation when any column drifted.
    #[serde(default)]
    pub block_on_drift: bool,
    /// Require column names (not only their count) to match the schema.
    #[serde(default)]
    pub enforce_column_names: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            schema_path: default_schema_path(),
            drift_threshold: default_drift_threshold(),
            block_on_drift: false,
            enforce_column_names: false,
        }
    }
}

fn default_schema_path() -> PathBuf {
    PathBuf::from("data_schema/schema.yaml")
}

fn default_drift_threshold() -> f64 {
    0.05
}

/// What to do with a test-split label the encoder never saw during fitting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnseenLabelPolicy {
    /// Fail the transformation stage.
    #[default]
    Abort,
    /// Remove the offending test rows before transforming.
    DropRow,
    /// Encode as one index past the last known class.
    Unknown,
}

/// Transformation stage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationConfig {
    /// Columns with |skewness| strictly above this get the power transform.
    #[serde(default = "default_skew_threshold")]
    pub skew_threshold: f64,
    /// Extra label-like columns excluded from the feature set.
    #[serde(default = "default_label_columns")]
    pub label_columns: Vec<String>,
    #[serde(default)]
    pub unseen_label_policy: UnseenLabelPolicy,
}

impl Default for TransformationConfig {
    fn default() -> Self {
        Self {
            skew_threshold: default_skew_threshold(),
            label_columns: default_label_columns(),
            unseen_label_policy: UnseenLabelPolicy::default(),
        }
    }
}

fn default_skew_threshold() -> f64 {
    1.0
}

fn default_label_columns() -> Vec<String> {
    vec!["label".to_string()]
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "netsentry", "netsentry")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `NETSENTRY_`, nested with `__`)
/// 2. Explicit config file (`--config`)
/// 3. Workspace-local config (`.netsentry/config.toml`)
/// 4. User config (`~/.config/netsentry/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    config_file: Option<&Path>,
) -> Result<PipelineConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(PipelineConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".netsentry").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = config_file {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        figment = figment.merge(Toml::file(path));
    }

    // NETSENTRY_INGESTION__TRAIN_FRACTION, NETSENTRY_SOURCE__COLLECTION, ...
    figment = figment.merge(Env::prefixed("NETSENTRY_").split("__"));

    let config: PipelineConfig = figment.extract().map_err(Box::new)?;
    config.validate()?;
    tracing::debug!(
        artifact_dir = %config.artifact_dir.display(),
        collection = %config.source.collection,
        "Configuration loaded"
    );
    Ok(config)
}

/// Check whether a user-level or workspace-level config file exists.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if user_config_path().is_some_and(|p| p.exists()) {
        return true;
    }
    workspace.is_some_and(|ws| ws.join(".netsentry").join("config.toml").exists())
}
