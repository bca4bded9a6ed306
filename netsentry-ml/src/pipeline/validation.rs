//! Validation stage: structural checks plus train/test drift report.

use crate::data::dataset::Dataset;
use crate::data::drift::detect_drift;
use crate::data::schema::SchemaDefinition;
use crate::data::storage::{read_csv, write_csv};
use crate::data::validate::{check_column_names, missing_ratios, validate_columns};
use crate::error::{MlError, Stage};
use crate::pipeline::artifact::{IngestionArtifact, RunContext, ValidationArtifact};
use netsentry_core::ValidationConfig;

fn check_structure(
    label: &str,
    dataset: &Dataset,
    schema: &SchemaDefinition,
    config: &ValidationConfig,
) -> Result<(), MlError> {
    if !validate_columns(dataset, schema) {
        return Err(MlError::schema_mismatch(
            label,
            format!(
                "expected {} columns, found {}",
                schema.len(),
                dataset.column_count()
            ),
        ));
    }
    if config.enforce_column_names {
        let names = check_column_names(dataset, schema);
        if !names.is_match() {
            return Err(MlError::schema_mismatch(label, names.to_string()));
        }
    }
    for (column, ratio) in missing_ratios(dataset) {
        if ratio > 0.0 {
            tracing::debug!(dataset = label, column = %column, ratio, "Missing values");
        }
    }
    Ok(())
}

/// Run the validation stage on the ingested splits.
///
/// A structural failure aborts with [`MlError::SchemaMismatch`] before any
/// drift statistic is computed. Drift never aborts here; it is reported in
/// the artifact's `validation_status` and the YAML report.
pub fn validate(
    ingestion: &IngestionArtifact,
    schema: &SchemaDefinition,
    config: &ValidationConfig,
    run: &RunContext,
) -> Result<ValidationArtifact, MlError> {
    tracing::info!(schema_columns = schema.len(), "Starting data validation");
    let train = read_csv(ingestion.train_path())?;
    let test = read_csv(ingestion.test_path())?;

    check_structure("train", &train, schema, config)?;
    check_structure("test", &test, schema, config)?;

    let (drift_ok, report) = detect_drift(&train, &test, config.drift_threshold);
    let stage_dir = run.stage_dir(Stage::DataValidation);
    let drift_report_path = stage_dir.join("drift_report").join("report.yaml");
    report.save(&drift_report_path)?;

    let validated_dir = stage_dir.join("validated");
    let valid_train_path = validated_dir.join("train.csv");
    let valid_test_path = validated_dir.join("test.csv");
    write_csv(&valid_train_path, &train)?;
    write_csv(&valid_test_path, &test)?;

    if drift_ok {
        tracing::info!(columns = report.len(), "Data validation complete, no drift");
    } else {
        tracing::warn!(
            drifted = ?report.drifted_columns(),
            "Data validation complete, drift detected"
        );
    }
    Ok(ValidationArtifact::new(
        drift_ok,
        valid_train_path,
        valid_test_path,
        drift_report_path,
    ))
}
