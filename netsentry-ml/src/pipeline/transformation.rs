//! Transformation stage: fit on the validated train split, apply to both
//! splits, persist tensors and the fitted objects.

use crate::data::dataset::Dataset;
use crate::data::encoder::LabelEncoder;
use crate::data::storage::{read_csv, write_npy};
use crate::data::transform::FittedTransformer;
use crate::error::{MlError, Stage};
use crate::pipeline::artifact::{RunContext, TransformationArtifact, ValidationArtifact};
use ndarray::{Array2, ArrayView1, Axis, concatenate};
use netsentry_core::{PipelineConfig, TransformationConfig, UnseenLabelPolicy};
use std::borrow::Cow;

pub const TRANSFORMER_FILE: &str = "preprocessing.json";
pub const LABEL_ENCODER_FILE: &str = "label_encoder.json";

/// In-memory result of fitting and applying the transformation.
#[derive(Debug, Clone)]
pub struct TransformationOutput {
    pub transformer: FittedTransformer,
    pub encoder: LabelEncoder,
    /// Features followed by the encoded label.
    pub train: Array2<f64>,
    pub test: Array2<f64>,
}

fn append_label(features: Array2<f64>, codes: &[f64]) -> Result<Array2<f64>, MlError> {
    let labels = ArrayView1::from(codes).insert_axis(Axis(1));
    concatenate(Axis(1), &[features.view(), labels])
        .map_err(|e| MlError::dataset(format!("Failed to append label column: {e}")))
}

/// Fit the label encoder and transformer on `train` and apply both to `train`
/// and `test`. Unseen test labels follow `config.unseen_label_policy`.
pub fn build_tensors(
    train: &Dataset,
    test: &Dataset,
    target: &str,
    config: &TransformationConfig,
) -> Result<TransformationOutput, MlError> {
    let (Some(train_labels), Some(test_labels)) = (train.column(target), test.column(target))
    else {
        return Err(MlError::invalid_input(format!(
            "Target column '{target}' is missing from the validated splits"
        )));
    };

    let encoder = LabelEncoder::fit(target, train_labels.iter().copied())?;
    let transformer = FittedTransformer::fit(train, target, config)?;

    let train_codes = encoder.encode(train_labels, UnseenLabelPolicy::Abort)?;
    let test_codes = encoder.encode(test_labels, config.unseen_label_policy)?;
    let test_kept = if test_codes.rows.len() == test.row_count() {
        Cow::Borrowed(test)
    } else {
        Cow::Owned(test.select_rows(&test_codes.rows))
    };

    let train_tensor = append_label(transformer.transform(train)?, &train_codes.codes)?;
    let test_tensor = append_label(transformer.transform(&test_kept)?, &test_codes.codes)?;

    Ok(TransformationOutput {
        transformer,
        encoder,
        train: train_tensor,
        test: test_tensor,
    })
}

/// Apply a persisted transformer to a new dataset. Cells matching
/// `missing_tokens` are treated as missing (and imputed) the same way ingestion
/// treats them. When an encoder is given and the dataset carries its label
/// column, the encoded label is appended.
pub fn replay(
    transformer: &FittedTransformer,
    encoder: Option<&LabelEncoder>,
    dataset: &Dataset,
    missing_tokens: &[String],
    policy: UnseenLabelPolicy,
) -> Result<Array2<f64>, MlError> {
    let mut dataset = dataset.clone();
    let replaced = dataset.normalize_missing(missing_tokens);
    if replaced > 0 {
        tracing::debug!(replaced, "Normalized missing-value placeholders");
    }
    let dataset = &dataset;

    let labels = encoder.and_then(|enc| dataset.column(&enc.column).map(|labels| (enc, labels)));
    match labels {
        Some((encoder, labels)) => {
            let codes = encoder.encode(labels, policy)?;
            let kept = if codes.rows.len() == dataset.row_count() {
                Cow::Borrowed(dataset)
            } else {
                Cow::Owned(dataset.select_rows(&codes.rows))
            };
            append_label(transformer.transform(&kept)?, &codes.codes)
        }
        None => transformer.transform(dataset),
    }
}

/// Run the transformation stage on the validated splits.
pub fn fit_and_transform(
    validation: &ValidationArtifact,
    config: &PipelineConfig,
    run: &RunContext,
) -> Result<TransformationArtifact, MlError> {
    let target = config.ingestion.target_column.as_str();
    tracing::info!(target, "Starting data transformation");

    let train = read_csv(validation.valid_train_path())?;
    let test = read_csv(validation.valid_test_path())?;
    let output = build_tensors(&train, &test, target, &config.transformation)?;

    let stage_dir = run.stage_dir(Stage::DataTransformation);
    let object_dir = stage_dir.join("transformed_object");
    let transformer_path = object_dir.join(TRANSFORMER_FILE);
    let label_encoder_path = object_dir.join(LABEL_ENCODER_FILE);
    output.transformer.save(&transformer_path)?;
    output.encoder.save(&label_encoder_path)?;

    let tensor_dir = stage_dir.join("transformed");
    let transformed_train_path = tensor_dir.join("train.npy");
    let transformed_test_path = tensor_dir.join("test.npy");
    write_npy(&transformed_train_path, &output.train)?;
    write_npy(&transformed_test_path, &output.test)?;

    let exported_model_dir = match &config.final_model_dir {
        Some(dir) => {
            output.transformer.save(&dir.join(TRANSFORMER_FILE))?;
            output.encoder.save(&dir.join(LABEL_ENCODER_FILE))?;
            tracing::info!(dir = %dir.display(), "Exported fitted transformer and label encoder");
            Some(dir.clone())
        }
        None => None,
    };

    tracing::info!(
        features = output.transformer.columns.len(),
        classes = output.encoder.classes.len(),
        train_shape = ?output.train.dim(),
        test_shape = ?output.test.dim(),
        "Data transformation complete"
    );
    Ok(TransformationArtifact::new(
        transformer_path,
        label_encoder_path,
        transformed_train_path,
        transformed_test_path,
        exported_model_dir,
    ))
}
