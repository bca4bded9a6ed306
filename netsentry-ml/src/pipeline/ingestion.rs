//! Ingestion stage: record store → feature-store snapshot → train/test split.

use crate::data::dataset::Dataset;
use crate::data::source::{ID_FIELD, RecordStore, documents_to_dataset};
use crate::data::split::stratified_split;
use crate::data::storage::write_csv;
use crate::error::{MlError, Stage};
use crate::pipeline::artifact::{IngestionArtifact, RunContext};
use netsentry_core::PipelineConfig;

/// Export `collection` as a dataset: drop the store id column and normalize
/// placeholder tokens to missing values.
pub async fn export_collection(
    store: &dyn RecordStore,
    collection: &str,
    missing_tokens: &[String],
) -> Result<Dataset, MlError> {
    let documents = store.fetch_all(collection).await?;
    if documents.is_empty() {
        return Err(MlError::EmptyDataset {
            collection: collection.to_string(),
        });
    }
    let mut dataset = documents_to_dataset(&documents)?;
    dataset.drop_column(ID_FIELD);
    let replaced = dataset.normalize_missing(missing_tokens);
    tracing::debug!(collection, replaced, "Normalized missing-value placeholders");
    Ok(dataset)
}

/// Run the ingestion stage.
pub async fn ingest(
    store: &dyn RecordStore,
    config: &PipelineConfig,
    run: &RunContext,
) -> Result<IngestionArtifact, MlError> {
    let collection = config.source.collection.as_str();
    tracing::info!(collection, store = %store.location(), "Starting data ingestion");

    let dataset = export_collection(store, collection, &config.ingestion.missing_tokens).await?;
    let stage_dir = run.stage_dir(Stage::DataIngestion);

    let feature_store_path = stage_dir
        .join("feature_store")
        .join(&config.ingestion.feature_store_file);
    write_csv(&feature_store_path, &dataset)?;

    let (train, test) = stratified_split(
        &dataset,
        &config.ingestion.target_column,
        config.ingestion.train_fraction,
        config.ingestion.seed,
    )?;

    let ingested_dir = stage_dir.join("ingested");
    let train_path = ingested_dir.join("train.csv");
    let test_path = ingested_dir.join("test.csv");
    write_csv(&train_path, &train)?;
    write_csv(&test_path, &test)?;

    tracing::info!(
        rows = dataset.row_count(),
        columns = dataset.column_count(),
        train_rows = train.row_count(),
        test_rows = test.row_count(),
        "Data ingestion complete"
    );
    Ok(IngestionArtifact::new(feature_store_path, train_path, test_path))
}
