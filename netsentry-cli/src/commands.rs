//! CLI subcommand handlers.

use crate::{Commands, ConfigAction};
use netsentry_core::{PipelineConfig, load_config};
use netsentry_ml::data::source::{dataset_to_documents, open_store, push_records};
use netsentry_ml::data::storage::{combine_datasets, read_csv, read_npy, write_csv, write_npy};
use netsentry_ml::data::{DriftTest, FittedTransformer, LabelEncoder, SchemaDefinition, detect_drift};
use netsentry_ml::pipeline::replay;
use netsentry_ml::TrainingPipeline;
use std::path::{Path, PathBuf};

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            run_id,
            artifact_dir,
            block_on_drift,
        } => {
            let mut config = pipeline_config(workspace, config_file)?;
            if let Some(run_id) = run_id {
                config.run_id = Some(run_id);
            }
            if let Some(dir) = artifact_dir {
                config.artifact_dir = resolve(workspace, &dir);
            }
            if block_on_drift {
                config.validation.block_on_drift = true;
            }
            config
                .validate()
                .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
            handle_run(config).await
        }
        Commands::PushData {
            file,
            collection,
            batch_size,
        } => {
            let mut config = pipeline_config(workspace, config_file)?;
            if let Some(collection) = collection {
                config.source.collection = collection;
            }
            if let Some(batch_size) = batch_size {
                config.source.insert_batch_size = batch_size;
            }
            handle_push_data(&config, &resolve(workspace, &file)).await
        }
        Commands::Combine {
            train,
            test,
            output,
            tag_source,
        } => handle_combine(
            &resolve(workspace, &train),
            &resolve(workspace, &test),
            &resolve(workspace, &output),
            tag_source.as_deref(),
        ),
        Commands::Drift {
            base,
            current,
            threshold,
            report,
            fail_on_drift,
        } => {
            let config = pipeline_config(workspace, config_file)?;
            let threshold = threshold.unwrap_or(config.validation.drift_threshold);
            if !(threshold > 0.0 && threshold < 1.0) {
                anyhow::bail!("Drift threshold must be in (0, 1), got {threshold}");
            }
            handle_drift(
                &resolve(workspace, &base),
                &resolve(workspace, &current),
                threshold,
                report.map(|p| resolve(workspace, &p)).as_deref(),
                fail_on_drift,
            )
        }
        Commands::Replay {
            transformer,
            label_encoder,
            input,
            output,
            unseen_labels,
            expect,
        } => {
            let config = pipeline_config(workspace, config_file)?;
            handle_replay(
                &resolve(workspace, &transformer),
                label_encoder.map(|p| resolve(workspace, &p)).as_deref(),
                &resolve(workspace, &input),
                &resolve(workspace, &output),
                &config.ingestion.missing_tokens,
                unseen_labels.into(),
                expect.map(|p| resolve(workspace, &p)).as_deref(),
            )
        }
        Commands::InferSchema { input, output } => handle_infer_schema(
            &resolve(workspace, &input),
            output.map(|p| resolve(workspace, &p)).as_deref(),
        ),
        Commands::Config { action } => handle_config(action, workspace, config_file),
    }
}

fn resolve(workspace: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}

/// Load the layered configuration and anchor its relative paths at the workspace.
fn pipeline_config(workspace: &Path, config_file: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    let config_file = config_file.map(|p| resolve(workspace, p));
    let mut config = load_config(Some(workspace), config_file.as_deref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    config.artifact_dir = resolve(workspace, &config.artifact_dir);
    config.final_model_dir = config.final_model_dir.map(|p| resolve(workspace, &p));
    config.source.root = resolve(workspace, &config.source.root);
    config.validation.schema_path = resolve(workspace, &config.validation.schema_path);
    tracing::debug!(
        workspace = %workspace.display(),
        artifact_dir = %config.artifact_dir.display(),
        "Resolved configuration paths"
    );
    Ok(config)
}

async fn handle_run(config: PipelineConfig) -> anyhow::Result<()> {
    let pipeline = TrainingPipeline::from_config(config);
    let manifest = pipeline.run_detailed().await?;

    println!("Run {} complete", manifest.run_id);
    println!(
        "  drift check:     {}",
        if manifest.validation.validation_status() {
            "passed"
        } else {
            "drift detected (see report)"
        }
    );
    println!(
        "  drift report:    {}",
        manifest.validation.drift_report_path().display()
    );
    println!(
        "  train tensor:    {}",
        manifest.transformation.transformed_train_path().display()
    );
    println!(
        "  test tensor:     {}",
        manifest.transformation.transformed_test_path().display()
    );
    println!(
        "  transformer:     {}",
        manifest.transformation.transformer_path().display()
    );
    if let Some(dir) = manifest.transformation.exported_model_dir() {
        println!("  exported to:     {}", dir.display());
    }
    Ok(())
}

async fn handle_push_data(config: &PipelineConfig, file: &Path) -> anyhow::Result<()> {
    let dataset = read_csv(file)?;
    let documents = dataset_to_documents(&dataset);
    let store = open_store(&config.source);
    let inserted = push_records(
        store.as_ref(),
        &config.source.collection,
        documents,
        config.source.insert_batch_size,
    )
    .await?;
    println!(
        "Inserted {} records into '{}' ({})",
        inserted,
        config.source.collection,
        store.location()
    );
    Ok(())
}

fn handle_combine(
    train: &Path,
    test: &Path,
    output: &Path,
    source_column: Option<&str>,
) -> anyhow::Result<()> {
    let combined = combine_datasets(&read_csv(train)?, &read_csv(test)?, source_column)?;
    write_csv(output, &combined)?;
    println!(
        "Combined {} rows x {} columns into {}",
        combined.row_count(),
        combined.column_count(),
        output.display()
    );
    Ok(())
}

fn handle_drift(
    base: &Path,
    current: &Path,
    threshold: f64,
    report_path: Option<&Path>,
    fail_on_drift: bool,
) -> anyhow::Result<()> {
    let (ok, report) = detect_drift(&read_csv(base)?, &read_csv(current)?, threshold);

    println!("{:<32} {:<8} {:>10} {:>10}  drift", "column", "test", "statistic", "p-value");
    for (name, column) in &report.columns.0 {
        let test = match column.test {
            DriftTest::KolmogorovSmirnov => "ks",
            DriftTest::ChiSquare => "chi2",
            DriftTest::Skipped => "-",
        };
        let number = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"));
        println!(
            "{:<32} {:<8} {:>10} {:>10}  {}",
            name,
            test,
            number(column.statistic),
            number(column.p_value),
            if column.insufficient_data {
                "n/a"
            } else if column.drift_detected {
                "YES"
            } else {
                "no"
            }
        );
    }
    if let Some(path) = report_path {
        report.save(path)?;
        println!("Report written to {}", path.display());
    }

    if !ok && fail_on_drift {
        anyhow::bail!("Drift detected in columns {:?}", report.drifted_columns());
    }
    Ok(())
}

fn handle_replay(
    transformer_path: &Path,
    label_encoder_path: Option<&Path>,
    input: &Path,
    output: &Path,
    missing_tokens: &[String],
    policy: netsentry_core::UnseenLabelPolicy,
    expect: Option<&Path>,
) -> anyhow::Result<()> {
    let transformer = FittedTransformer::load(transformer_path)?;
    let encoder = label_encoder_path.map(LabelEncoder::load).transpose()?;
    let dataset = read_csv(input)?;
    let tensor = replay(&transformer, encoder.as_ref(), &dataset, missing_tokens, policy)?;
    write_npy(output, &tensor)?;
    println!(
        "Wrote {} x {} tensor to {}",
        tensor.nrows(),
        tensor.ncols(),
        output.display()
    );

    if let Some(expected_path) = expect {
        let expected = read_npy(expected_path)?;
        let identical = expected.dim() == tensor.dim()
            && expected
                .iter()
                .zip(tensor.iter())
                .all(|(a, b)| a.to_bits() == b.to_bits());
        if !identical {
            anyhow::bail!(
                "Replayed tensor differs from {} (expected shape {:?}, got {:?})",
                expected_path.display(),
                expected.dim(),
                tensor.dim()
            );
        }
        println!("Output matches {}", expected_path.display());
    }
    Ok(())
}

fn handle_infer_schema(input: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let schema = SchemaDefinition::infer(&read_csv(input)?);
    let yaml = schema.to_yaml_string()?;
    match output {
        Some(path) => {
            netsentry_core::atomic_write(path, yaml.as_bytes())?;
            println!("Schema with {} columns written to {}", schema.len(), path.display());
        }
        None => print!("{yaml}"),
    }
    Ok(())
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".netsentry");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&PipelineConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config_file = config_file.map(|p| resolve(workspace, p));
            let config = load_config(Some(workspace), config_file.as_deref())
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}
