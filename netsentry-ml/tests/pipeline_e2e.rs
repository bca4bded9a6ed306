//! End-to-end runs of the training pipeline against a JSONL record store.

use netsentry_core::{PipelineConfig, UnseenLabelPolicy};
use netsentry_ml::data::source::{Document, JsonlRecordStore};
use netsentry_ml::data::storage::{read_csv, read_npy};
use netsentry_ml::data::{LabelEncoder, SchemaDefinition, detect_drift, validate_columns};
use netsentry_ml::pipeline::replay;
use netsentry_ml::{FittedTransformer, RecordStore, TrainingPipeline};
use pretty_assertions::assert_eq;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::path::Path;
use tempfile::TempDir;

const NUMERIC: [&str; 8] = [
    "duration",
    "src_bytes",
    "dst_bytes",
    "wrong_fragment",
    "urgent",
    "hot",
    "num_failed_logins",
    "ttl",
];

// Features are drawn independently of the label from a seeded generator, so
// the two splits are i.i.d. samples of the same distribution. Only `src_bytes`
// has a heavy right tail; `ttl` is constant.
fn connections(n: usize, seed: u64) -> Vec<Document> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let attack = i % 20 == 0;
            let heavy: f64 = rng.gen_range(1e-9..1.0);
            let protocol = ["tcp", "udp", "icmp"][rng.gen_range(0..3)];

            let mut doc = Document::new();
            doc.insert("duration".into(), serde_json::json!(rng.gen_range(0..10)));
            doc.insert(
                "src_bytes".into(),
                serde_json::json!((300.0 * -heavy.ln()).powi(2).round()),
            );
            doc.insert("dst_bytes".into(), serde_json::json!(rng.gen_range(0..600)));
            doc.insert("wrong_fragment".into(), serde_json::json!(rng.gen_range(0..3)));
            doc.insert("urgent".into(), serde_json::json!(rng.gen_range(0..2)));
            doc.insert("hot".into(), serde_json::json!(rng.gen_range(0..6)));
            doc.insert("num_failed_logins".into(), serde_json::json!(rng.gen_range(0..5)));
            doc.insert("ttl".into(), serde_json::json!(64));
            doc.insert("protocol".into(), serde_json::json!(protocol));
            doc.insert("Result".into(), serde_json::json!(if attack { 1 } else { 0 }));
            doc
        })
        .collect()
}

fn write_schema(path: &Path) {
    let mut yaml = String::from("columns:\n");
    for name in NUMERIC {
        yaml.push_str(&format!("  - {name}: int64\n"));
    }
    yaml.push_str("  - protocol: object\n  - Result: int64\n");
    std::fs::write(path, yaml).unwrap();
}

async fn seeded(dir: &TempDir) -> (PipelineConfig, JsonlRecordStore) {
    let store = JsonlRecordStore::new(dir.path().join("store"));
    store
        .insert_many("network_data", connections(1000, 7))
        .await
        .unwrap();

    let schema_path = dir.path().join("schema.yaml");
    write_schema(&schema_path);

    let mut config = PipelineConfig::default();
    config.artifact_dir = dir.path().join("artifacts");
    config.final_model_dir = Some(dir.path().join("final_model"));
    config.run_id = Some("e2e".into());
    config.validation.schema_path = schema_path;
    // Ten independent column tests; a small threshold keeps chance flags rare.
    config.validation.drift_threshold = 0.001;
    (config, store)
}

#[tokio::test]
async fn test_thousand_row_scenario() {
    let dir = TempDir::new().unwrap();
    let (config, store) = seeded(&dir).await;
    let schema = SchemaDefinition::load(&config.validation.schema_path).unwrap();
    assert_eq!(schema.len(), 10);

    let threshold = config.validation.drift_threshold;
    let pipeline = TrainingPipeline::new(config, Box::new(store));
    let manifest = pipeline.run_detailed().await.unwrap();

    // Ingestion: 800/200 split, label-1 rate preserved.
    let train = read_csv(manifest.ingestion.train_path()).unwrap();
    let test = read_csv(manifest.ingestion.test_path()).unwrap();
    assert_eq!((train.row_count(), test.row_count()), (800, 200));
    let attacks = test
        .numeric_column("Result")
        .unwrap()
        .into_iter()
        .filter(|v| *v == Some(1.0))
        .count();
    assert!((attacks as f64 / 200.0 - 0.05).abs() <= 0.01);

    // Validation: structure and drift.
    assert!(validate_columns(&train, &schema));
    assert!(validate_columns(&test, &schema));
    assert!(manifest.validation.validation_status());
    let (ok, report) = detect_drift(&train, &test, threshold);
    assert!(ok, "unexpected drift in {:?}", report.drifted_columns());
    assert_eq!(report.len(), 10);
    assert!(report.get("src_bytes").unwrap().p_value.unwrap() >= threshold);

    // Transformation: 8 numeric features plus the label; protocol is excluded.
    let transformer = FittedTransformer::load(manifest.transformation.transformer_path()).unwrap();
    assert_eq!(transformer.route().skewed, vec!["src_bytes"]);
    assert_eq!(transformer.route().regular.len(), 7);
    assert!(transformer.route().regular.contains(&"ttl".to_string()));
    assert_eq!(transformer.categorical_columns, vec!["protocol"]);
    assert!(!transformer.feature_names().contains(&"protocol"));

    let train_tensor = read_npy(manifest.transformation.transformed_train_path()).unwrap();
    let test_tensor = read_npy(manifest.transformation.transformed_test_path()).unwrap();
    assert_eq!(train_tensor.dim(), (800, 9));
    assert_eq!(test_tensor.dim(), (200, 9));
    let encoded_attacks = test_tensor.column(8).iter().filter(|v| **v == 1.0).count();
    assert_eq!(encoded_attacks, attacks);

    assert!(dir.path().join("final_model/preprocessing.json").exists());
    assert!(dir.path().join("final_model/label_encoder.json").exists());
}

#[tokio::test]
async fn test_replay_reproduces_transformed_test_split() {
    let dir = TempDir::new().unwrap();
    let (config, store) = seeded(&dir).await;
    let artifact = TrainingPipeline::new(config, Box::new(store))
        .run()
        .await
        .unwrap();

    let transformer = FittedTransformer::load(artifact.transformer_path()).unwrap();
    let encoder = LabelEncoder::load(artifact.label_encoder_path()).unwrap();
    let validated = dir.path().join("artifacts/e2e/data_validation/validated");
    let test = read_csv(&validated.join("test.csv")).unwrap();
    let tokens = PipelineConfig::default().ingestion.missing_tokens;

    let first = replay(&transformer, Some(&encoder), &test, &tokens, UnseenLabelPolicy::Abort).unwrap();
    let second = replay(&transformer, Some(&encoder), &test, &tokens, UnseenLabelPolicy::Abort).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, read_npy(artifact.transformed_test_path()).unwrap());
}

#[tokio::test]
async fn test_separate_runs_do_not_overwrite() {
    let dir = TempDir::new().unwrap();
    let (mut config, store) = seeded(&dir).await;
    let store: Box<dyn RecordStore> = Box::new(store);

    config.run_id = Some("first".into());
    TrainingPipeline::new(config.clone(), store).run().await.unwrap();
    config.run_id = Some("second".into());
    let store = Box::new(JsonlRecordStore::new(dir.path().join("store")));
    TrainingPipeline::new(config, store).run().await.unwrap();

    assert!(dir.path().join("artifacts/first/run.json").exists());
    assert!(dir.path().join("artifacts/second/run.json").exists());
}
