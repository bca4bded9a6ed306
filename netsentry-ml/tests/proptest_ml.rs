//! Property-based tests for the split, routing, drift and validation helpers.

use proptest::prelude::*;

use netsentry_core::TransformationConfig;
use netsentry_ml::data::drift::detect_drift;
use netsentry_ml::data::split::{stratified_split, train_size};
use netsentry_ml::data::transform::route_columns;
use netsentry_ml::data::{Dataset, FittedTransformer, Scalar, SchemaDefinition, validate_columns};
use std::collections::BTreeSet;

fn labelled(labels: &[u8]) -> Dataset {
    let rows = labels
        .iter()
        .enumerate()
        .map(|(i, label)| vec![Scalar::Number(i as f64), Scalar::Number(f64::from(*label))])
        .collect();
    Dataset::from_rows(vec!["id".into(), "Result".into()], rows).unwrap()
}

fn ids(ds: &Dataset) -> Vec<usize> {
    ds.numeric_column("id")
        .unwrap()
        .into_iter()
        .map(|v| v.unwrap() as usize)
        .collect()
}

fn count(ds: &Dataset, label: u8) -> usize {
    ds.numeric_column("Result")
        .unwrap()
        .into_iter()
        .filter(|v| *v == Some(f64::from(label)))
        .count()
}

fn columns(values: &[Vec<f64>]) -> Dataset {
    let names: Vec<String> = (0..values.len()).map(|i| format!("c{i}")).collect();
    let n = values.first().map_or(0, Vec::len);
    let rows = (0..n)
        .map(|r| values.iter().map(|col| Scalar::Number(col[r])).collect())
        .collect();
    Dataset::from_rows(names, rows).unwrap()
}

// --- Stratified split ---

proptest! {
    #[test]
    fn split_sizes_and_class_shares(
        labels in prop::collection::vec(0u8..3, 2..300),
        fraction in 0.05f64..0.95,
        seed in any::<u64>(),
    ) {
        let ds = labelled(&labels);
        let n = labels.len();
        let (train, test) = stratified_split(&ds, "Result", fraction, seed).unwrap();

        prop_assert_eq!(train.row_count(), train_size(n, fraction));
        prop_assert_eq!(train.row_count() + test.row_count(), n);

        let mut all: Vec<usize> = ids(&train);
        all.extend(ids(&test));
        all.sort_unstable();
        prop_assert_eq!(all, (0..n).collect::<Vec<_>>());

        let n_test = test.row_count() as f64;
        for label in 0u8..3 {
            let total = labels.iter().filter(|l| **l == label).count();
            let quota = total as f64 * n_test / n as f64;
            let got = count(&test, label) as f64;
            prop_assert!((got - quota).abs() < 1.0 + 1e-9, "label {} got {} quota {}", label, got, quota);
        }
    }

    #[test]
    fn split_is_deterministic_per_seed(
        labels in prop::collection::vec(0u8..2, 2..120),
        seed in any::<u64>(),
    ) {
        let ds = labelled(&labels);
        let (a_train, a_test) = stratified_split(&ds, "Result", 0.7, seed).unwrap();
        let (b_train, b_test) = stratified_split(&ds, "Result", 0.7, seed).unwrap();
        prop_assert_eq!(a_train, b_train);
        prop_assert_eq!(a_test, b_test);
    }
}

// --- Skew routing ---

proptest! {
    #[test]
    fn raising_threshold_never_grows_skewed_set(
        values in prop::collection::vec(prop::collection::vec(-1e3f64..1e3, 12), 1..5),
        low in 0.0f64..3.0,
        delta in 0.0f64..3.0,
    ) {
        let ds = columns(&values);
        let candidates = ds.columns().to_vec();
        let loose: BTreeSet<String> = route_columns(&ds, &candidates, low).skewed.into_iter().collect();
        let strict: BTreeSet<String> =
            route_columns(&ds, &candidates, low + delta).skewed.into_iter().collect();
        prop_assert!(strict.is_subset(&loose));
    }

    #[test]
    fn transform_is_bit_identical_on_repeat(
        values in prop::collection::vec(prop::collection::vec(0.0f64..1e4, 16), 1..4),
    ) {
        let mut ds = columns(&values);
        ds.add_column("Result", vec![Scalar::Number(1.0); 16]).unwrap();
        let transformer =
            FittedTransformer::fit(&ds, "Result", &TransformationConfig::default()).unwrap();
        let first = transformer.transform(&ds).unwrap();
        let second = transformer.transform(&ds).unwrap();
        prop_assert_eq!(first.dim(), second.dim());
        prop_assert!(first.iter().zip(second.iter()).all(|(a, b)| a.to_bits() == b.to_bits()));
    }
}

// --- Drift ---

proptest! {
    #[test]
    fn identical_datasets_never_drift(
        values in prop::collection::vec(prop::collection::vec(-50f64..50.0, 20), 1..4),
        threshold in 0.001f64..0.5,
    ) {
        let ds = columns(&values);
        let (ok, report) = detect_drift(&ds, &ds, threshold);
        prop_assert!(ok);
        prop_assert!(report.drifted_columns().is_empty());
    }

    #[test]
    fn far_shift_always_drifts(
        base in prop::collection::vec(0f64..1.0, 40..80),
    ) {
        let shifted: Vec<f64> = base.iter().map(|v| v + 1e6).collect();
        let (ok, report) = detect_drift(&columns(&[base]), &columns(&[shifted]), 0.05);
        prop_assert!(!ok);
        prop_assert_eq!(report.drifted_columns(), vec!["c0".to_string()]);
    }
}

// --- Structural validation ---

proptest! {
    #[test]
    fn validator_compares_column_count_only(
        width in 1usize..8,
        extra in 0usize..3,
    ) {
        let ds = columns(&vec![vec![0.0; 3]; width]);
        let body: String = (0..width + extra)
            .map(|i| format!("  - renamed_{i}: float64\n"))
            .collect();
        let schema = SchemaDefinition::from_yaml_str(&format!("columns:\n{body}")).unwrap();
        prop_assert_eq!(validate_columns(&ds, &schema), extra == 0);
    }
}
