//! Structural checks of a dataset against its declared schema.

use crate::data::dataset::Dataset;
use crate::data::schema::SchemaDefinition;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// `true` when the dataset has exactly as many columns as the schema
/// declares. Names and types are deliberately not compared; see
/// [`check_column_names`] for the stricter check.
pub fn validate_columns(dataset: &Dataset, schema: &SchemaDefinition) -> bool {
    let ok = dataset.column_count() == schema.len();
    tracing::debug!(
        required = schema.len(),
        present = dataset.column_count(),
        ok,
        "Column count check"
    );
    ok
}

/// Name-level comparison between a dataset and a schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnNameCheck {
    /// Declared in the schema, absent from the dataset.
    pub missing: Vec<String>,
    /// Present in the dataset, not declared in the schema.
    pub unexpected: Vec<String>,
}

impl ColumnNameCheck {
    pub fn is_match(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}

impl std::fmt::Display for ColumnNameCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "missing columns {:?}, unexpected columns {:?}",
            self.missing, self.unexpected
        )
    }
}

pub fn check_column_names(dataset: &Dataset, schema: &SchemaDefinition) -> ColumnNameCheck {
    let present: HashSet<&str> = dataset.columns().iter().map(String::as_str).collect();
    let declared: HashSet<&str> = schema.names().collect();
    ColumnNameCheck {
        missing: schema
            .names()
            .filter(|name| !present.contains(name))
            .map(str::to_string)
            .collect(),
        unexpected: dataset
            .columns()
            .iter()
            .filter(|name| !declared.contains(name.as_str()))
            .cloned()
            .collect(),
    }
}

/// Fraction of missing cells per column, in column order.
pub fn missing_ratios(dataset: &Dataset) -> Vec<(String, f64)> {
    let rows = dataset.row_count().max(1) as f64;
    dataset
        .columns()
        .iter()
        .map(|name| {
            let missing = dataset.missing_count(name).unwrap_or(0);
            (name.clone(), missing as f64 / rows)
        })
        .collect()
}
