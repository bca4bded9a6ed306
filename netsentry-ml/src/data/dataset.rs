//! In-memory tabular model shared by every stage.
//!
//! A [`Dataset`] is an ordered list of named columns and rows of [`Scalar`]
//! cells. Every row has exactly one cell per column; constructors reject
//! anything else, so downstream code can index rows by column position freely.

use crate::data::schema::{ColumnType, infer_column_type};
use crate::error::MlError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(f64),
    Text(String),
    Missing,
}

impl Scalar {
    /// Build a numeric cell; NaN becomes [`Scalar::Missing`].
    pub fn number(value: f64) -> Self {
        if value.is_nan() {
            Scalar::Missing
        } else {
            Scalar::Number(value)
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Scalar::Missing)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Parse a raw text field (CSV cell). Empty fields and `NaN` are missing,
    /// finite numbers are numeric, everything else is kept as text.
    pub fn parse(field: &str) -> Self {
        let trimmed = field.trim();
        if trimmed.is_empty() {
            return Scalar::Missing;
        }
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_nan() => Scalar::Missing,
            Ok(n) if n.is_finite() => Scalar::Number(n),
            _ => Scalar::Text(trimmed.to_string()),
        }
    }

    /// Convert a JSON document field into a cell.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Scalar::Missing,
            serde_json::Value::Bool(b) => Scalar::Number(if *b { 1.0 } else { 0.0 }),
            serde_json::Value::Number(n) => n.as_f64().map_or(Scalar::Missing, Scalar::number),
            serde_json::Value::String(s) => Scalar::Text(s.clone()),
            other => Scalar::Text(other.to_string()),
        }
    }

    /// Convert a cell into a JSON document field. Integral numbers are emitted
    /// as JSON integers.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Scalar::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => {
                serde_json::Value::from(*n as i64)
            }
            Scalar::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Scalar::Text(s) => serde_json::Value::String(s.clone()),
            Scalar::Missing => serde_json::Value::Null,
        }
    }

    /// Canonical string key for grouping (class labels, categories).
    /// Missing cells have no key.
    pub fn key(&self) -> Option<String> {
        match self {
            Scalar::Missing => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Number(n) => write!(f, "{n}"),
            Scalar::Text(s) => f.write_str(s),
            Scalar::Missing => Ok(()),
        }
    }
}

/// Tabular dataset: named columns plus rectangular rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<Scalar>>,
}

impl Dataset {
    /// Build a dataset, rejecting duplicate column names and ragged rows.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Scalar>>) -> Result<Self, MlError> {
        let mut seen = HashSet::new();
        for name in &columns {
            if !seen.insert(name.as_str()) {
                return Err(MlError::dataset(format!("Duplicate column '{name}'")));
            }
        }
        let mut dataset = Self {
            columns,
            rows: Vec::with_capacity(rows.len()),
        };
        for row in rows {
            dataset.push_row(row)?;
        }
        Ok(dataset)
    }

    pub fn empty(columns: Vec<String>) -> Result<Self, MlError> {
        Self::from_rows(columns, Vec::new())
    }

    pub fn push_row(&mut self, row: Vec<Scalar>) -> Result<(), MlError> {
        if row.len() != self.columns.len() {
            return Err(MlError::dataset(format!(
                "Row {} has {} cells, expected {}",
                self.rows.len(),
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Scalar>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Cells of one column in row order.
    pub fn column(&self, name: &str) -> Option<Vec<&Scalar>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    /// Numeric view of a column: `None` for missing (or non-numeric) cells.
    pub fn numeric_column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| row[idx].as_f64()).collect())
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        let idx = self.column_index(name)?;
        Some(infer_column_type(self.rows.iter().map(|row| &row[idx])))
    }

    pub fn missing_count(&self, name: &str) -> Option<usize> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().filter(|row| row[idx].is_missing()).count())
    }

    /// Remove a column. Returns `false` when it did not exist.
    pub fn drop_column(&mut self, name: &str) -> bool {
        let Some(idx) = self.column_index(name) else {
            return false;
        };
        self.columns.remove(idx);
        for row in &mut self.rows {
            row.remove(idx);
        }
        true
    }

    /// Append a column; `values` must have one cell per row.
    pub fn add_column(&mut self, name: &str, values: Vec<Scalar>) -> Result<(), MlError> {
        if self.has_column(name) {
            return Err(MlError::dataset(format!("Duplicate column '{name}'")));
        }
        if values.len() != self.rows.len() {
            return Err(MlError::dataset(format!(
                "Column '{name}' has {} values, expected {}",
                values.len(),
                self.rows.len()
            )));
        }
        self.columns.push(name.to_string());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
        Ok(())
    }

    /// New dataset holding the given rows, in the given order.
    pub fn select_rows(&self, indices: &[usize]) -> Dataset {
        Dataset {
            columns: self.columns.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }

    /// Keep only rows for which `keep` returns true.
    pub fn retain_rows(&mut self, mut keep: impl FnMut(&[Scalar]) -> bool) {
        self.rows.retain(|row| keep(row));
    }

    /// Rearrange columns into `order`, which must be a permutation of the
    /// current column names.
    pub fn reorder_columns(&self, order: &[String]) -> Result<Dataset, MlError> {
        if order.len() != self.columns.len() {
            return Err(MlError::dataset(format!(
                "Cannot reorder {} columns into {}",
                self.columns.len(),
                order.len()
            )));
        }
        let positions = order
            .iter()
            .map(|name| {
                self.column_index(name)
                    .ok_or_else(|| MlError::dataset(format!("Unknown column '{name}'")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let rows = self
            .rows
            .iter()
            .map(|row| positions.iter().map(|&p| row[p].clone()).collect())
            .collect();
        Dataset::from_rows(order.to_vec(), rows)
    }

    /// Replace text cells matching a placeholder token (case-insensitive,
    /// surrounding whitespace ignored) with [`Scalar::Missing`]. Returns the
    /// number of cells replaced.
    pub fn normalize_missing(&mut self, tokens: &[String]) -> usize {
        let tokens: HashSet<String> = tokens.iter().map(|t| t.trim().to_lowercase()).collect();
        let mut replaced = 0;
        for row in &mut self.rows {
            for cell in row.iter_mut() {
                let is_token = match cell {
                    Scalar::Text(s) => tokens.contains(&s.trim().to_lowercase()),
                    Scalar::Number(n) => n.is_nan(),
                    Scalar::Missing => false,
                };
                if is_token {
                    *cell = Scalar::Missing;
                    replaced += 1;
                }
            }
        }
        replaced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dataset {
        Dataset::from_rows(
            vec!["a".into(), "b".into(), "label".into()],
            vec![
                vec![Scalar::Number(1.0), Scalar::Text("tcp".into()), Scalar::Number(0.0)],
                vec![Scalar::Number(2.0), Scalar::Text("na".into()), Scalar::Number(1.0)],
                vec![Scalar::Missing, Scalar::Text("udp".into()), Scalar::Number(0.0)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_ragged_rows() {
        let result = Dataset::from_rows(
            vec!["a".into(), "b".into()],
            vec![vec![Scalar::Number(1.0)]],
        );
        assert!(matches!(result, Err(MlError::Dataset(_))));
    }

    #[test]
    fn test_rejects_duplicate_columns() {
        let result = Dataset::empty(vec!["a".into(), "a".into()]);
        assert!(result.is_err());
    }

    #[test]
    fn test_scalar_parse() {
        assert_eq!(Scalar::parse("3.5"), Scalar::Number(3.5));
        assert_eq!(Scalar::parse(" -1 "), Scalar::Number(-1.0));
        assert_eq!(Scalar::parse(""), Scalar::Missing);
        assert_eq!(Scalar::parse("NaN"), Scalar::Missing);
        assert_eq!(Scalar::parse("tcp"), Scalar::Text("tcp".into()));
        assert_eq!(Scalar::parse("inf"), Scalar::Text("inf".into()));
    }

    #[test]
    fn test_scalar_json_conversion() {
        assert_eq!(Scalar::from_json(&serde_json::json!(null)), Scalar::Missing);
        assert_eq!(Scalar::from_json(&serde_json::json!(true)), Scalar::Number(1.0));
        assert_eq!(Scalar::from_json(&serde_json::json!(-1)), Scalar::Number(-1.0));
        assert_eq!(Scalar::Number(1.0).to_json(), serde_json::json!(1));
        assert_eq!(Scalar::Number(0.25).to_json(), serde_json::json!(0.25));
        assert_eq!(Scalar::Missing.to_json(), serde_json::Value::Null);
    }

    #[test]
    fn test_scalar_key() {
        assert_eq!(Scalar::Number(1.0).key().as_deref(), Some("1"));
        assert_eq!(Scalar::Number(-0.5).key().as_deref(), Some("-0.5"));
        assert_eq!(Scalar::Text("x".into()).key().as_deref(), Some("x"));
        assert_eq!(Scalar::Missing.key(), None);
    }

    #[test]
    fn test_normalize_missing() {
        let mut ds = sample();
        let tokens = vec!["NA".to_string(), "?".to_string()];
        assert_eq!(ds.normalize_missing(&tokens), 1);
        assert_eq!(ds.missing_count("b"), Some(1));
        assert_eq!(ds.missing_count("a"), Some(1));
    }

    #[test]
    fn test_drop_and_add_column() {
        let mut ds = sample();
        assert!(ds.drop_column("b"));
        assert!(!ds.drop_column("b"));
        assert_eq!(ds.columns(), ["a", "label"]);
        assert!(ds.rows().iter().all(|r| r.len() == 2));

        ds.add_column("source", vec![Scalar::Text("train".into()); 3])
            .unwrap();
        assert_eq!(ds.column_count(), 3);
        assert!(ds.add_column("short", vec![Scalar::Missing]).is_err());
    }

    #[test]
    fn test_select_and_reorder() {
        let ds = sample();
        let picked = ds.select_rows(&[2, 0]);
        assert_eq!(picked.row_count(), 2);
        assert_eq!(picked.rows()[0][0], Scalar::Missing);

        let order = vec!["label".to_string(), "a".to_string(), "b".to_string()];
        let reordered = ds.reorder_columns(&order).unwrap();
        assert_eq!(reordered.columns(), order.as_slice());
        assert_eq!(reordered.rows()[1][0], Scalar::Number(1.0));
    }

    #[test]
    fn test_column_type_inference() {
        let ds = sample();
        assert_eq!(ds.column_type("a"), Some(ColumnType::Integer));
        assert_eq!(ds.column_type("b"), Some(ColumnType::String));
        assert_eq!(ds.column_type("missing"), None);
    }
}
