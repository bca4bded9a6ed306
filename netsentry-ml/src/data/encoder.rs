//! Label encoding for the target column.

use crate::data::dataset::Scalar;
use crate::error::MlError;
use netsentry_core::UnseenLabelPolicy;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;

/// Maps class labels to contiguous indices `0..k`.
///
/// Classes are sorted: numerically when every label is a number, otherwise
/// lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEncoder {
    pub column: String,
    pub classes: Vec<String>,
}

/// Encoded labels for the rows that survived the unseen-label policy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodedLabels {
    /// Input row positions, ascending.
    pub rows: Vec<usize>,
    /// Class index per kept row.
    pub codes: Vec<f64>,
    /// Count of labels not in the fitted classes.
    pub unseen: usize,
}

impl LabelEncoder {
    pub fn fit<'a>(
        column: &str,
        labels: impl IntoIterator<Item = &'a Scalar>,
    ) -> Result<Self, MlError> {
        let mut classes = Vec::new();
        for label in labels {
            let key = label.key().ok_or_else(|| {
                MlError::invalid_input(format!(
                    "Target column '{column}' has missing values in the training split"
                ))
            })?;
            classes.push(key);
        }
        if classes.is_empty() {
            return Err(MlError::invalid_input(format!(
                "Target column '{column}' has no labels to fit"
            )));
        }

        if classes.iter().all(|c| c.parse::<f64>().is_ok()) {
            classes.sort_by(|a, b| match (a.parse::<f64>(), b.parse::<f64>()) {
                (Ok(x), Ok(y)) => x.total_cmp(&y),
                _ => Ordering::Equal,
            });
        } else {
            classes.sort();
        }
        classes.dedup();

        Ok(Self {
            column: column.to_string(),
            classes,
        })
    }

    pub fn index_of(&self, label: &Scalar) -> Option<usize> {
        let key = label.key()?;
        self.classes.iter().position(|c| *c == key)
    }

    pub fn decode(&self, index: usize) -> Option<&str> {
        self.classes.get(index).map(String::as_str)
    }

    /// Encode labels, applying `policy` to labels the encoder never saw.
    /// Missing labels count as unseen.
    pub fn encode<'a>(
        &self,
        labels: impl IntoIterator<Item = &'a Scalar>,
        policy: UnseenLabelPolicy,
    ) -> Result<EncodedLabels, MlError> {
        let mut encoded = EncodedLabels::default();
        for (row, label) in labels.into_iter().enumerate() {
            let code = match self.index_of(label) {
                Some(index) => index,
                None => {
                    encoded.unseen += 1;
                    match policy {
                        UnseenLabelPolicy::Abort => {
                            return Err(MlError::UnseenLabel {
                                label: label.key().unwrap_or_else(|| "<missing>".to_string()),
                            });
                        }
                        UnseenLabelPolicy::DropRow => continue,
                        UnseenLabelPolicy::Unknown => self.classes.len(),
                    }
                }
            };
            encoded.rows.push(row);
            encoded.codes.push(code as f64);
        }
        if encoded.unseen > 0 {
            tracing::warn!(
                column = %self.column,
                unseen = encoded.unseen,
                ?policy,
                "Labels outside the fitted classes"
            );
        }
        Ok(encoded)
    }

    pub fn save(&self, path: &Path) -> Result<(), MlError> {
        netsentry_core::atomic_write_json(path, self).map_err(|e| MlError::persistence(path, e))
    }

    pub fn load(path: &Path) -> Result<Self, MlError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
