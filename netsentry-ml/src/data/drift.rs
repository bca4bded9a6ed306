//! Per-column distribution drift between a base and a current dataset.
//!
//! Numeric columns are compared with the two-sample Kolmogorov-Smirnov test,
//! categorical columns with a chi-square test of homogeneity. A column is
//! flagged when its p-value falls below the threshold; the overall verdict
//! passes only when no column is flagged. Columns with no usable values on
//! either side are reported as `insufficient_data` and never flagged.

use crate::data::dataset::{Dataset, Scalar};
use crate::error::MlError;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Statistical test applied to a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftTest {
    KolmogorovSmirnov,
    ChiSquare,
    /// No test could be run.
    Skipped,
}

/// Outcome for one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDrift {
    pub test: DriftTest,
    #[serde(default)]
    pub statistic: Option<f64>,
    #[serde(default)]
    pub p_value: Option<f64>,
    pub drift_detected: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub insufficient_data: bool,
}

impl ColumnDrift {
    fn tested(test: DriftTest, statistic: f64, p_value: f64, threshold: f64) -> Self {
        Self {
            test,
            statistic: Some(statistic),
            p_value: Some(p_value),
            drift_detected: p_value < threshold,
            insufficient_data: false,
        }
    }

    fn insufficient() -> Self {
        Self {
            test: DriftTest::Skipped,
            statistic: None,
            p_value: None,
            drift_detected: false,
            insufficient_data: true,
        }
    }
}

/// Column results in base-dataset column order. Serializes as a mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriftColumns(pub Vec<(String, ColumnDrift)>);

impl Serialize for DriftColumns {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (column, result) in &self.0 {
            map.serialize_entry(column, result)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for DriftColumns {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ColumnsVisitor;

        impl<'de> Visitor<'de> for ColumnsVisitor {
            type Value = DriftColumns;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of column name to drift result")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((column, result)) = access.next_entry::<String, ColumnDrift>()? {
                    entries.push((column, result));
                }
                Ok(DriftColumns(entries))
            }
        }

        deserializer.deserialize_map(ColumnsVisitor)
    }
}

/// Drift report persisted by the validation stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub threshold: f64,
    pub columns: DriftColumns,
}

impl DriftReport {
    /// `true` when no column was flagged.
    pub fn overall_ok(&self) -> bool {
        self.columns.0.iter().all(|(_, r)| !r.drift_detected)
    }

    pub fn drifted_columns(&self) -> Vec<String> {
        self.columns
            .0
            .iter()
            .filter(|(_, r)| r.drift_detected)
            .map(|(c, _)| c.clone())
            .collect()
    }

    pub fn get(&self, column: &str) -> Option<&ColumnDrift> {
        self.columns
            .0
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, r)| r)
    }

    pub fn len(&self) -> usize {
        self.columns.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.0.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<(), MlError> {
        netsentry_core::atomic_write_yaml(path, self).map_err(|e| MlError::persistence(path, e))
    }

    pub fn load(path: &Path) -> Result<Self, MlError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }
}

/// Compare every column of `base` with the same-named column of `current`.
/// Returns the overall verdict and the per-column report.
pub fn detect_drift(base: &Dataset, current: &Dataset, threshold: f64) -> (bool, DriftReport) {
    let mut columns = Vec::with_capacity(base.column_count());
    for name in base.columns() {
        let result = match (base.column(name), current.column(name)) {
            (Some(a), Some(b)) => compare_column(&a, &b, threshold),
            _ => ColumnDrift::insufficient(),
        };
        if result.insufficient_data {
            tracing::warn!(column = %name, "Not enough data for a drift test");
        } else if result.drift_detected {
            tracing::warn!(
                column = %name,
                p_value = result.p_value.unwrap_or_default(),
                "Drift detected"
            );
        }
        columns.push((name.clone(), result));
    }
    let report = DriftReport {
        threshold,
        columns: DriftColumns(columns),
    };
    (report.overall_ok(), report)
}

fn compare_column(base: &[&Scalar], current: &[&Scalar], threshold: f64) -> ColumnDrift {
    let present = |values: &[&Scalar]| -> Vec<Scalar> {
        values
            .iter()
            .filter(|v| !v.is_missing())
            .map(|v| (*v).clone())
            .collect()
    };
    let (a, b) = (present(base), present(current));
    if a.is_empty() || b.is_empty() {
        return ColumnDrift::insufficient();
    }

    let numeric = |values: &[Scalar]| values.iter().map(Scalar::as_f64).collect::<Option<Vec<_>>>();
    match (numeric(&a), numeric(&b)) {
        (Some(x), Some(y)) => {
            let (statistic, p_value) = ks_two_sample(&x, &y);
            ColumnDrift::tested(DriftTest::KolmogorovSmirnov, statistic, p_value, threshold)
        }
        _ => {
            let keys = |values: &[Scalar]| values.iter().filter_map(Scalar::key).collect::<Vec<_>>();
            let (statistic, p_value) = chi_square_homogeneity(&keys(&a), &keys(&b));
            ColumnDrift::tested(DriftTest::ChiSquare, statistic, p_value, threshold)
        }
    }
}

// ---------------------------------------------------------------------------
// Kolmogorov-Smirnov
// ---------------------------------------------------------------------------

/// Two-sample KS statistic `D` and its asymptotic p-value.
pub fn ks_two_sample(a: &[f64], b: &[f64]) -> (f64, f64) {
    if a.is_empty() || b.is_empty() {
        return (0.0, 1.0);
    }
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort_by(f64::total_cmp);
    b.sort_by(f64::total_cmp);

    let (n1, n2) = (a.len() as f64, b.len() as f64);
    let (mut i, mut j) = (0, 0);
    let mut d: f64 = 0.0;
    while i < a.len() && j < b.len() {
        let x = a[i].min(b[j]);
        while i < a.len() && a[i] <= x {
            i += 1;
        }
        while j < b.len() && b[j] <= x {
            j += 1;
        }
        d = d.max((i as f64 / n1 - j as f64 / n2).abs());
    }

    let en = (n1 * n2 / (n1 + n2)).sqrt();
    let p = kolmogorov_q((en + 0.12 + 0.11 / en) * d);
    (d, p)
}

/// Complementary Kolmogorov distribution `Q_KS(λ) = 2 Σ (-1)^(k-1) e^(-2k²λ²)`.
fn kolmogorov_q(lambda: f64) -> f64 {
    let a2 = -2.0 * lambda * lambda;
    let mut fac = 2.0;
    let mut sum = 0.0;
    let mut previous: f64 = 0.0;
    for k in 1..=100 {
        let k = k as f64;
        let term = fac * (a2 * k * k).exp();
        sum += term;
        if term.abs() <= 0.001 * previous || term.abs() <= 1.0e-8 * sum {
            return sum.clamp(0.0, 1.0);
        }
        fac = -fac;
        previous = term.abs();
    }
    // Series does not converge for small λ: the samples are indistinguishable.
    1.0
}

// ---------------------------------------------------------------------------
// Chi-square homogeneity
// ---------------------------------------------------------------------------

/// Chi-square statistic and p-value for the 2×k contingency table of category
/// counts. Fewer than two categories overall gives `(0, 1)`.
pub fn chi_square_homogeneity(a: &[String], b: &[String]) -> (f64, f64) {
    let mut table: BTreeMap<&str, (f64, f64)> = BTreeMap::new();
    for key in a {
        table.entry(key.as_str()).or_default().0 += 1.0;
    }
    for key in b {
        table.entry(key.as_str()).or_default().1 += 1.0;
    }
    if table.len() < 2 || a.is_empty() || b.is_empty() {
        return (0.0, 1.0);
    }

    let (n_a, n_b) = (a.len() as f64, b.len() as f64);
    let total = n_a + n_b;
    let mut statistic = 0.0;
    for (count_a, count_b) in table.values() {
        let category_total = count_a + count_b;
        let expected_a = n_a * category_total / total;
        let expected_b = n_b * category_total / total;
        statistic += (count_a - expected_a).powi(2) / expected_a;
        statistic += (count_b - expected_b).powi(2) / expected_b;
    }

    let dof = (table.len() - 1) as f64;
    let p_value = ChiSquared::new(dof)
        .map(|dist| dist.sf(statistic))
        .unwrap_or(1.0);
    (statistic, p_value.clamp(0.0, 1.0))
}
