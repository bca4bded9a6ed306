//! Feature transforms fitted on the training split.
//!
//! Numeric feature columns are routed by sample skewness:
//!
//! - **skewed** (`|skew| > threshold`): mean imputation, Yeo-Johnson power
//!   transform, standardization
//! - **regular**: mean imputation, standardization
//!
//! Every parameter (imputation means, power λ, centers and scales) is learned
//! from the training split and stored in a [`FittedTransformer`], which applies
//! them unchanged to any other split.

use crate::data::dataset::{Dataset, Scalar};
use crate::data::schema::ColumnType;
use crate::error::MlError;
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use netsentry_core::TransformationConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Bumped whenever the persisted transformer layout changes.
pub const TRANSFORMER_FORMAT_VERSION: u32 = 1;

/// Processing route of a numeric feature column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Skewed,
    Regular,
}

/// Result of routing the candidate feature columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnRoute {
    pub skewed: Vec<String>,
    pub regular: Vec<String>,
    /// Numeric candidates with no present value in the training split.
    pub dropped: Vec<String>,
}

impl ColumnRoute {
    pub fn is_empty(&self) -> bool {
        self.skewed.is_empty() && self.regular.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Adjusted Fisher-Pearson sample skewness (G1).
/// Fewer than three values or zero variance gives `0.0`.
pub fn skewness(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 3 {
        return 0.0;
    }
    let nf = n as f64;
    let mean = values.iter().sum::<f64>() / nf;
    let (m2, m3) = values.iter().fold((0.0, 0.0), |(m2, m3), &x| {
        let d = x - mean;
        (m2 + d * d, m3 + d * d * d)
    });
    let (m2, m3) = (m2 / nf, m3 / nf);
    // Relative tolerance: constant columns leave rounding noise in m2.
    if m2 <= f64::EPSILON * mean.abs().max(1.0).powi(2) {
        return 0.0;
    }
    let g1 = m3 / m2.powf(1.5);
    g1 * (nf * (nf - 1.0)).sqrt() / (nf - 2.0)
}

/// Split numeric candidate columns into skewed and regular routes using their
/// present training values. Strictly greater than `threshold` is skewed; ties
/// go to the regular route. Both routes keep dataset column order.
pub fn route_columns(train: &Dataset, candidates: &[String], threshold: f64) -> ColumnRoute {
    let mut route = ColumnRoute::default();
    for name in train.columns().iter().filter(|c| candidates.contains(*c)) {
        let present: Vec<f64> = train
            .numeric_column(name)
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .collect();
        if present.is_empty() {
            tracing::warn!(column = %name, "Column has no values in the training split; dropping");
            route.dropped.push(name.clone());
            continue;
        }
        let skew = skewness(&present);
        if skew.abs() > threshold {
            route.skewed.push(name.clone());
        } else {
            route.regular.push(name.clone());
        }
        tracing::debug!(column = %name, skew, "Routed column");
    }
    route
}

fn population_stats(values: &[f64]) -> (f64, f64) {
    let column = Array1::from(values.to_vec());
    let mean = column.mean().unwrap_or(0.0);
    let var = if values.is_empty() { 0.0 } else { column.var(0.0) };
    (mean, var)
}

// ---------------------------------------------------------------------------
// Yeo-Johnson
// ---------------------------------------------------------------------------

/// Yeo-Johnson transform of a single value.
pub fn yeo_johnson(x: f64, lambda: f64) -> f64 {
    const EPS: f64 = 1e-12;
    if x >= 0.0 {
        if lambda.abs() < EPS {
            x.ln_1p()
        } else {
            ((x + 1.0).powf(lambda) - 1.0) / lambda
        }
    } else if (lambda - 2.0).abs() < EPS {
        -(-x).ln_1p()
    } else {
        -((1.0 - x).powf(2.0 - lambda) - 1.0) / (2.0 - lambda)
    }
}

fn yeo_johnson_log_likelihood(values: &[f64], lambda: f64, log_term: f64) -> f64 {
    let transformed: Vec<f64> = values.iter().map(|&x| yeo_johnson(x, lambda)).collect();
    let (_, var) = population_stats(&transformed);
    if !(var.is_finite() && var > 0.0) {
        return f64::NEG_INFINITY;
    }
    -(values.len() as f64) / 2.0 * var.ln() + (lambda - 1.0) * log_term
}

/// Maximum-likelihood λ on `[-2, 2]`: a 0.1-step grid search followed by
/// golden-section refinement around the best grid point. Degenerate input
/// (constant or empty) gives λ = 1, the identity.
pub fn fit_yeo_johnson_lambda(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 1.0;
    }
    let log_term: f64 = values.iter().map(|x| x.signum() * x.abs().ln_1p()).sum();
    let llf = |lambda: f64| yeo_johnson_log_likelihood(values, lambda, log_term);

    let mut best = (1.0, f64::NEG_INFINITY);
    for step in 0..=40 {
        let lambda = -2.0 + 0.1 * step as f64;
        let ll = llf(lambda);
        if ll > best.1 {
            best = (lambda, ll);
        }
    }
    if best.1 == f64::NEG_INFINITY {
        return 1.0;
    }

    const INV_PHI: f64 = 0.618_033_988_749_895;
    let (mut lo, mut hi) = ((best.0 - 0.1).max(-2.0), (best.0 + 0.1).min(2.0));
    let mut c = hi - INV_PHI * (hi - lo);
    let mut d = lo + INV_PHI * (hi - lo);
    let (mut fc, mut fd) = (llf(c), llf(d));
    for _ in 0..60 {
        if fc > fd {
            hi = d;
            d = c;
            fd = fc;
            c = hi - INV_PHI * (hi - lo);
            fc = llf(c);
        } else {
            lo = c;
            c = d;
            fc = fd;
            d = lo + INV_PHI * (hi - lo);
            fd = llf(d);
        }
    }
    let refined = (lo + hi) / 2.0;
    if llf(refined) >= best.1 {
        refined
    } else {
        best.0
    }
}

// ---------------------------------------------------------------------------
// Per-column transform
// ---------------------------------------------------------------------------

/// Fitted parameters for one output column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnTransform {
    pub column: String,
    pub route: Route,
    /// Training mean used for missing cells.
    pub impute_value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_lambda: Option<f64>,
    pub center: f64,
    pub scale: f64,
    /// Training skewness that decided the route.
    pub skewness: f64,
}

impl ColumnTransform {
    pub fn fit(column: &str, route: Route, values: &[Option<f64>]) -> Self {
        let present: Vec<f64> = values.iter().flatten().copied().collect();
        let (impute_value, _) = population_stats(&present);
        let imputed: Vec<f64> = values.iter().map(|v| v.unwrap_or(impute_value)).collect();

        let power_lambda = match route {
            Route::Skewed => Some(fit_yeo_johnson_lambda(&imputed)),
            Route::Regular => None,
        };
        let powered: Vec<f64> = match power_lambda {
            Some(lambda) => imputed.iter().map(|&x| yeo_johnson(x, lambda)).collect(),
            None => imputed,
        };
        let (center, var) = population_stats(&powered);
        let std = var.sqrt();
        let scale = if std.is_finite() && std > 0.0 { std } else { 1.0 };

        Self {
            column: column.to_string(),
            route,
            impute_value,
            power_lambda,
            center,
            scale,
            skewness: skewness(&present),
        }
    }

    pub fn apply(&self, value: Option<f64>) -> f64 {
        let x = value.unwrap_or(self.impute_value);
        let x = match self.power_lambda {
            Some(lambda) => yeo_johnson(x, lambda),
            None => x,
        };
        (x - self.center) / self.scale
    }
}

// ---------------------------------------------------------------------------
// FittedTransformer
// ---------------------------------------------------------------------------

/// Feature transformer fitted on a training split.
///
/// Output columns are the skewed route followed by the regular route, each
/// in training column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedTransformer {
    pub format_version: u32,
    pub target_column: String,
    pub skew_threshold: f64,
    pub columns: Vec<ColumnTransform>,
    /// Numeric candidates with no training values, excluded from the output.
    #[serde(default)]
    pub dropped_columns: Vec<String>,
    /// Non-numeric feature columns, excluded from the output.
    #[serde(default)]
    pub categorical_columns: Vec<String>,
    pub fitted_at: DateTime<Utc>,
}

impl FittedTransformer {
    /// Fit on `train`. Every column other than `target` and the configured
    /// label columns is a feature candidate.
    pub fn fit(
        train: &Dataset,
        target: &str,
        config: &TransformationConfig,
    ) -> Result<Self, MlError> {
        let mut numeric = Vec::new();
        let mut categorical = Vec::new();
        for name in train.columns() {
            if name == target || config.label_columns.contains(name) {
                continue;
            }
            match train.column_type(name) {
                Some(ColumnType::String) => categorical.push(name.clone()),
                _ => numeric.push(name.clone()),
            }
        }
        if !categorical.is_empty() {
            tracing::info!(columns = ?categorical, "Excluding non-numeric feature columns");
        }

        let route = route_columns(train, &numeric, config.skew_threshold);
        if route.is_empty() {
            return Err(MlError::EmptyFeatureSet);
        }

        let mut columns = Vec::with_capacity(route.skewed.len() + route.regular.len());
        for (names, kind) in [(&route.skewed, Route::Skewed), (&route.regular, Route::Regular)] {
            for name in names {
                let values = train.numeric_column(name).unwrap_or_default();
                columns.push(ColumnTransform::fit(name, kind, &values));
            }
        }
        tracing::info!(
            skewed = route.skewed.len(),
            regular = route.regular.len(),
            dropped = route.dropped.len(),
            "Transformer fitted"
        );

        Ok(Self {
            format_version: TRANSFORMER_FORMAT_VERSION,
            target_column: target.to_string(),
            skew_threshold: config.skew_threshold,
            columns,
            dropped_columns: route.dropped,
            categorical_columns: categorical,
            fitted_at: Utc::now(),
        })
    }

    pub fn feature_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.column.as_str()).collect()
    }

    pub fn route(&self) -> ColumnRoute {
        let names = |kind: Route| {
            self.columns
                .iter()
                .filter(|c| c.route == kind)
                .map(|c| c.column.clone())
                .collect()
        };
        ColumnRoute {
            skewed: names(Route::Skewed),
            regular: names(Route::Regular),
            dropped: self.dropped_columns.clone(),
        }
    }

    /// Apply the fitted parameters to `dataset`, returning one row per input
    /// row and one column per fitted feature.
    pub fn transform(&self, dataset: &Dataset) -> Result<Array2<f64>, MlError> {
        let positions = self
            .columns
            .iter()
            .map(|c| {
                dataset.column_index(&c.column).ok_or_else(|| {
                    MlError::invalid_input(format!(
                        "Transform input is missing column '{}'",
                        c.column
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Array2::<f64>::zeros((dataset.row_count(), self.columns.len()));
        for (r, row) in dataset.rows().iter().enumerate() {
            for (k, (transform, &idx)) in self.columns.iter().zip(&positions).enumerate() {
                let value = match &row[idx] {
                    Scalar::Number(n) => Some(*n),
                    Scalar::Missing => None,
                    Scalar::Text(text) => {
                        return Err(MlError::invalid_input(format!(
                            "Column '{}' row {r} holds non-numeric value '{text}'",
                            transform.column
                        )));
                    }
                };
                out[[r, k]] = transform.apply(value);
            }
        }
        Ok(out)
    }

    pub fn save(&self, path: &Path) -> Result<(), MlError> {
        netsentry_core::atomic_write_json(path, self).map_err(|e| MlError::persistence(path, e))
    }

    pub fn load(path: &Path) -> Result<Self, MlError> {
        let content = std::fs::read_to_string(path)?;
        let transformer: Self = serde_json::from_str(&content)?;
        if transformer.format_version != TRANSFORMER_FORMAT_VERSION {
            return Err(MlError::invalid_input(format!(
                "Unsupported transformer format version {} (expected {TRANSFORMER_FORMAT_VERSION})",
                transformer.format_version
            )));
        }
        Ok(transformer)
    }
}
