//! Feature scaling fitted on the training partition only.
//!
//! Standard, min-max and robust scalers. Statistics come exclusively from
//! the training rows and are then applied to both partitions, so no
//! test-set information leaks into the fit.

use clap::ValueEnum;
use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScalingMethod {
    /// Center to zero mean, scale to unit variance.
    Standard,
    /// Rescale each feature to [0, 1].
    MinMax,
    /// Center on the median, scale by the interquartile range.
    Robust,
}

impl std::fmt::Display for ScalingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalingMethod::Standard => write!(f, "standard"),
            ScalingMethod::MinMax => write!(f, "min-max"),
            ScalingMethod::Robust => write!(f, "robust"),
        }
    }
}

/// Per-column affine transform `(x - offset) / scale`.
#[derive(Debug, Clone)]
pub struct Scaler {
    offset: Array1<f64>,
    scale: Array1<f64>,
}

impl Scaler {
    /// Fit the chosen scaler on the training rows.
    pub fn fit(method: ScalingMethod, x_train: ArrayView2<f64>) -> Self {
        let d = x_train.ncols();
        let mut offset = Array1::zeros(d);
        let mut scale = Array1::ones(d);

        for (j, column) in x_train.columns().into_iter().enumerate() {
            let values: Vec<f64> = column.iter().copied().collect();
            let (o, s) = match method {
                ScalingMethod::Standard => crate::metrics::mean_std(&values),
                ScalingMethod::MinMax => {
                    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
                    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                    (min, max - min)
                }
                ScalingMethod::Robust => {
                    let mut sorted = values.clone();
                    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                    let median = percentile(&sorted, 0.5);
                    let iqr = percentile(&sorted, 0.75) - percentile(&sorted, 0.25);
                    (median, iqr)
                }
            };
            offset[j] = o;
            // Constant columns pass through unscaled.
            scale[j] = if s.abs() < f64::EPSILON { 1.0 } else { s };
        }

        Self { offset, scale }
    }

    /// Apply the fitted transform to any partition.
    pub fn transform(&self, x: ArrayView2<f64>) -> Array2<f64> {
        let mut out = x.to_owned();
        for mut row in out.rows_mut() {
            row -= &self.offset;
            row /= &self.scale;
        }
        out
    }
}

/// Linear-interpolated percentile of pre-sorted values, `q` in [0, 1].
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
    }
}
