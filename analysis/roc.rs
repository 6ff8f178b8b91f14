//! ROC curves and their aggregation across cross-validation folds.
//!
//! A fold's ROC curve is computed over all distinct score thresholds in
//! descending order, with fixed endpoints (0,0) and (1,1), and its AUC by the
//! trapezoidal rule over that raw curve. For aggregation each fold's TPR is
//! interpolated onto a shared 100-point FPR grid; the aggregate carries the
//! point-wise mean and population standard deviation of the interpolated
//! curves.
//!
//! Two "mean AUC" notions exist and are deliberately kept apart:
//! [`AggregateRoc::mean_auc`] is the arithmetic mean of the per-fold AUCs
//! (the reported statistic), while [`AggregateRoc::mean_curve_auc`] is the
//! AUC of the mean interpolated curve (used only to annotate figures). The
//! two are not mathematically equal.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics::mean_std;

/// Number of points in the shared FPR grid.
pub const FPR_GRID_POINTS: usize = 100;

#[derive(Error, Debug)]
pub enum RocError {
    #[error("labels length {labels} != scores length {scores}")]
    LengthMismatch { labels: usize, scores: usize },
    #[error("cannot compute a ROC curve from an empty test set")]
    Empty,
    #[error("test set contains a single class; ROC is undefined")]
    SingleClass,
}

/// ROC curve over the distinct thresholds of one fold's test scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocCurve {
    /// False positive rates, non-decreasing, starting at 0.0.
    pub fpr: Vec<f64>,
    /// True positive rates, parallel to `fpr`.
    pub tpr: Vec<f64>,
    /// Score threshold producing each point; the leading sentinel is +inf.
    pub thresholds: Vec<f64>,
    /// Trapezoidal AUC over the raw curve.
    pub auc: f64,
}

/// Compute the ROC curve for binary labels (positive = 1) and positive-class
/// scores.
///
/// Samples are walked in descending score order; ties collapse into a single
/// threshold point, so the curve is invariant to duplicate thresholds.
pub fn roc_curve(labels: &[usize], scores: &[f64]) -> Result<RocCurve, RocError> {
    if labels.len() != scores.len() {
        return Err(RocError::LengthMismatch {
            labels: labels.len(),
            scores: scores.len(),
        });
    }
    if labels.is_empty() {
        return Err(RocError::Empty);
    }
    let total_pos = labels.iter().filter(|&&l| l == 1).count();
    let total_neg = labels.len() - total_pos;
    if total_pos == 0 || total_neg == 0 {
        return Err(RocError::SingleClass);
    }

    // Descending score; ties put negatives first so the curve is pessimistic.
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| (labels[a] == 1).cmp(&(labels[b] == 1)))
    });

    let p = total_pos as f64;
    let n = total_neg as f64;

    let mut fpr = vec![0.0];
    let mut tpr = vec![0.0];
    let mut thresholds = vec![f64::INFINITY];

    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut i = 0;
    while i < order.len() {
        let current = scores[order[i]];
        while i < order.len() && scores[order[i]] == current {
            if labels[order[i]] == 1 {
                tp += 1;
            } else {
                fp += 1;
            }
            i += 1;
        }
        fpr.push(fp as f64 / n);
        tpr.push(tp as f64 / p);
        thresholds.push(current);
    }

    let auc = trapezoid_auc(&fpr, &tpr);
    Ok(RocCurve {
        fpr,
        tpr,
        thresholds,
        auc,
    })
}

/// Trapezoidal integral of `y` over a non-decreasing `x`.
pub fn trapezoid_auc(x: &[f64], y: &[f64]) -> f64 {
    debug_assert_eq!(x.len(), y.len());
    let mut area = 0.0;
    for w in 0..x.len().saturating_sub(1) {
        area += (x[w + 1] - x[w]) * (y[w] + y[w + 1]) / 2.0;
    }
    area
}

/// The shared 100-point FPR grid, linearly spaced over [0, 1].
pub fn fpr_grid() -> Vec<f64> {
    (0..FPR_GRID_POINTS)
        .map(|i| i as f64 / (FPR_GRID_POINTS - 1) as f64)
        .collect()
}

/// Piecewise-linear interpolation of `(xs, ys)` at `grid` points.
///
/// Values clamp to the endpoints outside the data range, and at duplicated
/// `xs` (vertical ROC steps) the upper point wins.
pub fn interp(grid: &[f64], xs: &[f64], ys: &[f64]) -> Vec<f64> {
    debug_assert_eq!(xs.len(), ys.len());
    debug_assert!(!xs.is_empty());

    grid.iter()
        .map(|&g| {
            if g <= xs[0] {
                return ys[0];
            }
            if g >= xs[xs.len() - 1] {
                return ys[ys.len() - 1];
            }
            // First index with xs[j] >= g; duplicates resolved to the last.
            let mut j = xs.partition_point(|&x| x < g);
            if xs[j] == g {
                while j + 1 < xs.len() && xs[j + 1] == g {
                    j += 1;
                }
                return ys[j];
            }
            let (x0, x1) = (xs[j - 1], xs[j]);
            let (y0, y1) = (ys[j - 1], ys[j]);
            y0 + (y1 - y0) * (g - x0) / (x1 - x0)
        })
        .collect()
}

/// Aggregate statistics of the interpolated per-fold ROC curves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateRoc {
    /// The shared FPR grid.
    pub grid: Vec<f64>,
    /// Point-wise mean TPR; the final point is pinned to 1.0.
    pub mean_tpr: Vec<f64>,
    /// Point-wise population standard deviation of TPR.
    pub std_tpr: Vec<f64>,
    /// Arithmetic mean of the per-fold AUCs. The reported statistic.
    pub mean_auc: f64,
    /// Population standard deviation of the per-fold AUCs.
    pub std_auc: f64,
    /// AUC of the mean interpolated curve; figure annotation only.
    pub mean_curve_auc: f64,
    /// Number of folds that contributed.
    pub n_folds: usize,
}

/// Accumulates per-fold ROC curves on a shared FPR grid.
#[derive(Debug, Clone)]
pub struct RocAggregator {
    grid: Vec<f64>,
    tprs: Vec<Vec<f64>>,
    aucs: Vec<f64>,
}

impl Default for RocAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl RocAggregator {
    pub fn new() -> Self {
        Self {
            grid: fpr_grid(),
            tprs: Vec::new(),
            aucs: Vec::new(),
        }
    }

    /// Compute the fold's ROC curve, interpolate it onto the grid (TPR at
    /// FPR=0 forced to 0.0) and accumulate it. Returns the raw curve so the
    /// caller can plot it.
    pub fn add_fold(&mut self, labels: &[usize], scores: &[f64]) -> Result<RocCurve, RocError> {
        let curve = roc_curve(labels, scores)?;
        self.push_curve(&curve);
        Ok(curve)
    }

    /// Accumulate an already-computed curve.
    pub fn push_curve(&mut self, curve: &RocCurve) {
        let mut tpr = interp(&self.grid, &curve.fpr, &curve.tpr);
        tpr[0] = 0.0;
        self.tprs.push(tpr);
        self.aucs.push(curve.auc);
    }

    /// Number of folds accumulated so far.
    pub fn n_folds(&self) -> usize {
        self.aucs.len()
    }

    /// Per-fold AUCs accumulated so far.
    pub fn aucs(&self) -> &[f64] {
        &self.aucs
    }

    /// Finalize into aggregate statistics; `None` when no fold contributed.
    pub fn finalize(self) -> Option<AggregateRoc> {
        if self.tprs.is_empty() {
            return None;
        }
        let n_folds = self.tprs.len();
        let n_points = self.grid.len();

        let mut mean_tpr = vec![0.0; n_points];
        let mut std_tpr = vec![0.0; n_points];
        let mut column = Vec::with_capacity(n_folds);
        for j in 0..n_points {
            column.clear();
            column.extend(self.tprs.iter().map(|t| t[j]));
            let (m, s) = mean_std(&column);
            mean_tpr[j] = m;
            std_tpr[j] = s;
        }
        // (1, 1) is always on every ROC curve; pin the endpoint.
        mean_tpr[n_points - 1] = 1.0;

        let (mean_auc, std_auc) = mean_std(&self.aucs);
        let mean_curve_auc = trapezoid_auc(&self.grid, &mean_tpr);

        Some(AggregateRoc {
            grid: self.grid,
            mean_tpr,
            std_tpr,
            mean_auc,
            std_auc,
            mean_curve_auc,
            n_folds,
        })
    }
}
