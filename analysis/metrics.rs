//! Per-fold classification metrics and their cross-fold summaries.
//!
//! All metrics follow the standard binary definitions with positive label =
//! patient (1). Zero-division cases (no predicted positives, no true
//! positives) report 0.0 and emit a warning rather than failing the run.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Threshold metrics for a single cross-validation fold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FoldMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Mean and standard deviation of each metric over the valid folds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub n_folds: usize,
    pub mean_accuracy: f64,
    pub std_accuracy: f64,
    pub mean_precision: f64,
    pub std_precision: f64,
    pub mean_recall: f64,
    pub std_recall: f64,
    pub mean_f1: f64,
    pub std_f1: f64,
}

/// Compute accuracy, precision, recall and F1 for one fold.
///
/// # Panics
///
/// Panics if the slices have different lengths; callers always produce
/// predictions parallel to the test labels.
pub fn fold_metrics(y_true: &[usize], y_pred: &[usize]) -> FoldMetrics {
    assert_eq!(y_true.len(), y_pred.len(), "label/prediction length mismatch");

    let n = y_true.len();
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut tn = 0usize;
    let mut fn_ = 0usize;
    for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
        match (t == 1, p == 1) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (false, false) => tn += 1,
            (true, false) => fn_ += 1,
        }
    }

    let accuracy = if n == 0 {
        0.0
    } else {
        (tp + tn) as f64 / n as f64
    };
    let precision = safe_ratio(tp, tp + fp, "precision");
    let recall = safe_ratio(tp, tp + fn_, "recall");
    let f1 = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };

    FoldMetrics {
        accuracy,
        precision,
        recall,
        f1,
    }
}

fn safe_ratio(numer: usize, denom: usize, what: &str) -> f64 {
    if denom == 0 {
        log::warn!("{what} is ill-defined (zero denominator); reporting 0.0");
        0.0
    } else {
        numer as f64 / denom as f64
    }
}

/// Mean and population standard deviation (ddof = 0) of a sample.
///
/// Population std is used for every aggregate statistic in this crate.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Summarize per-fold metrics; `None` when every fold was skipped.
pub fn summarize(folds: &[FoldMetrics]) -> Option<MetricsSummary> {
    if folds.is_empty() {
        return None;
    }
    let (mean_accuracy, std_accuracy) =
        mean_std(&folds.iter().map(|f| f.accuracy).collect::<Vec<_>>());
    let (mean_precision, std_precision) =
        mean_std(&folds.iter().map(|f| f.precision).collect::<Vec<_>>());
    let (mean_recall, std_recall) = mean_std(&folds.iter().map(|f| f.recall).collect::<Vec<_>>());
    let (mean_f1, std_f1) = mean_std(&folds.iter().map(|f| f.f1).collect::<Vec<_>>());

    Some(MetricsSummary {
        n_folds: folds.len(),
        mean_accuracy,
        std_accuracy,
        mean_precision,
        std_precision,
        mean_recall,
        std_recall,
        mean_f1,
        std_f1,
    })
}

/// One classifier's line in the exported metrics table.
///
/// AUC fields are `None` when every fold was degenerate and no ROC could be
/// aggregated; the summary is `None` when every fold was skipped outright.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsRow {
    pub classifier: String,
    pub n_folds: usize,
    pub skipped_folds: usize,
    pub mean_auc: Option<f64>,
    pub std_auc: Option<f64>,
    pub summary: Option<MetricsSummary>,
}

/// Write the metrics table as tab-separated values with a header row.
pub fn write_metrics_tsv(path: &Path, rows: &[MetricsRow]) -> Result<(), csv::Error> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record([
        "classifier",
        "n_folds",
        "skipped_folds",
        "mean_auc",
        "std_auc",
        "mean_accuracy",
        "std_accuracy",
        "mean_precision",
        "std_precision",
        "mean_recall",
        "std_recall",
        "mean_f1",
        "std_f1",
    ])?;
    let fmt = |v: Option<f64>| v.map(|v| format!("{v:.6}")).unwrap_or_default();
    for row in rows {
        let s = row.summary.as_ref();
        writer.write_record([
            row.classifier.clone(),
            row.n_folds.to_string(),
            row.skipped_folds.to_string(),
            fmt(row.mean_auc),
            fmt(row.std_auc),
            fmt(s.map(|s| s.mean_accuracy)),
            fmt(s.map(|s| s.std_accuracy)),
            fmt(s.map(|s| s.mean_precision)),
            fmt(s.map(|s| s.std_precision)),
            fmt(s.map(|s| s.mean_recall)),
            fmt(s.map(|s| s.std_recall)),
            fmt(s.map(|s| s.mean_f1)),
            fmt(s.map(|s| s.std_f1)),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
