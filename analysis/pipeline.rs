//! Cross-validated evaluation of the classifier set over a feature table.
//!
//! Folds are fitted in parallel with rayon; each fold owns its train/test
//! copies, fits a fresh classifier and returns its curve and metrics.
//! Aggregation, reporting, the figure and the metrics table are produced by
//! a single owner after all folds complete.

use ndarray::{Array2, Axis};
use rayon::prelude::*;
use thiserror::Error;

use crate::classify::{ClassifierKind, TrainError};
use crate::config::{ConfigError, RunConfig, SingleClassPolicy};
use crate::data::{DataError, EvaluationRecord, FeatureTable, RunBundle, RunMetadata, unix_now};
use crate::metrics::{self, FoldMetrics, MetricsRow, MetricsSummary};
use crate::plot::{self, PlotError};
use crate::roc::{AggregateRoc, RocAggregator, RocCurve, RocError, roc_curve};
use crate::scale::Scaler;
use crate::split::{self, Fold, SplitError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Split(#[from] SplitError),
    #[error("training failed: {0}")]
    Train(#[from] TrainError),
    #[error("pooled ROC failed: {0}")]
    Roc(#[from] RocError),
    #[error("metrics export failed: {0}")]
    MetricsExport(#[from] csv::Error),
    #[error(transparent)]
    Plot(#[from] PlotError),
    #[error(transparent)]
    Data(#[from] DataError),
}

/// Everything produced for one classifier across the folds.
#[derive(Debug, Clone)]
pub struct ClassifierReport {
    pub kind: ClassifierKind,
    /// `None` when no fold yielded a defined ROC curve.
    pub aggregate: Option<AggregateRoc>,
    /// Raw per-fold curves, for the figure.
    pub fold_curves: Vec<RocCurve>,
    /// `None` when every fold was skipped.
    pub summary: Option<MetricsSummary>,
    pub n_folds: usize,
    pub skipped_folds: usize,
}

#[derive(Debug, Clone)]
pub struct EvaluationReport {
    pub reports: Vec<ClassifierReport>,
}

struct FoldOutcome {
    curve: Option<RocCurve>,
    metrics: Option<FoldMetrics>,
    skipped: bool,
}

fn select_rows(features: &Array2<f64>, rows: &[usize]) -> Array2<f64> {
    features.select(Axis(0), rows)
}

fn select_labels(labels: &[usize], rows: &[usize]) -> Vec<usize> {
    rows.iter().map(|&r| labels[r]).collect()
}

fn run_fold(
    table: &FeatureTable,
    cfg: &RunConfig,
    kind: ClassifierKind,
    fold_idx: usize,
    fold: &Fold,
) -> Result<FoldOutcome, PipelineError> {
    let degenerate = fold.single_class_test(&table.labels);
    if degenerate {
        log::warn!(
            "fold {fold_idx}: test set contains a single class; ROC/AUC undefined ({})",
            kind.label()
        );
        if cfg.single_class_policy == SingleClassPolicy::Skip {
            return Ok(FoldOutcome {
                curve: None,
                metrics: None,
                skipped: true,
            });
        }
    }

    let mut x_train = select_rows(&table.features, &fold.train);
    let mut x_test = select_rows(&table.features, &fold.test);
    let y_train = select_labels(&table.labels, &fold.train);
    let y_test = select_labels(&table.labels, &fold.test);

    if let Some(method) = cfg.scaling {
        let scaler = Scaler::fit(method, x_train.view());
        x_train = scaler.transform(x_train.view());
        x_test = scaler.transform(x_test.view());
    }

    let mut model = kind.build(cfg.seed);
    model.fit(x_train.view(), &y_train)?;
    let y_pred = model.predict(x_test.view());
    let fold_metrics = metrics::fold_metrics(&y_test, &y_pred);

    let curve = if degenerate {
        None
    } else {
        let scores = model.predict_proba(x_test.view());
        Some(roc_curve(&y_test, &scores)?)
    };
    Ok(FoldOutcome {
        curve,
        metrics: Some(fold_metrics),
        skipped: false,
    })
}

/// Evaluate every configured classifier over a prebuilt fold set.
pub fn evaluate_with_folds(
    table: &FeatureTable,
    cfg: &RunConfig,
    folds: &[Fold],
) -> Result<EvaluationReport, PipelineError> {
    let mut reports = Vec::with_capacity(cfg.classifiers.len());
    for &kind in &cfg.classifiers {
        let outcomes: Vec<FoldOutcome> = folds
            .par_iter()
            .enumerate()
            .map(|(i, fold)| run_fold(table, cfg, kind, i, fold))
            .collect::<Result<_, _>>()?;

        let mut aggregator = RocAggregator::new();
        let mut fold_curves = Vec::new();
        let mut fold_metrics = Vec::new();
        let mut skipped = 0usize;
        for outcome in outcomes {
            if outcome.skipped {
                skipped += 1;
                continue;
            }
            if let Some(curve) = outcome.curve {
                aggregator.push_curve(&curve);
                fold_curves.push(curve);
            }
            if let Some(m) = outcome.metrics {
                fold_metrics.push(m);
            }
        }

        reports.push(ClassifierReport {
            kind,
            aggregate: aggregator.finalize(),
            fold_curves,
            summary: metrics::summarize(&fold_metrics),
            n_folds: folds.len(),
            skipped_folds: skipped,
        });
    }
    Ok(EvaluationReport { reports })
}

/// Leave-one-subject-out evaluation.
///
/// Every test fold holds one subject and is single-class by construction, so
/// per-fold ROC is undefined. Instead each held-out subject's positive-class
/// probabilities are averaged into one pooled score, and a single ROC is
/// computed over the (subject label, pooled score) pairs. Threshold metrics
/// come from the pooled scores at 0.5.
pub fn evaluate_leave_one_subject_out(
    table: &FeatureTable,
    cfg: &RunConfig,
) -> Result<EvaluationReport, PipelineError> {
    let folds = split::leave_one_subject_out(&table.subjects)?;

    let mut reports = Vec::with_capacity(cfg.classifiers.len());
    for &kind in &cfg.classifiers {
        let pooled: Vec<(usize, f64)> = folds
            .par_iter()
            .map(|fold| -> Result<(usize, f64), PipelineError> {
                let mut x_train = select_rows(&table.features, &fold.train);
                let mut x_test = select_rows(&table.features, &fold.test);
                let y_train = select_labels(&table.labels, &fold.train);

                if let Some(method) = cfg.scaling {
                    let scaler = Scaler::fit(method, x_train.view());
                    x_train = scaler.transform(x_train.view());
                    x_test = scaler.transform(x_test.view());
                }

                let mut model = kind.build(cfg.seed);
                model.fit(x_train.view(), &y_train)?;
                let probs = model.predict_proba(x_test.view());
                let mean_prob = probs.iter().sum::<f64>() / probs.len() as f64;
                Ok((table.labels[fold.test[0]], mean_prob))
            })
            .collect::<Result<_, _>>()?;

        let labels: Vec<usize> = pooled.iter().map(|&(l, _)| l).collect();
        let scores: Vec<f64> = pooled.iter().map(|&(_, s)| s).collect();
        let curve = roc_curve(&labels, &scores)?;

        let mut aggregator = RocAggregator::new();
        aggregator.push_curve(&curve);

        let preds: Vec<usize> = scores.iter().map(|&s| usize::from(s >= 0.5)).collect();
        let pooled_metrics = metrics::fold_metrics(&labels, &preds);

        reports.push(ClassifierReport {
            kind,
            aggregate: aggregator.finalize(),
            fold_curves: vec![curve],
            summary: metrics::summarize(&[pooled_metrics]),
            n_folds: folds.len(),
            skipped_folds: 0,
        });
    }
    Ok(EvaluationReport { reports })
}

fn subset(table: &FeatureTable, rows: &[usize]) -> FeatureTable {
    FeatureTable {
        features: select_rows(&table.features, rows),
        labels: select_labels(&table.labels, rows),
        subjects: rows.iter().map(|&r| table.subjects[r].clone()).collect(),
        row_ids: rows.iter().map(|&r| table.row_ids[r].clone()).collect(),
        n_channels: table.n_channels,
        n_bands: table.n_bands,
    }
}

/// Rows of the exported metrics table, one per classifier.
pub fn metrics_rows(report: &EvaluationReport) -> Vec<MetricsRow> {
    report
        .reports
        .iter()
        .map(|r| MetricsRow {
            classifier: r.kind.label().to_string(),
            n_folds: r.n_folds,
            skipped_folds: r.skipped_folds,
            mean_auc: r.aggregate.as_ref().map(|a| a.mean_auc),
            std_auc: r.aggregate.as_ref().map(|a| a.std_auc),
            summary: r.summary.clone(),
        })
        .collect()
}

fn log_summary(report: &EvaluationReport) {
    for r in &report.reports {
        match (&r.aggregate, &r.summary) {
            (Some(agg), Some(s)) => log::info!(
                "{}: AUC {:.3} \u{00b1} {:.3}, accuracy {:.3} \u{00b1} {:.3}, precision {:.3} \u{00b1} {:.3}, recall {:.3} \u{00b1} {:.3}, F1 {:.3} \u{00b1} {:.3} ({} folds, {} skipped)",
                r.kind.label(),
                agg.mean_auc,
                agg.std_auc,
                s.mean_accuracy,
                s.std_accuracy,
                s.mean_precision,
                s.std_precision,
                s.mean_recall,
                s.std_recall,
                s.mean_f1,
                s.std_f1,
                r.n_folds,
                r.skipped_folds
            ),
            _ => log::warn!(
                "{}: no valid folds out of {}",
                r.kind.label(),
                r.n_folds
            ),
        }
    }
}

/// Default figure file name, encoding task, band mode and feature state.
pub fn default_figure_name(metadata: &RunMetadata, scaling: Option<crate::scale::ScalingMethod>) -> String {
    let feature_state = if metadata.normalized {
        "normalized"
    } else if metadata.decibels {
        "db"
    } else {
        "raw"
    };
    let scaling = scaling.map(|s| format!("_{s}")).unwrap_or_default();
    format!(
        "roc_{}_{}_{}{}.png",
        metadata.task, metadata.band_mode, feature_state, scaling
    )
}

/// Run the full evaluation for a bundle: validate, split, fit, aggregate,
/// report, render and record.
pub fn evaluate(bundle: &mut RunBundle, cfg: &RunConfig) -> Result<EvaluationReport, PipelineError> {
    cfg.validate(&bundle.metadata)?;

    let report = if cfg.leave_one_subject_out {
        evaluate_leave_one_subject_out(&bundle.table, cfg)?
    } else if cfg.one_segment_per_task {
        let rows = split::one_segment_rows(
            bundle.table.features.nrows(),
            bundle.metadata.task.n_segments(),
            cfg.which_segment,
        );
        let sub = subset(&bundle.table, &rows);
        let folds = split::stratified_kfold(&sub.labels, cfg.folds, cfg.seed)?;
        evaluate_with_folds(&sub, cfg, &folds)?
    } else {
        let folds = split::stratified_group_kfold(
            &bundle.table.labels,
            &bundle.table.subjects,
            cfg.folds,
            cfg.seed,
        )?;
        evaluate_with_folds(&bundle.table, cfg, &folds)?
    };

    log_summary(&report);
    let rows = metrics_rows(&report);
    if let Some(path) = &cfg.metrics_tsv {
        metrics::write_metrics_tsv(path, &rows)?;
        log::info!("wrote metrics table to '{}'", path.display());
    }
    if let Some(path) = &cfg.figure {
        plot::roc_figure(path, &report.reports)?;
    }

    bundle.metadata.evaluation = Some(EvaluationRecord {
        folds: cfg.folds,
        seed: cfg.seed,
        scaling: cfg.scaling.map(|s| s.to_string()),
        rows,
        evaluated_unix: unix_now(),
    });
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{BandMode, Task};
    use crate::scale::ScalingMethod;
    use ndarray::array;

    fn metadata() -> RunMetadata {
        RunMetadata {
            task: Task::Ec,
            band_mode: BandMode::Wide,
            normalized: false,
            decibels: false,
            n_subjects: 2,
            created_unix: 0,
            evaluation: None,
        }
    }

    #[test]
    fn figure_name_encodes_task_band_and_scaling() {
        assert_eq!(
            default_figure_name(&metadata(), Some(ScalingMethod::Robust)),
            "roc_ec_wide_raw_robust.png"
        );

        let mut meta = metadata();
        meta.normalized = true;
        assert_eq!(default_figure_name(&meta, None), "roc_ec_wide_normalized.png");
    }

    #[test]
    fn subset_keeps_side_tables_parallel() {
        let table = FeatureTable {
            features: array![[0.0], [1.0], [2.0], [3.0]],
            labels: vec![0, 0, 1, 1],
            subjects: vec!["C1".into(), "C1".into(), "P1".into(), "P1".into()],
            row_ids: vec!["C1/a".into(), "C1/b".into(), "P1/a".into(), "P1/b".into()],
            n_channels: 1,
            n_bands: 1,
        };
        let sub = subset(&table, &[1, 3]);
        assert_eq!(sub.features, array![[1.0], [3.0]]);
        assert_eq!(sub.labels, vec![0, 1]);
        assert_eq!(sub.subjects, vec!["C1".to_string(), "P1".to_string()]);
        assert_eq!(sub.row_ids, vec!["C1/b".to_string(), "P1/b".to_string()]);
    }
}
