//! End-to-end evaluation behavior over synthetic feature tables.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use mtbi_eeg::config::{RunConfig, SingleClassPolicy};
use mtbi_eeg::data::{BandMode, FeatureTable, RunBundle, RunMetadata, Task};
use mtbi_eeg::pipeline;
use mtbi_eeg::split::{self, Fold};

const SEGMENTS: usize = 3;

/// `n_subjects` subjects, alternating control/patient, 3 segments each.
/// When `separable`, patients sit around 4.0 and controls around 0.0; when
/// not, every feature is label-independent noise.
fn synthetic_table(n_subjects: usize, separable: bool, seed: u64) -> FeatureTable {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 0.5).unwrap();
    let n_features = 6;

    let mut rows = Vec::new();
    let mut labels = Vec::new();
    let mut subjects = Vec::new();
    let mut row_ids = Vec::new();
    for s in 0..n_subjects {
        let label = s % 2;
        let id = if label == 1 {
            format!("P{s:03}")
        } else {
            format!("C{s:03}")
        };
        for seg in 0..SEGMENTS {
            let center = if separable && label == 1 { 4.0 } else { 0.0 };
            for _ in 0..n_features {
                rows.push(center + noise.sample(&mut rng));
            }
            labels.push(label);
            subjects.push(id.clone());
            row_ids.push(format!("{id}/seg_{seg}"));
        }
    }

    let n_rows = labels.len();
    FeatureTable {
        features: Array2::from_shape_vec((n_rows, n_features), rows).unwrap(),
        labels,
        subjects,
        row_ids,
        n_channels: 2,
        n_bands: 3,
    }
}

fn metadata() -> RunMetadata {
    RunMetadata {
        task: Task::Ec,
        band_mode: BandMode::Thin,
        normalized: false,
        decibels: false,
        n_subjects: 8,
        created_unix: 0,
        evaluation: None,
    }
}

#[test]
fn separable_data_gives_near_perfect_scores_for_every_classifier() {
    let table = synthetic_table(8, true, 11);
    let cfg = RunConfig {
        folds: 4,
        ..Default::default()
    };
    let folds =
        split::stratified_group_kfold(&table.labels, &table.subjects, cfg.folds, cfg.seed).unwrap();
    let report = pipeline::evaluate_with_folds(&table, &cfg, &folds).unwrap();

    assert_eq!(report.reports.len(), 4);
    for r in &report.reports {
        let agg = r.aggregate.as_ref().unwrap();
        assert!(
            agg.mean_auc > 0.95,
            "{} AUC {} on separable data",
            r.kind.label(),
            agg.mean_auc
        );
        let summary = r.summary.as_ref().unwrap();
        assert!(
            summary.mean_accuracy > 0.9,
            "{} accuracy {} on separable data",
            r.kind.label(),
            summary.mean_accuracy
        );
        assert_eq!(r.skipped_folds, 0);
    }
}

#[test]
fn label_independent_data_stays_near_chance() {
    let table = synthetic_table(16, false, 5);
    let cfg = RunConfig {
        folds: 4,
        ..Default::default()
    };
    let folds =
        split::stratified_group_kfold(&table.labels, &table.subjects, cfg.folds, cfg.seed).unwrap();
    let report = pipeline::evaluate_with_folds(&table, &cfg, &folds).unwrap();

    for r in &report.reports {
        let agg = r.aggregate.as_ref().unwrap();
        assert!(
            (0.2..0.8).contains(&agg.mean_auc),
            "{} AUC {} on pure noise",
            r.kind.label(),
            agg.mean_auc
        );
    }
}

/// Hand-built folds where fold 0's test set is all controls.
fn folds_with_degenerate_first(table: &FeatureTable) -> Vec<Fold> {
    let controls: Vec<usize> = (0..table.labels.len())
        .filter(|&i| table.labels[i] == 0)
        .collect();
    let first_subject = &table.subjects[controls[0]];
    let test: Vec<usize> = (0..table.labels.len())
        .filter(|&i| &table.subjects[i] == first_subject)
        .collect();
    let train: Vec<usize> = (0..table.labels.len()).filter(|i| !test.contains(i)).collect();
    let degenerate = Fold { train, test };

    let mut folds =
        split::stratified_group_kfold(&table.labels, &table.subjects, 3, 8).unwrap();
    folds[0] = degenerate;
    folds
}

#[test]
fn skipped_single_class_fold_shrinks_the_auc_list() {
    let table = synthetic_table(8, true, 2);
    let folds = folds_with_degenerate_first(&table);
    let cfg = RunConfig {
        folds: folds.len(),
        ..Default::default()
    };
    let report = pipeline::evaluate_with_folds(&table, &cfg, &folds).unwrap();

    for r in &report.reports {
        assert_eq!(r.skipped_folds, 1);
        let agg = r.aggregate.as_ref().unwrap();
        assert_eq!(agg.n_folds, folds.len() - 1);
        assert_eq!(r.summary.as_ref().unwrap().n_folds, folds.len() - 1);
    }
}

#[test]
fn warn_policy_keeps_threshold_metrics_but_not_roc() {
    let table = synthetic_table(8, true, 2);
    let folds = folds_with_degenerate_first(&table);
    let cfg = RunConfig {
        folds: folds.len(),
        single_class_policy: SingleClassPolicy::Warn,
        ..Default::default()
    };
    let report = pipeline::evaluate_with_folds(&table, &cfg, &folds).unwrap();

    for r in &report.reports {
        assert_eq!(r.skipped_folds, 0);
        // The degenerate fold still contributes accuracy/precision/recall.
        assert_eq!(r.summary.as_ref().unwrap().n_folds, folds.len());
        // But never an ROC curve.
        assert_eq!(r.aggregate.as_ref().unwrap().n_folds, folds.len() - 1);
    }
}

#[test]
fn leave_one_subject_out_pools_subject_scores() {
    let table = synthetic_table(8, true, 9);
    let cfg = RunConfig {
        leave_one_subject_out: true,
        ..Default::default()
    };
    let report = pipeline::evaluate_leave_one_subject_out(&table, &cfg).unwrap();

    for r in &report.reports {
        assert_eq!(r.n_folds, 8);
        assert_eq!(r.fold_curves.len(), 1);
        let agg = r.aggregate.as_ref().unwrap();
        assert!(
            agg.mean_auc > 0.9,
            "{} pooled AUC {} on separable data",
            r.kind.label(),
            agg.mean_auc
        );
    }
}

#[test]
fn evaluate_writes_metrics_and_records_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let tsv = dir.path().join("metrics.tsv");
    let mut bundle = RunBundle {
        metadata: metadata(),
        table: synthetic_table(8, true, 4),
    };
    let cfg = RunConfig {
        folds: 4,
        metrics_tsv: Some(tsv.clone()),
        ..Default::default()
    };

    let report = pipeline::evaluate(&mut bundle, &cfg).unwrap();
    assert_eq!(report.reports.len(), 4);

    let text = std::fs::read_to_string(&tsv).unwrap();
    // Header plus one line per classifier.
    assert_eq!(text.lines().count(), 5);

    let record = bundle.metadata.evaluation.expect("evaluation recorded");
    assert_eq!(record.folds, 4);
    assert_eq!(record.seed, 8);
    assert_eq!(record.rows.len(), 4);
    assert!(record.rows.iter().all(|row| row.mean_auc.is_some()));
}

#[test]
fn identical_seeds_reproduce_the_whole_report() {
    let table = synthetic_table(8, true, 3);
    let cfg = RunConfig {
        folds: 4,
        ..Default::default()
    };
    let folds =
        split::stratified_group_kfold(&table.labels, &table.subjects, cfg.folds, cfg.seed).unwrap();

    let a = pipeline::evaluate_with_folds(&table, &cfg, &folds).unwrap();
    let b = pipeline::evaluate_with_folds(&table, &cfg, &folds).unwrap();
    for (ra, rb) in a.reports.iter().zip(b.reports.iter()) {
        let (aa, ab) = (ra.aggregate.as_ref().unwrap(), rb.aggregate.as_ref().unwrap());
        assert_eq!(aa.mean_auc, ab.mean_auc);
        assert_eq!(aa.mean_tpr, ab.mean_tpr);
    }
}
