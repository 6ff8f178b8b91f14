//! Cross-validation fold construction.
//!
//! Three strategies, all deterministic for a fixed seed:
//!
//! - [`stratified_group_kfold`]: whole subjects assigned greedily to the
//!   fold that best preserves the global class ratio; a subject's rows
//!   never straddle the train/test boundary.
//! - [`stratified_kfold`]: plain stratified k-fold for the
//!   one-segment-per-subject mode, where the grouping constraint is moot.
//! - [`leave_one_subject_out`]: one fold per subject.
//!
//! Folds carry row indices into the feature table; test sets partition the
//! row set (or the subject set for leave-one-subject-out).

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SplitError {
    #[error("at least 2 folds are required, got {0}")]
    TooFewFolds(usize),
    #[error("cannot split {samples} samples into {folds} folds")]
    FoldsExceedSamples { folds: usize, samples: usize },
    #[error("cannot split {subjects} subjects into {folds} folds")]
    FoldsExceedSubjects { folds: usize, subjects: usize },
    #[error("labels length {labels} != groups length {groups}")]
    LengthMismatch { labels: usize, groups: usize },
    #[error("leave-one-subject-out requires at least 2 subjects, got {0}")]
    TooFewSubjects(usize),
}

/// One train/test partition of the row indices.
#[derive(Debug, Clone)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl Fold {
    /// True when the test set contains a single class; ROC/AUC are
    /// undefined for such a fold.
    pub fn single_class_test(&self, labels: &[usize]) -> bool {
        let mut seen = [false, false];
        for &i in &self.test {
            seen[usize::from(labels[i] == 1)] = true;
        }
        !(seen[0] && seen[1])
    }
}

struct SubjectRows {
    rows: Vec<usize>,
    // [controls, patients] row counts for this subject.
    counts: [usize; 2],
}

/// Stratified group k-fold: subjects are shuffled with the seed, ordered
/// largest-first, and each is assigned to the fold where it least perturbs
/// the per-fold class balance.
pub fn stratified_group_kfold(
    labels: &[usize],
    groups: &[String],
    k: usize,
    seed: u64,
) -> Result<Vec<Fold>, SplitError> {
    if labels.len() != groups.len() {
        return Err(SplitError::LengthMismatch {
            labels: labels.len(),
            groups: groups.len(),
        });
    }
    if k < 2 {
        return Err(SplitError::TooFewFolds(k));
    }

    // Subjects in first-appearance order, with their rows and class counts.
    let mut order: Vec<&str> = Vec::new();
    let mut subjects: Vec<SubjectRows> = Vec::new();
    for (i, g) in groups.iter().enumerate() {
        let pos = match order.iter().position(|s| *s == g.as_str()) {
            Some(p) => p,
            None => {
                order.push(g.as_str());
                subjects.push(SubjectRows {
                    rows: Vec::new(),
                    counts: [0, 0],
                });
                order.len() - 1
            }
        };
        subjects[pos].rows.push(i);
        subjects[pos].counts[usize::from(labels[i] == 1)] += 1;
    }
    if k > subjects.len() {
        return Err(SplitError::FoldsExceedSubjects {
            folds: k,
            subjects: subjects.len(),
        });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut idx: Vec<usize> = (0..subjects.len()).collect();
    idx.shuffle(&mut rng);
    // Largest subjects placed first; the shuffle settles ties.
    idx.sort_by_key(|&s| std::cmp::Reverse(subjects[s].rows.len()));

    let mut fold_counts = vec![[0usize; 2]; k];
    let mut fold_rows: Vec<Vec<usize>> = vec![Vec::new(); k];
    for &s in &idx {
        let best = best_fold(&fold_counts, subjects[s].counts);
        fold_counts[best][0] += subjects[s].counts[0];
        fold_counts[best][1] += subjects[s].counts[1];
        fold_rows[best].extend_from_slice(&subjects[s].rows);
    }

    Ok(assemble(fold_rows, labels.len()))
}

/// The fold whose class counts deviate least from the others after adding
/// `counts`, ties broken toward the smaller fold, then the lower index.
fn best_fold(fold_counts: &[[usize; 2]], counts: [usize; 2]) -> usize {
    let k = fold_counts.len();
    let mut best = 0;
    let mut best_cost = f64::INFINITY;
    let mut best_size = usize::MAX;
    for f in 0..k {
        let mut cost = 0.0;
        for class in 0..2 {
            let mut sum = 0.0;
            let mut sum_sq = 0.0;
            for (g, fc) in fold_counts.iter().enumerate() {
                let c = fc[class] + if g == f { counts[class] } else { 0 };
                sum += c as f64;
                sum_sq += (c * c) as f64;
            }
            let mean = sum / k as f64;
            cost += sum_sq / k as f64 - mean * mean;
        }
        let size = fold_counts[f][0] + fold_counts[f][1];
        if cost < best_cost - 1e-12 || (cost < best_cost + 1e-12 && size < best_size) {
            best = f;
            best_cost = cost;
            best_size = size;
        }
    }
    best
}

/// Stratified k-fold without grouping: indices are grouped by class,
/// shuffled, and dealt round-robin across the folds.
pub fn stratified_kfold(labels: &[usize], k: usize, seed: u64) -> Result<Vec<Fold>, SplitError> {
    if k < 2 {
        return Err(SplitError::TooFewFolds(k));
    }
    if k > labels.len() {
        return Err(SplitError::FoldsExceedSamples {
            folds: k,
            samples: labels.len(),
        });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut by_class: [Vec<usize>; 2] = [Vec::new(), Vec::new()];
    for (i, &l) in labels.iter().enumerate() {
        by_class[usize::from(l == 1)].push(i);
    }

    let mut fold_rows: Vec<Vec<usize>> = vec![Vec::new(); k];
    for class in &mut by_class {
        class.shuffle(&mut rng);
        for (j, &row) in class.iter().enumerate() {
            fold_rows[j % k].push(row);
        }
    }

    Ok(assemble(fold_rows, labels.len()))
}

/// One fold per subject, in first-appearance order.
pub fn leave_one_subject_out(groups: &[String]) -> Result<Vec<Fold>, SplitError> {
    let mut order: Vec<&str> = Vec::new();
    let mut rows: Vec<Vec<usize>> = Vec::new();
    for (i, g) in groups.iter().enumerate() {
        match order.iter().position(|s| *s == g.as_str()) {
            Some(p) => rows[p].push(i),
            None => {
                order.push(g.as_str());
                rows.push(vec![i]);
            }
        }
    }
    if rows.len() < 2 {
        return Err(SplitError::TooFewSubjects(rows.len()));
    }
    Ok(assemble(rows, groups.len()))
}

/// Select one segment out of every `segments` rows, starting from the
/// 1-based `which_segment` and striding by the segment count.
pub fn one_segment_rows(n_rows: usize, segments: usize, which_segment: usize) -> Vec<usize> {
    let start = which_segment.saturating_sub(1);
    (start..n_rows).step_by(segments.max(1)).collect()
}

fn assemble(fold_rows: Vec<Vec<usize>>, n_rows: usize) -> Vec<Fold> {
    let mut in_fold = vec![usize::MAX; n_rows];
    for (f, rows) in fold_rows.iter().enumerate() {
        for &r in rows {
            in_fold[r] = f;
        }
    }
    fold_rows
        .into_iter()
        .enumerate()
        .map(|(f, mut test)| {
            test.sort_unstable();
            let train: Vec<usize> = (0..n_rows)
                .filter(|&r| in_fold[r] != f && in_fold[r] != usize::MAX)
                .collect();
            Fold { train, test }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// 8 subjects (4 patients, 4 controls), 3 segments each.
    fn grouped_data() -> (Vec<usize>, Vec<String>) {
        let mut labels = Vec::new();
        let mut groups = Vec::new();
        for s in 0..8 {
            let id = if s % 2 == 0 {
                format!("{:02}C", s)
            } else {
                format!("{:02}P", s)
            };
            for _ in 0..3 {
                labels.push(s % 2);
                groups.push(id.clone());
            }
        }
        (labels, groups)
    }

    #[test]
    fn group_kfold_test_sets_partition_rows() {
        let (labels, groups) = grouped_data();
        let folds = stratified_group_kfold(&labels, &groups, 4, 7).unwrap();
        let mut seen: Vec<usize> = folds.iter().flat_map(|f| f.test.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..labels.len()).collect::<Vec<_>>());
    }

    #[test]
    fn group_kfold_no_subject_leakage() {
        let (labels, groups) = grouped_data();
        let folds = stratified_group_kfold(&labels, &groups, 4, 7).unwrap();
        for fold in &folds {
            let train: HashSet<&String> = fold.train.iter().map(|&i| &groups[i]).collect();
            let test: HashSet<&String> = fold.test.iter().map(|&i| &groups[i]).collect();
            assert!(train.is_disjoint(&test), "subject on both sides of a fold");
        }
    }

    #[test]
    fn group_kfold_train_and_test_cover_everything() {
        let (labels, groups) = grouped_data();
        let folds = stratified_group_kfold(&labels, &groups, 4, 7).unwrap();
        for fold in &folds {
            assert_eq!(fold.train.len() + fold.test.len(), labels.len());
        }
    }

    #[test]
    fn group_kfold_preserves_class_ratio() {
        // Balanced input: every test fold of 2 subjects carries one of each
        // class under the greedy assignment.
        let (labels, groups) = grouped_data();
        let folds = stratified_group_kfold(&labels, &groups, 4, 7).unwrap();
        for fold in &folds {
            let pos = fold.test.iter().filter(|&&i| labels[i] == 1).count();
            assert_eq!(pos * 2, fold.test.len(), "fold not class-balanced");
        }
    }

    #[test]
    fn group_kfold_deterministic_for_seed() {
        let (labels, groups) = grouped_data();
        let a = stratified_group_kfold(&labels, &groups, 4, 20).unwrap();
        let b = stratified_group_kfold(&labels, &groups, 4, 20).unwrap();
        for (fa, fb) in a.iter().zip(b.iter()) {
            assert_eq!(fa.test, fb.test);
            assert_eq!(fa.train, fb.train);
        }
    }

    #[test]
    fn group_kfold_too_many_folds() {
        let (labels, groups) = grouped_data();
        let err = stratified_group_kfold(&labels, &groups, 9, 0).unwrap_err();
        assert!(matches!(err, SplitError::FoldsExceedSubjects { .. }));
    }

    #[test]
    fn stratified_kfold_preserves_counts() {
        let labels = vec![0, 0, 0, 0, 0, 0, 1, 1, 1, 1];
        let folds = stratified_kfold(&labels, 2, 3).unwrap();
        for fold in &folds {
            let pos = fold.test.iter().filter(|&&i| labels[i] == 1).count();
            assert_eq!(pos, 2);
            assert_eq!(fold.test.len() - pos, 3);
        }
    }

    #[test]
    fn stratified_kfold_partitions_rows() {
        let labels = vec![0, 1, 0, 1, 0, 1, 0];
        let folds = stratified_kfold(&labels, 3, 11).unwrap();
        let mut seen: Vec<usize> = folds.iter().flat_map(|f| f.test.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn loso_one_fold_per_subject() {
        let (labels, groups) = grouped_data();
        let folds = leave_one_subject_out(&groups).unwrap();
        assert_eq!(folds.len(), 8);
        for fold in &folds {
            let test: HashSet<&String> = fold.test.iter().map(|&i| &groups[i]).collect();
            assert_eq!(test.len(), 1, "test fold holds exactly one subject");
        }
        let _ = labels;
    }

    #[test]
    fn single_class_detection() {
        let labels = vec![0, 0, 1, 1];
        let degenerate = Fold {
            train: vec![2, 3],
            test: vec![0, 1],
        };
        let mixed = Fold {
            train: vec![1, 3],
            test: vec![0, 2],
        };
        assert!(degenerate.single_class_test(&labels));
        assert!(!mixed.single_class_test(&labels));
    }

    #[test]
    fn one_segment_selection_strides_from_the_chosen_segment() {
        assert_eq!(one_segment_rows(9, 3, 1), vec![0, 3, 6]);
        assert_eq!(one_segment_rows(9, 3, 2), vec![1, 4, 7]);
    }
}
