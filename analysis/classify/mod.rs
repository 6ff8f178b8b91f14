//! The four classifier variants compared by the pipeline.
//!
//! The set of classifiers is the closed [`ClassifierKind`] enum, so an
//! unsupported identifier cannot survive argument parsing, and every variant
//! implements the same fit / predict / predict-probability capability set.

pub mod forest;
pub mod lda;
pub mod logistic;
pub mod svm;

use clap::ValueEnum;
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use forest::{RandomForest, RandomForestConfig};
use lda::Lda;
use logistic::L1Logistic;
use svm::RbfSvm;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("training partition is empty")]
    EmptyTrainingSet,
    #[error("training partition contains a single class")]
    SingleClassTrainingSet,
    #[error("features ({features}) do not match labels ({labels})")]
    LengthMismatch { features: usize, labels: usize },
    #[error("the {0} linear system is singular")]
    SingularSystem(&'static str),
}

/// Capability set shared by all classifier variants.
///
/// `predict_proba` returns the probability of the positive class (patient)
/// per test row.
pub trait Classifier: Send {
    fn fit(&mut self, x: ArrayView2<f64>, y: &[usize]) -> Result<(), TrainError>;
    fn predict(&self, x: ArrayView2<f64>) -> Vec<usize>;
    fn predict_proba(&self, x: ArrayView2<f64>) -> Vec<f64>;
}

/// The closed set of classifier variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClassifierKind {
    /// RBF-kernel support vector classifier with Platt-scaled probabilities.
    Svm,
    /// L1-penalized logistic regression.
    LogisticRegression,
    /// Bagged decision-tree ensemble.
    RandomForest,
    /// Linear discriminant analysis.
    Lda,
}

impl ClassifierKind {
    /// All variants, in report order.
    pub const ALL: [ClassifierKind; 4] = [
        ClassifierKind::Svm,
        ClassifierKind::LogisticRegression,
        ClassifierKind::RandomForest,
        ClassifierKind::Lda,
    ];

    /// Human-readable name used in reports and figure captions.
    pub fn label(&self) -> &'static str {
        match self {
            ClassifierKind::Svm => "Support Vector Machine",
            ClassifierKind::LogisticRegression => "Logistic Regression",
            ClassifierKind::RandomForest => "Random Forest",
            ClassifierKind::Lda => "Linear Discriminant Analysis",
        }
    }

    /// Construct a fresh, unfitted model for this variant.
    pub fn build(&self, seed: u64) -> Box<dyn Classifier> {
        match self {
            ClassifierKind::Svm => Box::new(RbfSvm::new(seed)),
            ClassifierKind::LogisticRegression => Box::new(L1Logistic::default()),
            ClassifierKind::RandomForest => Box::new(RandomForest::new(RandomForestConfig {
                seed,
                ..RandomForestConfig::default()
            })),
            ClassifierKind::Lda => Box::new(Lda::default()),
        }
    }
}

impl std::fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Validate the (features, labels) pair every `fit` receives.
fn check_training_set(x: ArrayView2<f64>, y: &[usize]) -> Result<(), TrainError> {
    if x.nrows() == 0 {
        return Err(TrainError::EmptyTrainingSet);
    }
    if x.nrows() != y.len() {
        return Err(TrainError::LengthMismatch {
            features: x.nrows(),
            labels: y.len(),
        });
    }
    let pos = y.iter().filter(|&&l| l == 1).count();
    if pos == 0 || pos == y.len() {
        return Err(TrainError::SingleClassTrainingSet);
    }
    Ok(())
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// Linearly separable two-cluster data shared by the classifier tests.
    pub(crate) fn separable_clusters(per_class: usize) -> (Array2<f64>, Vec<usize>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..per_class {
            let jitter = i as f64 * 0.01;
            rows.extend_from_slice(&[0.0 + jitter, 0.5 - jitter]);
            labels.push(0);
        }
        for i in 0..per_class {
            let jitter = i as f64 * 0.01;
            rows.extend_from_slice(&[4.0 + jitter, 4.5 - jitter]);
            labels.push(1);
        }
        let x = Array2::from_shape_vec((2 * per_class, 2), rows).unwrap();
        (x, labels)
    }

    #[test]
    fn every_kind_builds_and_fits_separable_data() {
        let (x, y) = separable_clusters(10);
        for kind in ClassifierKind::ALL {
            let mut model = kind.build(3);
            model.fit(x.view(), &y).unwrap();
            let preds = model.predict(x.view());
            let correct = preds.iter().zip(y.iter()).filter(|(p, l)| p == l).count();
            assert!(
                correct as f64 / y.len() as f64 > 0.95,
                "{kind} misclassified separable training data"
            );
            let probs = model.predict_proba(x.view());
            assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)), "{kind}");
        }
    }

    #[test]
    fn single_class_training_set_is_rejected() {
        let (x, _) = separable_clusters(4);
        let y = vec![0; 8];
        for kind in ClassifierKind::ALL {
            let mut model = kind.build(0);
            assert!(matches!(
                model.fit(x.view(), &y),
                Err(TrainError::SingleClassTrainingSet)
            ));
        }
    }
}
