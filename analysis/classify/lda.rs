//! Two-class linear discriminant analysis.
//!
//! Fits class means and a pooled within-class covariance, ridge-regularized
//! so the solve stays well-posed when features outnumber observations (the
//! usual regime for channels x bands EEG tables). The discriminant direction
//! comes from solving `S w = mu1 - mu0` by Gaussian elimination with partial
//! pivoting; the decision score feeds a logistic link for probabilities.

use ndarray::{Array1, Array2, ArrayView2};

use super::{check_training_set, sigmoid, Classifier, TrainError};

#[derive(Debug, Clone)]
pub struct Lda {
    /// Ridge added to the pooled covariance, relative to its mean diagonal.
    ridge: f64,
    state: Option<Fitted>,
}

#[derive(Debug, Clone)]
struct Fitted {
    weights: Array1<f64>,
    bias: f64,
}

impl Default for Lda {
    fn default() -> Self {
        Self {
            ridge: 1e-3,
            state: None,
        }
    }
}

impl Lda {
    fn decision(&self, x: ArrayView2<f64>) -> Vec<f64> {
        let fitted = self.state.as_ref().expect("LDA used before fit");
        x.rows()
            .into_iter()
            .map(|row| row.dot(&fitted.weights) + fitted.bias)
            .collect()
    }
}

impl Classifier for Lda {
    fn fit(&mut self, x: ArrayView2<f64>, y: &[usize]) -> Result<(), TrainError> {
        check_training_set(x, y)?;
        let d = x.ncols();

        let mut mu = [Array1::<f64>::zeros(d), Array1::<f64>::zeros(d)];
        let mut counts = [0usize; 2];
        for (row, &label) in x.rows().into_iter().zip(y.iter()) {
            let class = usize::from(label == 1);
            mu[class] += &row;
            counts[class] += 1;
        }
        mu[0] /= counts[0] as f64;
        mu[1] /= counts[1] as f64;

        // Pooled within-class scatter.
        let mut cov = Array2::<f64>::zeros((d, d));
        for (row, &label) in x.rows().into_iter().zip(y.iter()) {
            let centered = &row - &mu[usize::from(label == 1)];
            for i in 0..d {
                let ci = centered[i];
                if ci == 0.0 {
                    continue;
                }
                for j in 0..d {
                    cov[[i, j]] += ci * centered[j];
                }
            }
        }
        let dof = (x.nrows() - 2).max(1) as f64;
        cov /= dof;

        let mean_diag = cov.diag().sum() / d as f64;
        let ridge = self.ridge * mean_diag + 1e-12;
        for i in 0..d {
            cov[[i, i]] += ridge;
        }

        let direction = &mu[1] - &mu[0];
        let weights = solve(cov, direction).ok_or(TrainError::SingularSystem("LDA"))?;

        let midpoint = (&mu[0] + &mu[1]) / 2.0;
        let prior = (counts[1] as f64 / counts[0] as f64).ln();
        let bias = prior - weights.dot(&midpoint);

        self.state = Some(Fitted { weights, bias });
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Vec<usize> {
        self.decision(x)
            .into_iter()
            .map(|s| usize::from(s > 0.0))
            .collect()
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Vec<f64> {
        self.decision(x).into_iter().map(sigmoid).collect()
    }
}

/// Solve `a x = b` by Gaussian elimination with partial pivoting.
/// Returns `None` when a pivot collapses to zero.
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&p, &q| {
                a[[p, col]]
                    .abs()
                    .partial_cmp(&a[[q, col]].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        if a[[pivot_row, col]].abs() < 1e-300 {
            return None;
        }
        if pivot_row != col {
            for j in 0..n {
                a.swap([col, j], [pivot_row, j]);
            }
            b.swap(col, pivot_row);
        }
        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for j in col..n {
                a[[row, j]] -= factor * a[[col, j]];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = Array1::zeros(n);
    for row in (0..n).rev() {
        let mut acc = b[row];
        for j in row + 1..n {
            acc -= a[[row, j]] * x[j];
        }
        x[row] = acc / a[[row, row]];
    }
    Some(x)
}
