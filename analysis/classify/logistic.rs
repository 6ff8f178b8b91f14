//! L1-penalized logistic regression.
//!
//! Proximal gradient descent (ISTA) on the mean log-loss with a
//! soft-threshold step for the L1 penalty; the intercept is left
//! unpenalized.

use ndarray::{Array1, ArrayView2};

use super::{check_training_set, sigmoid, Classifier, TrainError};

#[derive(Debug, Clone)]
pub struct L1Logistic {
    /// L1 penalty weight on the mean log-loss.
    alpha: f64,
    max_iter: usize,
    tol: f64,
    state: Option<Fitted>,
}

#[derive(Debug, Clone)]
struct Fitted {
    weights: Array1<f64>,
    intercept: f64,
}

impl Default for L1Logistic {
    fn default() -> Self {
        Self {
            alpha: 1e-2,
            max_iter: 1000,
            tol: 1e-6,
            state: None,
        }
    }
}

impl L1Logistic {
    fn decision(&self, x: ArrayView2<f64>) -> Vec<f64> {
        let fitted = self.state.as_ref().expect("logistic used before fit");
        x.rows()
            .into_iter()
            .map(|row| row.dot(&fitted.weights) + fitted.intercept)
            .collect()
    }
}

impl Classifier for L1Logistic {
    fn fit(&mut self, x: ArrayView2<f64>, y: &[usize]) -> Result<(), TrainError> {
        check_training_set(x, y)?;
        let n = x.nrows();
        let d = x.ncols();
        let targets: Vec<f64> = y.iter().map(|&l| if l == 1 { 1.0 } else { 0.0 }).collect();

        // Lipschitz bound for the mean log-loss gradient: ||X||_F^2 / (4n),
        // +1 accounting for the intercept column.
        let frob_sq: f64 = x.iter().map(|v| v * v).sum::<f64>() + n as f64;
        let step = 4.0 * n as f64 / frob_sq.max(f64::EPSILON);
        let shrink = step * self.alpha;

        let mut weights = Array1::<f64>::zeros(d);
        let mut intercept = 0.0f64;
        let mut residual = vec![0.0f64; n];

        for _ in 0..self.max_iter {
            for (i, row) in x.rows().into_iter().enumerate() {
                let z = row.dot(&weights) + intercept;
                residual[i] = sigmoid(z) - targets[i];
            }

            let mut grad = Array1::<f64>::zeros(d);
            let mut grad_b = 0.0;
            for (i, row) in x.rows().into_iter().enumerate() {
                let r = residual[i];
                if r != 0.0 {
                    grad.scaled_add(r, &row);
                    grad_b += r;
                }
            }
            grad /= n as f64;
            grad_b /= n as f64;

            let mut max_delta = 0.0f64;
            for j in 0..d {
                let proposed = weights[j] - step * grad[j];
                let updated = soft_threshold(proposed, shrink);
                max_delta = max_delta.max((updated - weights[j]).abs());
                weights[j] = updated;
            }
            let new_intercept = intercept - step * grad_b;
            max_delta = max_delta.max((new_intercept - intercept).abs());
            intercept = new_intercept;

            if max_delta < self.tol {
                break;
            }
        }

        self.state = Some(Fitted { weights, intercept });
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Vec<usize> {
        self.decision(x)
            .into_iter()
            .map(|z| usize::from(z > 0.0))
            .collect()
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Vec<f64> {
        self.decision(x).into_iter().map(sigmoid).collect()
    }
}

fn soft_threshold(v: f64, shrink: f64) -> f64 {
    if v > shrink {
        v - shrink
    } else if v < -shrink {
        v + shrink
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::separable_clusters;
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    #[test]
    fn soft_threshold_shrinks_toward_zero() {
        assert_abs_diff_eq!(soft_threshold(1.0, 0.3), 0.7);
        assert_abs_diff_eq!(soft_threshold(-1.0, 0.3), -0.7);
        assert_abs_diff_eq!(soft_threshold(0.2, 0.3), 0.0);
    }

    #[test]
    fn separates_two_clusters() {
        let (x, y) = separable_clusters(10);
        let mut model = L1Logistic::default();
        model.fit(x.view(), &y).unwrap();
        assert_eq!(model.predict(x.view()), y);
    }

    #[test]
    fn l1_penalty_zeroes_noise_features() {
        // Feature 0 carries the signal; features 1-3 are constant noise.
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..12 {
            let signal = if i < 6 { 0.0 } else { 10.0 };
            rows.extend_from_slice(&[signal + 0.05 * i as f64, 1.0, 1.0, 1.0]);
            labels.push(usize::from(i >= 6));
        }
        let x = Array2::from_shape_vec((12, 4), rows).unwrap();
        let mut model = L1Logistic {
            alpha: 0.05,
            ..L1Logistic::default()
        };
        model.fit(x.view(), &labels).unwrap();
        let fitted = model.state.as_ref().unwrap();
        let signal = fitted.weights[0].abs();
        assert!(signal > 0.0);
        // Constant columns are absorbed by the intercept and shrunk away.
        for j in 1..4 {
            assert!(fitted.weights[j].abs() < 0.05 * signal);
        }
    }

    #[test]
    fn probabilities_track_labels() {
        let (x, y) = separable_clusters(10);
        let mut model = L1Logistic::default();
        model.fit(x.view(), &y).unwrap();
        for (p, &label) in model.predict_proba(x.view()).iter().zip(y.iter()) {
            if label == 1 {
                assert!(*p > 0.5);
            } else {
                assert!(*p < 0.5);
            }
        }
    }
}
