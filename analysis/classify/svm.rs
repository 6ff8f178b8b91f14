//! RBF-kernel support vector classifier with probability estimates.
//!
//! Training uses the simplified SMO scheme: sweep the examples, and for each
//! KKT violator pick a random partner, solve the two-variable subproblem
//! analytically and update the bias. The partner choice draws from a seeded
//! generator, so fits are reproducible. Probabilities come from Platt
//! scaling, a sigmoid fitted on the training decision values with the
//! regularized Newton iteration of Lin, Lin & Weng (2007).

use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use super::{check_training_set, Classifier, TrainError};

#[derive(Debug, Clone)]
pub struct RbfSvm {
    /// Soft-margin penalty.
    c: f64,
    /// Kernel width; `None` selects 1 / (n_features * var(X)).
    gamma: Option<f64>,
    tol: f64,
    max_passes: usize,
    max_sweeps: usize,
    seed: u64,
    state: Option<Fitted>,
}

#[derive(Debug, Clone)]
struct Fitted {
    support: Array2<f64>,
    /// Per-sample `alpha_i * y_i` with y in {-1, +1}.
    coeffs: Vec<f64>,
    bias: f64,
    gamma: f64,
    platt_a: f64,
    platt_b: f64,
}

impl RbfSvm {
    pub fn new(seed: u64) -> Self {
        Self {
            c: 1.0,
            gamma: None,
            tol: 1e-3,
            max_passes: 5,
            max_sweeps: 200,
            seed,
            state: None,
        }
    }

    fn decision(&self, x: ArrayView2<f64>) -> Vec<f64> {
        let fitted = self.state.as_ref().expect("SVM used before fit");
        x.rows()
            .into_iter()
            .map(|row| decision_one(fitted, row))
            .collect()
    }
}

fn decision_one(fitted: &Fitted, row: ArrayView1<f64>) -> f64 {
    let mut acc = fitted.bias;
    for (sv, &coeff) in fitted.support.rows().into_iter().zip(fitted.coeffs.iter()) {
        if coeff != 0.0 {
            acc += coeff * rbf(sv, row, fitted.gamma);
        }
    }
    acc
}

fn rbf(a: ArrayView1<f64>, b: ArrayView1<f64>, gamma: f64) -> f64 {
    let mut dist = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        let d = x - y;
        dist += d * d;
    }
    (-gamma * dist).exp()
}

impl Classifier for RbfSvm {
    fn fit(&mut self, x: ArrayView2<f64>, y: &[usize]) -> Result<(), TrainError> {
        check_training_set(x, y)?;
        let n = x.nrows();
        let signs: Vec<f64> = y.iter().map(|&l| if l == 1 { 1.0 } else { -1.0 }).collect();

        let gamma = self.gamma.unwrap_or_else(|| {
            let flat: Vec<f64> = x.iter().copied().collect();
            let (_, std) = crate::metrics::mean_std(&flat);
            let var = std * std;
            if var > 0.0 {
                1.0 / (x.ncols() as f64 * var)
            } else {
                1.0 / x.ncols() as f64
            }
        });

        // Precomputed Gram matrix; training sets here are small.
        let mut kernel = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in i..n {
                let k = rbf(x.row(i), x.row(j), gamma);
                kernel[[i, j]] = k;
                kernel[[j, i]] = k;
            }
        }

        let mut alpha = vec![0.0f64; n];
        let mut bias = 0.0f64;
        let mut rng = StdRng::seed_from_u64(self.seed);

        let error = |alpha: &[f64], bias: f64, kernel: &Array2<f64>, i: usize| -> f64 {
            let mut f = bias;
            for j in 0..n {
                if alpha[j] != 0.0 {
                    f += alpha[j] * signs[j] * kernel[[j, i]];
                }
            }
            f - signs[i]
        };

        let mut passes = 0;
        let mut sweeps = 0;
        while passes < self.max_passes && sweeps < self.max_sweeps {
            let mut changed = 0;
            for i in 0..n {
                let e_i = error(&alpha, bias, &kernel, i);
                let violates = (signs[i] * e_i < -self.tol && alpha[i] < self.c)
                    || (signs[i] * e_i > self.tol && alpha[i] > 0.0);
                if !violates {
                    continue;
                }

                let mut j = rng.gen_range(0..n - 1);
                if j >= i {
                    j += 1;
                }
                let e_j = error(&alpha, bias, &kernel, j);

                let (old_i, old_j) = (alpha[i], alpha[j]);
                let (lo, hi) = if signs[i] != signs[j] {
                    ((old_j - old_i).max(0.0), (self.c + old_j - old_i).min(self.c))
                } else {
                    ((old_i + old_j - self.c).max(0.0), (old_i + old_j).min(self.c))
                };
                if lo >= hi {
                    continue;
                }

                let eta = 2.0 * kernel[[i, j]] - kernel[[i, i]] - kernel[[j, j]];
                if eta >= 0.0 {
                    continue;
                }

                let mut new_j = old_j - signs[j] * (e_i - e_j) / eta;
                new_j = new_j.clamp(lo, hi);
                if (new_j - old_j).abs() < 1e-5 {
                    continue;
                }
                let new_i = old_i + signs[i] * signs[j] * (old_j - new_j);

                alpha[i] = new_i;
                alpha[j] = new_j;

                let b1 = bias
                    - e_i
                    - signs[i] * (new_i - old_i) * kernel[[i, i]]
                    - signs[j] * (new_j - old_j) * kernel[[i, j]];
                let b2 = bias
                    - e_j
                    - signs[i] * (new_i - old_i) * kernel[[i, j]]
                    - signs[j] * (new_j - old_j) * kernel[[j, j]];
                bias = if new_i > 0.0 && new_i < self.c {
                    b1
                } else if new_j > 0.0 && new_j < self.c {
                    b2
                } else {
                    (b1 + b2) / 2.0
                };
                changed += 1;
            }
            if changed == 0 {
                passes += 1;
            } else {
                passes = 0;
            }
            sweeps += 1;
        }

        // Platt scaling is fitted on the training decision values.
        let coeffs: Vec<f64> = alpha.iter().zip(signs.iter()).map(|(a, s)| a * s).collect();
        let decisions: Vec<f64> = (0..n)
            .map(|i| {
                let mut f = bias;
                for j in 0..n {
                    if coeffs[j] != 0.0 {
                        f += coeffs[j] * kernel[[j, i]];
                    }
                }
                f
            })
            .collect();
        let (platt_a, platt_b) = platt_fit(&decisions, y);

        self.state = Some(Fitted {
            support: x.to_owned(),
            coeffs,
            bias,
            gamma,
            platt_a,
            platt_b,
        });
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Vec<usize> {
        self.decision(x)
            .into_iter()
            .map(|f| usize::from(f > 0.0))
            .collect()
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Vec<f64> {
        let fitted = self.state.as_ref().expect("SVM used before fit");
        self.decision(x)
            .into_iter()
            .map(|f| platt_prob(f, fitted.platt_a, fitted.platt_b))
            .collect()
    }
}

fn platt_prob(decision: f64, a: f64, b: f64) -> f64 {
    let z = a * decision + b;
    // Numerically stable 1 / (1 + exp(z)).
    if z >= 0.0 {
        (-z).exp() / (1.0 + (-z).exp())
    } else {
        1.0 / (1.0 + z.exp())
    }
}

/// Fit the Platt sigmoid `P(y=1|f) = 1/(1+exp(A f + B))` by regularized
/// Newton descent on the cross-entropy (Lin, Lin & Weng 2007).
fn platt_fit(decisions: &[f64], labels: &[usize]) -> (f64, f64) {
    let n = decisions.len();
    let n_pos = labels.iter().filter(|&&l| l == 1).count() as f64;
    let n_neg = n as f64 - n_pos;

    let hi = (n_pos + 1.0) / (n_pos + 2.0);
    let lo = 1.0 / (n_neg + 2.0);
    let targets: Vec<f64> = labels
        .iter()
        .map(|&l| if l == 1 { hi } else { lo })
        .collect();

    let mut a = 0.0f64;
    let mut b = ((n_neg + 1.0) / (n_pos + 1.0)).ln();
    let sigma = 1e-12;

    for _ in 0..100 {
        let mut h11 = sigma;
        let mut h22 = sigma;
        let mut h21 = 0.0;
        let mut g1 = 0.0;
        let mut g2 = 0.0;
        for i in 0..n {
            let z = a * decisions[i] + b;
            let (p, q) = if z >= 0.0 {
                let e = (-z).exp();
                (e / (1.0 + e), 1.0 / (1.0 + e))
            } else {
                let e = z.exp();
                (1.0 / (1.0 + e), e / (1.0 + e))
            };
            let d1 = targets[i] - p;
            let d2 = p * q;
            g1 += decisions[i] * d1;
            g2 += d1;
            h11 += decisions[i] * decisions[i] * d2;
            h22 += d2;
            h21 += decisions[i] * d2;
        }
        if g1.abs() < 1e-5 && g2.abs() < 1e-5 {
            break;
        }

        let det = h11 * h22 - h21 * h21;
        let da = -(h22 * g1 - h21 * g2) / det;
        let db = -(h11 * g2 - h21 * g1) / det;
        // The objective is convex; the full Newton step is accepted with a
        // simple halving guard against overshoot.
        let mut step = 1.0;
        let objective = |a: f64, b: f64| -> f64 {
            let mut obj = 0.0;
            for i in 0..n {
                let z = a * decisions[i] + b;
                obj += if z >= 0.0 {
                    targets[i] * z + (1.0 + (-z).exp()).ln()
                } else {
                    (targets[i] - 1.0) * z + (1.0 + z.exp()).ln()
                };
            }
            obj
        };
        let base = objective(a, b);
        for _ in 0..20 {
            if objective(a + step * da, b + step * db) < base + 1e-12 {
                break;
            }
            step /= 2.0;
        }
        a += step * da;
        b += step * db;
    }

    (a, b)
}
