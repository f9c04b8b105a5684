use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::f64::consts::PI;
use tracing::debug;

use crate::error::RegimeFitError;

/// Hidden Markov Model with diagonal-covariance Gaussian emissions.
/// State indices are whatever the fit produces; callers order them.
#[derive(Debug, Clone)]
pub struct GaussianHMM {
    pub n_states: usize,
    /// Number of features (observation dimensions)
    pub n_features: usize,
    /// State transition matrix (n_states x n_states)
    pub transition: Array2<f64>,
    /// Initial state probabilities
    pub start_prob: Array1<f64>,
    /// Mean vectors for each state (n_states x n_features)
    pub means: Array2<f64>,
    /// Diagonal variances for each state (n_states x n_features)
    pub vars: Array2<f64>,
    /// Convergence tolerance on the log-likelihood gain
    pub tol: f64,
    /// Maximum EM iterations
    pub max_iter: usize,
    /// Variance floor
    pub min_covar: f64,
    pub random_state: u64,
}

/// Outcome of a Baum-Welch run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FitSummary {
    pub log_likelihood: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl GaussianHMM {
    /// Create a new HMM with uniform start and a self-persistent transition matrix
    pub fn new(n_states: usize, n_features: usize) -> Self {
        let start_prob = Array1::from_elem(n_states, 1.0 / n_states as f64);

        let off_diag = if n_states > 1 { 0.5 / (n_states - 1) as f64 } else { 0.0 };
        let mut transition = Array2::from_elem((n_states, n_states), off_diag);
        for i in 0..n_states {
            transition[[i, i]] = if n_states > 1 { 0.5 } else { 1.0 };
        }

        Self {
            n_states,
            n_features,
            transition,
            start_prob,
            means: Array2::zeros((n_states, n_features)),
            vars: Array2::ones((n_states, n_features)),
            tol: 1e-4,
            max_iter: 100,
            min_covar: 1e-3,
            random_state: 42,
        }
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_min_covar(mut self, min_covar: f64) -> Self {
        self.min_covar = min_covar;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    fn check_observations(&self, observations: &Array2<f64>) -> Result<(), RegimeFitError> {
        if observations.ncols() != self.n_features {
            return Err(RegimeFitError::FeatureMismatch {
                expected: self.n_features,
                got: observations.ncols(),
            });
        }
        if observations.iter().any(|v| !v.is_finite()) {
            return Err(RegimeFitError::NonFinite);
        }
        Ok(())
    }

    /// Seeded k-means++ initialization of means and variances
    pub fn init_with_kmeans(&mut self, observations: &Array2<f64>) -> Result<(), RegimeFitError> {
        self.check_observations(observations)?;
        let n_obs = observations.nrows();
        if n_obs < self.n_states {
            return Err(RegimeFitError::TooFewObservations {
                needed: self.n_states,
                got: n_obs,
            });
        }

        let mut rng = StdRng::seed_from_u64(self.random_state);
        let sq_dist = |i: usize, center: &Array1<f64>| -> f64 {
            observations
                .row(i)
                .iter()
                .zip(center.iter())
                .map(|(o, m)| (o - m).powi(2))
                .sum()
        };

        // k-means++ seeding
        let mut centers: Vec<Array1<f64>> = Vec::with_capacity(self.n_states);
        centers.push(observations.row(rng.gen_range(0..n_obs)).to_owned());
        while centers.len() < self.n_states {
            let dists: Vec<f64> = (0..n_obs)
                .map(|i| {
                    centers
                        .iter()
                        .map(|c| sq_dist(i, c))
                        .fold(f64::INFINITY, f64::min)
                })
                .collect();
            let total: f64 = dists.iter().sum();
            let next = if total > 0.0 {
                let mut target = rng.gen::<f64>() * total;
                let mut chosen = n_obs - 1;
                for (i, d) in dists.iter().enumerate() {
                    if target < *d {
                        chosen = i;
                        break;
                    }
                    target -= d;
                }
                chosen
            } else {
                rng.gen_range(0..n_obs)
            };
            centers.push(observations.row(next).to_owned());
        }
        for (state, center) in centers.iter().enumerate() {
            self.means.row_mut(state).assign(center);
        }

        // Lloyd iterations
        let mut labels = vec![0usize; n_obs];
        for _ in 0..10 {
            for (i, label) in labels.iter_mut().enumerate() {
                let mut min_dist = f64::INFINITY;
                for state in 0..self.n_states {
                    let dist = sq_dist(i, &self.means.row(state).to_owned());
                    if dist < min_dist {
                        min_dist = dist;
                        *label = state;
                    }
                }
            }

            let mut sums = Array2::<f64>::zeros((self.n_states, self.n_features));
            let mut counts = vec![0usize; self.n_states];
            for (i, &label) in labels.iter().enumerate() {
                for j in 0..self.n_features {
                    sums[[label, j]] += observations[[i, j]];
                }
                counts[label] += 1;
            }
            for state in 0..self.n_states {
                if counts[state] > 0 {
                    for j in 0..self.n_features {
                        self.means[[state, j]] = sums[[state, j]] / counts[state] as f64;
                    }
                }
            }
        }

        // Per-cluster variances, falling back to the global variance
        let global_var: Vec<f64> = (0..self.n_features)
            .map(|j| {
                let col = observations.column(j);
                let mean = col.sum() / n_obs as f64;
                col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n_obs as f64
            })
            .collect();

        for state in 0..self.n_states {
            let members: Vec<usize> = (0..n_obs).filter(|&i| labels[i] == state).collect();
            for j in 0..self.n_features {
                let var = if members.len() > 1 {
                    members
                        .iter()
                        .map(|&i| (observations[[i, j]] - self.means[[state, j]]).powi(2))
                        .sum::<f64>()
                        / members.len() as f64
                } else {
                    global_var[j]
                };
                self.vars[[state, j]] = var.max(self.min_covar);
            }
        }

        Ok(())
    }

    /// Log emission density of every observation under every state (n_obs x n_states)
    fn log_emission_matrix(&self, observations: &Array2<f64>) -> Array2<f64> {
        let n_obs = observations.nrows();
        let mut log_b = Array2::zeros((n_obs, self.n_states));
        for t in 0..n_obs {
            for state in 0..self.n_states {
                let mut acc = 0.0;
                for j in 0..self.n_features {
                    let var = self.vars[[state, j]];
                    let diff = observations[[t, j]] - self.means[[state, j]];
                    acc += -0.5 * ((2.0 * PI * var).ln() + diff * diff / var);
                }
                log_b[[t, state]] = acc;
            }
        }
        log_b
    }

    /// Forward algorithm in log space
    fn forward(&self, log_b: &Array2<f64>) -> (Array2<f64>, f64) {
        let n_obs = log_b.nrows();
        let log_trans = self.transition.mapv(f64::ln);
        let mut log_alpha = Array2::from_elem((n_obs, self.n_states), f64::NEG_INFINITY);

        for state in 0..self.n_states {
            log_alpha[[0, state]] = self.start_prob[state].ln() + log_b[[0, state]];
        }

        let mut terms = vec![0.0; self.n_states];
        for t in 1..n_obs {
            for j in 0..self.n_states {
                for i in 0..self.n_states {
                    terms[i] = log_alpha[[t - 1, i]] + log_trans[[i, j]];
                }
                log_alpha[[t, j]] = log_sum_exp(&terms) + log_b[[t, j]];
            }
        }

        let log_prob = log_sum_exp(&log_alpha.row(n_obs - 1).to_vec());
        (log_alpha, log_prob)
    }

    /// Backward algorithm in log space
    fn backward(&self, log_b: &Array2<f64>) -> Array2<f64> {
        let n_obs = log_b.nrows();
        let log_trans = self.transition.mapv(f64::ln);
        let mut log_beta = Array2::from_elem((n_obs, self.n_states), f64::NEG_INFINITY);

        for state in 0..self.n_states {
            log_beta[[n_obs - 1, state]] = 0.0;
        }

        let mut terms = vec![0.0; self.n_states];
        for t in (0..n_obs - 1).rev() {
            for i in 0..self.n_states {
                for j in 0..self.n_states {
                    terms[j] = log_trans[[i, j]] + log_b[[t + 1, j]] + log_beta[[t + 1, j]];
                }
                log_beta[[t, i]] = log_sum_exp(&terms);
            }
        }

        log_beta
    }

    fn posteriors(log_alpha: &Array2<f64>, log_beta: &Array2<f64>) -> Array2<f64> {
        let (n_obs, n_states) = log_alpha.dim();
        let mut gamma = Array2::zeros((n_obs, n_states));
        let mut terms = vec![0.0; n_states];
        for t in 0..n_obs {
            for s in 0..n_states {
                terms[s] = log_alpha[[t, s]] + log_beta[[t, s]];
            }
            let log_denom = log_sum_exp(&terms);
            for s in 0..n_states {
                gamma[[t, s]] = (terms[s] - log_denom).exp();
            }
        }
        gamma
    }

    /// Train with Baum-Welch EM. Hitting the iteration cap is not an error:
    /// the parameters reached so far are kept and `converged` is false.
    pub fn fit(&mut self, observations: &Array2<f64>) -> Result<FitSummary, RegimeFitError> {
        self.check_observations(observations)?;
        let n_obs = observations.nrows();
        if n_obs < 2 {
            return Err(RegimeFitError::TooFewObservations { needed: 2, got: n_obs });
        }

        self.init_with_kmeans(observations)?;

        let mut prev_log_prob = f64::NEG_INFINITY;
        let log_trans_floor = f64::MIN_POSITIVE;

        for iteration in 0..self.max_iter {
            // E-step
            let log_b = self.log_emission_matrix(observations);
            let (log_alpha, log_prob) = self.forward(&log_b);
            let log_beta = self.backward(&log_b);

            if !log_prob.is_finite() {
                return Err(RegimeFitError::NonFinite);
            }
            if (log_prob - prev_log_prob).abs() < self.tol {
                debug!("HMM converged after {} iterations (logL={:.4})", iteration + 1, log_prob);
                return Ok(FitSummary {
                    log_likelihood: log_prob,
                    iterations: iteration + 1,
                    converged: true,
                });
            }
            prev_log_prob = log_prob;

            let gamma = Self::posteriors(&log_alpha, &log_beta);

            let log_trans = self.transition.mapv(|p| p.max(log_trans_floor).ln());
            let mut xi_sum = Array2::<f64>::zeros((self.n_states, self.n_states));
            for t in 0..n_obs - 1 {
                for i in 0..self.n_states {
                    for j in 0..self.n_states {
                        let log_xi = log_alpha[[t, i]]
                            + log_trans[[i, j]]
                            + log_b[[t + 1, j]]
                            + log_beta[[t + 1, j]]
                            - log_prob;
                        xi_sum[[i, j]] += log_xi.exp();
                    }
                }
            }

            // M-step
            for state in 0..self.n_states {
                self.start_prob[state] = gamma[[0, state]];
            }

            for i in 0..self.n_states {
                let row_sum: f64 = xi_sum.row(i).sum();
                if row_sum > 0.0 {
                    for j in 0..self.n_states {
                        self.transition[[i, j]] = xi_sum[[i, j]] / row_sum;
                    }
                }
            }

            for state in 0..self.n_states {
                let gamma_sum: f64 = gamma.column(state).sum();
                if gamma_sum <= f64::EPSILON {
                    continue;
                }
                for feat in 0..self.n_features {
                    let mut weighted_sum = 0.0;
                    for t in 0..n_obs {
                        weighted_sum += gamma[[t, state]] * observations[[t, feat]];
                    }
                    let mean = weighted_sum / gamma_sum;

                    let mut weighted_sq = 0.0;
                    for t in 0..n_obs {
                        weighted_sq += gamma[[t, state]] * (observations[[t, feat]] - mean).powi(2);
                    }

                    self.means[[state, feat]] = mean;
                    self.vars[[state, feat]] = (weighted_sq / gamma_sum).max(self.min_covar);
                }
            }
        }

        // Did not converge within max_iter iterations; score the kept parameters
        let (_, log_prob) = self.forward(&self.log_emission_matrix(observations));
        if !log_prob.is_finite() {
            return Err(RegimeFitError::NonFinite);
        }
        Ok(FitSummary {
            log_likelihood: log_prob,
            iterations: self.max_iter,
            converged: false,
        })
    }

    /// Smoothed posterior state probabilities (forward-backward), n_obs x n_states
    pub fn predict_proba(&self, observations: &Array2<f64>) -> Result<Array2<f64>, RegimeFitError> {
        self.check_observations(observations)?;
        if observations.nrows() == 0 {
            return Err(RegimeFitError::TooFewObservations { needed: 1, got: 0 });
        }
        let log_b = self.log_emission_matrix(observations);
        let (log_alpha, _) = self.forward(&log_b);
        let log_beta = self.backward(&log_b);
        Ok(Self::posteriors(&log_alpha, &log_beta))
    }

    /// Most likely state sequence (Viterbi)
    pub fn predict(&self, observations: &Array2<f64>) -> Result<Vec<usize>, RegimeFitError> {
        self.check_observations(observations)?;
        let n_obs = observations.nrows();
        if n_obs == 0 {
            return Ok(Vec::new());
        }

        let log_b = self.log_emission_matrix(observations);
        let log_trans = self.transition.mapv(f64::ln);
        let mut log_delta = Array2::from_elem((n_obs, self.n_states), f64::NEG_INFINITY);
        let mut psi = Array2::<usize>::zeros((n_obs, self.n_states));

        for state in 0..self.n_states {
            log_delta[[0, state]] = self.start_prob[state].ln() + log_b[[0, state]];
        }

        for t in 1..n_obs {
            for j in 0..self.n_states {
                let mut max_val = f64::NEG_INFINITY;
                let mut max_state = 0;
                for i in 0..self.n_states {
                    let val = log_delta[[t - 1, i]] + log_trans[[i, j]];
                    if val > max_val {
                        max_val = val;
                        max_state = i;
                    }
                }
                log_delta[[t, j]] = max_val + log_b[[t, j]];
                psi[[t, j]] = max_state;
            }
        }

        // Backtracking
        let mut states = vec![0; n_obs];
        let mut max_val = f64::NEG_INFINITY;
        for state in 0..self.n_states {
            if log_delta[[n_obs - 1, state]] > max_val {
                max_val = log_delta[[n_obs - 1, state]];
                states[n_obs - 1] = state;
            }
        }
        for t in (0..n_obs - 1).rev() {
            states[t] = psi[[t + 1, states[t + 1]]];
        }

        Ok(states)
    }
}

/// Log-sum-exp trick for numerical stability
pub(crate) fn log_sum_exp(log_values: &[f64]) -> f64 {
    if log_values.is_empty() {
        return f64::NEG_INFINITY;
    }

    let max_val = log_values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max_val == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }

    let sum_exp: f64 = log_values.iter().map(|&v| (v - max_val).exp()).sum();
    max_val + sum_exp.ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_cluster_observations() -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(7);
        let mut data = Vec::new();
        for block in 0..9 {
            let center = match block % 3 {
                0 => -2.0,
                1 => 0.0,
                _ => 3.0,
            };
            for _ in 0..40 {
                data.push(center + (rng.gen::<f64>() - 0.5) * 0.4);
            }
        }
        Array2::from_shape_vec((data.len(), 1), data).unwrap()
    }

    #[test]
    fn test_hmm_creation() {
        let hmm = GaussianHMM::new(3, 1);
        assert_eq!(hmm.transition.shape(), &[3, 3]);
        assert_eq!(hmm.means.shape(), &[3, 1]);
        for row in hmm.transition.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_log_sum_exp() {
        let values = vec![-1.0, -2.0, -3.0];
        let result = log_sum_exp(&values);
        assert!(result > -1.0 && result < 0.0);
        assert_eq!(log_sum_exp(&[f64::NEG_INFINITY]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_fit_recovers_cluster_means() {
        let obs = three_cluster_observations();
        let mut hmm = GaussianHMM::new(3, 1);
        let summary = hmm.fit(&obs).unwrap();
        assert!(summary.log_likelihood.is_finite());

        let mut means: Vec<f64> = hmm.means.column(0).to_vec();
        means.sort_by(|a, b| a.total_cmp(b));
        assert!((means[0] + 2.0).abs() < 0.2);
        assert!(means[1].abs() < 0.2);
        assert!((means[2] - 3.0).abs() < 0.2);
    }

    #[test]
    fn test_viterbi_and_posteriors_agree_on_clear_data() {
        let obs = three_cluster_observations();
        let mut hmm = GaussianHMM::new(3, 1);
        hmm.fit(&obs).unwrap();

        let states = hmm.predict(&obs).unwrap();
        let proba = hmm.predict_proba(&obs).unwrap();
        assert_eq!(states.len(), obs.nrows());
        for (t, &s) in states.iter().enumerate() {
            let row = proba.row(t);
            assert!((row.sum() - 1.0).abs() < 1e-9);
            let argmax = (0..3).max_by(|&a, &b| row[a].total_cmp(&row[b])).unwrap();
            assert_eq!(argmax, s);
        }
    }

    #[test]
    fn test_iteration_cap_is_not_an_error() {
        let obs = three_cluster_observations();
        let mut hmm = GaussianHMM::new(3, 1).with_max_iter(1).with_tol(0.0);
        let summary = hmm.fit(&obs).unwrap();
        assert!(!summary.converged);
        assert_eq!(summary.iterations, 1);
    }

    #[test]
    fn test_capped_fit_reports_likelihood_of_kept_parameters() {
        let obs = three_cluster_observations();
        let mut hmm = GaussianHMM::new(3, 1).with_max_iter(2).with_tol(0.0);
        let summary = hmm.fit(&obs).unwrap();

        let (_, expected) = hmm.forward(&hmm.log_emission_matrix(&obs));
        assert!((summary.log_likelihood - expected).abs() < 1e-9);

        // EM never lowers the likelihood, so the kept parameters score at
        // least as well as the one-iteration fit
        let mut one = GaussianHMM::new(3, 1).with_max_iter(1).with_tol(0.0);
        let first = one.fit(&obs).unwrap();
        assert!(summary.log_likelihood >= first.log_likelihood - 1e-9);
    }

    #[test]
    fn test_feature_mismatch() {
        let hmm = GaussianHMM::new(3, 2);
        let obs = Array2::zeros((5, 1));
        assert!(matches!(
            hmm.predict(&obs),
            Err(RegimeFitError::FeatureMismatch { expected: 2, got: 1 })
        ));
    }
}
