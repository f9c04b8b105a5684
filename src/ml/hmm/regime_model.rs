use chrono::NaiveDate;
use ndarray::{Array1, Array2, ArrayViewMut1};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{FitSummary, GaussianHMM};
use crate::config::RegimeSettings;
use crate::error::RegimeFitError;
use crate::features::{FeatureSeries, StandardScaler};
use crate::types::RegimeLabel;

/// Regime assignment for one bar. `posteriors` is indexed by [`RegimeLabel`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegimeInference {
    pub date: NaiveDate,
    pub label: RegimeLabel,
    pub posteriors: [f64; 3],
}

impl RegimeInference {
    pub fn posterior_low(&self) -> f64 {
        self.posteriors[0]
    }

    pub fn posterior_medium(&self) -> f64 {
        self.posteriors[1]
    }

    pub fn posterior_high(&self) -> f64 {
        self.posteriors[2]
    }
}

/// Fitted 3-state volatility regime model. Immutable after [`RegimeModel::fit`].
///
/// The HMM works on the standardized `log_vol` column. Internal state indices
/// are arbitrary, so every fit sorts the states by emission mean and keeps
/// `label_to_state[label] = internal index`.
#[derive(Debug, Clone)]
pub struct RegimeModel {
    hmm: GaussianHMM,
    scaler: StandardScaler,
    label_to_state: [usize; 3],
    summary: FitSummary,
}

impl RegimeModel {
    pub fn fit(features: &FeatureSeries, settings: &RegimeSettings) -> Result<Self, RegimeFitError> {
        Self::fit_observations(&features.observation_matrix(), settings)
    }

    pub fn fit_observations(
        observations: &Array2<f64>,
        settings: &RegimeSettings,
    ) -> Result<Self, RegimeFitError> {
        let needed = settings.n_states * settings.min_obs_per_state;
        if observations.nrows() < needed {
            return Err(RegimeFitError::TooFewObservations {
                needed,
                got: observations.nrows(),
            });
        }

        let scaler = StandardScaler::fit(observations)?;
        let scaled = scaler.transform(observations)?;

        let mut hmm = GaussianHMM::new(settings.n_states, observations.ncols())
            .with_max_iter(settings.n_iter)
            .with_tol(settings.tol)
            .with_min_covar(settings.min_covar)
            .with_random_state(settings.random_state);
        let summary = hmm.fit(&scaled)?;

        if !summary.converged {
            warn!(
                "Regime model did not converge within {} iterations; using last estimate (logL={:.4})",
                summary.iterations, summary.log_likelihood
            );
        }

        renormalize_rows(&mut hmm.transition);
        renormalize_vector(hmm.start_prob.view_mut());

        let label_to_state = label_mapping(&hmm.means);
        info!(
            "Regime model fitted on {} observations: logL={:.2}, iterations={}, means(low/med/high)=[{:.3}, {:.3}, {:.3}]",
            observations.nrows(),
            summary.log_likelihood,
            summary.iterations,
            hmm.means[[label_to_state[0], 0]],
            hmm.means[[label_to_state[1], 0]],
            hmm.means[[label_to_state[2], 0]],
        );

        Ok(Self {
            hmm,
            scaler,
            label_to_state,
            summary,
        })
    }

    pub fn summary(&self) -> FitSummary {
        self.summary
    }

    /// Emission means in standardized units, indexed by label.
    pub fn label_means(&self) -> [f64; 3] {
        self.label_to_state.map(|s| self.hmm.means[[s, 0]])
    }

    /// Transition matrix with rows and columns in label order.
    pub fn transition_matrix(&self) -> Array2<f64> {
        let m = &self.label_to_state;
        Array2::from_shape_fn((3, 3), |(i, j)| self.hmm.transition[[m[i], m[j]]])
    }

    /// Initial-state distribution in label order.
    pub fn start_probabilities(&self) -> Array1<f64> {
        Array1::from_iter(self.label_to_state.iter().map(|&s| self.hmm.start_prob[s]))
    }

    pub fn infer(&self, features: &FeatureSeries) -> Result<Vec<RegimeInference>, RegimeFitError> {
        let (labels, posteriors) = self.infer_observations(&features.observation_matrix())?;
        Ok(features
            .rows
            .iter()
            .zip(labels)
            .zip(posteriors)
            .map(|((row, label), posteriors)| RegimeInference {
                date: row.date,
                label,
                posteriors,
            })
            .collect())
    }

    /// Viterbi labels and posterior rows, both permuted into label order.
    pub fn infer_observations(
        &self,
        observations: &Array2<f64>,
    ) -> Result<(Vec<RegimeLabel>, Vec<[f64; 3]>), RegimeFitError> {
        let scaled = self.scaler.transform(observations)?;
        let states = self.hmm.predict(&scaled)?;
        let proba = self.hmm.predict_proba(&scaled)?;

        let mut state_to_label = [RegimeLabel::Low; 3];
        for label in RegimeLabel::ALL {
            state_to_label[self.label_to_state[label.index()]] = label;
        }

        let labels = states.iter().map(|&s| state_to_label[s]).collect();
        let posteriors = proba
            .rows()
            .into_iter()
            .map(|row| {
                let mut p = Array1::from_iter(self.label_to_state.iter().map(|&s| row[s]));
                renormalize_vector(p.view_mut());
                [p[0], p[1], p[2]]
            })
            .collect();

        Ok((labels, posteriors))
    }
}

/// `label_to_state`: internal state indices sorted by ascending mean of the
/// first feature.
fn label_mapping(means: &Array2<f64>) -> [usize; 3] {
    let mut order: Vec<usize> = (0..means.nrows()).collect();
    order.sort_by(|&a, &b| means[[a, 0]].total_cmp(&means[[b, 0]]));
    [order[0], order[1], order[2]]
}

/// Makes a probability vector sum to one.
///
/// Negative or NaN entries are zeroed, the vector is divided by its sum and
/// the remaining floating-point residual is added to the largest entry.
/// A vector with no mass becomes uniform.
pub fn renormalize_vector(mut v: ArrayViewMut1<f64>) {
    if v.is_empty() {
        return;
    }
    v.mapv_inplace(|p| if p.is_finite() && p > 0.0 { p } else { 0.0 });

    let sum = v.sum();
    if sum <= 0.0 || !sum.is_finite() {
        let uniform = 1.0 / v.len() as f64;
        v.fill(uniform);
    } else {
        v.mapv_inplace(|p| p / sum);
    }

    let residual = 1.0 - v.sum();
    if residual != 0.0 {
        let dominant = (0..v.len())
            .max_by(|&a, &b| v[a].total_cmp(&v[b]))
            .unwrap_or(0);
        v[dominant] += residual;
        debug!("Absorbed probability drift of {:e} into entry {}", residual, dominant);
    }
}

/// Applies [`renormalize_vector`] to every row of a stochastic matrix.
pub fn renormalize_rows(m: &mut Array2<f64>) {
    for row in m.rows_mut() {
        renormalize_vector(row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureSettings;
    use crate::features::test_support::regime_bars;
    use crate::features::{RangeEstimator, VolatilitySource};
    use ndarray::array;
    use proptest::prelude::*;

    fn fitted() -> (RegimeModel, FeatureSeries) {
        let features = RangeEstimator::new(FeatureSettings::default())
            .to_features(&regime_bars(720, 11))
            .unwrap();
        let model = RegimeModel::fit(&features, &RegimeSettings::default()).unwrap();
        (model, features)
    }

    #[test]
    fn test_fitted_probabilities_sum_to_one() {
        let (model, _) = fitted();
        for row in model.transition_matrix().rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
        assert!((model.start_probabilities().sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_label_means_are_increasing() {
        let (model, _) = fitted();
        let means = model.label_means();
        assert!(means[0] < means[1]);
        assert!(means[1] < means[2]);
    }

    #[test]
    fn test_posteriors_sum_to_one_and_match_labels() {
        let (model, features) = fitted();
        let inferred = model.infer(&features).unwrap();
        assert_eq!(inferred.len(), features.len());
        for inf in &inferred {
            let sum: f64 = inf.posteriors.iter().sum();
            assert!((sum - 1.0).abs() < 1e-6);
        }
        // Turbulent blocks should be labelled High more often than Low
        let high = inferred.iter().filter(|i| i.label == RegimeLabel::High).count();
        assert!(high > 0);
    }

    #[test]
    fn test_high_label_tracks_highest_volatility() {
        let (model, features) = fitted();
        let inferred = model.infer(&features).unwrap();
        let avg_vol = |label: RegimeLabel| {
            let vols: Vec<f64> = inferred
                .iter()
                .zip(&features.rows)
                .filter(|(i, _)| i.label == label)
                .map(|(_, r)| r.annualized_vol)
                .collect();
            vols.iter().sum::<f64>() / vols.len().max(1) as f64
        };
        assert!(avg_vol(RegimeLabel::High) > avg_vol(RegimeLabel::Low));
    }

    #[test]
    fn test_fit_is_deterministic() {
        let (a, features) = fitted();
        let b = RegimeModel::fit(&features, &RegimeSettings::default()).unwrap();
        assert_eq!(a.label_means(), b.label_means());
        assert_eq!(a.infer(&features).unwrap(), b.infer(&features).unwrap());
    }

    #[test]
    fn test_too_few_observations() {
        let obs = Array2::from_shape_fn((50, 1), |(i, _)| i as f64);
        let err = RegimeModel::fit_observations(&obs, &RegimeSettings::default()).unwrap_err();
        assert!(matches!(err, RegimeFitError::TooFewObservations { needed: 90, got: 50 }));
    }

    #[test]
    fn test_constant_input_is_degenerate() {
        let obs = Array2::from_elem((200, 1), -1.5);
        let err = RegimeModel::fit_observations(&obs, &RegimeSettings::default()).unwrap_err();
        assert!(matches!(err, RegimeFitError::Degenerate));
    }

    #[test]
    fn test_renormalize_absorbs_drift() {
        let mut m = array![[0.7, 0.2, 0.1 + 1e-9], [0.3, 0.3, 0.3], [0.0, 0.0, 0.0]];
        renormalize_rows(&mut m);
        for row in m.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-15);
        }
        assert!((m[[1, 0]] - 1.0 / 3.0).abs() < 1e-12);
        assert!((m[[2, 2]] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_renormalize_drops_invalid_entries() {
        let mut v = array![f64::NAN, -0.2, 0.5];
        renormalize_vector(v.view_mut());
        assert_eq!(v.to_vec(), vec![0.0, 0.0, 1.0]);
    }

    proptest! {
        #[test]
        fn prop_renormalized_vector_sums_to_one(values in prop::collection::vec(0.0f64..10.0, 1..8)) {
            let mut v = Array1::from_vec(values);
            renormalize_vector(v.view_mut());
            prop_assert!((v.sum() - 1.0).abs() < 1e-12);
            prop_assert!(v.iter().all(|p| *p >= 0.0));
        }
    }
}
