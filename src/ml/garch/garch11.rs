use serde::Serialize;
use std::f64::consts::PI;
use tracing::debug;

use super::optimizer::nelder_mead;
use crate::config::{GarchSettings, InnovationDist};
use crate::error::ForecastFitError;

const MIN_VARIANCE: f64 = 1e-12;
/// Keeps alpha + beta strictly inside the stationary region.
const MAX_PERSISTENCE: f64 = 0.9999;
const BACKCAST_DECAY: f64 = 0.94;
const BACKCAST_WINDOW: usize = 75;
/// Simplex size, in unconstrained coordinates, required for convergence.
const PARAM_TOL: f64 = 1e-4;

/// Constant-mean GARCH(1,1) parameters, in the units of the fitted returns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GarchParams {
    pub mu: f64,
    pub omega: f64,
    pub alpha: f64,
    pub beta: f64,
}

impl GarchParams {
    pub fn persistence(&self) -> f64 {
        self.alpha + self.beta
    }

    pub fn unconditional_variance(&self) -> f64 {
        self.omega / (1.0 - self.persistence()).max(1e-6)
    }

    /// Unconstrained optimizer coordinates: `[mu, ln omega, logit(p), logit(s)]`
    /// with `p = (alpha + beta) / MAX_PERSISTENCE` and `s = alpha / (alpha + beta)`.
    fn to_unconstrained(&self) -> [f64; 4] {
        let p = (self.persistence() / MAX_PERSISTENCE).clamp(1e-6, 1.0 - 1e-6);
        let s = (self.alpha / self.persistence()).clamp(1e-6, 1.0 - 1e-6);
        [self.mu, self.omega.ln(), logit(p), logit(s)]
    }

    fn from_unconstrained(x: &[f64]) -> Self {
        let p = MAX_PERSISTENCE * sigmoid(x[2]);
        let s = sigmoid(x[3]);
        Self {
            mu: x[0],
            omega: x[1].exp().max(MIN_VARIANCE),
            alpha: p * s,
            beta: p * (1.0 - s),
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

/// Fitted GARCH(1,1) model with normal innovations.
///
/// `sigma2[t] = omega + alpha * e[t-1]^2 + beta * sigma2[t-1]`, where the
/// pre-sample `e^2` and `sigma2` are replaced by an exponentially weighted
/// backcast of the first squared residuals.
#[derive(Debug, Clone, Serialize)]
pub struct Garch11 {
    pub params: GarchParams,
    pub log_likelihood: f64,
    pub iterations: usize,
    pub n_obs: usize,
    #[serde(skip)]
    residuals: Vec<f64>,
    #[serde(skip)]
    conditional_variances: Vec<f64>,
}

impl Garch11 {
    /// Fits by maximum likelihood. `returns` must already be scaled
    /// (percentage units) and trimmed to the training window.
    pub fn fit(returns: &[f64], settings: &GarchSettings) -> Result<Self, ForecastFitError> {
        let n = returns.len();
        if n < settings.min_observations.max(2) {
            return Err(ForecastFitError::InsufficientData {
                needed: settings.min_observations.max(2),
                got: n,
            });
        }
        if returns.iter().any(|r| !r.is_finite()) {
            return Err(ForecastFitError::NonFinite);
        }

        let mean = returns.iter().sum::<f64>() / n as f64;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n as f64;
        if variance <= MIN_VARIANCE {
            return Err(ForecastFitError::Degenerate);
        }

        let start = GarchParams {
            mu: mean,
            omega: variance * 0.1,
            alpha: 0.1,
            beta: 0.8,
        };
        let steps = [0.1 * variance.sqrt(), 0.5, 0.5, 0.5];
        let objective = |x: &[f64]| {
            let params = GarchParams::from_unconstrained(x);
            match settings.dist {
                InnovationDist::Normal => -log_likelihood(&params, returns),
            }
        };

        let result = nelder_mead(
            objective,
            &start.to_unconstrained(),
            &steps,
            settings.max_iter,
            settings.tol,
            PARAM_TOL,
        );

        if !result.fx.is_finite() {
            return Err(ForecastFitError::NonFinite);
        }
        if !result.converged {
            return Err(ForecastFitError::NotConverged {
                iterations: result.iterations,
            });
        }

        let params = GarchParams::from_unconstrained(&result.x);
        let (residuals, conditional_variances) = filter(&params, returns);
        debug!(
            "GARCH(1,1) fit: mu={:.4}, omega={:.5}, alpha={:.4}, beta={:.4}, logL={:.2}, iterations={}",
            params.mu, params.omega, params.alpha, params.beta, -result.fx, result.iterations
        );

        Ok(Self {
            params,
            log_likelihood: -result.fx,
            iterations: result.iterations,
            n_obs: n,
            residuals,
            conditional_variances,
        })
    }

    /// One-step-ahead conditional variance, in squared fitted units.
    pub fn forecast_variance(&self) -> f64 {
        let p = &self.params;
        let last_resid = self.residuals.last().copied().unwrap_or(0.0);
        let last_var = self
            .conditional_variances
            .last()
            .copied()
            .unwrap_or_else(|| p.unconditional_variance());
        (p.omega + p.alpha * last_resid.powi(2) + p.beta * last_var).max(MIN_VARIANCE)
    }

    /// `sqrt(variance) / scale * sqrt(trading_days)`
    pub fn forecast_annualized_vol(&self, scale: f64, trading_days: f64) -> f64 {
        self.forecast_variance().sqrt() / scale * trading_days.sqrt()
    }
}

fn backcast(residuals: &[f64]) -> f64 {
    let tau = residuals.len().min(BACKCAST_WINDOW);
    let mut weight = 1.0;
    let mut weighted = 0.0;
    let mut total = 0.0;
    for e in &residuals[..tau] {
        weighted += weight * e * e;
        total += weight;
        weight *= BACKCAST_DECAY;
    }
    (weighted / total).max(MIN_VARIANCE)
}

/// Residuals and conditional variances implied by `params`.
fn filter(params: &GarchParams, returns: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let residuals: Vec<f64> = returns.iter().map(|r| r - params.mu).collect();
    let bc = backcast(&residuals);

    let mut variances = Vec::with_capacity(residuals.len());
    let mut prev_sq = bc;
    let mut prev_var = bc;
    for e in &residuals {
        let var = (params.omega + params.alpha * prev_sq + params.beta * prev_var).max(MIN_VARIANCE);
        variances.push(var);
        prev_sq = e * e;
        prev_var = var;
    }
    (residuals, variances)
}

/// Gaussian log-likelihood of `returns` under `params`.
pub fn log_likelihood(params: &GarchParams, returns: &[f64]) -> f64 {
    let (residuals, variances) = filter(params, returns);
    let ln_2pi = (2.0 * PI).ln();
    residuals
        .iter()
        .zip(&variances)
        .map(|(e, v)| -0.5 * (ln_2pi + v.ln() + e * e / v))
        .sum()
}
