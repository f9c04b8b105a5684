use serde::Serialize;
use tracing::{info, warn};

use super::garch11::Garch11;
use crate::config::GarchSettings;
use crate::features::FeatureSeries;

/// One-step-ahead annualized volatility forecast.
///
/// When the GARCH fit fails the forecast falls back to the last realized
/// (smoothed) annualized volatility, `model` is `None` and `degraded` is set.
#[derive(Debug, Clone, Serialize)]
pub struct VolForecast {
    pub annualized_vol: f64,
    pub degraded: bool,
    pub fallback_reason: Option<String>,
    pub model: Option<Garch11>,
}

/// Fits GARCH(1,1) on the trailing window of scaled log returns and forecasts
/// the next bar. Never fails: fit errors degrade to the realized volatility.
pub fn forecast_volatility(
    features: &FeatureSeries,
    settings: &GarchSettings,
    trading_days: f64,
) -> VolForecast {
    if features.is_empty() {
        return fallback(features, "no feature rows".to_string());
    }
    let returns = features.log_returns();
    let start = returns.len().saturating_sub(settings.window_size);
    let window: Vec<f64> = returns[start..].iter().map(|r| r * settings.scale).collect();

    match Garch11::fit(&window, settings) {
        Ok(model) => {
            let annualized_vol = model.forecast_annualized_vol(settings.scale, trading_days);
            if annualized_vol.is_finite() {
                info!(
                    "GARCH(1,1) forecast on {} returns: {:.2}% annualized (alpha={:.3}, beta={:.3})",
                    window.len(),
                    annualized_vol * 100.0,
                    model.params.alpha,
                    model.params.beta
                );
                return VolForecast {
                    annualized_vol,
                    degraded: false,
                    fallback_reason: None,
                    model: Some(model),
                };
            }
            fallback(features, "non-finite forecast".to_string())
        }
        Err(e) => fallback(features, e.to_string()),
    }
}

fn fallback(features: &FeatureSeries, reason: String) -> VolForecast {
    let realized = features.last().map(|r| r.annualized_vol).unwrap_or(0.0);
    warn!(
        "GARCH forecast degraded ({}); using last realized volatility {:.2}%",
        reason,
        realized * 100.0
    );
    VolForecast {
        annualized_vol: realized,
        degraded: true,
        fallback_reason: Some(reason),
        model: None,
    }
}
