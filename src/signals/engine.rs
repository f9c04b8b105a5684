use serde::Serialize;
use tracing::debug;

use super::corroboration::{Corroboration, CorroborationCheck};
use crate::config::{SignalDescriptor, SignalSettings};
use crate::types::SignalKind;

/// Everything the decision needs about the latest bar.
#[derive(Debug, Clone)]
pub struct SignalInputs<'a> {
    /// Low / Medium / High posteriors of the latest bar.
    pub posteriors: [f64; 3],
    /// Change of P(High) over the trend window; `None` on cold start.
    pub trend: Option<f64>,
    pub forecast_vol: f64,
    /// Smoothed realized annualized volatility history.
    pub realized_vols: &'a [f64],
    /// Unsmoothed volatility level history; the last entry is the current level.
    pub levels: &'a [f64],
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalDecision {
    pub signal: SignalKind,
    pub descriptor: SignalDescriptor,
    pub confidence: f64,
    pub trend: Option<f64>,
    pub corroboration: Option<CorroborationCheck>,
}

/// Stateless priority chain: RISK_OFF/STRONG_RISK_OFF, then ALERT, then
/// RISK_ON, else NEUTRAL (or WATCH when confidence is low).
#[derive(Debug, Clone)]
pub struct SignalEngine {
    settings: SignalSettings,
    corroboration: Corroboration,
}

impl SignalEngine {
    pub fn new(settings: SignalSettings, corroboration: Corroboration) -> Self {
        Self {
            settings,
            corroboration,
        }
    }

    pub fn corroboration(&self) -> Corroboration {
        self.corroboration
    }

    pub fn decide(&self, inputs: &SignalInputs<'_>) -> SignalDecision {
        let [p_low, _, p_high] = inputs.posteriors;
        let confidence = inputs.posteriors.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mut corroboration = None;

        let signal = if p_high > self.settings.high_vol {
            corroboration = self
                .corroboration
                .check(inputs.forecast_vol, inputs.realized_vols, inputs.levels);
            match corroboration {
                Some(check) if check.met => SignalKind::StrongRiskOff,
                _ => SignalKind::RiskOff,
            }
        } else if inputs.trend.is_some_and(|t| t > self.settings.alert_change) {
            SignalKind::Alert
        } else if p_low > self.settings.low_vol {
            SignalKind::RiskOn
        } else if confidence < self.settings.min_confidence {
            SignalKind::Watch
        } else {
            SignalKind::Neutral
        };

        debug!(
            "Signal {}: p_low={:.3}, p_high={:.3}, trend={:?}, confidence={:.3}",
            signal, p_low, p_high, inputs.trend, confidence
        );

        SignalDecision {
            signal,
            descriptor: self.settings.descriptors.lookup(signal),
            confidence,
            trend: inputs.trend,
            corroboration,
        }
    }
}

/// `p_high[t] - p_high[t - window]`, or `None` without enough history.
pub fn posterior_trend(p_high: &[f64], window: usize) -> Option<f64> {
    let n = p_high.len();
    if window == 0 || n <= window {
        return None;
    }
    Some(p_high[n - 1] - p_high[n - 1 - window])
}
