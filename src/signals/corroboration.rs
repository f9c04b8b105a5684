use serde::Serialize;

use crate::config::SignalSettings;
use crate::features::SourceKind;
use crate::indicators::quantile;

/// Second opinion required to escalate RISK_OFF to STRONG_RISK_OFF.
///
/// The two strategies compare different quantities and are kept apart on
/// purpose: one judges the model forecast, the other the observed level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Corroboration {
    /// GARCH forecast above a percentile of realized (smoothed) volatility.
    ForecastAboveRealized { percentile: f64 },
    /// Current volatility level above a percentile of its own history.
    LevelAboveHistory { percentile: f64 },
}

/// Outcome of a corroboration check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CorroborationCheck {
    pub value: f64,
    pub threshold: f64,
    pub met: bool,
}

impl Corroboration {
    pub fn for_source(kind: SourceKind, settings: &SignalSettings) -> Self {
        match kind {
            SourceKind::RangeDerived => Corroboration::ForecastAboveRealized {
                percentile: settings.garch_percentile,
            },
            SourceKind::DirectLevel => Corroboration::LevelAboveHistory {
                percentile: settings.level_percentile,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Corroboration::ForecastAboveRealized { .. } => "forecast_above_realized",
            Corroboration::LevelAboveHistory { .. } => "level_above_history",
        }
    }

    /// `None` when the relevant history is empty.
    pub fn check(&self, forecast_vol: f64, realized_vols: &[f64], levels: &[f64]) -> Option<CorroborationCheck> {
        let (value, history, percentile) = match *self {
            Corroboration::ForecastAboveRealized { percentile } => (forecast_vol, realized_vols, percentile),
            Corroboration::LevelAboveHistory { percentile } => (*levels.last()?, levels, percentile),
        };
        let threshold = quantile(history, percentile)?;
        Some(CorroborationCheck {
            value,
            threshold,
            met: value > threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selected_by_source_kind() {
        let settings = SignalSettings::default();
        assert_eq!(
            Corroboration::for_source(SourceKind::RangeDerived, &settings),
            Corroboration::ForecastAboveRealized { percentile: 0.75 }
        );
        assert_eq!(
            Corroboration::for_source(SourceKind::DirectLevel, &settings),
            Corroboration::LevelAboveHistory { percentile: 0.85 }
        );
    }

    #[test]
    fn test_forecast_strategy_ignores_levels() {
        let realized = [0.10, 0.12, 0.14, 0.16, 0.18];
        let c = Corroboration::ForecastAboveRealized { percentile: 0.75 };
        let check = c.check(0.17, &realized, &[9.0]).unwrap();
        assert!((check.threshold - 0.16).abs() < 1e-12);
        assert!(check.met);
        assert!(!c.check(0.15, &realized, &[]).unwrap().met);
    }

    #[test]
    fn test_level_strategy_uses_current_level() {
        let levels = [0.12, 0.13, 0.15, 0.14, 0.40];
        let c = Corroboration::LevelAboveHistory { percentile: 0.85 };
        // forecast is irrelevant here
        let check = c.check(0.0, &[], &levels).unwrap();
        assert_eq!(check.value, 0.40);
        assert!(check.met);
        assert!(c.check(1.0, &[0.1], &[]).is_none());
    }
}
