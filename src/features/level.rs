use super::{clip_variance, SourceKind, VolatilitySource};
use crate::config::FeatureSettings;
use crate::error::DataError;
use crate::types::BarSeries;

/// Treats the close of each bar as an annualized volatility level in percent
/// (e.g. a volatility index). The level divided by 100 is the annualized
/// volatility; the implied daily variance is what the shared pipeline sees.
#[derive(Debug, Clone)]
pub struct LevelEstimator {
    settings: FeatureSettings,
}

impl LevelEstimator {
    pub fn new(settings: FeatureSettings) -> Self {
        Self { settings }
    }
}

impl VolatilitySource for LevelEstimator {
    fn kind(&self) -> SourceKind {
        SourceKind::DirectLevel
    }

    fn settings(&self) -> &FeatureSettings {
        &self.settings
    }

    fn raw_variances(&self, bars: &BarSeries) -> Result<(Vec<f64>, usize), DataError> {
        bars.bars
            .iter()
            .enumerate()
            .map(|(row, bar)| {
                if !bar.close.is_finite() || bar.close <= 0.0 {
                    return Err(DataError::InvalidValue { field: "close", row });
                }
                let annualized = bar.close / 100.0;
                Ok(clip_variance(
                    annualized.powi(2) / self.settings.trading_days,
                    self.settings.max_raw_variance,
                ))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|v| (v, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::test_support::level_bars;

    #[test]
    fn test_raw_vol_equals_level() {
        let bars = level_bars(&[15.0, 18.0, 22.0, 30.0, 25.0, 20.0, 19.0, 17.0]);
        let features = LevelEstimator::new(FeatureSettings::default())
            .to_features(&bars)
            .unwrap();
        assert_eq!(features.len(), 3);
        let last = features.last().unwrap();
        assert!((last.raw_vol - 0.17).abs() < 1e-12);
        // EMA seeded with mean of 0.18, 0.22, 0.30, 0.25, 0.20
        let seed = (0.18 + 0.22 + 0.30 + 0.25 + 0.20) / 5.0;
        assert!((features.rows[0].annualized_vol - seed).abs() < 1e-12);
        assert_eq!(features.repaired_bars, 0);
    }

    #[test]
    fn test_zero_level_rejected() {
        let bars = level_bars(&[15.0, 0.0, 20.0]);
        let err = LevelEstimator::new(FeatureSettings::default())
            .raw_variances(&bars)
            .unwrap_err();
        assert!(matches!(err, DataError::InvalidValue { field: "close", row: 1 }));
    }
}
