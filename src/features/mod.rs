//! Feature engine: turns daily bars into a volatility observation series.
//!
//! Each [`VolatilitySource`] only decides how a bar becomes a raw daily
//! variance. Returns, annualization, EMA smoothing and the log transform are
//! shared so both sources produce the same [`FeatureSeries`] shape.

pub mod level;
pub mod range;
pub mod scaler;

pub use level::LevelEstimator;
pub use range::RangeEstimator;
pub use scaler::StandardScaler;

use chrono::NaiveDate;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::config::FeatureSettings;
use crate::error::DataError;
use crate::indicators::EMA;
use crate::types::BarSeries;

/// Which kind of observation a source produces. Drives the choice of the
/// STRONG_RISK_OFF corroboration strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Volatility estimated from the intraday range of a traded asset.
    RangeDerived,
    /// The series is itself an annualized volatility level in percent.
    DirectLevel,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::RangeDerived => "range",
            SourceKind::DirectLevel => "level",
        }
    }
}

/// Per-bar derived features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub date: NaiveDate,
    pub close: f64,
    pub log_return: f64,
    /// Clipped raw daily variance.
    pub raw_variance: f64,
    /// Unsmoothed annualized volatility, `sqrt(raw_variance * trading_days)`.
    pub raw_vol: f64,
    /// EMA-smoothed annualized volatility.
    pub annualized_vol: f64,
    pub log_vol: f64,
}

#[derive(Debug, Clone, Default)]
pub struct FeatureSeries {
    pub rows: Vec<FeatureRow>,
    /// Number of bars whose high/low were rebuilt.
    pub repaired_bars: usize,
}

impl FeatureSeries {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn last(&self) -> Option<&FeatureRow> {
        self.rows.last()
    }

    pub fn log_returns(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.log_return).collect()
    }

    pub fn annualized_vols(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.annualized_vol).collect()
    }

    pub fn raw_vols(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.raw_vol).collect()
    }

    /// Single-column observation matrix of `log_vol` for the regime model.
    pub fn observation_matrix(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.rows.len(), 1), |(i, _)| self.rows[i].log_vol)
    }
}

/// A way of turning bars into a volatility observation.
pub trait VolatilitySource: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn settings(&self) -> &FeatureSettings;

    /// Clipped raw daily variance per bar, aligned with `bars`, plus the
    /// number of bars that had to be repaired.
    fn raw_variances(&self, bars: &BarSeries) -> Result<(Vec<f64>, usize), DataError>;

    fn to_features(&self, bars: &BarSeries) -> Result<FeatureSeries, DataError> {
        let (raw, repaired) = self.raw_variances(bars)?;
        let mut series = build_features(bars, &raw, self.settings())?;
        series.repaired_bars = repaired;
        Ok(series)
    }
}

/// Builds a volatility source of the given kind.
pub fn source_for(kind: SourceKind, settings: &FeatureSettings) -> Box<dyn VolatilitySource> {
    match kind {
        SourceKind::RangeDerived => Box::new(RangeEstimator::new(settings.clone())),
        SourceKind::DirectLevel => Box::new(LevelEstimator::new(settings.clone())),
    }
}

/// Shared tail of the feature engine. The first bar is consumed by the log
/// return and the next `ema_span - 1` by the EMA warm-up.
pub fn build_features(
    bars: &BarSeries,
    raw_variances: &[f64],
    settings: &FeatureSettings,
) -> Result<FeatureSeries, DataError> {
    if bars.is_empty() {
        return Err(DataError::Empty);
    }
    let eps = settings.epsilon;
    let mut ema = EMA::new(settings.ema_span);
    let mut rows = Vec::with_capacity(bars.len());

    for (i, pair) in bars.bars.windows(2).enumerate() {
        let (prev, bar) = (&pair[0], &pair[1]);
        let row = i + 1;
        if !bar.close.is_finite() || bar.close <= 0.0 {
            return Err(DataError::InvalidValue { field: "close", row });
        }

        let log_return = (bar.close / prev.close.max(eps)).ln();
        let raw_variance = raw_variances[row];
        let raw_vol = (raw_variance * settings.trading_days).sqrt();

        let Some(annualized_vol) = ema.update(raw_vol) else {
            continue;
        };
        let log_vol = (annualized_vol + eps).ln();

        if !(log_return.is_finite() && raw_vol.is_finite() && log_vol.is_finite()) {
            return Err(DataError::InvalidValue { field: "features", row });
        }

        rows.push(FeatureRow {
            date: bar.date,
            close: bar.close,
            log_return,
            raw_variance,
            raw_vol,
            annualized_vol,
            log_vol,
        });
    }

    if rows.is_empty() {
        return Err(DataError::Insufficient {
            needed: settings.ema_span + 1,
            got: bars.len(),
        });
    }

    Ok(FeatureSeries {
        rows,
        repaired_bars: 0,
    })
}

/// Clamp a raw variance into `[0, max]`, mapping non-finite values to `max`.
pub(crate) fn clip_variance(value: f64, max: f64) -> f64 {
    if value.is_nan() {
        return max;
    }
    value.clamp(0.0, max)
}
