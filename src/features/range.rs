use std::collections::VecDeque;

use tracing::warn;

use super::{clip_variance, SourceKind, VolatilitySource};
use crate::config::FeatureSettings;
use crate::error::DataError;
use crate::indicators::median;
use crate::types::{Bar, BarSeries};

/// Garman-Klass estimator over repaired OHLC bars.
#[derive(Debug, Clone)]
pub struct RangeEstimator {
    settings: FeatureSettings,
}

impl RangeEstimator {
    pub fn new(settings: FeatureSettings) -> Self {
        Self { settings }
    }
}

impl VolatilitySource for RangeEstimator {
    fn kind(&self) -> SourceKind {
        SourceKind::RangeDerived
    }

    fn settings(&self) -> &FeatureSettings {
        &self.settings
    }

    fn raw_variances(&self, bars: &BarSeries) -> Result<(Vec<f64>, usize), DataError> {
        for (row, bar) in bars.bars.iter().enumerate() {
            if !bar.open.is_finite() || bar.open <= 0.0 {
                return Err(DataError::InvalidValue { field: "open", row });
            }
            if !bar.close.is_finite() || bar.close <= 0.0 {
                return Err(DataError::InvalidValue { field: "close", row });
            }
        }

        let (repaired, count) = repair_bars(&bars.bars, &self.settings);
        let variances = repaired
            .iter()
            .map(|bar| {
                clip_variance(
                    garman_klass(bar, self.settings.epsilon),
                    self.settings.max_raw_variance,
                )
            })
            .collect();
        Ok((variances, count))
    }
}

/// `0.5 * ln(H/L)^2 - (2 ln 2 - 1) * ln(C/O)^2`
pub fn garman_klass(bar: &Bar, eps: f64) -> f64 {
    let log_hl = (bar.high.max(eps) / bar.low.max(eps)).ln();
    let log_co = (bar.close.max(eps) / bar.open.max(eps)).ln();
    0.5 * log_hl.powi(2) - (2.0 * std::f64::consts::LN_2 - 1.0) * log_co.powi(2)
}

fn is_corrupted(bar: &Bar, max_range: f64) -> bool {
    !bar.high.is_finite()
        || !bar.low.is_finite()
        || bar.low <= 0.0
        || bar.high < bar.low
        || bar.range_pct() > max_range
}

/// Rebuilds high/low of bars whose intraday range is implausible.
///
/// The replacement range is the median relative range of the preceding clean
/// bars (up to `repair_window`), centred on the open. The rebuilt high/low
/// always enclose open and close, so a genuine large close-to-open move
/// survives the repair.
pub fn repair_bars(bars: &[Bar], settings: &FeatureSettings) -> (Vec<Bar>, usize) {
    let mut out = Vec::with_capacity(bars.len());
    let mut clean_ranges: VecDeque<f64> = VecDeque::with_capacity(settings.repair_window);
    let mut repaired = 0;

    for bar in bars {
        if !is_corrupted(bar, settings.max_intraday_range) {
            if clean_ranges.len() == settings.repair_window {
                clean_ranges.pop_front();
            }
            clean_ranges.push_back(bar.range_pct());
            out.push(bar.clone());
            continue;
        }

        let typical = median(clean_ranges.make_contiguous()).unwrap_or(settings.default_typical_range);
        let half = bar.open * typical / 2.0;
        let mut fixed = bar.clone();
        fixed.high = (bar.open + half).max(bar.open.max(bar.close));
        fixed.low = (bar.open - half)
            .min(bar.open.min(bar.close))
            .max(settings.epsilon);

        warn!(
            "Repaired corrupted bar {}: high {:.4} -> {:.4}, low {:.4} -> {:.4}",
            bar.date, bar.high, fixed.high, bar.low, fixed.low
        );
        repaired += 1;
        out.push(fixed);
    }

    (out, repaired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Days, NaiveDate};

    fn bar(i: u64, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            date: NaiveDate::from_ymd_opt(2020, 3, 1).unwrap() + Days::new(i),
            open,
            high,
            low,
            close,
            adjusted_close: close,
            volume: 0.0,
        }
    }

    #[test]
    fn test_garman_klass_formula() {
        let b = bar(0, 100.0, 102.0, 98.0, 101.0);
        let expected = 0.5 * (102.0f64 / 98.0).ln().powi(2)
            - (2.0 * 2f64.ln() - 1.0) * (101.0f64 / 100.0).ln().powi(2);
        assert!((garman_klass(&b, 1e-12) - expected).abs() < 1e-15);
    }

    #[test]
    fn test_corrupted_low_rewritten_from_median_range() {
        let settings = FeatureSettings::default();
        let mut bars: Vec<Bar> = (0..5).map(|i| bar(i, 100.0, 101.0, 99.0, 100.0)).collect();
        // erroneous zero-ish low
        bars.push(bar(5, 100.0, 102.0, 0.01, 101.0));

        let (fixed, count) = repair_bars(&bars, &settings);
        assert_eq!(count, 1);
        let b = &fixed[5];
        // median range 2% centred on the open, widened to include the close
        assert!((b.high - 101.0).abs() < 1e-9);
        assert!((b.low - 99.0).abs() < 1e-9);
        assert!(b.range_pct() <= settings.max_intraday_range);
    }

    #[test]
    fn test_crash_day_keeps_close_move() {
        let settings = FeatureSettings::default();
        let mut bars: Vec<Bar> = (0..3).map(|i| bar(i, 100.0, 101.0, 99.0, 100.0)).collect();
        bars.push(bar(3, 100.0, 100.5, 60.0, 65.0));

        let (fixed, count) = repair_bars(&bars, &settings);
        assert_eq!(count, 1);
        assert_eq!(fixed[3].low, 65.0);
        assert_eq!(fixed[3].close, 65.0);
        assert!(fixed[3].high >= 100.0);
    }

    #[test]
    fn test_first_bar_uses_default_range() {
        let settings = FeatureSettings::default();
        let bars = vec![bar(0, 100.0, 200.0, 50.0, 100.0)];
        let (fixed, _) = repair_bars(&bars, &settings);
        assert!((fixed[0].high - 101.0).abs() < 1e-9);
        assert!((fixed[0].low - 99.0).abs() < 1e-9);
    }

    #[test]
    fn test_typical_range_uses_only_recent_clean_bars() {
        let settings = FeatureSettings {
            repair_window: 3,
            ..FeatureSettings::default()
        };
        // Two wide bars fall out of the window before the corrupted one
        let mut bars = vec![
            bar(0, 100.0, 110.0, 90.0, 100.0),
            bar(1, 100.0, 110.0, 90.0, 100.0),
        ];
        bars.extend((2..5).map(|i| bar(i, 100.0, 101.0, 99.0, 100.0)));
        bars.push(bar(5, 100.0, 100.0, 0.0, 100.0));

        let (fixed, count) = repair_bars(&bars, &settings);
        assert_eq!(count, 1);
        assert!((fixed[5].high - 101.0).abs() < 1e-9);
        assert!((fixed[5].low - 99.0).abs() < 1e-9);
    }

    #[test]
    fn test_repair_caps_raw_variance() {
        let settings = FeatureSettings::default();
        let mut bars: Vec<Bar> = (0..10).map(|i| bar(i, 100.0, 101.0, 99.0, 100.0)).collect();
        bars.push(bar(10, 100.0, 100.0, 0.0001, 100.0));
        let series = BarSeries::new(bars);

        let (raw, count) = RangeEstimator::new(settings).raw_variances(&series).unwrap();
        assert_eq!(count, 1);
        let clean = raw[9];
        assert!((raw[10] - clean).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_open_rejected() {
        let series = BarSeries::new(vec![bar(0, 0.0, 1.0, 0.5, 1.0)]);
        let err = RangeEstimator::new(FeatureSettings::default())
            .raw_variances(&series)
            .unwrap_err();
        assert!(matches!(err, DataError::InvalidValue { field: "open", row: 0 }));
    }
}
