//! Single entry point for a monitoring run: bars in, signal plus supporting
//! metrics out. Both models are refitted on every run.

use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{PipelineConfig, SignalDescriptor};
use crate::data::BarSource;
use crate::error::{DataError, PipelineError};
use crate::features::{source_for, FeatureSeries, SourceKind, VolatilitySource};
use crate::ml::{forecast_volatility, FitSummary, RegimeInference, RegimeModel};
use crate::signals::{posterior_trend, Corroboration, CorroborationCheck, SignalEngine, SignalInputs};
use crate::types::{BarSeries, RegimeLabel, SignalKind};

/// Structured payload of one run, ready for logging or a notifier.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub as_of: NaiveDate,
    pub ticker: String,
    pub source: SourceKind,
    pub close: f64,
    pub last_return: f64,
    /// Smoothed realized annualized volatility of the last bar.
    pub realized_vol: f64,
    pub forecast_vol: f64,
    pub forecast_degraded: bool,
    pub fallback_reason: Option<String>,
    pub regime: RegimeLabel,
    pub regime_name: &'static str,
    pub regime_color: &'static str,
    pub posterior_low: f64,
    pub posterior_medium: f64,
    pub posterior_high: f64,
    pub confidence: f64,
    pub trend: Option<f64>,
    pub signal: SignalKind,
    pub descriptor: SignalDescriptor,
    pub corroboration_strategy: &'static str,
    pub corroboration: Option<CorroborationCheck>,
    pub repaired_bars: usize,
    pub n_observations: usize,
    pub regime_fit: FitSummary,
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {} as of {}", self.descriptor.icon, self.signal, self.as_of)?;
        writeln!(f, "  Ticker:        {} ({} source)", self.ticker, self.source.as_str())?;
        writeln!(f, "  Close:         {:.2} ({:+.2}%)", self.close, self.last_return * 100.0)?;
        writeln!(f, "  Regime:        {}", self.regime_name)?;
        writeln!(
            f,
            "  Posteriors:    low {:.1}% / medium {:.1}% / high {:.1}%",
            self.posterior_low * 100.0,
            self.posterior_medium * 100.0,
            self.posterior_high * 100.0
        )?;
        writeln!(f, "  Confidence:    {:.1}%", self.confidence * 100.0)?;
        match self.trend {
            Some(trend) => writeln!(f, "  High trend:    {:+.1}%", trend * 100.0)?,
            None => writeln!(f, "  High trend:    n/a")?,
        }
        writeln!(f, "  Realized vol:  {:.2}%", self.realized_vol * 100.0)?;
        write!(f, "  Forecast vol:  {:.2}%", self.forecast_vol * 100.0)?;
        if self.forecast_degraded {
            write!(f, " (degraded: realized fallback)")?;
        }
        writeln!(f)?;
        write!(f, "  Action:        {}", self.descriptor.action)
    }
}

/// One bar of the regime history view.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRow {
    pub date: NaiveDate,
    pub close: f64,
    pub annualized_vol: f64,
    pub regime: RegimeLabel,
    pub posteriors: [f64; 3],
}

/// A run's report together with the series it was derived from.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub report: PipelineReport,
    pub features: FeatureSeries,
    pub inferences: Vec<RegimeInference>,
}

impl PipelineRun {
    /// The last `n` bars with their regime assignment.
    pub fn history(&self, n: usize) -> Vec<HistoryRow> {
        let start = self.inferences.len().saturating_sub(n);
        self.features.rows[start..]
            .iter()
            .zip(&self.inferences[start..])
            .map(|(row, inference)| HistoryRow {
                date: row.date,
                close: row.close,
                annualized_vol: row.annualized_vol,
                regime: inference.label,
                posteriors: inference.posteriors,
            })
            .collect()
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    source: Box<dyn VolatilitySource>,
    signals: SignalEngine,
}

impl Pipeline {
    /// Validates `config` and wires the volatility source and its matching
    /// corroboration strategy.
    pub fn new(config: PipelineConfig, kind: SourceKind) -> Result<Self, PipelineError> {
        config
            .validate()
            .map_err(|errors| PipelineError::Config(errors.join("; ")))?;

        let source = source_for(kind, &config.features);
        let corroboration = Corroboration::for_source(kind, &config.signals);
        let signals = SignalEngine::new(config.signals.clone(), corroboration);

        Ok(Self {
            config,
            source,
            signals,
        })
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source.kind()
    }

    pub fn run(&self, bars: &BarSeries) -> Result<PipelineReport, PipelineError> {
        Ok(self.analyze(bars)?.report)
    }

    pub fn run_from(&self, source: &dyn BarSource) -> Result<PipelineReport, PipelineError> {
        let bars = source.fetch_bars()?;
        self.run(&bars)
    }

    pub fn analyze_from(&self, source: &dyn BarSource) -> Result<PipelineRun, PipelineError> {
        let bars = source.fetch_bars()?;
        self.analyze(&bars)
    }

    /// Full run keeping the feature series and per-bar inference.
    pub fn analyze(&self, bars: &BarSeries) -> Result<PipelineRun, PipelineError> {
        let features = self.source.to_features(bars)?;
        if features.repaired_bars > 0 {
            warn!("{} corrupted bars repaired before feature extraction", features.repaired_bars);
        }

        let model = RegimeModel::fit(&features, &self.config.regime)?;
        let inferences = model.infer(&features)?;

        let means = model.label_means();
        let transition = model.transition_matrix();
        debug!(
            "Regime means low/med/high = {:.3}/{:.3}/{:.3}, stay probabilities {:.3}/{:.3}/{:.3}, start {:?}",
            means[0],
            means[1],
            means[2],
            transition[[0, 0]],
            transition[[1, 1]],
            transition[[2, 2]],
            model.start_probabilities().to_vec()
        );

        let forecast = forecast_volatility(&features, &self.config.garch, self.config.features.trading_days);

        let (Some(row), Some(current)) = (features.last(), inferences.last()) else {
            return Err(DataError::Empty.into());
        };

        let p_high: Vec<f64> = inferences.iter().map(RegimeInference::posterior_high).collect();
        let trend = posterior_trend(&p_high, self.config.signals.trend_window);
        let realized_vols = features.annualized_vols();
        let levels = features.raw_vols();

        let decision = self.signals.decide(&SignalInputs {
            posteriors: current.posteriors,
            trend,
            forecast_vol: forecast.annualized_vol,
            realized_vols: &realized_vols,
            levels: &levels,
        });

        let report = PipelineReport {
            as_of: row.date,
            ticker: self.config.data.ticker.clone(),
            source: self.source.kind(),
            close: row.close,
            last_return: row.log_return,
            realized_vol: row.annualized_vol,
            forecast_vol: forecast.annualized_vol,
            forecast_degraded: forecast.degraded,
            fallback_reason: forecast.fallback_reason.clone(),
            regime: current.label,
            regime_name: current.label.as_str(),
            regime_color: current.label.color(),
            posterior_low: current.posterior_low(),
            posterior_medium: current.posterior_medium(),
            posterior_high: current.posterior_high(),
            confidence: decision.confidence,
            trend: decision.trend,
            signal: decision.signal,
            descriptor: decision.descriptor,
            corroboration_strategy: self.signals.corroboration().name(),
            corroboration: decision.corroboration,
            repaired_bars: features.repaired_bars,
            n_observations: features.len(),
            regime_fit: model.summary(),
        };

        info!(
            "{} {} on {}: regime={}, p_high={:.3}, forecast={:.2}%",
            report.descriptor.icon,
            report.signal,
            report.as_of,
            report.regime_name,
            report.posterior_high,
            report.forecast_vol * 100.0
        );

        Ok(PipelineRun {
            report,
            features,
            inferences,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MockBarSource;
    use crate::error::RegimeFitError;
    use crate::features::test_support::{level_bars, regime_bars};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn range_pipeline() -> Pipeline {
        Pipeline::new(PipelineConfig::default(), SourceKind::RangeDerived).unwrap()
    }

    #[test]
    fn test_run_produces_consistent_report() {
        let bars = regime_bars(720, 11);
        let report = range_pipeline().run(&bars).unwrap();

        assert_eq!(report.as_of, bars.bars.last().unwrap().date);
        assert_eq!(report.ticker, "SPY.US");
        let sum = report.posterior_low + report.posterior_medium + report.posterior_high;
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(report.realized_vol >= 0.0);
        assert!(report.forecast_vol.is_finite() && report.forecast_vol > 0.0);
        assert!(report.trend.is_some());
        assert_eq!(report.corroboration_strategy, "forecast_above_realized");
        assert_eq!(report.descriptor.signal, report.signal);
        let max = report.posterior_low.max(report.posterior_medium).max(report.posterior_high);
        assert_eq!(report.confidence, max);
    }

    #[test]
    fn test_run_is_idempotent() {
        let bars = regime_bars(600, 3);
        let pipeline = range_pipeline();
        let a = pipeline.run(&bars).unwrap();
        let b = pipeline.run(&bars).unwrap();
        assert_eq!(a.signal, b.signal);
        assert_eq!(a.regime, b.regime);
        assert!((a.posterior_high - b.posterior_high).abs() < 1e-12);
        assert!((a.posterior_low - b.posterior_low).abs() < 1e-12);
        assert!((a.forecast_vol - b.forecast_vol).abs() < 1e-12);
    }

    #[test]
    fn test_history_tail() {
        let bars = regime_bars(500, 5);
        let run = range_pipeline().analyze(&bars).unwrap();
        let history = run.history(10);
        assert_eq!(history.len(), 10);
        assert_eq!(history.last().unwrap().date, run.report.as_of);
        assert_eq!(run.history(10_000).len(), run.inferences.len());
    }

    #[test]
    fn test_empty_bars_are_fatal() {
        let err = range_pipeline().run(&BarSeries::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Data(DataError::Empty)));
    }

    #[test]
    fn test_short_history_is_fatal() {
        let err = range_pipeline().run(&regime_bars(60, 1)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::RegimeFit(RegimeFitError::TooFewObservations { .. })
        ));
    }

    #[test]
    fn test_constant_level_is_degenerate() {
        let pipeline = Pipeline::new(PipelineConfig::default(), SourceKind::DirectLevel).unwrap();
        let err = pipeline.run(&level_bars(&[20.0; 200])).unwrap_err();
        assert!(matches!(err, PipelineError::RegimeFit(RegimeFitError::Degenerate)));
    }

    #[test]
    fn test_level_source_uses_level_corroboration() {
        let mut rng = StdRng::seed_from_u64(9);
        let levels: Vec<f64> = (0..450)
            .map(|i| {
                let base = match (i / 90) % 3 {
                    0 => 13.0,
                    1 => 20.0,
                    _ => 35.0,
                };
                base * (1.0 + 0.1 * (rng.gen::<f64>() - 0.5))
            })
            .collect();
        let pipeline = Pipeline::new(PipelineConfig::default(), SourceKind::DirectLevel).unwrap();
        let report = pipeline.run(&level_bars(&levels)).unwrap();
        assert_eq!(report.source, SourceKind::DirectLevel);
        assert_eq!(report.corroboration_strategy, "level_above_history");
        assert!((report.realized_vol - 0.20).abs() < 0.02);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = PipelineConfig::default();
        config.signals.high_vol = 1.5;
        assert!(matches!(
            Pipeline::new(config, SourceKind::RangeDerived),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_run_from_source() {
        let mut source = MockBarSource::new();
        source.expect_fetch_bars().times(1).returning(|| Ok(regime_bars(500, 2)));
        let report = range_pipeline().run_from(&source).unwrap();
        assert_eq!(report.n_observations, 500 - 5);

        let mut failing = MockBarSource::new();
        failing.expect_fetch_bars().returning(|| Err(DataError::Empty));
        assert!(matches!(
            range_pipeline().run_from(&failing),
            Err(PipelineError::Data(DataError::Empty))
        ));
    }
}
