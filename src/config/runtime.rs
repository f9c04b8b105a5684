use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::descriptors::SignalDescriptors;

/// Immutable pipeline configuration, built once and passed by reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data: DataSettings,
    pub features: FeatureSettings,
    pub regime: RegimeSettings,
    pub garch: GarchSettings,
    pub signals: SignalSettings,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // Feature validation
        if self.features.ema_span == 0 {
            errors.push("features.ema_span must be > 0".to_string());
        }
        if self.features.max_intraday_range <= 0.0 {
            errors.push("features.max_intraday_range must be > 0".to_string());
        }
        if self.features.repair_window == 0 {
            errors.push("features.repair_window must be > 0".to_string());
        }
        if self.features.max_raw_variance <= 0.0 {
            errors.push("features.max_raw_variance must be > 0".to_string());
        }
        if self.features.epsilon <= 0.0 {
            errors.push("features.epsilon must be > 0".to_string());
        }
        if self.features.trading_days <= 0.0 {
            errors.push("features.trading_days must be > 0".to_string());
        }

        // Regime validation
        if self.regime.n_states != 3 {
            errors.push("regime.n_states must be 3 (Low/Medium/High)".to_string());
        }
        if self.regime.n_iter == 0 {
            errors.push("regime.n_iter must be > 0".to_string());
        }
        if self.regime.min_covar <= 0.0 {
            errors.push("regime.min_covar must be > 0".to_string());
        }

        // GARCH validation
        if self.garch.window_size < self.garch.min_observations {
            errors.push("garch.window_size must be >= garch.min_observations".to_string());
        }
        if self.garch.scale <= 0.0 {
            errors.push("garch.scale must be > 0".to_string());
        }

        // Signal validation
        for (name, value) in [
            ("signals.high_vol", self.signals.high_vol),
            ("signals.low_vol", self.signals.low_vol),
            ("signals.garch_percentile", self.signals.garch_percentile),
            ("signals.level_percentile", self.signals.level_percentile),
            ("signals.min_confidence", self.signals.min_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                errors.push(format!("{name} must be between 0 and 1"));
            }
        }
        if self.signals.trend_window == 0 {
            errors.push("signals.trend_window must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub ticker: String,
    pub start_date: Option<NaiveDate>,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            ticker: "SPY.US".to_string(),
            start_date: NaiveDate::from_ymd_opt(2005, 1, 1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSettings {
    /// Span of the EMA applied to annualized volatility.
    pub ema_span: usize,
    /// Bars whose (high - low) / open exceeds this are treated as corrupted.
    pub max_intraday_range: f64,
    /// Number of preceding clean bars used for the typical-range median.
    pub repair_window: usize,
    /// Typical range used when no clean history exists yet.
    pub default_typical_range: f64,
    /// Upper clip for the raw daily variance.
    pub max_raw_variance: f64,
    pub epsilon: f64,
    pub trading_days: f64,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            ema_span: 5,
            max_intraday_range: 0.25,
            repair_window: 20,
            default_typical_range: 0.02,
            max_raw_variance: 0.05,
            epsilon: 1e-12,
            trading_days: 252.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeSettings {
    pub n_states: usize,
    pub n_iter: usize,
    pub tol: f64,
    pub random_state: u64,
    /// Minimum observations per hidden state required to fit.
    pub min_obs_per_state: usize,
    /// Variance floor for emission distributions.
    pub min_covar: f64,
}

impl Default for RegimeSettings {
    fn default() -> Self {
        Self {
            n_states: 3,
            n_iter: 100,
            tol: 1e-4,
            random_state: 42,
            min_obs_per_state: 30,
            min_covar: 1e-3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InnovationDist {
    Normal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GarchSettings {
    /// Trailing window of returns used for the fit.
    pub window_size: usize,
    /// Multiplier applied to log returns before fitting (percentage units).
    pub scale: f64,
    pub dist: InnovationDist,
    pub max_iter: usize,
    pub tol: f64,
    pub min_observations: usize,
}

impl Default for GarchSettings {
    fn default() -> Self {
        Self {
            window_size: 1000,
            scale: 100.0,
            dist: InnovationDist::Normal,
            max_iter: 2000,
            tol: 1e-8,
            min_observations: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalSettings {
    /// Posterior of the High regime above which the signal is RISK_OFF.
    pub high_vol: f64,
    /// Posterior of the Low regime above which the signal is RISK_ON.
    pub low_vol: f64,
    pub trend_window: usize,
    /// Change in P(High) over the trend window that raises ALERT.
    pub alert_change: f64,
    /// Realized-vol percentile the forecast must exceed to escalate.
    pub garch_percentile: f64,
    /// Own-history percentile a volatility level must exceed to escalate.
    pub level_percentile: f64,
    pub min_confidence: f64,
    pub descriptors: SignalDescriptors,
}

impl Default for SignalSettings {
    fn default() -> Self {
        Self {
            high_vol: 0.60,
            low_vol: 0.60,
            trend_window: 5,
            alert_change: 0.15,
            garch_percentile: 0.75,
            level_percentile: 0.85,
            min_confidence: 0.70,
            descriptors: SignalDescriptors::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.regime.random_state, 42);
        assert_eq!(config.garch.window_size, 1000);
    }

    #[test]
    fn test_validate_collects_errors() {
        let mut config = PipelineConfig::default();
        config.features.ema_span = 0;
        config.signals.high_vol = 1.5;
        config.regime.n_states = 4;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("signals.high_vol")));
    }
}
