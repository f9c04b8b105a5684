use anyhow::{anyhow, Result};
use std::path::Path;
use tracing::{debug, info, warn};

use super::runtime::PipelineConfig;
use crate::types::SignalKind;

/// Prefix for environment overrides, e.g. `VOLREGIME__SIGNALS__HIGH_VOL=0.65`.
pub const ENV_PREFIX: &str = "VOLREGIME";

/// Builds the pipeline configuration from defaults, an optional TOML file and
/// environment overrides, then validates it.
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let defaults = toml::to_string(&PipelineConfig::default())?;
    let mut builder = ::config::Config::builder()
        .add_source(::config::File::from_str(&defaults, ::config::FileFormat::Toml));

    if let Some(path) = path {
        info!("Loading configuration from {}", path.display());
        builder = builder.add_source(::config::File::from(path).required(false));
    }

    let settings = builder
        .add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let config: PipelineConfig = settings.try_deserialize()?;
    config
        .validate()
        .map_err(|errors| anyhow!("invalid configuration: {}", errors.join(", ")))?;

    for kind in SignalKind::ALL {
        if !config.signals.descriptors.0.iter().any(|d| d.signal == kind) {
            warn!("No descriptor configured for {}; the NEUTRAL descriptor will be used", kind);
        }
    }

    debug!(
        "Configuration loaded: ticker={}, ema_span={}, garch_window={}",
        config.data.ticker, config.features.ema_span, config.garch.window_size
    );
    Ok(config)
}

/// Default configuration rendered as TOML.
pub fn default_config_toml() -> Result<String> {
    Ok(toml::to_string_pretty(&PipelineConfig::default())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_toml_parses_back() {
        let text = default_config_toml().unwrap();
        let parsed: PipelineConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.signals.trend_window, 5);
        assert_eq!(parsed.signals.descriptors, PipelineConfig::default().signals.descriptors);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let path = std::env::temp_dir().join(format!("volregime-test-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[signals]\nhigh_vol = 0.7\n\n[garch]\nwindow_size = 500").unwrap();

        let config = load_config(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert!((config.signals.high_vol - 0.7).abs() < 1e-12);
        assert_eq!(config.garch.window_size, 500);
        assert!((config.signals.low_vol - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load_config(Some(Path::new("/nonexistent/volregime.toml"))).unwrap();
        assert_eq!(config.regime.n_iter, 100);
    }
}
