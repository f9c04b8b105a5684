pub mod garch;
pub mod hmm;

pub use garch::{forecast_volatility, VolForecast};
pub use hmm::{FitSummary, RegimeInference, RegimeModel};
