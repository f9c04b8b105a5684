pub mod forecast;
pub mod garch11;
pub mod optimizer;

pub use forecast::{forecast_volatility, VolForecast};
