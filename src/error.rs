use thiserror::Error;

/// Bar history problems. Fatal to a run.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("no bars available")]
    Empty,
    #[error("insufficient history: need at least {needed} rows, got {got}")]
    Insufficient { needed: usize, got: usize },
    #[error("unparseable {field} at row {row}: {value:?}")]
    Unparseable {
        field: &'static str,
        row: usize,
        value: String,
    },
    #[error("invalid {field} at row {row}")]
    InvalidValue { field: &'static str, row: usize },
    #[error("failed to read bar file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse bar file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Hidden-state model could not be fitted. Fatal to a run.
#[derive(Debug, Error)]
pub enum RegimeFitError {
    #[error("too few observations for regime fit: need {needed}, got {got}")]
    TooFewObservations { needed: usize, got: usize },
    #[error("degenerate input: observation variance is zero")]
    Degenerate,
    #[error("non-finite value in regime input")]
    NonFinite,
    #[error("observation features mismatch: expected {expected}, got {got}")]
    FeatureMismatch { expected: usize, got: usize },
}

/// Conditional volatility fit failure. Recovered by the pipeline.
#[derive(Debug, Error)]
pub enum ForecastFitError {
    #[error("insufficient returns for GARCH fit: need {needed}, got {got}")]
    InsufficientData { needed: usize, got: usize },
    #[error("degenerate return window: variance is zero")]
    Degenerate,
    #[error("GARCH optimizer did not converge after {iterations} iterations")]
    NotConverged { iterations: usize },
    #[error("non-finite likelihood or forecast")]
    NonFinite,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    RegimeFit(#[from] RegimeFitError),
    #[error("invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = DataError::Insufficient { needed: 10, got: 3 };
        assert_eq!(err.to_string(), "insufficient history: need at least 10 rows, got 3");

        let err: PipelineError = RegimeFitError::Degenerate.into();
        assert_eq!(err.to_string(), "degenerate input: observation variance is zero");
    }
}
