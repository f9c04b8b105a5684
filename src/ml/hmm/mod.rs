pub mod gaussian_hmm;
pub mod regime_model;

pub use gaussian_hmm::{FitSummary, GaussianHMM};
pub use regime_model::{RegimeInference, RegimeModel};
