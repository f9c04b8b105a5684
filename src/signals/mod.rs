pub mod corroboration;
pub mod engine;

pub use corroboration::{Corroboration, CorroborationCheck};
pub use engine::{posterior_trend, SignalEngine, SignalInputs};
