pub mod bar;
pub mod regime;
pub mod signal;

pub use bar::*;
pub use regime::*;
pub use signal::*;
