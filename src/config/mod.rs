pub mod descriptors;
pub mod loader;
pub mod runtime;

pub use descriptors::*;
pub use loader::*;
pub use runtime::*;
