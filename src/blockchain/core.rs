// core.rs splits responsibilities into submodules for easier maintenance.
pub mod chain;
pub mod store;
pub mod validation;

pub use chain::*;
pub use store::*;
pub use validation::*;
