//! Clinical threshold evaluation over extracted measurements.

pub mod evaluator;
pub mod types;

pub use evaluator::*;
pub use types::*;
