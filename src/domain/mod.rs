//! Domain layer: core models, errors, correlation, and ports.

pub mod correlation;
pub mod errors;
pub mod models;
pub mod ports;

pub use correlation::CorrelationContext;
pub use errors::{ErrorKind, SwarmError, SwarmResult};
