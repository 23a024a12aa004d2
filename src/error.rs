//! Error types shared across the crate

use thiserror::Error;

/// Errors raised by integrated action models, differential models and
/// control parametrizations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("{name} has wrong dimension: got {got}, expected {expected}")]
    DimensionMismatch {
        name: &'static str,
        got: usize,
        expected: usize,
    },

    #[error("dt must be non-negative, got {0}")]
    NegativeTimeStep(f64),

    #[error("quasi-static least-squares solve did not succeed")]
    QuasiStaticFailure,
}

/// Fail-fast size check used on every public entry point
pub(crate) fn check_dim(name: &'static str, got: usize, expected: usize) -> Result<(), ModelError> {
    if got != expected {
        return Err(ModelError::DimensionMismatch {
            name,
            got,
            expected,
        });
    }
    Ok(())
}
