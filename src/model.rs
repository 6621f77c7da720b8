//! Log densities the built-in sampler can draw from.

use std::fmt::Debug;

/// Errors of a log density evaluation.
pub trait LogpError: std::error::Error + Send + Sync + 'static {
    /// Unrecoverable errors during logp computation stop sampling,
    /// recoverable errors reject the proposal.
    fn is_recoverable(&self) -> bool;
}

/// An unnormalized log density on an unconstrained space.
///
/// Evaluation has to be deterministic and thread safe, chains call it
/// concurrently.
pub trait LogDensity: Send + Sync {
    type LogpError: Debug + LogpError;

    fn dim(&self) -> usize;

    fn logp(&self, position: &[f64]) -> Result<f64, Self::LogpError>;

    /// Column names of the retained draws.
    fn param_names(&self) -> Vec<String> {
        (0..self.dim()).map(|i| format!("x.{}", i)).collect()
    }
}

impl<T: LogDensity + ?Sized> LogDensity for &T {
    type LogpError = T::LogpError;

    fn dim(&self) -> usize {
        (**self).dim()
    }

    fn logp(&self, position: &[f64]) -> Result<f64, Self::LogpError> {
        (**self).logp(position)
    }

    fn param_names(&self) -> Vec<String> {
        (**self).param_names()
    }
}
