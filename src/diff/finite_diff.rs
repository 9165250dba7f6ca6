//! Finite difference stencils: step-size policy and scheme selection.
//!
//! The evaluation loops themselves live with the cache states (dense and
//! colored variants share their buffers with the cache); this module holds the
//! pieces they share.

use serde::{Deserialize, Serialize};

/// Default step size for forward and central differences.
pub const DEFAULT_EPSILON: f64 = 1e-8;

/// Step size for complex-step differentiation.
///
/// The complex step has no subtractive cancellation, so the step can sit far
/// below the floating-point noise floor.
pub const COMPLEX_STEP: f64 = 1e-200;

/// Finite-difference scheme, selected once at cache construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FdScheme {
    /// One extra evaluation per direction; first-order accurate.
    Forward,

    /// Two extra evaluations per direction; second-order accurate.
    Central,

    /// One complex evaluation per direction; accurate to machine precision
    /// for residuals that are analytic along the perturbed direction.
    ComplexStep,
}

impl Default for FdScheme {
    fn default() -> Self {
        FdScheme::Forward
    }
}

/// Step size adapted to the parameter scale: `|x| * eps`, floored at `eps`.
#[inline]
pub fn relative_step(x: f64, eps: f64) -> f64 {
    if x.abs() > eps {
        x.abs() * eps
    } else {
        eps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_relative_step_scales_with_magnitude() {
        assert_relative_eq!(relative_step(0.0, 1e-8), 1e-8);
        assert_relative_eq!(relative_step(1e-12, 1e-8), 1e-8);
        assert_relative_eq!(relative_step(100.0, 1e-8), 1e-6);
        assert_relative_eq!(relative_step(-100.0, 1e-8), 1e-6);
    }

    #[test]
    fn test_default_scheme() {
        assert_eq!(FdScheme::default(), FdScheme::Forward);
    }
}
