//! Residual function traits.
//!
//! This module defines the `Residual` trait, the combined objective/constraint
//! function every differentiation backend evaluates, and the `AnalyticResidual`
//! trait for problems that supply their own derivatives.

use crate::diff::scalar::Scalar;
use crate::error::Result;

/// A combined residual function for a nonlinear program.
///
/// The function packs the scalar objective and the `ng` constraints into one
/// `(1+ng)`-vector: `out[0]` is the objective, `out[1..=ng]` are the
/// constraints. Packing them lets one differentiation sweep produce both the
/// objective gradient (row 0 of the combined Jacobian) and the constraint
/// Jacobian (the remaining rows).
///
/// `eval` is generic over [`Scalar`] so the same function body serves plain
/// `f64` evaluation, dual-number forward mode, complex-step differencing, and
/// tape recording. Write the body with `T::from_f64` for literal constants:
///
/// ```
/// use nlderiv_rs::{Residual, Scalar, Result};
///
/// struct Rosenbrock;
///
/// impl Residual for Rosenbrock {
///     fn nx(&self) -> usize { 2 }
///     fn ng(&self) -> usize { 1 }
///
///     fn eval<T: Scalar>(&self, x: &[T], out: &mut [T]) -> Result<()> {
///         let c = T::from_f64(100.0);
///         let one = T::from_f64(1.0);
///         out[0] = c * (x[1] - x[0].powi(2)).powi(2) + (one - x[0]).powi(2);
///         out[1] = x[0].powi(2) + x[1].powi(2);
///         Ok(())
///     }
/// }
/// ```
pub trait Residual {
    /// Number of design variables.
    fn nx(&self) -> usize;

    /// Number of constraints.
    fn ng(&self) -> usize;

    /// Evaluate the combined residual at `x`, filling `out` (length `1+ng`).
    fn eval<T: Scalar>(&self, x: &[T], out: &mut [T]) -> Result<()>;
}

impl<F: Residual + ?Sized> Residual for &F {
    fn nx(&self) -> usize {
        (**self).nx()
    }

    fn ng(&self) -> usize {
        (**self).ng()
    }

    fn eval<T: Scalar>(&self, x: &[T], out: &mut [T]) -> Result<()> {
        (**self).eval(x, out)
    }
}

/// A residual function with user-supplied analytic derivatives.
///
/// No differentiation backend is invoked for these problems; the engine only
/// forwards the caller's buffers. The `jacobian` layout contract depends on
/// the sparsity pattern the cache was built with:
///
/// - `Dense`: `dg` has length `nx*ng` and is the constraint Jacobian flattened
///   column-major (constraint index fastest): `dg[j*ng + i] = ∂g_{i+1}/∂x_{j+1}`.
/// - `Sparse{rows, cols}`: `dg` has one slot per pattern entry, in the exact
///   `(rows[k], cols[k])` order of the pattern.
pub trait AnalyticResidual {
    /// Number of design variables.
    fn nx(&self) -> usize;

    /// Number of constraints.
    fn ng(&self) -> usize;

    /// Evaluate objective and constraints at `x`; fill `g`, return the objective.
    fn eval(&self, x: &[f64], g: &mut [f64]) -> Result<f64>;

    /// Fill the objective gradient at `x`.
    fn gradient(&self, x: &[f64], df: &mut [f64]) -> Result<()>;

    /// Fill the constraint Jacobian values at `x` (layout per the pattern, above).
    fn jacobian(&self, x: &[f64], dg: &mut [f64]) -> Result<()>;
}

impl<F: AnalyticResidual + ?Sized> AnalyticResidual for &F {
    fn nx(&self) -> usize {
        (**self).nx()
    }

    fn ng(&self) -> usize {
        (**self).ng()
    }

    fn eval(&self, x: &[f64], g: &mut [f64]) -> Result<f64> {
        (**self).eval(x, g)
    }

    fn gradient(&self, x: &[f64], df: &mut [f64]) -> Result<()> {
        (**self).gradient(x, df)
    }

    fn jacobian(&self, x: &[f64], dg: &mut [f64]) -> Result<()> {
        (**self).jacobian(x, dg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// f = x1² - x2, g = [x2 - 2 x1, -x2, x1²]
    struct Sample;

    impl Residual for Sample {
        fn nx(&self) -> usize {
            2
        }

        fn ng(&self) -> usize {
            3
        }

        fn eval<T: Scalar>(&self, x: &[T], out: &mut [T]) -> Result<()> {
            let two = T::from_f64(2.0);
            out[0] = x[0].powi(2) - x[1];
            out[1] = x[1] - two * x[0];
            out[2] = -x[1];
            out[3] = x[0].powi(2);
            Ok(())
        }
    }

    #[test]
    fn test_plain_eval() {
        let mut out = [0.0; 4];
        Sample.eval(&[1.0, 2.0], &mut out).unwrap();
        assert_relative_eq!(out[0], -1.0);
        assert_relative_eq!(out[1], 0.0);
        assert_relative_eq!(out[2], -2.0);
        assert_relative_eq!(out[3], 1.0);
    }

    #[test]
    fn test_reference_forwarding() {
        let f = Sample;
        let r = &f;
        assert_eq!(Residual::nx(&r), 2);
        assert_eq!(Residual::ng(&r), 3);
    }
}
