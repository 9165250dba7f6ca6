//! The [`Scalar`] trait for differentiation-generic residual functions.
//!
//! Residuals written as `fn eval<T: Scalar>(&self, x: &[T], out: &mut [T])`
//! work transparently with plain `f64`, forward-mode duals, the complex-step
//! scalar, and the reverse-mode recording scalar.

use std::fmt::Debug;
use std::ops::{Add, Div, Mul, Neg, Sub};

use num_complex::Complex64;

/// The central trait for differentiation-generic numeric code.
///
/// Unlike `num_traits::Float`, this trait does not require ordering on the
/// scalar itself (a complex-step value has no total order); comparisons happen
/// on the primal part through [`maximum`](Scalar::maximum) and
/// [`minimum`](Scalar::minimum), which each backend differentiates or records
/// appropriately.
pub trait Scalar:
    Copy
    + Debug
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + 'static
{
    /// Lift a plain float to this scalar (constant — zero derivative).
    fn from_f64(v: f64) -> Self;

    /// Extract the primal value.
    fn value(&self) -> f64;

    /// The additive identity.
    #[inline]
    fn zero() -> Self {
        Self::from_f64(0.0)
    }

    /// The multiplicative identity.
    #[inline]
    fn one() -> Self {
        Self::from_f64(1.0)
    }

    fn recip(self) -> Self;
    fn sqrt(self) -> Self;
    fn powi(self, n: i32) -> Self;
    fn powf(self, n: Self) -> Self;
    fn exp(self) -> Self;
    fn ln(self) -> Self;
    fn sin(self) -> Self;
    fn cos(self) -> Self;
    fn tan(self) -> Self;
    fn atan(self) -> Self;
    fn tanh(self) -> Self;
    fn abs(self) -> Self;

    /// The larger of `self` and `other`, compared on primal values.
    fn maximum(self, other: Self) -> Self;

    /// The smaller of `self` and `other`, compared on primal values.
    fn minimum(self, other: Self) -> Self;
}

impl Scalar for f64 {
    #[inline]
    fn from_f64(v: f64) -> Self {
        v
    }

    #[inline]
    fn value(&self) -> f64 {
        *self
    }

    #[inline]
    fn recip(self) -> Self {
        f64::recip(self)
    }

    #[inline]
    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }

    #[inline]
    fn powi(self, n: i32) -> Self {
        f64::powi(self, n)
    }

    #[inline]
    fn powf(self, n: Self) -> Self {
        f64::powf(self, n)
    }

    #[inline]
    fn exp(self) -> Self {
        f64::exp(self)
    }

    #[inline]
    fn ln(self) -> Self {
        f64::ln(self)
    }

    #[inline]
    fn sin(self) -> Self {
        f64::sin(self)
    }

    #[inline]
    fn cos(self) -> Self {
        f64::cos(self)
    }

    #[inline]
    fn tan(self) -> Self {
        f64::tan(self)
    }

    #[inline]
    fn atan(self) -> Self {
        f64::atan(self)
    }

    #[inline]
    fn tanh(self) -> Self {
        f64::tanh(self)
    }

    #[inline]
    fn abs(self) -> Self {
        f64::abs(self)
    }

    #[inline]
    fn maximum(self, other: Self) -> Self {
        f64::max(self, other)
    }

    #[inline]
    fn minimum(self, other: Self) -> Self {
        f64::min(self, other)
    }
}

/// Complex-step scalar.
///
/// A perturbation `x + ih` propagated through an analytic function carries the
/// derivative in its imaginary part with no subtractive cancellation. The
/// non-analytic operations are given their standard complex-step extensions:
/// `abs` flips sign on a negative real part, `maximum`/`minimum` branch on the
/// real parts, and `powi` multiplies repeatedly so negative real bases keep
/// the analytic-continuation branch.
impl Scalar for Complex64 {
    #[inline]
    fn from_f64(v: f64) -> Self {
        Complex64::new(v, 0.0)
    }

    #[inline]
    fn value(&self) -> f64 {
        self.re
    }

    #[inline]
    fn recip(self) -> Self {
        self.inv()
    }

    #[inline]
    fn sqrt(self) -> Self {
        self.sqrt()
    }

    #[inline]
    fn powi(self, n: i32) -> Self {
        num_complex::Complex::powi(&self, n)
    }

    #[inline]
    fn powf(self, n: Self) -> Self {
        self.powc(n)
    }

    #[inline]
    fn exp(self) -> Self {
        self.exp()
    }

    #[inline]
    fn ln(self) -> Self {
        self.ln()
    }

    #[inline]
    fn sin(self) -> Self {
        self.sin()
    }

    #[inline]
    fn cos(self) -> Self {
        self.cos()
    }

    #[inline]
    fn tan(self) -> Self {
        self.tan()
    }

    #[inline]
    fn atan(self) -> Self {
        self.atan()
    }

    #[inline]
    fn tanh(self) -> Self {
        self.tanh()
    }

    #[inline]
    fn abs(self) -> Self {
        if self.re < 0.0 {
            -self
        } else {
            self
        }
    }

    #[inline]
    fn maximum(self, other: Self) -> Self {
        if self.re >= other.re {
            self
        } else {
            other
        }
    }

    #[inline]
    fn minimum(self, other: Self) -> Self {
        if self.re <= other.re {
            self
        } else {
            other
        }
    }
}
