//! Forward-mode dual number: a value paired with its tangent (derivative).

use std::fmt::{self, Display};
use std::ops::{Add, Div, Mul, Neg, Sub};

use crate::diff::scalar::Scalar;

/// `Dual { re, eps }` represents `re + eps·ε` where `ε² = 0`.
///
/// Seeding `eps = 1` on one input and `0` on the rest makes a single
/// evaluation of a [`Residual`](crate::Residual) carry one directional
/// derivative; `nx` such passes assemble a dense Jacobian, and one pass per
/// color class assembles a compressed sparse Jacobian.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Dual {
    /// Primal (real) value.
    pub re: f64,
    /// Tangent (derivative) value.
    pub eps: f64,
}

impl Display for Dual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} + {}ε", self.re, self.eps)
    }
}

impl Dual {
    /// Create a new dual number.
    #[inline]
    pub fn new(re: f64, eps: f64) -> Self {
        Dual { re, eps }
    }

    /// Create a constant (zero derivative).
    #[inline]
    pub fn constant(re: f64) -> Self {
        Dual { re, eps: 0.0 }
    }

    /// Create a variable (unit derivative) for differentiation.
    #[inline]
    pub fn variable(re: f64) -> Self {
        Dual { re, eps: 1.0 }
    }

    /// Apply the chain rule: given `f(self.re)` and `f'(self.re)`, produce the dual result.
    #[inline]
    fn chain(self, f_val: f64, f_deriv: f64) -> Self {
        Dual {
            re: f_val,
            eps: self.eps * f_deriv,
        }
    }
}

impl Add for Dual {
    type Output = Dual;

    #[inline]
    fn add(self, rhs: Dual) -> Dual {
        Dual {
            re: self.re + rhs.re,
            eps: self.eps + rhs.eps,
        }
    }
}

impl Sub for Dual {
    type Output = Dual;

    #[inline]
    fn sub(self, rhs: Dual) -> Dual {
        Dual {
            re: self.re - rhs.re,
            eps: self.eps - rhs.eps,
        }
    }
}

impl Mul for Dual {
    type Output = Dual;

    #[inline]
    fn mul(self, rhs: Dual) -> Dual {
        Dual {
            re: self.re * rhs.re,
            eps: self.eps * rhs.re + self.re * rhs.eps,
        }
    }
}

impl Div for Dual {
    type Output = Dual;

    #[inline]
    fn div(self, rhs: Dual) -> Dual {
        let inv = 1.0 / rhs.re;
        Dual {
            re: self.re * inv,
            eps: (self.eps - self.re * rhs.eps * inv) * inv,
        }
    }
}

impl Neg for Dual {
    type Output = Dual;

    #[inline]
    fn neg(self) -> Dual {
        Dual {
            re: -self.re,
            eps: -self.eps,
        }
    }
}

impl Scalar for Dual {
    #[inline]
    fn from_f64(v: f64) -> Self {
        Dual::constant(v)
    }

    #[inline]
    fn value(&self) -> f64 {
        self.re
    }

    #[inline]
    fn recip(self) -> Self {
        let inv = 1.0 / self.re;
        self.chain(inv, -inv * inv)
    }

    #[inline]
    fn sqrt(self) -> Self {
        let s = self.re.sqrt();
        self.chain(s, 0.5 / s)
    }

    #[inline]
    fn powi(self, n: i32) -> Self {
        self.chain(self.re.powi(n), f64::from(n) * self.re.powi(n - 1))
    }

    #[inline]
    fn powf(self, n: Self) -> Self {
        // d (x^y) = y x^(y-1) dx + x^y ln(x) dy
        let val = self.re.powf(n.re);
        Dual {
            re: val,
            eps: n.re * self.re.powf(n.re - 1.0) * self.eps + val * self.re.ln() * n.eps,
        }
    }

    #[inline]
    fn exp(self) -> Self {
        let e = self.re.exp();
        self.chain(e, e)
    }

    #[inline]
    fn ln(self) -> Self {
        self.chain(self.re.ln(), 1.0 / self.re)
    }

    #[inline]
    fn sin(self) -> Self {
        self.chain(self.re.sin(), self.re.cos())
    }

    #[inline]
    fn cos(self) -> Self {
        self.chain(self.re.cos(), -self.re.sin())
    }

    #[inline]
    fn tan(self) -> Self {
        let t = self.re.tan();
        self.chain(t, 1.0 + t * t)
    }

    #[inline]
    fn atan(self) -> Self {
        self.chain(self.re.atan(), 1.0 / (1.0 + self.re * self.re))
    }

    #[inline]
    fn tanh(self) -> Self {
        let t = self.re.tanh();
        self.chain(t, 1.0 - t * t)
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
