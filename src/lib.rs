//! # nlderiv-rs
//!
//! `nlderiv-rs` gives callers of a gradient-based nonlinear optimizer a single
//! uniform way to obtain an objective value, its gradient, a constraint
//! vector, and its Jacobian, independent of the differentiation strategy and
//! the Jacobian density model in effect.
//!
//! The library provides:
//! - A strategy-selectable, pre-allocated evaluation cache: forward-mode AD,
//!   reverse-mode (bytecode tape) AD, forward/central/complex-step finite
//!   differences, or user-supplied analytic derivatives
//! - Automatic sparsity-pattern discovery by probing the residual at sample
//!   points
//! - A graph-coloring-compressed sparse constraint-Jacobian path
//! - A solver adapter caching the last evaluated point, so an NLP solver's
//!   separate callbacks never trigger duplicate work
//!
//! ## Basic Usage
//!
//! ```
//! use nlderiv_rs::{
//!     DiffMethod, EvalCache, Evaluate, Residual, Result, Scalar, SparsityPattern,
//! };
//!
//! // f = x1² - x2, g = [x2 - 2 x1, -x2, x1²]
//! struct Problem;
//!
//! impl Residual for Problem {
//!     fn nx(&self) -> usize { 2 }
//!     fn ng(&self) -> usize { 3 }
//!
//!     fn eval<T: Scalar>(&self, x: &[T], out: &mut [T]) -> Result<()> {
//!         let two = T::from_f64(2.0);
//!         out[0] = x[0].powi(2) - x[1];
//!         out[1] = x[1] - two * x[0];
//!         out[2] = -x[1];
//!         out[3] = x[0].powi(2);
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> Result<()> {
//! let mut cache = EvalCache::new(SparsityPattern::Dense, DiffMethod::ForwardAD, Problem)?;
//! let (mut g, mut df, mut dg) = (vec![0.0; 3], vec![0.0; 2], vec![0.0; 6]);
//! let f = cache.evaluate(&[1.0, 2.0], &mut g, &mut df, &mut dg)?;
//! assert_eq!(f, -1.0);
//! assert_eq!(df, vec![2.0, -1.0]);
//! assert_eq!(dg, vec![-2.0, 0.0, 2.0, 1.0, -1.0, 0.0]);
//! # Ok(())
//! # }
//! ```

// Public modules
pub mod error;

pub mod adapter;
pub mod cache;
pub mod coloring;
pub mod diff;
pub mod function;
pub mod sparsity;

// Re-exports for convenience
pub use error::{NlDerivError, Result};

pub use adapter::SolverAdapter;
pub use cache::{AnalyticCache, Capabilities, DiffMethod, EvalCache, Evaluate};
pub use diff::{Dual, FdScheme, Scalar};
pub use function::{AnalyticResidual, Residual};
pub use sparsity::{detect_sparsity, detect_sparsity_at, detect_sparsity_with_rng, SparsityPattern};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
