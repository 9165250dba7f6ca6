//! Evaluation caches: construction-time backend dispatch and the
//! non-allocating per-iteration evaluate operation.
//!
//! A cache is built once per `(pattern, method, function)` combination, before
//! any optimizer iteration. Construction resolves the differentiation method
//! into a concrete backend state (dual buffers, a recorded tape, or
//! finite-difference work vectors) so the hot path never branches on "which
//! backend" beyond one closed-enum match, and never allocates.

pub mod dense;
pub mod sparse;

use serde::{Deserialize, Serialize};

use crate::diff::finite_diff::FdScheme;
use crate::error::{NlDerivError, Result};
use crate::function::{AnalyticResidual, Residual};
use crate::sparsity::SparsityPattern;

use dense::DenseState;
use sparse::SparseState;

/// Differentiation strategy for a cache, chosen once at construction.
///
/// User-supplied analytic derivatives are not a variant here; they are the
/// separate [`AnalyticCache`] type, which needs no backend state at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiffMethod {
    /// Dual-number forward mode: one tangent propagation per direction.
    ForwardAD,

    /// Bytecode-tape reverse mode: record once, then per evaluation one
    /// forward value sweep plus one reverse sweep per output row. The tape is
    /// recorded at `x = 0`; residuals whose control flow outside the
    /// [`Scalar`](crate::Scalar) surface depends on `x` are not re-traced.
    ReverseAD,

    /// Finite differencing with the given scheme.
    FiniteDiff(FdScheme),
}

impl Default for DiffMethod {
    fn default() -> Self {
        DiffMethod::ForwardAD
    }
}

/// The set of differentiation backends available to cache construction.
///
/// Requesting a method outside the set is a configuration error, never a
/// silent substitution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub forward_ad: bool,
    pub reverse_ad: bool,
    pub finite_diff: bool,
}

impl Capabilities {
    /// Every backend available (the default).
    pub fn all() -> Self {
        Capabilities {
            forward_ad: true,
            reverse_ad: true,
            finite_diff: true,
        }
    }

    /// Whether `method` may be used under this capability set.
    pub fn allows(&self, method: DiffMethod) -> bool {
        match method {
            DiffMethod::ForwardAD => self.forward_ad,
            DiffMethod::ReverseAD => self.reverse_ad,
            DiffMethod::FiniteDiff(_) => self.finite_diff,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities::all()
    }
}

/// The uniform solver-facing evaluation surface.
///
/// Both cache types implement it; the [`SolverAdapter`](crate::adapter::SolverAdapter)
/// is generic over it.
pub trait Evaluate {
    /// Number of design variables.
    fn nx(&self) -> usize;

    /// Number of constraints.
    fn ng(&self) -> usize;

    /// The sparsity pattern this cache was built with.
    fn pattern(&self) -> &SparsityPattern;

    /// Length of the flattened constraint-Jacobian output.
    fn jacobian_len(&self) -> usize {
        self.pattern().jacobian_len(self.nx(), self.ng())
    }

    /// The 1-based `(rows, cols)` structure of the flattened Jacobian output.
    fn structure(&self) -> (Vec<usize>, Vec<usize>) {
        self.pattern().structure(self.nx(), self.ng())
    }

    /// Evaluate at `x`, filling `g` (length `ng`), `df` (length `nx`), and
    /// `dg` (length [`jacobian_len`](Self::jacobian_len)) in place; returns
    /// the objective value. Performs no dynamic allocation.
    fn evaluate(&mut self, x: &[f64], g: &mut [f64], df: &mut [f64], dg: &mut [f64])
        -> Result<f64>;
}

enum State {
    Dense(DenseState),
    Sparse(SparseState),
}

/// Pre-allocated evaluation cache for a differentiated residual.
///
/// Owns the residual function, the `1+ng` primal work buffer, and the backend
/// state selected at construction. Exclusively owned by one optimization run;
/// every [`evaluate`](Evaluate::evaluate) overwrites the work buffers in
/// place.
pub struct EvalCache<F: Residual> {
    func: F,
    nx: usize,
    ng: usize,
    pattern: SparsityPattern,
    /// Primal output buffer: `out[0]` objective, `out[1..]` constraints.
    out: Vec<f64>,
    state: State,
}

impl<F: Residual> EvalCache<F> {
    /// Build a cache using one method for the whole combined residual.
    pub fn new(pattern: SparsityPattern, method: DiffMethod, func: F) -> Result<Self> {
        Self::with_capabilities(pattern, method, method, func, Capabilities::all())
    }

    /// Build a sparse-pattern cache with separate objective-gradient and
    /// constraint-Jacobian methods.
    ///
    /// A dense-favoring backend (reverse mode) is usually optimal for the
    /// scalar objective while a sparsity-aware one (colored forward mode or
    /// colored finite differences) is optimal for the constraint block.
    pub fn with_methods(
        pattern: SparsityPattern,
        grad_method: DiffMethod,
        jac_method: DiffMethod,
        func: F,
    ) -> Result<Self> {
        Self::with_capabilities(pattern, grad_method, jac_method, func, Capabilities::all())
    }

    /// [`with_methods`](Self::with_methods) restricted to a capability set.
    pub fn with_capabilities(
        pattern: SparsityPattern,
        grad_method: DiffMethod,
        jac_method: DiffMethod,
        func: F,
        caps: Capabilities,
    ) -> Result<Self> {
        let nx = func.nx();
        let ng = func.ng();
        pattern.validate(nx, ng)?;

        for method in [grad_method, jac_method] {
            if !caps.allows(method) {
                return Err(NlDerivError::UnsupportedMethod(format!(
                    "{:?} is not in the capability set",
                    method
                )));
            }
        }

        let state = match &pattern {
            SparsityPattern::Dense => {
                if grad_method != jac_method {
                    return Err(NlDerivError::UnsupportedMethod(format!(
                        "dense evaluation differentiates the combined residual in one \
                         sweep; cannot split {:?} / {:?}",
                        grad_method, jac_method
                    )));
                }
                State::Dense(DenseState::build(grad_method, &func, nx, ng)?)
            }
            SparsityPattern::Sparse { rows, cols } => State::Sparse(SparseState::build(
                rows,
                cols,
                grad_method,
                jac_method,
                &func,
                nx,
                ng,
            )?),
        };

        Ok(EvalCache {
            func,
            nx,
            ng,
            pattern,
            out: vec![0.0; 1 + ng],
            state,
        })
    }

    fn check_buffers(&self, x: &[f64], g: &[f64], df: &[f64], dg: &[f64]) -> Result<()> {
        if x.len() != self.nx || df.len() != self.nx {
            return Err(NlDerivError::DimensionMismatch(format!(
                "Expected {} variables, got x: {}, df: {}",
                self.nx,
                x.len(),
                df.len()
            )));
        }
        if g.len() != self.ng {
            return Err(NlDerivError::DimensionMismatch(format!(
                "Expected {} constraints, got {}",
                self.ng,
                g.len()
            )));
        }
        let want = self.pattern.jacobian_len(self.nx, self.ng);
        if dg.len() != want {
            return Err(NlDerivError::DimensionMismatch(format!(
                "Expected Jacobian output of length {}, got {}",
                want,
                dg.len()
            )));
        }
        Ok(())
    }
}

impl<F: Residual> Evaluate for EvalCache<F> {
    fn nx(&self) -> usize {
        self.nx
    }

    fn ng(&self) -> usize {
        self.ng
    }

    fn pattern(&self) -> &SparsityPattern {
        &self.pattern
    }

    fn evaluate(&mut self, x: &[f64], g: &mut [f64], df: &mut [f64], dg: &mut [f64])
        -> Result<f64> {
        self.check_buffers(x, g, df, dg)?;

        match &mut self.state {
            State::Dense(state) => {
                state.fill(&self.func, x, &mut self.out)?;
                let jac = state.jacobian();
                for j in 0..self.nx {
                    df[j] = jac[[0, j]];
                }
                // Constraint rows flattened column-major (constraint index
                // fastest), the order `SparsityPattern::Dense.structure()`
                // enumerates.
                for j in 0..self.nx {
                    for i in 0..self.ng {
                        dg[j * self.ng + i] = jac[[1 + i, j]];
                    }
                }
            }
            State::Sparse(state) => {
                self.func.eval(x, &mut self.out)?;
                state.fill_gradient(&self.func, x, &self.out, df)?;
                state.fill_jacobian(&self.func, x, &self.out, dg)?;
            }
        }

        g.copy_from_slice(&self.out[1..]);
        Ok(self.out[0])
    }
}

/// Evaluation cache for a residual with user-supplied analytic derivatives.
///
/// No differentiation backend is involved; the engine validates dimensions
/// and forwards the caller's buffers. The `dg` layout contract is documented
/// on [`AnalyticResidual`].
pub struct AnalyticCache<F: AnalyticResidual> {
    func: F,
    nx: usize,
    ng: usize,
    pattern: SparsityPattern,
}

impl<F: AnalyticResidual> AnalyticCache<F> {
    /// Build a cache around user-supplied derivatives.
    pub fn new(pattern: SparsityPattern, func: F) -> Result<Self> {
        let nx = func.nx();
        let ng = func.ng();
        pattern.validate(nx, ng)?;
        Ok(AnalyticCache {
            func,
            nx,
            ng,
            pattern,
        })
    }
}

impl<F: AnalyticResidual> Evaluate for AnalyticCache<F> {
    fn nx(&self) -> usize {
        self.nx
    }

    fn ng(&self) -> usize {
        self.ng
    }

    fn pattern(&self) -> &SparsityPattern {
        &self.pattern
    }

    fn evaluate(&mut self, x: &[f64], g: &mut [f64], df: &mut [f64], dg: &mut [f64])
        -> Result<f64> {
        if x.len() != self.nx
            || df.len() != self.nx
            || g.len() != self.ng
            || dg.len() != self.pattern.jacobian_len(self.nx, self.ng)
        {
            return Err(NlDerivError::DimensionMismatch(format!(
                "Buffer sizes (x: {}, g: {}, df: {}, dg: {}) disagree with problem \
                 dimensions (nx: {}, ng: {}, jac: {})",
                x.len(),
                g.len(),
                df.len(),
                dg.len(),
                self.nx,
                self.ng,
                self.pattern.jacobian_len(self.nx, self.ng)
            )));
        }

        let f = self.func.eval(x, g)?;
        self.func.gradient(x, df)?;
        self.func.jacobian(x, dg)?;
        Ok(f)
    }
}
