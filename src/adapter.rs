//! Solver-facing callback adapter with last-point caching.
//!
//! NLP solvers split one iterate into several callbacks — objective value,
//! objective gradient, constraint values, constraint Jacobian (structure once,
//! values repeatedly) — called in any order and with possibly repeated `x`.
//! The engine exposes exactly one expensive operation,
//! [`Evaluate::evaluate`], which fills all four outputs at once. This adapter
//! bridges the two shapes: it holds the most recently evaluated point and its
//! four outputs in an explicit state struct and re-runs the engine only when a
//! callback presents a different `x`.
//!
//! The comparison is exact per-element `f64` equality, not tolerance-based: a
//! solver re-queries the identical stored iterate verbatim, and a tolerant
//! match could silently serve stale derivatives for a genuinely new point.

use crate::cache::Evaluate;
use crate::error::Result;

/// Caching shim between one [`Evaluate`] engine and a solver's callbacks.
pub struct SolverAdapter<E: Evaluate> {
    engine: E,
    valid: bool,
    last_x: Vec<f64>,
    f: f64,
    g: Vec<f64>,
    df: Vec<f64>,
    dg: Vec<f64>,
}

impl<E: Evaluate> SolverAdapter<E> {
    /// Wrap an engine; no evaluation happens until the first callback.
    pub fn new(engine: E) -> Self {
        let nx = engine.nx();
        let ng = engine.ng();
        let jac_len = engine.jacobian_len();
        SolverAdapter {
            engine,
            valid: false,
            last_x: vec![0.0; nx],
            f: 0.0,
            g: vec![0.0; ng],
            df: vec![0.0; nx],
            dg: vec![0.0; jac_len],
        }
    }

    /// Number of design variables.
    pub fn nx(&self) -> usize {
        self.engine.nx()
    }

    /// Number of constraints.
    pub fn ng(&self) -> usize {
        self.engine.ng()
    }

    /// Length of the constraint-Jacobian values array.
    pub fn jacobian_len(&self) -> usize {
        self.engine.jacobian_len()
    }

    /// The 1-based `(rows, cols)` Jacobian structure, queried once by the
    /// solver and indexed identically by every
    /// [`jacobian_values`](Self::jacobian_values) answer.
    pub fn jacobian_structure(&self) -> (Vec<usize>, Vec<usize>) {
        self.engine.structure()
    }

    /// Evaluate the engine if `x` differs from the cached point.
    fn update(&mut self, x: &[f64]) -> Result<()> {
        if self.valid && x == self.last_x.as_slice() {
            return Ok(());
        }
        // The engine writes into the cached buffers; a failure partway
        // through leaves them half-updated, so the old point must be
        // invalidated before the call, not after.
        self.valid = false;
        self.f = self
            .engine
            .evaluate(x, &mut self.g, &mut self.df, &mut self.dg)?;
        self.last_x.copy_from_slice(x);
        self.valid = true;
        Ok(())
    }

    /// Objective value at `x`.
    pub fn objective(&mut self, x: &[f64]) -> Result<f64> {
        self.update(x)?;
        Ok(self.f)
    }

    /// Objective gradient at `x`.
    pub fn gradient(&mut self, x: &[f64], df: &mut [f64]) -> Result<()> {
        self.update(x)?;
        df.copy_from_slice(&self.df);
        Ok(())
    }

    /// Constraint values at `x`.
    pub fn constraints(&mut self, x: &[f64], g: &mut [f64]) -> Result<()> {
        self.update(x)?;
        g.copy_from_slice(&self.g);
        Ok(())
    }

    /// Constraint-Jacobian values at `x`, in
    /// [`jacobian_structure`](Self::jacobian_structure) order.
    pub fn jacobian_values(&mut self, x: &[f64], dg: &mut [f64]) -> Result<()> {
        self.update(x)?;
        dg.copy_from_slice(&self.dg);
        Ok(())
    }

    /// Release the wrapped engine.
    pub fn into_inner(self) -> E {
        self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NlDerivError;
    use crate::sparsity::SparsityPattern;
    use approx::assert_relative_eq;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Counts engine evaluations; derivatives are stand-ins.
    struct CountingEngine {
        pattern: SparsityPattern,
        calls: Rc<Cell<usize>>,
    }

    impl Evaluate for CountingEngine {
        fn nx(&self) -> usize {
            2
        }

        fn ng(&self) -> usize {
            1
        }

        fn pattern(&self) -> &SparsityPattern {
            &self.pattern
        }

        fn evaluate(
            &mut self,
            x: &[f64],
            g: &mut [f64],
            df: &mut [f64],
            dg: &mut [f64],
        ) -> Result<f64> {
            self.calls.set(self.calls.get() + 1);
            g[0] = x[0] + x[1];
            df[0] = 1.0;
            df[1] = 2.0 * x[1];
            dg[0] = 1.0;
            dg[1] = 1.0;
            Ok(x[0] * x[0] + x[1] * x[1])
        }
    }

    fn adapter() -> (SolverAdapter<CountingEngine>, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        let engine = CountingEngine {
            pattern: SparsityPattern::Dense,
            calls: calls.clone(),
        };
        (SolverAdapter::new(engine), calls)
    }

    #[test]
    fn test_single_evaluation_per_point() {
        let (mut adapter, calls) = adapter();
        let x = [1.0, 2.0];
        let mut g = [0.0];
        let mut df = [0.0; 2];
        let mut dg = [0.0; 2];

        assert_relative_eq!(adapter.objective(&x).unwrap(), 5.0);
        adapter.gradient(&x, &mut df).unwrap();
        adapter.constraints(&x, &mut g).unwrap();
        adapter.jacobian_values(&x, &mut dg).unwrap();
        assert_eq!(calls.get(), 1);

        // A new point forces exactly one more evaluation.
        let x2 = [1.0, 3.0];
        adapter.constraints(&x2, &mut g).unwrap();
        assert_relative_eq!(g[0], 4.0);
        assert_relative_eq!(adapter.objective(&x2).unwrap(), 10.0);
        assert_eq!(calls.get(), 2);

        // Returning to a previously seen (but not cached) point re-evaluates.
        adapter.objective(&x).unwrap();
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_exact_comparison_not_tolerant() {
        let (mut adapter, calls) = adapter();
        adapter.objective(&[1.0, 2.0]).unwrap();
        // One ulp away is a different point; anything smaller rounds to 2.0.
        let next = f64::from_bits(2.0f64.to_bits() + 1);
        adapter.objective(&[1.0, next]).unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_structure_matches_pattern() {
        let (adapter, _) = adapter();
        let (rows, cols) = adapter.jacobian_structure();
        assert_eq!(rows, vec![1, 1]);
        assert_eq!(cols, vec![1, 2]);
        assert_eq!(adapter.jacobian_len(), 2);
    }

    /// Engine that fails; the adapter must stay invalid and retry.
    struct FailingEngine {
        pattern: SparsityPattern,
        fail: bool,
    }

    impl Evaluate for FailingEngine {
        fn nx(&self) -> usize {
            1
        }

        fn ng(&self) -> usize {
            0
        }

        fn pattern(&self) -> &SparsityPattern {
            &self.pattern
        }

        fn evaluate(
            &mut self,
            x: &[f64],
            _g: &mut [f64],
            df: &mut [f64],
            _dg: &mut [f64],
        ) -> Result<f64> {
            if self.fail {
                return Err(NlDerivError::FunctionEvaluation("boom".to_string()));
            }
            df[0] = 1.0;
            Ok(x[0])
        }
    }

    #[test]
    fn test_failure_does_not_poison_cache() {
        let mut adapter = SolverAdapter::new(FailingEngine {
            pattern: SparsityPattern::Dense,
            fail: true,
        });
        assert!(adapter.objective(&[1.0]).is_err());

        // After the engine recovers, the same point must be re-evaluated,
        // not served from a half-written cache.
        adapter.engine.fail = false;
        assert_relative_eq!(adapter.objective(&[1.0]).unwrap(), 1.0);
    }

    /// Engine that scribbles into the gradient buffer before failing, the way
    /// a multi-direction backend fails partway through its stencil loop.
    struct ScribblingEngine {
        pattern: SparsityPattern,
        fail: bool,
    }

    impl Evaluate for ScribblingEngine {
        fn nx(&self) -> usize {
            2
        }

        fn ng(&self) -> usize {
            1
        }

        fn pattern(&self) -> &SparsityPattern {
            &self.pattern
        }

        fn evaluate(
            &mut self,
            x: &[f64],
            g: &mut [f64],
            df: &mut [f64],
            dg: &mut [f64],
        ) -> Result<f64> {
            df[0] = f64::NAN; // direction 0 written before the failure
            if self.fail {
                return Err(NlDerivError::FunctionEvaluation(
                    "domain limit".to_string(),
                ));
            }
            g[0] = x[0] + x[1];
            df[0] = 1.0;
            df[1] = 1.0;
            dg[0] = 1.0;
            dg[1] = 1.0;
            Ok(x[0] + x[1])
        }
    }

    #[test]
    fn test_failed_evaluation_invalidates_previous_point() {
        let mut adapter = SolverAdapter::new(ScribblingEngine {
            pattern: SparsityPattern::Dense,
            fail: false,
        });
        let x1 = [1.0, 2.0];
        let mut df = [0.0; 2];
        adapter.gradient(&x1, &mut df).unwrap();
        assert_eq!(df, [1.0, 1.0]);

        // A failed evaluation at a new point half-overwrites the buffers;
        // the previously cached point must not be served afterwards.
        adapter.engine.fail = true;
        assert!(adapter.objective(&[5.0, 5.0]).is_err());

        adapter.engine.fail = false;
        adapter.gradient(&x1, &mut df).unwrap();
        assert_eq!(df, [1.0, 1.0]);
    }
}
