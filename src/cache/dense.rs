//! Dense-path backend states.
//!
//! Every dense backend produces the same thing per evaluation: the combined
//! `(1+ng) × nx` Jacobian of the residual, row 0 being the objective gradient
//! and the remaining rows the constraint Jacobian. All work buffers are sized
//! at construction.

use ndarray::Array2;
use num_complex::Complex64;

use crate::diff::dual::Dual;
use crate::diff::finite_diff::{relative_step, FdScheme, COMPLEX_STEP, DEFAULT_EPSILON};
use crate::diff::tape::Tape;
use crate::error::{NlDerivError, Result};
use crate::function::Residual;

use super::DiffMethod;

pub(crate) enum DenseState {
    Forward(ForwardState),
    Reverse(ReverseState),
    Fd(FdState),
}

impl DenseState {
    pub(crate) fn build<F: Residual>(
        method: DiffMethod,
        func: &F,
        nx: usize,
        ng: usize,
    ) -> Result<Self> {
        Ok(match method {
            DiffMethod::ForwardAD => DenseState::Forward(ForwardState::new(nx, ng)),
            DiffMethod::ReverseAD => DenseState::Reverse(ReverseState::new(func, nx, ng)?),
            DiffMethod::FiniteDiff(scheme) => DenseState::Fd(FdState::new(scheme, nx, ng)),
        })
    }

    /// Refresh `out` (primal values) and the work Jacobian at `x`.
    pub(crate) fn fill<F: Residual>(
        &mut self,
        func: &F,
        x: &[f64],
        out: &mut [f64],
    ) -> Result<()> {
        match self {
            DenseState::Forward(state) => state.fill(func, x, out),
            DenseState::Reverse(state) => state.fill(x, out),
            DenseState::Fd(state) => state.fill(func, x, out),
        }
    }

    pub(crate) fn jacobian(&self) -> &Array2<f64> {
        match self {
            DenseState::Forward(state) => &state.jac,
            DenseState::Reverse(state) => &state.jac,
            DenseState::Fd(state) => &state.jac,
        }
    }
}

/// Dual-number forward mode: `nx` single-tangent passes per evaluation.
pub(crate) struct ForwardState {
    xd: Vec<Dual>,
    outd: Vec<Dual>,
    jac: Array2<f64>,
}

impl ForwardState {
    fn new(nx: usize, ng: usize) -> Self {
        ForwardState {
            xd: vec![Dual::constant(0.0); nx],
            outd: vec![Dual::constant(0.0); 1 + ng],
            jac: Array2::zeros((1 + ng, nx)),
        }
    }

    fn fill<F: Residual>(&mut self, func: &F, x: &[f64], out: &mut [f64]) -> Result<()> {
        let nx = x.len();
        if nx == 0 {
            return func.eval(x, out);
        }
        for j in 0..nx {
            for (xd, &v) in self.xd.iter_mut().zip(x.iter()) {
                *xd = Dual::constant(v);
            }
            self.xd[j] = Dual::variable(x[j]);
            func.eval(&self.xd, &mut self.outd)?;
            for (i, o) in self.outd.iter().enumerate() {
                self.jac[[i, j]] = o.eps;
            }
            if j == 0 {
                for (o, dual) in out.iter_mut().zip(self.outd.iter()) {
                    *o = dual.re;
                }
            }
        }
        Ok(())
    }
}

/// Bytecode-tape reverse mode: one forward value sweep, then one seeded
/// reverse sweep per combined-residual row.
pub(crate) struct ReverseState {
    tape: Tape,
    adjoints: Vec<f64>,
    jac: Array2<f64>,
}

impl ReverseState {
    fn new<F: Residual>(func: &F, nx: usize, ng: usize) -> Result<Self> {
        let tape = Tape::record(func, &vec![0.0; nx])?;
        let adjoints = vec![0.0; tape.num_vars()];
        Ok(ReverseState {
            tape,
            adjoints,
            jac: Array2::zeros((1 + ng, nx)),
        })
    }

    fn fill(&mut self, x: &[f64], out: &mut [f64]) -> Result<()> {
        self.tape.forward(x)?;
        for (k, o) in out.iter_mut().enumerate() {
            *o = self.tape.output_value(k);
        }
        for k in 0..out.len() {
            self.tape.reverse_into(k, &mut self.adjoints);
            for j in 0..x.len() {
                self.jac[[k, j]] = self.adjoints[j];
            }
        }
        Ok(())
    }
}

/// Finite-difference stencil over all `nx` directions.
pub(crate) struct FdState {
    scheme: FdScheme,
    eps: f64,
    xw: Vec<f64>,
    out1: Vec<f64>,
    out2: Vec<f64>,
    xc: Vec<Complex64>,
    outc: Vec<Complex64>,
    jac: Array2<f64>,
}

impl FdState {
    fn new(scheme: FdScheme, nx: usize, ng: usize) -> Self {
        let nout = 1 + ng;
        let (nxc, noutc) = if scheme == FdScheme::ComplexStep {
            (nx, nout)
        } else {
            (0, 0)
        };
        FdState {
            scheme,
            eps: DEFAULT_EPSILON,
            xw: vec![0.0; nx],
            out1: vec![0.0; nout],
            out2: vec![0.0; nout],
            xc: vec![Complex64::new(0.0, 0.0); nxc],
            outc: vec![Complex64::new(0.0, 0.0); noutc],
            jac: Array2::zeros((nout, nx)),
        }
    }

    fn fill<F: Residual>(&mut self, func: &F, x: &[f64], out: &mut [f64]) -> Result<()> {
        // Base point: primal values for the caller and, for the forward
        // scheme, the unperturbed side of the stencil.
        func.eval(x, out)?;

        match self.scheme {
            FdScheme::Forward => {
                self.xw.copy_from_slice(x);
                for j in 0..x.len() {
                    let h = relative_step(x[j], self.eps);
                    self.xw[j] = x[j] + h;
                    func.eval(&self.xw, &mut self.out1)?;
                    self.xw[j] = x[j];
                    for i in 0..self.out1.len() {
                        self.jac[[i, j]] = (self.out1[i] - out[i]) / h;
                    }
                }
            }
            FdScheme::Central => {
                self.xw.copy_from_slice(x);
                for j in 0..x.len() {
                    let h = relative_step(x[j], self.eps);
                    self.xw[j] = x[j] + h;
                    func.eval(&self.xw, &mut self.out1)?;
                    self.xw[j] = x[j] - h;
                    func.eval(&self.xw, &mut self.out2)?;
                    self.xw[j] = x[j];
                    for i in 0..self.out1.len() {
                        self.jac[[i, j]] = (self.out1[i] - self.out2[i]) / (2.0 * h);
                    }
                }
            }
            FdScheme::ComplexStep => {
                let h = COMPLEX_STEP;
                for (xc, &v) in self.xc.iter_mut().zip(x.iter()) {
                    *xc = Complex64::new(v, 0.0);
                }
                for j in 0..x.len() {
                    self.xc[j].im = h;
                    func.eval(&self.xc, &mut self.outc)?;
                    self.xc[j].im = 0.0;
                    for (i, oc) in self.outc.iter().enumerate() {
                        let d = oc.im / h;
                        if !d.is_finite() {
                            return Err(NlDerivError::NonFiniteDerivative(format!(
                                "complex step produced {} at output {}, direction {}",
                                d, i, j
                            )));
                        }
                        self.jac[[i, j]] = d;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::scalar::Scalar;
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

    fn expected() -> Array2<f64> {
        ndarray::array![[2.0, -1.0], [-2.0, 1.0], [0.0, -1.0], [2.0, 0.0]]
    }

    fn check_backend(method: DiffMethod, tol: f64) {
        let mut state = DenseState::build(method, &Sample, 2, 3).unwrap();
        let mut out = [0.0; 4];
        state.fill(&Sample, &[1.0, 2.0], &mut out).unwrap();

        assert_relative_eq!(out[0], -1.0, epsilon = tol);
        let jac = state.jacobian();
        let want = expected();
        for i in 0..4 {
            for j in 0..2 {
                assert_relative_eq!(jac[[i, j]], want[[i, j]], epsilon = tol);
            }
        }
    }

    #[test]
    fn test_forward_ad() {
        check_backend(DiffMethod::ForwardAD, 1e-14);
    }

    #[test]
    fn test_reverse_ad() {
        check_backend(DiffMethod::ReverseAD, 1e-14);
    }

    #[test]
    fn test_forward_fd() {
        check_backend(DiffMethod::FiniteDiff(FdScheme::Forward), 1e-6);
    }

    #[test]
    fn test_central_fd() {
        check_backend(DiffMethod::FiniteDiff(FdScheme::Central), 1e-7);
    }

    #[test]
    fn test_complex_step() {
        check_backend(DiffMethod::FiniteDiff(FdScheme::ComplexStep), 1e-13);
    }
}
