//! Sparse-path backend states: objective gradient plus a graph-coloring
//! compressed constraint Jacobian.
//!
//! The coloring is computed once at construction; per evaluation the
//! constraint Jacobian costs one compressed direction per color class instead
//! of one per variable, and every recovered entry lands directly at its
//! permanent position in the pattern's `(rows, cols)` order.

use num_complex::Complex64;

use crate::coloring::{color_columns, Coloring};
use crate::diff::dual::Dual;
use crate::diff::finite_diff::{relative_step, FdScheme, COMPLEX_STEP, DEFAULT_EPSILON};
use crate::diff::tape::Tape;
use crate::error::{NlDerivError, Result};
use crate::function::Residual;

use super::DiffMethod;

pub(crate) struct SparseState {
    /// 0-based constraint-row index per tracked entry.
    rows0: Vec<usize>,
    /// 0-based column index per tracked entry.
    cols0: Vec<usize>,
    coloring: Coloring,
    grad: GradState,
    jac: JacState,
}

enum GradState {
    Forward {
        xd: Vec<Dual>,
        outd: Vec<Dual>,
    },
    Reverse {
        tape: Tape,
        adjoints: Vec<f64>,
    },
    Fd(FdBuffers),
}

enum JacState {
    Forward {
        xd: Vec<Dual>,
        outd: Vec<Dual>,
    },
    Fd(FdBuffers),
}

/// Work vectors shared by the finite-difference gradient and colored-Jacobian
/// loops. Complex buffers are sized only for the complex-step scheme.
struct FdBuffers {
    scheme: FdScheme,
    eps: f64,
    /// Per-column step actually taken, for compressed-entry recovery.
    steps: Vec<f64>,
    xw: Vec<f64>,
    out1: Vec<f64>,
    out2: Vec<f64>,
    xc: Vec<Complex64>,
    outc: Vec<Complex64>,
}

impl FdBuffers {
    fn new(scheme: FdScheme, nx: usize, ng: usize) -> Self {
        let nout = 1 + ng;
        let (nxc, noutc) = if scheme == FdScheme::ComplexStep {
            (nx, nout)
        } else {
            (0, 0)
        };
        FdBuffers {
            scheme,
            eps: DEFAULT_EPSILON,
            steps: vec![0.0; nx],
            xw: vec![0.0; nx],
            out1: vec![0.0; nout],
            out2: vec![0.0; nout],
            xc: vec![Complex64::new(0.0, 0.0); nxc],
            outc: vec![Complex64::new(0.0, 0.0); noutc],
        }
    }
}

impl SparseState {
    pub(crate) fn build<F: Residual>(
        rows: &[usize],
        cols: &[usize],
        grad_method: DiffMethod,
        jac_method: DiffMethod,
        func: &F,
        nx: usize,
        ng: usize,
    ) -> Result<Self> {
        let coloring = color_columns(rows, cols, nx, ng)?;

        let grad = match grad_method {
            DiffMethod::ForwardAD => GradState::Forward {
                xd: vec![Dual::constant(0.0); nx],
                outd: vec![Dual::constant(0.0); 1 + ng],
            },
            DiffMethod::ReverseAD => {
                let tape = Tape::record(func, &vec![0.0; nx])?;
                let adjoints = vec![0.0; tape.num_vars()];
                GradState::Reverse { tape, adjoints }
            }
            DiffMethod::FiniteDiff(scheme) => GradState::Fd(FdBuffers::new(scheme, nx, ng)),
        };

        let jac = match jac_method {
            DiffMethod::ForwardAD => JacState::Forward {
                xd: vec![Dual::constant(0.0); nx],
                outd: vec![Dual::constant(0.0); 1 + ng],
            },
            DiffMethod::ReverseAD => {
                return Err(NlDerivError::UnsupportedMethod(
                    "ReverseAD computes one gradient per backward sweep; it cannot serve \
                     the compressed constraint-Jacobian role"
                        .to_string(),
                ));
            }
            DiffMethod::FiniteDiff(scheme) => JacState::Fd(FdBuffers::new(scheme, nx, ng)),
        };

        Ok(SparseState {
            rows0: rows.iter().map(|&r| r - 1).collect(),
            cols0: cols.iter().map(|&c| c - 1).collect(),
            coloring,
            grad,
            jac,
        })
    }

    /// Fill the objective gradient `df` at `x`. `out` holds the primal values
    /// already computed for this `x` (the unperturbed finite-difference base).
    pub(crate) fn fill_gradient<F: Residual>(
        &mut self,
        func: &F,
        x: &[f64],
        out: &[f64],
        df: &mut [f64],
    ) -> Result<()> {
        match &mut self.grad {
            GradState::Forward { xd, outd } => {
                for j in 0..x.len() {
                    for (d, &v) in xd.iter_mut().zip(x.iter()) {
                        *d = Dual::constant(v);
                    }
                    xd[j] = Dual::variable(x[j]);
                    func.eval(xd, outd)?;
                    df[j] = outd[0].eps;
                }
            }
            GradState::Reverse { tape, adjoints } => {
                tape.forward(x)?;
                tape.reverse_into(0, adjoints);
                df.copy_from_slice(&adjoints[..x.len()]);
            }
            GradState::Fd(buf) => match buf.scheme {
                FdScheme::Forward => {
                    buf.xw.copy_from_slice(x);
                    for j in 0..x.len() {
                        let h = relative_step(x[j], buf.eps);
                        buf.xw[j] = x[j] + h;
                        func.eval(&buf.xw, &mut buf.out1)?;
                        buf.xw[j] = x[j];
                        df[j] = (buf.out1[0] - out[0]) / h;
                    }
                }
                FdScheme::Central => {
                    buf.xw.copy_from_slice(x);
                    for j in 0..x.len() {
                        let h = relative_step(x[j], buf.eps);
                        buf.xw[j] = x[j] + h;
                        func.eval(&buf.xw, &mut buf.out1)?;
                        buf.xw[j] = x[j] - h;
                        func.eval(&buf.xw, &mut buf.out2)?;
                        buf.xw[j] = x[j];
                        df[j] = (buf.out1[0] - buf.out2[0]) / (2.0 * h);
                    }
                }
                FdScheme::ComplexStep => {
                    let h = COMPLEX_STEP;
                    for (xc, &v) in buf.xc.iter_mut().zip(x.iter()) {
                        *xc = Complex64::new(v, 0.0);
                    }
                    for j in 0..x.len() {
                        buf.xc[j].im = h;
                        func.eval(&buf.xc, &mut buf.outc)?;
                        buf.xc[j].im = 0.0;
                        let d = buf.outc[0].im / h;
                        if !d.is_finite() {
                            return Err(NlDerivError::NonFiniteDerivative(format!(
                                "complex step produced {} in objective direction {}",
                                d, j
                            )));
                        }
                        df[j] = d;
                    }
                }
            },
        }
        Ok(())
    }

    /// Fill the tracked constraint-Jacobian entries `dg` at `x`, one
    /// compressed direction per color class. `out` holds the primal values
    /// already computed for this `x`.
    pub(crate) fn fill_jacobian<F: Residual>(
        &mut self,
        func: &F,
        x: &[f64],
        out: &[f64],
        dg: &mut [f64],
    ) -> Result<()> {
        let colors = &self.coloring.colors;

        match &mut self.jac {
            JacState::Forward { xd, outd } => {
                for color in 0..self.coloring.num_colors {
                    for (j, d) in xd.iter_mut().enumerate() {
                        *d = if colors[j] == color {
                            Dual::variable(x[j])
                        } else {
                            Dual::constant(x[j])
                        };
                    }
                    func.eval(xd, outd)?;
                    for k in 0..self.rows0.len() {
                        if colors[self.cols0[k]] == color {
                            dg[k] = outd[1 + self.rows0[k]].eps;
                        }
                    }
                }
            }
            JacState::Fd(buf) => match buf.scheme {
                FdScheme::Forward => {
                    for color in 0..self.coloring.num_colors {
                        for j in 0..x.len() {
                            if colors[j] == color {
                                let h = relative_step(x[j], buf.eps);
                                buf.steps[j] = h;
                                buf.xw[j] = x[j] + h;
                            } else {
                                buf.xw[j] = x[j];
                            }
                        }
                        func.eval(&buf.xw, &mut buf.out1)?;
                        for k in 0..self.rows0.len() {
                            let col = self.cols0[k];
                            if colors[col] == color {
                                dg[k] = (buf.out1[1 + self.rows0[k]] - out[1 + self.rows0[k]])
                                    / buf.steps[col];
                            }
                        }
                    }
                }
                FdScheme::Central => {
                    for color in 0..self.coloring.num_colors {
                        for j in 0..x.len() {
                            if colors[j] == color {
                                let h = relative_step(x[j], buf.eps);
                                buf.steps[j] = h;
                                buf.xw[j] = x[j] + h;
                            } else {
                                buf.xw[j] = x[j];
                            }
                        }
                        func.eval(&buf.xw, &mut buf.out1)?;
                        for j in 0..x.len() {
                            if colors[j] == color {
                                buf.xw[j] = x[j] - buf.steps[j];
                            }
                        }
                        func.eval(&buf.xw, &mut buf.out2)?;
                        for k in 0..self.rows0.len() {
                            let col = self.cols0[k];
                            if colors[col] == color {
                                let i = 1 + self.rows0[k];
                                dg[k] =
                                    (buf.out1[i] - buf.out2[i]) / (2.0 * buf.steps[col]);
                            }
                        }
                    }
                }
                FdScheme::ComplexStep => {
                    let h = COMPLEX_STEP;
                    for (xc, &v) in buf.xc.iter_mut().zip(x.iter()) {
                        *xc = Complex64::new(v, 0.0);
                    }
                    for color in 0..self.coloring.num_colors {
                        for j in 0..x.len() {
                            buf.xc[j].im = if colors[j] == color { h } else { 0.0 };
                        }
                        func.eval(&buf.xc, &mut buf.outc)?;
                        for k in 0..self.rows0.len() {
                            if colors[self.cols0[k]] == color {
                                let d = buf.outc[1 + self.rows0[k]].im / h;
                                if !d.is_finite() {
                                    return Err(NlDerivError::NonFiniteDerivative(format!(
                                        "complex step produced {} at Jacobian entry {}",
                                        d, k
                                    )));
                                }
                                dg[k] = d;
                            }
                        }
                    }
                }
            },
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

    // Pattern of the sample constraints, column-major: (1,1), (3,1), (1,2), (2,2).
    fn pattern() -> (Vec<usize>, Vec<usize>) {
        (vec![1, 3, 1, 2], vec![1, 1, 2, 2])
    }

    fn check_pair(grad_method: DiffMethod, jac_method: DiffMethod, tol: f64) {
        let (rows, cols) = pattern();
        let mut state =
            SparseState::build(&rows, &cols, grad_method, jac_method, &Sample, 2, 3).unwrap();

        let x = [1.0, 2.0];
        let mut out = [0.0; 4];
        Sample.eval(&x, &mut out).unwrap();

        let mut df = [0.0; 2];
        state.fill_gradient(&Sample, &x, &out, &mut df).unwrap();
        assert_relative_eq!(df[0], 2.0, epsilon = tol);
        assert_relative_eq!(df[1], -1.0, epsilon = tol);

        let mut dg = [0.0; 4];
        state.fill_jacobian(&Sample, &x, &out, &mut dg).unwrap();
        assert_relative_eq!(dg[0], -2.0, epsilon = tol);
        assert_relative_eq!(dg[1], 2.0, epsilon = tol);
        assert_relative_eq!(dg[2], 1.0, epsilon = tol);
        assert_relative_eq!(dg[3], -1.0, epsilon = tol);
    }

    #[test]
    fn test_reverse_grad_forward_jac() {
        check_pair(DiffMethod::ReverseAD, DiffMethod::ForwardAD, 1e-14);
    }

    #[test]
    fn test_forward_grad_forward_jac() {
        check_pair(DiffMethod::ForwardAD, DiffMethod::ForwardAD, 1e-14);
    }

    #[test]
    fn test_fd_pair() {
        check_pair(
            DiffMethod::FiniteDiff(FdScheme::Forward),
            DiffMethod::FiniteDiff(FdScheme::Forward),
            1e-6,
        );
    }

    #[test]
    fn test_complex_step_jac() {
        check_pair(
            DiffMethod::ReverseAD,
            DiffMethod::FiniteDiff(FdScheme::ComplexStep),
            1e-13,
        );
    }

    #[test]
    fn test_reverse_jac_rejected() {
        let (rows, cols) = pattern();
        let err = SparseState::build(
            &rows,
            &cols,
            DiffMethod::ReverseAD,
            DiffMethod::ReverseAD,
            &Sample,
            2,
            3,
        );
        assert!(matches!(err, Err(NlDerivError::UnsupportedMethod(_))));
    }
}
