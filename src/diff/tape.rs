//! Bytecode tape for re-evaluable reverse-mode AD.
//!
//! The tape stores opcodes rather than precomputed multipliers, so it is
//! recorded once (at cache construction) and re-evaluated at every new input
//! without re-recording: an in-place forward sweep refreshes all intermediate
//! values, then one seeded reverse sweep per requested output row accumulates
//! adjoints into a caller-owned buffer. Neither sweep allocates.
//!
//! # Limitations
//!
//! The tape records one execution path. `maximum`/`minimum`/`abs` are recorded
//! as opcodes and re-branch on the current values during each sweep, but any
//! control flow outside the [`Scalar`](crate::Scalar) surface is frozen at
//! recording time.

use std::cell::Cell;

use crate::diff::scalar::Scalar;
use crate::error::{NlDerivError, Result};
use crate::function::Residual;

/// Sentinel used in `args[1]` for unary ops (the second argument slot is unused).
const UNUSED: u32 = u32::MAX;

/// Elementary operation codes.
///
/// Binary ops use both `args` slots; unary ops use slot 0 only (slot 1 =
/// `UNUSED`, except `Powi` which stores the `i32` exponent reinterpreted as
/// `u32` in slot 1).
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Op {
    /// Input variable (leaf node).
    Input,
    /// Scalar constant.
    Const,

    Add,
    Sub,
    Mul,
    Div,
    Powf,
    Max,
    Min,

    Neg,
    Recip,
    Sqrt,
    /// Integer power. Exponent stored in `args[1]` as `exp as u32`.
    Powi,
    Exp,
    Ln,
    Sin,
    Cos,
    Tan,
    Atan,
    Tanh,
    Abs,
}

#[inline]
fn powi_exp_encode(exp: i32) -> u32 {
    exp as u32
}

#[inline]
fn powi_exp_decode(enc: u32) -> i32 {
    enc as i32
}

/// Evaluate a single (non-`Powi`) opcode on refreshed operand values.
#[inline]
fn eval_op(op: Op, a: f64, b: f64) -> f64 {
    match op {
        Op::Input | Op::Const | Op::Powi => unreachable!("handled by the sweep loop"),
        Op::Add => a + b,
        Op::Sub => a - b,
        Op::Mul => a * b,
        Op::Div => a / b,
        Op::Powf => a.powf(b),
        Op::Max => {
            if a >= b {
                a
            } else {
                b
            }
        }
        Op::Min => {
            if a <= b {
                a
            } else {
                b
            }
        }
        Op::Neg => -a,
        Op::Recip => a.recip(),
        Op::Sqrt => a.sqrt(),
        Op::Exp => a.exp(),
        Op::Ln => a.ln(),
        Op::Sin => a.sin(),
        Op::Cos => a.cos(),
        Op::Tan => a.tan(),
        Op::Atan => a.atan(),
        Op::Tanh => a.tanh(),
        Op::Abs => a.abs(),
    }
}

/// Local partials `(∂r/∂a, ∂r/∂b)` for a single (non-`Powi`) opcode,
/// given operand values `a`, `b` and the result value `r`.
#[inline]
fn partials(op: Op, a: f64, b: f64, r: f64) -> (f64, f64) {
    match op {
        Op::Input | Op::Const | Op::Powi => unreachable!("handled by the sweep loop"),
        Op::Add => (1.0, 1.0),
        Op::Sub => (1.0, -1.0),
        Op::Mul => (b, a),
        Op::Div => {
            let inv = 1.0 / b;
            (inv, -a * inv * inv)
        }
        Op::Powf => (b * a.powf(b - 1.0), r * a.ln()),
        Op::Max => {
            if a >= b {
                (1.0, 0.0)
            } else {
                (0.0, 1.0)
            }
        }
        Op::Min => {
            if a <= b {
                (1.0, 0.0)
            } else {
                (0.0, 1.0)
            }
        }
        Op::Neg => (-1.0, 0.0),
        Op::Recip => (-r * r, 0.0),
        Op::Sqrt => (0.5 / r, 0.0),
        Op::Exp => (r, 0.0),
        Op::Ln => (1.0 / a, 0.0),
        Op::Sin => (a.cos(), 0.0),
        Op::Cos => (-a.sin(), 0.0),
        Op::Tan => (1.0 + r * r, 0.0),
        Op::Atan => (1.0 / (1.0 + a * a), 0.0),
        Op::Tanh => (1.0 - r * r, 0.0),
        Op::Abs => {
            if a < 0.0 {
                (-1.0, 0.0)
            } else {
                (1.0, 0.0)
            }
        }
    }
}

/// A bytecode tape recorded from one execution of a [`Residual`].
///
/// Created via [`Tape::record`]. Call [`forward`](Self::forward) to re-evaluate
/// at new inputs and [`reverse_into`](Self::reverse_into) to compute one output
/// row's adjoints.
pub struct Tape {
    ops: Vec<Op>,
    args: Vec<[u32; 2]>,
    values: Vec<f64>,
    num_inputs: u32,
    outputs: Vec<u32>,
}

impl Tape {
    fn empty() -> Self {
        Tape {
            ops: Vec::new(),
            args: Vec::new(),
            values: Vec::new(),
            num_inputs: 0,
            outputs: Vec::new(),
        }
    }

    /// Record `func` at the reference point `x0`.
    ///
    /// The recorded values are placeholders — every [`forward`](Self::forward)
    /// sweep overwrites them — but the opcode sequence is fixed here.
    pub fn record<F: Residual>(func: &F, x0: &[f64]) -> Result<Tape> {
        let nx = func.nx();
        let nout = 1 + func.ng();
        if x0.len() != nx {
            return Err(NlDerivError::DimensionMismatch(format!(
                "Expected {} variables for tape recording, got {}",
                nx,
                x0.len()
            )));
        }

        let mut tape = Tape::empty();
        {
            let _guard = TapeGuard::activate(&mut tape);
            let inputs: Vec<Rec> = x0.iter().map(|&v| Rec::input(v)).collect();
            let mut out = vec![Rec::from_f64(0.0); nout];
            func.eval(&inputs, &mut out)
                .map_err(|e| NlDerivError::TapeRecording(e.to_string()))?;
            with_active(|t| {
                t.outputs = out.iter().map(|r| r.index).collect();
            });
        }
        debug_assert_eq!(tape.num_inputs as usize, nx);
        debug_assert_eq!(tape.outputs.len(), nout);
        Ok(tape)
    }

    #[inline]
    fn push(&mut self, op: Op, args: [u32; 2], value: f64) -> u32 {
        let idx = self.ops.len() as u32;
        self.ops.push(op);
        self.args.push(args);
        self.values.push(value);
        idx
    }

    /// Total number of tape variables (inputs, constants, and intermediates).
    #[inline]
    pub fn num_vars(&self) -> usize {
        self.ops.len()
    }

    /// Number of input variables.
    #[inline]
    pub fn num_inputs(&self) -> usize {
        self.num_inputs as usize
    }

    /// Number of recorded outputs (`1 + ng` for a combined residual).
    #[inline]
    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// Value of output `k`, valid after recording or a forward sweep.
    #[inline]
    pub fn output_value(&self, k: usize) -> f64 {
        self.values[self.outputs[k] as usize]
    }

    /// Re-evaluate the tape at new inputs (forward sweep). Overwrites the
    /// value array in place — no allocation.
    pub fn forward(&mut self, x: &[f64]) -> Result<()> {
        if x.len() != self.num_inputs as usize {
            return Err(NlDerivError::DimensionMismatch(format!(
                "Expected {} inputs for tape forward sweep, got {}",
                self.num_inputs,
                x.len()
            )));
        }

        for (i, &v) in x.iter().enumerate() {
            self.values[i] = v;
        }

        for i in 0..self.ops.len() {
            match self.ops[i] {
                Op::Input | Op::Const => continue,
                Op::Powi => {
                    let [a_idx, enc] = self.args[i];
                    let a = self.values[a_idx as usize];
                    self.values[i] = a.powi(powi_exp_decode(enc));
                }
                op => {
                    let [a_idx, b_idx] = self.args[i];
                    let a = self.values[a_idx as usize];
                    let b = if b_idx != UNUSED {
                        self.values[b_idx as usize]
                    } else {
                        0.0
                    };
                    self.values[i] = eval_op(op, a, b);
                }
            }
        }
        Ok(())
    }

    /// Reverse sweep seeded at output row `output`, accumulating adjoints into
    /// `adjoints` (length [`num_vars`](Self::num_vars); cleared here, not
    /// reallocated). After the sweep, `adjoints[0..num_inputs]` holds the
    /// gradient of that output with respect to the inputs.
    pub fn reverse_into(&self, output: usize, adjoints: &mut [f64]) {
        debug_assert_eq!(adjoints.len(), self.num_vars());
        adjoints.fill(0.0);
        adjoints[self.outputs[output] as usize] = 1.0;

        for i in (0..self.ops.len()).rev() {
            let adj = adjoints[i];
            if adj == 0.0 {
                continue;
            }

            match self.ops[i] {
                Op::Input | Op::Const => continue,
                Op::Powi => {
                    let [a_idx, enc] = self.args[i];
                    let n = powi_exp_decode(enc);
                    let a = self.values[a_idx as usize];
                    adjoints[a_idx as usize] += f64::from(n) * a.powi(n - 1) * adj;
                }
                op => {
                    let [a_idx, b_idx] = self.args[i];
                    let a = self.values[a_idx as usize];
                    let b = if b_idx != UNUSED {
                        self.values[b_idx as usize]
                    } else {
                        0.0
                    };
                    let (da, db) = partials(op, a, b, self.values[i]);
                    adjoints[a_idx as usize] += da * adj;
                    if b_idx != UNUSED {
                        adjoints[b_idx as usize] += db * adj;
                    }
                }
            }
        }
    }
}

// ── Thread-local active tape ──

thread_local! {
    static ACTIVE_TAPE: Cell<*mut Tape> = const { Cell::new(std::ptr::null_mut()) };
}

/// Access the active tape for the current thread. Panics if none is active,
/// which means a [`Rec`] escaped its recording scope.
#[inline]
fn with_active<R>(f: impl FnOnce(&mut Tape) -> R) -> R {
    ACTIVE_TAPE.with(|cell| {
        let ptr = cell.get();
        assert!(
            !ptr.is_null(),
            "No active tape; Rec values are only valid inside Tape::record"
        );
        // SAFETY: TapeGuard keeps the tape alive and exclusively borrowed for
        // the whole recording scope; recording is single-threaded via the
        // thread-local.
        let tape = unsafe { &mut *ptr };
        f(tape)
    })
}

/// RAII guard that installs a tape as the thread-local active tape.
struct TapeGuard {
    prev: *mut Tape,
}

impl TapeGuard {
    fn activate(tape: &mut Tape) -> Self {
        let prev = ACTIVE_TAPE.with(|cell| {
            let prev = cell.get();
            cell.set(tape as *mut Tape);
            prev
        });
        TapeGuard { prev }
    }
}

impl Drop for TapeGuard {
    fn drop(&mut self) {
        ACTIVE_TAPE.with(|cell| {
            cell.set(self.prev);
        });
    }
}

/// Recording scalar: an index into the active tape plus the primal value.
///
/// Every arithmetic operation on a `Rec` appends one opcode to the active
/// tape. Only valid inside [`Tape::record`].
#[derive(Clone, Copy, Debug)]
pub struct Rec {
    value: f64,
    index: u32,
}

impl Rec {
    #[inline]
    fn input(value: f64) -> Self {
        with_active(|t| {
            let index = t.push(Op::Input, [UNUSED, UNUSED], value);
            t.num_inputs += 1;
            Rec { value, index }
        })
    }

    #[inline]
    fn unary(self, op: Op, value: f64) -> Self {
        let index = with_active(|t| t.push(op, [self.index, UNUSED], value));
        Rec { value, index }
    }

    #[inline]
    fn binary(self, rhs: Rec, op: Op, value: f64) -> Self {
        let index = with_active(|t| t.push(op, [self.index, rhs.index], value));
        Rec { value, index }
    }
}

impl std::ops::Add for Rec {
    type Output = Rec;

    #[inline]
    fn add(self, rhs: Rec) -> Rec {
        self.binary(rhs, Op::Add, self.value + rhs.value)
    }
}

impl std::ops::Sub for Rec {
    type Output = Rec;

    #[inline]
    fn sub(self, rhs: Rec) -> Rec {
        self.binary(rhs, Op::Sub, self.value - rhs.value)
    }
}

impl std::ops::Mul for Rec {
    type Output = Rec;

    #[inline]
    fn mul(self, rhs: Rec) -> Rec {
        self.binary(rhs, Op::Mul, self.value * rhs.value)
    }
}

impl std::ops::Div for Rec {
    type Output = Rec;

    #[inline]
    fn div(self, rhs: Rec) -> Rec {
        self.binary(rhs, Op::Div, self.value / rhs.value)
    }
}

impl std::ops::Neg for Rec {
    type Output = Rec;

    #[inline]
    fn neg(self) -> Rec {
        self.unary(Op::Neg, -self.value)
    }
}

impl Scalar for Rec {
    #[inline]
    fn from_f64(v: f64) -> Self {
        let index = with_active(|t| t.push(Op::Const, [UNUSED, UNUSED], v));
        Rec { value: v, index }
    }

    #[inline]
    fn value(&self) -> f64 {
        self.value
    }

    #[inline]
    fn recip(self) -> Self {
        self.unary(Op::Recip, self.value.recip())
    }

    #[inline]
    fn sqrt(self) -> Self {
        self.unary(Op::Sqrt, self.value.sqrt())
    }

    #[inline]
    fn powi(self, n: i32) -> Self {
        let value = self.value.powi(n);
        let index =
            with_active(|t| t.push(Op::Powi, [self.index, powi_exp_encode(n)], value));
        Rec { value, index }
    }

    #[inline]
    fn powf(self, n: Self) -> Self {
        self.binary(n, Op::Powf, self.value.powf(n.value))
    }

    #[inline]
    fn exp(self) -> Self {
        self.unary(Op::Exp, self.value.exp())
    }

    #[inline]
    fn ln(self) -> Self {
        self.unary(Op::Ln, self.value.ln())
    }

    #[inline]
    fn sin(self) -> Self {
        self.unary(Op::Sin, self.value.sin())
    }

    #[inline]
    fn cos(self) -> Self {
        self.unary(Op::Cos, self.value.cos())
    }

    #[inline]
    fn tan(self) -> Self {
        self.unary(Op::Tan, self.value.tan())
    }

    #[inline]
    fn atan(self) -> Self {
        self.unary(Op::Atan, self.value.atan())
    }

    #[inline]
    fn tanh(self) -> Self {
        self.unary(Op::Tanh, self.value.tanh())
    }

    #[inline]
    fn abs(self) -> Self {
        self.unary(Op::Abs, self.value.abs())
    }

    #[inline]
    fn maximum(self, other: Self) -> Self {
        self.binary(other, Op::Max, self.value.max(other.value))
    }

    #[inline]
    fn minimum(self, other: Self) -> Self {
        self.binary(other, Op::Min, self.value.min(other.value))
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
    fn test_record_and_sweep() {
        let mut tape = Tape::record(&Sample, &[0.0, 0.0]).unwrap();
        assert_eq!(tape.num_inputs(), 2);
        assert_eq!(tape.num_outputs(), 4);

        tape.forward(&[1.0, 2.0]).unwrap();
        assert_relative_eq!(tape.output_value(0), -1.0);
        assert_relative_eq!(tape.output_value(1), 0.0);
        assert_relative_eq!(tape.output_value(2), -2.0);
        assert_relative_eq!(tape.output_value(3), 1.0);

        let mut adj = vec![0.0; tape.num_vars()];
        tape.reverse_into(0, &mut adj);
        assert_relative_eq!(adj[0], 2.0); // ∂f/∂x1 = 2 x1
        assert_relative_eq!(adj[1], -1.0);

        tape.reverse_into(1, &mut adj);
        assert_relative_eq!(adj[0], -2.0);
        assert_relative_eq!(adj[1], 1.0);

        tape.reverse_into(3, &mut adj);
        assert_relative_eq!(adj[0], 2.0);
        assert_relative_eq!(adj[1], 0.0);
    }

    #[test]
    fn test_reevaluation_moves_with_input() {
        let mut tape = Tape::record(&Sample, &[0.0, 0.0]).unwrap();
        let mut adj = vec![0.0; tape.num_vars()];

        for &x1 in &[0.5, -3.0, 7.0] {
            tape.forward(&[x1, 1.0]).unwrap();
            tape.reverse_into(0, &mut adj);
            assert_relative_eq!(adj[0], 2.0 * x1);
        }
    }

    #[test]
    fn test_min_max_rebranch() {
        struct Kink;

        impl Residual for Kink {
            fn nx(&self) -> usize {
                1
            }

            fn ng(&self) -> usize {
                0
            }

            fn eval<T: Scalar>(&self, x: &[T], out: &mut [T]) -> Result<()> {
                out[0] = x[0].maximum(T::from_f64(0.0)) * T::from_f64(3.0);
                Ok(())
            }
        }

        // Recorded on the x <= 0 branch, evaluated on both sides of the kink.
        let mut tape = Tape::record(&Kink, &[-1.0]).unwrap();
        let mut adj = vec![0.0; tape.num_vars()];

        tape.forward(&[2.0]).unwrap();
        assert_relative_eq!(tape.output_value(0), 6.0);
        tape.reverse_into(0, &mut adj);
        assert_relative_eq!(adj[0], 3.0);

        tape.forward(&[-2.0]).unwrap();
        assert_relative_eq!(tape.output_value(0), 0.0);
        tape.reverse_into(0, &mut adj);
        assert_relative_eq!(adj[0], 0.0);
    }
}
