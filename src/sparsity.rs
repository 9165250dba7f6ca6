//! Constraint-Jacobian sparsity patterns and automatic pattern discovery.
//!
//! A pattern names the (row, column) entries of the `ng × nx` constraint
//! Jacobian that may be nonzero. Indices are 1-based (the convention NLP
//! solver structure callbacks expect) and conventionally ordered column-major:
//! for increasing column, increasing row. The position `k` of an entry in
//! `(rows[k], cols[k])` is permanent — every flattened sparse Jacobian output
//! for this pattern stores that entry at index `k`.

use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::cache::{DiffMethod, EvalCache, Evaluate};
use crate::error::{NlDerivError, Result};
use crate::function::Residual;

/// Which constraint-Jacobian entries may be nonzero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SparsityPattern {
    /// Every entry is a candidate nonzero; no stored data.
    Dense,

    /// Explicit 1-based index list, `rows[k]` and `cols[k]` jointly naming
    /// the k-th tracked entry.
    Sparse { rows: Vec<usize>, cols: Vec<usize> },
}

impl SparsityPattern {
    /// Build a sparse pattern from parallel 1-based index lists.
    pub fn sparse(rows: Vec<usize>, cols: Vec<usize>) -> Result<Self> {
        if rows.len() != cols.len() {
            return Err(NlDerivError::InvalidPattern(format!(
                "rows has {} entries but cols has {}",
                rows.len(),
                cols.len()
            )));
        }
        Ok(SparsityPattern::Sparse { rows, cols })
    }

    /// Derive a pattern from a representative dense constraint Jacobian.
    ///
    /// Every exactly-zero entry of `mat` is treated as structurally zero;
    /// the rest are emitted column-major. A representative matrix already in
    /// sparse `(rows, cols)` form goes through [`sparse`](Self::sparse)
    /// directly.
    pub fn from_dense(mat: &Array2<f64>) -> Self {
        let (ng, nx) = mat.dim();
        let mut rows = Vec::new();
        let mut cols = Vec::new();
        for j in 0..nx {
            for i in 0..ng {
                if mat[[i, j]] != 0.0 {
                    rows.push(i + 1);
                    cols.push(j + 1);
                }
            }
        }
        SparsityPattern::Sparse { rows, cols }
    }

    /// Whether this is the dense pattern.
    pub fn is_dense(&self) -> bool {
        matches!(self, SparsityPattern::Dense)
    }

    /// Length of the flattened Jacobian output for this pattern.
    pub fn jacobian_len(&self, nx: usize, ng: usize) -> usize {
        match self {
            SparsityPattern::Dense => nx * ng,
            SparsityPattern::Sparse { rows, .. } => rows.len(),
        }
    }

    /// The 1-based `(rows, cols)` enumeration of tracked entries.
    ///
    /// For the dense pattern this generates the full grid with the row index
    /// cycling fastest for each fixed column — the same order in which
    /// [`evaluate`](crate::cache::Evaluate::evaluate) flattens a dense `dg`,
    /// so a solver's structure and values callbacks index identically.
    pub fn structure(&self, nx: usize, ng: usize) -> (Vec<usize>, Vec<usize>) {
        match self {
            SparsityPattern::Dense => {
                let mut rows = Vec::with_capacity(nx * ng);
                let mut cols = Vec::with_capacity(nx * ng);
                for j in 1..=nx {
                    for i in 1..=ng {
                        rows.push(i);
                        cols.push(j);
                    }
                }
                (rows, cols)
            }
            SparsityPattern::Sparse { rows, cols } => (rows.clone(), cols.clone()),
        }
    }

    /// Check index bounds and list-length consistency against `(nx, ng)`.
    pub fn validate(&self, nx: usize, ng: usize) -> Result<()> {
        match self {
            SparsityPattern::Dense => Ok(()),
            SparsityPattern::Sparse { rows, cols } => {
                if rows.len() != cols.len() {
                    return Err(NlDerivError::InvalidPattern(format!(
                        "rows has {} entries but cols has {}",
                        rows.len(),
                        cols.len()
                    )));
                }
                for (&r, &c) in rows.iter().zip(cols.iter()) {
                    if r < 1 || r > ng {
                        return Err(NlDerivError::InvalidPattern(format!(
                            "row index {} outside 1..={}",
                            r, ng
                        )));
                    }
                    if c < 1 || c > nx {
                        return Err(NlDerivError::InvalidPattern(format!(
                            "column index {} outside 1..={}",
                            c, nx
                        )));
                    }
                }
                Ok(())
            }
        }
    }

    /// Serialize to JSON (for saving a discovered pattern between runs).
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON produced by [`to_json`](Self::to_json).
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Discover a sparsity pattern by probing `func` at three random points in the
/// box `[lx, ux]`.
///
/// Each probe point is drawn by independent uniform interpolation,
/// `x_j = (1 - r_j)·lx_j + r_j·ux_j` with `r_j ~ U(0,1)` per component. The
/// full dense constraint Jacobian is computed at each probe with `method` and
/// the three absolute Jacobians are summed; entries that are exactly zero in
/// the sum are reported structurally zero.
///
/// This is a heuristic, not a static analysis: an entry that is generically
/// nonzero but happens to vanish at all three probes is silently dropped.
/// Choosing discovery over a manually supplied pattern accepts that risk.
pub fn detect_sparsity<F: Residual>(
    method: DiffMethod,
    func: &F,
    lx: &[f64],
    ux: &[f64],
) -> Result<SparsityPattern> {
    detect_sparsity_with_rng(method, func, lx, ux, &mut rand::thread_rng())
}

/// [`detect_sparsity`] with a caller-supplied probe-point RNG, for
/// reproducible discovery.
pub fn detect_sparsity_with_rng<F: Residual, R: Rng>(
    method: DiffMethod,
    func: &F,
    lx: &[f64],
    ux: &[f64],
    rng: &mut R,
) -> Result<SparsityPattern> {
    let nx = func.nx();
    if lx.len() != nx || ux.len() != nx {
        return Err(NlDerivError::DimensionMismatch(format!(
            "Expected bounds of length {}, got lx: {}, ux: {}",
            nx,
            lx.len(),
            ux.len()
        )));
    }

    let mut points = [vec![0.0; nx], vec![0.0; nx], vec![0.0; nx]];
    for point in points.iter_mut() {
        for j in 0..nx {
            let r: f64 = rng.gen();
            point[j] = (1.0 - r) * lx[j] + r * ux[j];
        }
    }

    detect_sparsity_at(method, func, &points)
}

/// Discover a sparsity pattern by probing `func` at three explicit points.
///
/// The deterministic core of [`detect_sparsity`]; see there for the union
/// heuristic and its caveat.
pub fn detect_sparsity_at<F: Residual>(
    method: DiffMethod,
    func: &F,
    points: &[Vec<f64>; 3],
) -> Result<SparsityPattern> {
    let nx = func.nx();
    let ng = func.ng();

    // Probe through the dense evaluation path; discovery runs once, before
    // optimization, so the temporary cache and buffers are acceptable here.
    let mut cache = EvalCache::new(SparsityPattern::Dense, method, func)?;
    let mut g = vec![0.0; ng];
    let mut df = vec![0.0; nx];
    let mut dg = vec![0.0; nx * ng];

    let mut sum = Array2::<f64>::zeros((ng, nx));
    for point in points {
        if point.len() != nx {
            return Err(NlDerivError::DimensionMismatch(format!(
                "Expected probe point of length {}, got {}",
                nx,
                point.len()
            )));
        }
        cache.evaluate(point, &mut g, &mut df, &mut dg)?;
        for j in 0..nx {
            for i in 0..ng {
                sum[[i, j]] += dg[j * ng + i].abs();
            }
        }
    }

    let mut rows = Vec::new();
    let mut cols = Vec::new();
    for j in 0..nx {
        for i in 0..ng {
            if sum[[i, j]] != 0.0 {
                rows.push(i + 1);
                cols.push(j + 1);
            }
        }
    }
    Ok(SparsityPattern::Sparse { rows, cols })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_from_dense_column_major_order() {
        let mat = array![[1.0, 0.0, 2.0], [0.0, 3.0, 0.0]];
        let pattern = SparsityPattern::from_dense(&mat);
        match &pattern {
            SparsityPattern::Sparse { rows, cols } => {
                assert_eq!(rows, &vec![1, 2, 1]);
                assert_eq!(cols, &vec![1, 2, 3]);
            }
            _ => panic!("expected sparse pattern"),
        }
        assert_eq!(pattern.jacobian_len(3, 2), 3);
    }

    #[test]
    fn test_from_dense_is_deterministic() {
        let mat = array![[0.0, 4.0], [5.0, 0.0]];
        let a = SparsityPattern::from_dense(&mat);
        let b = SparsityPattern::from_dense(&mat);
        assert_eq!(a, b);
    }

    #[test]
    fn test_dense_structure_row_fastest() {
        let (rows, cols) = SparsityPattern::Dense.structure(2, 3);
        assert_eq!(rows, vec![1, 2, 3, 1, 2, 3]);
        assert_eq!(cols, vec![1, 1, 1, 2, 2, 2]);
        assert_eq!(SparsityPattern::Dense.jacobian_len(2, 3), 6);
    }

    #[test]
    fn test_validate_bounds() {
        let p = SparsityPattern::sparse(vec![1, 4], vec![1, 1]).unwrap();
        assert!(p.validate(2, 3).is_err());

        let p = SparsityPattern::sparse(vec![1, 2], vec![1, 3]).unwrap();
        assert!(p.validate(2, 3).is_err());

        let p = SparsityPattern::sparse(vec![1, 3], vec![1, 2]).unwrap();
        assert!(p.validate(2, 3).is_ok());
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        assert!(SparsityPattern::sparse(vec![1, 2], vec![1]).is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let p = SparsityPattern::sparse(vec![1, 3, 1, 2], vec![1, 1, 2, 2]).unwrap();
        let json = p.to_json().unwrap();
        assert_eq!(SparsityPattern::from_json(&json).unwrap(), p);
    }

    #[test]
    fn test_seeded_discovery_is_reproducible() {
        use rand::SeedableRng;
        use rand_chacha::ChaCha8Rng;

        /// g = [x1 · x2, x3²]
        struct Probed;

        impl Residual for Probed {
            fn nx(&self) -> usize {
                3
            }

            fn ng(&self) -> usize {
                2
            }

            fn eval<T: crate::diff::Scalar>(&self, x: &[T], out: &mut [T]) -> Result<()> {
                out[0] = T::zero();
                out[1] = x[0] * x[1];
                out[2] = x[2].powi(2);
                Ok(())
            }
        }

        let lx = [0.5, 0.5, 0.5];
        let ux = [2.0, 2.0, 2.0];
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let a = detect_sparsity_with_rng(DiffMethod::ForwardAD, &Probed, &lx, &ux, &mut rng)
            .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let b = detect_sparsity_with_rng(DiffMethod::ForwardAD, &Probed, &lx, &ux, &mut rng)
            .unwrap();

        assert_eq!(a, b);
        // Strictly inside the positive box no entry can vanish.
        assert_eq!(
            a,
            SparsityPattern::sparse(vec![1, 1, 2], vec![1, 2, 3]).unwrap()
        );
    }
}
