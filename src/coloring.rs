//! Greedy graph coloring for compressed sparse Jacobian evaluation.
//!
//! Two columns of the constraint Jacobian conflict when they both carry a
//! structural nonzero in the same row; perturbing them together would merge
//! their entries. Partitioning the columns so that no color class contains a
//! conflicting pair lets a forward-mode or finite-difference sweep use one
//! perturbation direction per class instead of one per variable, and every
//! compressed entry is recovered directly (no substitution solve).

use crate::error::{NlDerivError, Result};

/// A column partition of a sparse constraint Jacobian.
#[derive(Debug, Clone)]
pub struct Coloring {
    /// Color class of each column, `0..num_colors`. Columns with no tracked
    /// entries are assigned class 0; they are never perturbed usefully and
    /// never read.
    pub colors: Vec<u32>,
    /// Number of color classes (compressed directions per Jacobian sweep).
    pub num_colors: u32,
}

/// Greedy partial distance-2 coloring of the pattern's columns.
///
/// `rows`/`cols` are the pattern's 1-based index lists over an `ng × nx`
/// Jacobian. Columns are visited in decreasing conflict-degree order and each
/// receives the smallest color unused among its conflicting columns.
pub fn color_columns(rows: &[usize], cols: &[usize], nx: usize, ng: usize) -> Result<Coloring> {
    if rows.len() != cols.len() {
        return Err(NlDerivError::InvalidPattern(format!(
            "rows has {} entries but cols has {}",
            rows.len(),
            cols.len()
        )));
    }

    // Columns present in each row.
    let mut row_cols: Vec<Vec<u32>> = vec![Vec::new(); ng];
    for (&r, &c) in rows.iter().zip(cols.iter()) {
        if r < 1 || r > ng || c < 1 || c > nx {
            return Err(NlDerivError::InvalidPattern(format!(
                "entry ({}, {}) outside 1..={} x 1..={}",
                r, c, ng, nx
            )));
        }
        let col = (c - 1) as u32;
        if !row_cols[r - 1].contains(&col) {
            row_cols[r - 1].push(col);
        }
    }

    // Conflict adjacency: columns sharing any row.
    let mut adj: Vec<std::collections::HashSet<u32>> =
        vec![std::collections::HashSet::new(); nx];
    for cols_in_row in &row_cols {
        for (a, &u) in cols_in_row.iter().enumerate() {
            for &v in &cols_in_row[a + 1..] {
                adj[u as usize].insert(v);
                adj[v as usize].insert(u);
            }
        }
    }

    // Visit columns by decreasing conflict degree for tighter colorings.
    let mut order: Vec<usize> = (0..nx).collect();
    order.sort_by(|&a, &b| adj[b].len().cmp(&adj[a].len()));

    let mut colors = vec![u32::MAX; nx];
    let mut num_colors = 0u32;

    for &v in &order {
        let mut used = std::collections::HashSet::new();
        for &neighbor in &adj[v] {
            if colors[neighbor as usize] != u32::MAX {
                used.insert(colors[neighbor as usize]);
            }
        }

        let mut color = 0u32;
        while used.contains(&color) {
            color += 1;
        }
        colors[v] = color;
        if color + 1 > num_colors {
            num_colors = color + 1;
        }
    }

    Ok(Coloring { colors, num_colors })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_valid(coloring: &Coloring, rows: &[usize], cols: &[usize], ng: usize) {
        // No two columns in one class may share a row.
        for row in 1..=ng {
            let mut seen = std::collections::HashSet::new();
            for (&r, &c) in rows.iter().zip(cols.iter()) {
                if r == row {
                    assert!(
                        seen.insert(coloring.colors[c - 1]),
                        "columns in row {} share color {}",
                        row,
                        coloring.colors[c - 1]
                    );
                }
            }
        }
        for &c in &coloring.colors {
            assert!(c < coloring.num_colors);
        }
    }

    #[test]
    fn test_disjoint_columns_share_one_color() {
        // Block-diagonal: each column touches its own row.
        let rows = vec![1, 2, 3];
        let cols = vec![1, 2, 3];
        let coloring = color_columns(&rows, &cols, 3, 3).unwrap();
        assert_eq!(coloring.num_colors, 1);
        assert_valid(&coloring, &rows, &cols, 3);
    }

    #[test]
    fn test_shared_row_forces_two_colors() {
        // Row 1 touches both columns.
        let rows = vec![1, 1, 2];
        let cols = vec![1, 2, 2];
        let coloring = color_columns(&rows, &cols, 2, 2).unwrap();
        assert_eq!(coloring.num_colors, 2);
        assert_ne!(coloring.colors[0], coloring.colors[1]);
        assert_valid(&coloring, &rows, &cols, 2);
    }

    #[test]
    fn test_arrow_pattern() {
        // Dense first column plus diagonal: column 1 conflicts with all,
        // remaining columns are mutually disjoint. Two colors suffice.
        let n = 6;
        let mut rows = Vec::new();
        let mut cols = Vec::new();
        for i in 1..=n {
            rows.push(i);
            cols.push(1);
        }
        for i in 2..=n {
            rows.push(i);
            cols.push(i);
        }
        let coloring = color_columns(&rows, &cols, n, n).unwrap();
        assert_eq!(coloring.num_colors, 2);
        assert_valid(&coloring, &rows, &cols, n);
    }

    #[test]
    fn test_empty_pattern() {
        let coloring = color_columns(&[], &[], 4, 3).unwrap();
        assert_eq!(coloring.num_colors, 1);
        assert_eq!(coloring.colors, vec![0; 4]);
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        assert!(color_columns(&[3], &[1], 1, 2).is_err());
    }
}
