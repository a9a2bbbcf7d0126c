// state-tape-extract/src/assign.rs
// ============================================================================
// Module: Assignment Solver
// Description: Hungarian (Kuhn–Munkres) assignment over a cost matrix.
// Purpose: Match elements across frames with a globally optimal assignment.
// Dependencies: none (pure math)
// ============================================================================

//! ## Overview
//! A dense O(n³) Hungarian solver over an `f64` cost matrix. The matrix is
//! padded to square with a large sentinel cost; the caller filters padded
//! pairs and applies its own acceptance threshold afterwards.

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Sentinel cost used to pad rectangular matrices to square.
pub const PAD_COST: f64 = 1.0e6;

// ============================================================================
// SECTION: Solver
// ============================================================================

/// Solves the minimum-cost assignment for a `rows × cols` matrix given in
/// row-major order. Returns, for each row, the assigned column (padded
/// columns excluded).
#[must_use]
pub fn solve_assignment(costs: &[f64], rows: usize, cols: usize) -> Vec<Option<usize>> {
    if rows == 0 || cols == 0 {
        return vec![None; rows];
    }
    let n = rows.max(cols);
    // Padded square matrix, 1-indexed internally per the classic potentials
    // formulation.
    let cost_at = |row: usize, col: usize| -> f64 {
        if row < rows && col < cols { costs[row * cols + col] } else { PAD_COST }
    };
    let mut u = vec![0.0_f64; n + 1];
    let mut v = vec![0.0_f64; n + 1];
    let mut way = vec![0_usize; n + 1];
    let mut matched_col_for_row = vec![0_usize; n + 1];
    for row in 1..=n {
        let mut links = vec![0_usize; n + 1];
        let mut mins = vec![f64::INFINITY; n + 1];
        let mut used = vec![false; n + 1];
        way[0] = row;
        let mut j0 = 0_usize;
        loop {
            used[j0] = true;
            let i0 = way[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0_usize;
            for j in 1..=n {
                if used[j] {
                    continue;
                }
                let current = cost_at(i0 - 1, j - 1) - u[i0] - v[j];
                if current < mins[j] {
                    mins[j] = current;
                    links[j] = j0;
                }
                if mins[j] < delta {
                    delta = mins[j];
                    j1 = j;
                }
            }
            for j in 0..=n {
                if used[j] {
                    u[way[j]] += delta;
                    v[j] -= delta;
                } else {
                    mins[j] -= delta;
                }
            }
            j0 = j1;
            if way[j0] == 0 {
                break;
            }
        }
        loop {
            let j1 = links[j0];
            way[j0] = way[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }
    for j in 1..=n {
        matched_col_for_row[way[j]] = j;
    }
    let mut out = vec![None; rows];
    for (row, slot) in out.iter_mut().enumerate() {
        let col = matched_col_for_row[row + 1];
        if col >= 1 && col - 1 < cols {
            *slot = Some(col - 1);
        }
    }
    out
}
