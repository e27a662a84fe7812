/* ************************************************************************ **
** This file is part of vesfit, and is licensed under EITHER the MIT        **
** license or the Apache 2.0 license, at your option.                       **
**                                                                          **
**     http://www.apache.org/licenses/LICENSE-2.0                           **
**     http://opensource.org/licenses/MIT                                   **
** ************************************************************************ */

use crate::{CoeffsSpace, CoeffsVector, FailResult};
use crate::io;

use std::io::Write;
use std::sync::Arc;

use rand::Rng;
use rand::distributions::{IndependentSample, Normal};
use vesfit_walkers::{self as walkers, ReplicaGroup};

/// Physical layout of a [`CoeffsMatrix`], fixed at construction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MatrixMode {
    /// Only the diagonal is stored; off-diagonal entries are implicitly
    /// zero and cannot be written.
    Diagonal,
    /// Packed upper triangle; `(row, col)` and `(col, row)` share one
    /// physical cell.
    Full,
}

/// One scalar per (coefficient, coefficient) pair over a [`CoeffsSpace`],
/// e.g. a Hessian estimate for the expansion coefficients.
#[derive(Debug, Clone)]
pub struct CoeffsMatrix {
    space: Arc<CoeffsSpace>,
    label: String,
    mode: MatrixMode,
    n: usize,
    data: Vec<f64>,
    counter: u64,
}

impl CoeffsMatrix {
    pub fn new(space: Arc<CoeffsSpace>, label: impl Into<String>, mode: MatrixMode) -> CoeffsMatrix {
        let n = space.total();
        let len = match mode {
            MatrixMode::Diagonal => n,
            MatrixMode::Full => n * (n + 1) / 2,
        };
        CoeffsMatrix {
            space,
            label: label.into(),
            mode,
            n,
            data: vec![0.0; len],
            counter: 0,
        }
    }

    pub fn space(&self) -> &Arc<CoeffsSpace> { &self.space }
    pub fn label(&self) -> &str { &self.label }
    pub fn mode(&self) -> MatrixMode { self.mode }
    pub fn is_diagonal(&self) -> bool { self.mode == MatrixMode::Diagonal }
    /// Row (== column) count.
    pub fn rows(&self) -> usize { self.n }
    /// Physical storage length.
    pub fn len(&self) -> usize { self.data.len() }
    pub fn is_empty(&self) -> bool { self.data.is_empty() }

    pub fn data(&self) -> &[f64] { &self.data }
    pub fn data_mut(&mut self) -> &mut [f64] { &mut self.data }

    fn assert_same_shape(&self, other: &CoeffsMatrix) {
        assert!(
            self.n == other.n && self.mode == other.mode,
            "matrix shape mismatch: '{}' is {:?} over {} coefficients, '{}' is {:?} over {}",
            self.label, self.mode, self.n, other.label, other.mode, other.n,
        );
    }

    /// Storage index of the `(row, col)` cell.
    ///
    /// Full mode packs the upper triangle; the two mirror cells of an
    /// unordered pair map to the same index, which is what makes the
    /// matrix symmetric by construction.  Panics on out-of-range indices,
    /// and on off-diagonal cells in diagonal mode.
    pub fn matrix_index(&self, row: usize, col: usize) -> usize {
        assert!(row < self.n, "row {} out of range for {} rows", row, self.n);
        assert!(col < self.n, "column {} out of range for {} columns", col, self.n);
        match self.mode {
            MatrixMode::Diagonal => {
                assert_eq!(
                    row, col,
                    "off-diagonal cell ({}, {}) of diagonal matrix '{}'",
                    row, col, self.label,
                );
                row
            },
            MatrixMode::Full => {
                let (row, col) = if row <= col { (row, col) } else { (col, row) };
                // row * (row - 1) / 2, without underflow at row == 0
                col + row * (self.n - 1) - row * row.saturating_sub(1) / 2
            },
        }
    }

    // ----------------------------------------------------
    // element access

    /// In diagonal mode, off-diagonal cells read as zero.
    pub fn value(&self, row: usize, col: usize) -> f64 {
        if self.is_diagonal() && row != col {
            assert!(row < self.n && col < self.n,
                "cell ({}, {}) out of range for {} rows", row, col, self.n);
            return 0.0;
        }
        self.data[self.matrix_index(row, col)]
    }

    pub fn set_value(&mut self, row: usize, col: usize, value: f64) {
        let i = self.matrix_index(row, col);
        self.data[i] = value;
    }

    pub fn add_to_value(&mut self, row: usize, col: usize, value: f64) {
        let i = self.matrix_index(row, col);
        self.data[i] += value;
    }

    /// Access by a pair of multi-indices into the underlying space.
    pub fn value_at(&self, row: &[usize], col: &[usize]) -> f64 {
        self.value(self.space.index_of(row), self.space.index_of(col))
    }

    pub fn set_value_at(&mut self, row: &[usize], col: &[usize], value: f64) {
        self.set_value(self.space.index_of(row), self.space.index_of(col), value);
    }

    pub fn add_to_value_at(&mut self, row: &[usize], col: &[usize], value: f64) {
        self.add_to_value(self.space.index_of(row), self.space.index_of(col), value);
    }

    // ----------------------------------------------------
    // bulk operations

    pub fn fill(&mut self, value: f64) {
        for x in &mut self.data { *x = value; }
    }

    pub fn scale(&mut self, factor: f64) {
        for x in &mut self.data { *x *= factor; }
    }

    pub fn add_constant(&mut self, value: f64) {
        for x in &mut self.data { *x += value; }
    }

    pub fn subtract_constant(&mut self, value: f64) {
        self.add_constant(-value);
    }

    /// Element-wise add over the physical storage; the slice length must
    /// equal `len()`.
    pub fn add_slice(&mut self, values: &[f64]) {
        assert_eq!(
            self.data.len(), values.len(),
            "matrix '{}' has {} stored values, operand slice has {}",
            self.label, self.data.len(), values.len(),
        );
        for (x, &v) in izip!(&mut self.data, values) { *x += v; }
    }

    pub fn add_matrix(&mut self, other: &CoeffsMatrix) {
        self.assert_same_shape(other);
        for (x, &v) in izip!(&mut self.data, &other.data) { *x += v; }
    }

    pub fn subtract_matrix(&mut self, other: &CoeffsMatrix) {
        self.assert_same_shape(other);
        for (x, &v) in izip!(&mut self.data, &other.data) { *x -= v; }
    }

    pub fn assign_matrix(&mut self, other: &CoeffsMatrix) {
        self.assert_same_shape(other);
        self.data.copy_from_slice(&other.data);
    }

    pub fn randomize_gaussian<R: Rng>(&mut self, rng: &mut R) {
        let normal = Normal::new(0.0, 1.0);
        for x in &mut self.data {
            *x = normal.ind_sample(rng);
        }
    }

    pub fn min_value(&self) -> f64 {
        self.data.iter().cloned().fold(::std::f64::INFINITY, f64::min)
    }

    pub fn max_value(&self) -> f64 {
        self.data.iter().cloned().fold(::std::f64::NEG_INFINITY, f64::max)
    }

    // ----------------------------------------------------
    // matrix-vector product

    /// `out[i] = sum_j m(i, j) * v[j]` (diagonal mode reduces to the
    /// element-wise product of the diagonal with `v`).
    pub fn dot_vector(&self, v: &CoeffsVector) -> CoeffsVector {
        let mut out = CoeffsVector::new(Arc::clone(&self.space), v.label().to_string(), false);
        out.assign_slice(&self.dot_slice(v.data()));
        out
    }

    /// Slice-level form of [`dot_vector`](Self::dot_vector).
    pub fn dot_slice(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(
            self.n, v.len(),
            "matrix '{}' over {} coefficients cannot multiply a vector of {}",
            self.label, self.n, v.len(),
        );
        match self.mode {
            MatrixMode::Diagonal => {
                izip!(&self.data, v).map(|(&m, &x)| m * x).collect()
            },
            MatrixMode::Full => {
                (0..self.n)
                    .map(|i| (0..self.n).map(|j| self.value(i, j) * v[j]).sum())
                    .collect()
            },
        }
    }

    // ----------------------------------------------------
    // counter

    pub fn counter(&self) -> u64 { self.counter }
    pub fn set_counter(&mut self, value: u64) { self.counter = value; }
    pub fn bump_counter(&mut self) { self.counter += 1; }

    // ----------------------------------------------------
    // multi-walker

    /// Replace the stored values with their element-wise average over all
    /// walkers in `group` (sum-then-broadcast; blocking collective).
    pub fn average_over_walkers(&mut self, group: &dyn ReplicaGroup) -> FailResult<()> {
        walkers::average_over_group(group, &mut self.data)
    }

    // ----------------------------------------------------
    // checkpoints

    /// Append one checkpoint block.  Diagonal mode writes a vector-shaped
    /// body; full mode writes the whole N x N grid.
    pub fn write_checkpoint(&self, w: &mut dyn Write) -> FailResult<()> {
        io::write_matrix(w, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CoeffsSpace;

    fn space_of(n: usize) -> Arc<CoeffsSpace> {
        Arc::new(CoeffsSpace::new(vec!["x"], vec![n]).unwrap())
    }

    #[test]
    fn packed_index_is_symmetric_and_compact() {
        let m = CoeffsMatrix::new(space_of(3), "hessian", MatrixMode::Full);
        assert_eq!(m.len(), 6);
        for i in 0..3 {
            for j in 0..3 {
                assert_eq!(m.matrix_index(i, j), m.matrix_index(j, i));
                assert!(m.matrix_index(i, j) < 6);
            }
        }
        // every unordered pair gets its own cell
        let mut seen = vec![false; 6];
        for i in 0..3 {
            for j in i..3 {
                let idx = m.matrix_index(i, j);
                assert!(!seen[idx]);
                seen[idx] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn symmetric_by_construction() {
        let mut m = CoeffsMatrix::new(space_of(4), "hessian", MatrixMode::Full);
        m.set_value(1, 3, 2.5);
        assert_eq!(m.value(3, 1), 2.5);
        m.add_to_value(3, 1, 0.5);
        assert_eq!(m.value(1, 3), 3.0);
    }

    #[test]
    fn diagonal_mode_off_diagonal_reads_zero() {
        let mut m = CoeffsMatrix::new(space_of(3), "hessian", MatrixMode::Diagonal);
        assert_eq!(m.len(), 3);
        m.set_value(1, 1, 4.0);
        assert_eq!(m.value(1, 1), 4.0);
        assert_eq!(m.value(0, 1), 0.0);
    }

    #[test]
    #[should_panic(expected = "off-diagonal")]
    fn diagonal_mode_off_diagonal_writes_panic() {
        let mut m = CoeffsMatrix::new(space_of(3), "hessian", MatrixMode::Diagonal);
        m.set_value(0, 1, 1.0);
    }

    #[test]
    #[should_panic(expected = "shape mismatch")]
    fn mode_mismatch_panics() {
        let mut a = CoeffsMatrix::new(space_of(3), "a", MatrixMode::Diagonal);
        let b = CoeffsMatrix::new(space_of(3), "b", MatrixMode::Full);
        a.add_matrix(&b);
    }

    #[test]
    fn diagonal_product_is_elementwise() {
        let space = space_of(3);
        let mut m = CoeffsMatrix::new(Arc::clone(&space), "h", MatrixMode::Diagonal);
        let mut v = CoeffsVector::new(space, "v", false);
        for i in 0..3 {
            m.set_value(i, i, (i + 1) as f64);
        }
        v.assign_slice(&[2.0, 3.0, 4.0]);
        assert_eq!(m.dot_vector(&v).data(), &[2.0, 6.0, 12.0]);
    }

    #[test]
    fn full_product_matches_the_double_loop() {
        let space = space_of(3);
        let mut m = CoeffsMatrix::new(Arc::clone(&space), "h", MatrixMode::Full);
        let mut v = CoeffsVector::new(space, "v", false);
        let dense = [
            [1.0, 2.0, 3.0],
            [2.0, 5.0, 6.0],
            [3.0, 6.0, 9.0],
        ];
        for i in 0..3 {
            for j in i..3 {
                m.set_value(i, j, dense[i][j]);
            }
        }
        let x = [1.0, -1.0, 2.0];
        v.assign_slice(&x);

        let expected: Vec<f64> = (0..3)
            .map(|i| (0..3).map(|j| dense[i][j] * x[j]).sum())
            .collect();
        assert_eq!(m.dot_vector(&v).data(), &expected[..]);
    }

    #[test]
    fn access_by_multi_index_pairs() {
        let space = Arc::new(CoeffsSpace::new(vec!["x", "y"], vec![2, 3]).unwrap());
        let mut m = CoeffsMatrix::new(space, "hessian", MatrixMode::Full);
        // [1, 2] is flat index 5, [0, 1] is flat index 1
        m.set_value_at(&[1, 2], &[0, 1], 2.5);
        assert_eq!(m.value(5, 1), 2.5);
        m.add_to_value_at(&[0, 1], &[1, 2], 0.5);
        assert_eq!(m.value_at(&[1, 2], &[0, 1]), 3.0);
    }

    #[test]
    fn min_max_over_stored_values() {
        let mut m = CoeffsMatrix::new(space_of(2), "h", MatrixMode::Full);
        m.set_value(0, 0, -2.0);
        m.set_value(0, 1, 5.0);
        m.set_value(1, 1, 1.0);
        assert_eq!(m.min_value(), -2.0);
        assert_eq!(m.max_value(), 5.0);
    }

    #[test]
    fn bulk_arithmetic_respects_shape() {
        let mut a = CoeffsMatrix::new(space_of(2), "a", MatrixMode::Full);
        let mut b = CoeffsMatrix::new(space_of(2), "b", MatrixMode::Full);
        a.fill(1.0);
        b.fill(2.0);
        a.add_matrix(&b);
        a.scale(2.0);
        assert!(a.data().iter().all(|&x| x == 6.0));
        a.subtract_matrix(&b);
        assert!(a.data().iter().all(|&x| x == 4.0));
    }
}
