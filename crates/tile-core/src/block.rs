//! Lane values of one tile and the reductions over them.
//!
//! A [`Block`] is always `rows × cols`; 1-D tiles are `1 × S`. Binary ops
//! broadcast a `rows × 1`, `1 × cols` or `1 × 1` right-hand side against the
//! full tile, which is how a reduced value is applied back to its row.

use crate::{Result, TileError};

#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Block {
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(TileError::ShapeMismatch {
                expected: vec![rows, cols],
                got: vec![data.len()],
            });
        }
        Ok(Self { rows, cols, data })
    }

    /// A `1 × n` block.
    pub fn row(data: Vec<f32>) -> Self {
        Self {
            rows: 1,
            cols: data.len(),
            data,
        }
    }

    pub fn full(rows: usize, cols: usize, value: f32) -> Self {
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::full(rows, cols, 0.0)
    }

    /// A `1 × 1` block.
    pub fn scalar(value: f32) -> Self {
        Self::full(1, 1, value)
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    // ── Elementwise ─────────────────────────────────────────────────────

    pub fn map(&self, f: impl Fn(f32) -> f32) -> Block {
        Block {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|&x| f(x)).collect(),
        }
    }

    pub fn exp(&self) -> Block {
        self.map(f32::exp)
    }

    pub fn neg(&self) -> Block {
        self.map(|x| -x)
    }

    pub fn scale(&self, s: f32) -> Block {
        self.map(|x| x * s)
    }

    /// Combine with `rhs`, broadcasting `rhs` along any axis of length 1.
    pub fn zip_with(&self, rhs: &Block, f: impl Fn(f32, f32) -> f32) -> Result<Block> {
        let row_bcast = rhs.rows == 1 && self.rows != 1;
        let col_bcast = rhs.cols == 1 && self.cols != 1;
        if (rhs.rows != self.rows && !row_bcast) || (rhs.cols != self.cols && !col_bcast) {
            return Err(TileError::ShapeMismatch {
                expected: vec![self.rows, self.cols],
                got: vec![rhs.rows, rhs.cols],
            });
        }

        let mut data = Vec::with_capacity(self.data.len());
        for r in 0..self.rows {
            let rr = if row_bcast { 0 } else { r };
            for c in 0..self.cols {
                let rc = if col_bcast { 0 } else { c };
                data.push(f(self.data[r * self.cols + c], rhs.data[rr * rhs.cols + rc]));
            }
        }
        Ok(Block {
            rows: self.rows,
            cols: self.cols,
            data,
        })
    }

    pub fn add(&self, rhs: &Block) -> Result<Block> {
        self.zip_with(rhs, |a, b| a + b)
    }

    pub fn sub(&self, rhs: &Block) -> Result<Block> {
        self.zip_with(rhs, |a, b| a - b)
    }

    pub fn mul(&self, rhs: &Block) -> Result<Block> {
        self.zip_with(rhs, |a, b| a * b)
    }

    pub fn div(&self, rhs: &Block) -> Result<Block> {
        self.zip_with(rhs, |a, b| a / b)
    }

    /// `1.0` where `self == rhs` (non-strict, so ties all match), else `0.0`.
    pub fn eq_indicator(&self, rhs: &Block) -> Result<Block> {
        self.zip_with(rhs, |a, b| if a == b { 1.0 } else { 0.0 })
    }

    // ── Reductions ──────────────────────────────────────────────────────

    fn reduce(&self, axis: usize, init: f32, f: impl Fn(f32, f32) -> f32) -> Result<Block> {
        match axis {
            0 => {
                let mut out = vec![init; self.cols];
                for r in 0..self.rows {
                    for (c, acc) in out.iter_mut().enumerate() {
                        *acc = f(*acc, self.data[r * self.cols + c]);
                    }
                }
                Ok(Block {
                    rows: 1,
                    cols: self.cols,
                    data: out,
                })
            }
            1 => {
                let data = self
                    .data
                    .chunks(self.cols.max(1))
                    .take(self.rows)
                    .map(|row| row.iter().copied().fold(init, &f))
                    .collect();
                Ok(Block {
                    rows: self.rows,
                    cols: 1,
                    data,
                })
            }
            _ => Err(TileError::InvalidArgument(format!(
                "axis {axis} out of range for a 2-D block"
            ))),
        }
    }

    /// Max over `axis`; the reduced axis is kept with length 1.
    pub fn max(&self, axis: usize) -> Result<Block> {
        self.reduce(axis, f32::NEG_INFINITY, f32::max)
    }

    /// Sum over `axis`; the reduced axis is kept with length 1.
    pub fn sum(&self, axis: usize) -> Result<Block> {
        self.reduce(axis, 0.0, |a, b| a + b)
    }

    pub fn max_all(&self) -> f32 {
        self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    pub fn sum_all(&self) -> f32 {
        self.data.iter().sum()
    }

    /// Block matrix product `self (m × k) @ rhs (k × n)`.
    pub fn dot(&self, rhs: &Block) -> Result<Block> {
        if self.cols != rhs.rows {
            return Err(TileError::ShapeMismatch {
                expected: vec![self.cols, rhs.cols],
                got: vec![rhs.rows, rhs.cols],
            });
        }
        let (m, k, n) = (self.rows, self.cols, rhs.cols);
        let mut data = vec![0.0f32; m * n];
        for i in 0..m {
            for p in 0..k {
                let a = self.data[i * k + p];
                let b_row = &rhs.data[p * n..(p + 1) * n];
                let out_row = &mut data[i * n..(i + 1) * n];
                for (o, &b) in out_row.iter_mut().zip(b_row) {
                    *o += a * b;
                }
            }
        }
        Ok(Block {
            rows: m,
            cols: n,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_broadcast_sub() {
        let x = Block::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let m = x.max(1).unwrap();
        assert_eq!(m.shape(), (2, 1));
        assert_eq!(m.as_slice(), &[3.0, 6.0]);
        let shifted = x.sub(&m).unwrap();
        assert_eq!(shifted.as_slice(), &[-2.0, -1.0, 0.0, -2.0, -1.0, 0.0]);
    }

    #[test]
    fn test_sum_axis_0() {
        let x = Block::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let s = x.sum(0).unwrap();
        assert_eq!(s.shape(), (1, 3));
        assert_eq!(s.as_slice(), &[5.0, 7.0, 9.0]);
        assert!(x.sum(2).is_err());
    }

    #[test]
    fn test_max_ignores_neg_inf_fill() {
        let x = Block::row(vec![-5.0, -3.0, f32::NEG_INFINITY, f32::NEG_INFINITY]);
        assert_eq!(x.max_all(), -3.0);
        // exp(-inf - m) contributes nothing to the denominator.
        let e = x.sub(&Block::scalar(x.max_all())).unwrap().exp();
        assert_eq!(e.as_slice()[2], 0.0);
        assert!((e.sum_all() - (1.0 + (-2.0f32).exp())).abs() < 1e-6);
    }

    #[test]
    fn test_eq_indicator_ties() {
        let x = Block::row(vec![2.0, 7.0, 7.0, 1.0]);
        let ind = x.eq_indicator(&Block::scalar(7.0)).unwrap();
        assert_eq!(ind.as_slice(), &[0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_dot() {
        let a = Block::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let b = Block::from_vec(3, 2, vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]).unwrap();
        let c = a.dot(&b).unwrap();
        assert_eq!(c.as_slice(), &[58.0, 64.0, 139.0, 154.0]);
        assert!(a.dot(&a).is_err());
    }

    #[test]
    fn test_zip_shape_mismatch() {
        let a = Block::zeros(2, 3);
        let b = Block::zeros(3, 2);
        assert!(matches!(a.add(&b), Err(TileError::ShapeMismatch { .. })));
    }
}
