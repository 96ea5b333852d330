//! In-bounds predicates for block-sized accesses.

use crate::{Result, TileError};

/// Boolean predicate with the shape of a tile's local index range.
///
/// A lane is `true` exactly when its offset addresses real data. Masked-off
/// lanes load as a fill value and are never stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mask {
    rows: usize,
    cols: usize,
    bits: Vec<bool>,
}

impl Mask {
    pub fn from_vec(rows: usize, cols: usize, bits: Vec<bool>) -> Result<Self> {
        if bits.len() != rows * cols {
            return Err(TileError::ShapeMismatch {
                expected: vec![rows, cols],
                got: vec![bits.len()],
            });
        }
        Ok(Self { rows, cols, bits })
    }

    /// A `1 × n` mask.
    pub fn row(bits: Vec<bool>) -> Self {
        Self {
            rows: 1,
            cols: bits.len(),
            bits,
        }
    }

    /// An `n × 1` mask.
    pub fn column(bits: Vec<bool>) -> Self {
        Self {
            rows: bits.len(),
            cols: 1,
            bits,
        }
    }

    pub fn all(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            bits: vec![true; rows * cols],
        }
    }

    /// Explicit broadcast of a column mask against a row mask:
    /// `out[r][c] = col[r] && row[c]`.
    pub fn outer_and(col: &Mask, row: &Mask) -> Self {
        let mut bits = Vec::with_capacity(col.bits.len() * row.bits.len());
        for &r in &col.bits {
            for &c in &row.bits {
                bits.push(r && c);
            }
        }
        Self {
            rows: col.bits.len(),
            cols: row.bits.len(),
            bits,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn get(&self, row: usize, col: usize) -> bool {
        self.bits[row * self.cols + col]
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.bits
    }

    /// Number of in-bounds lanes.
    pub fn count(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    pub fn is_full(&self) -> bool {
        self.bits.iter().all(|&b| b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outer_and() {
        let col = Mask::column(vec![true, true, false]);
        let row = Mask::row(vec![true, false]);
        let m = Mask::outer_and(&col, &row);
        assert_eq!(m.shape(), (3, 2));
        assert_eq!(m.as_slice(), &[true, false, true, false, false, false]);
        assert_eq!(m.count(), 2);
        assert!(!m.is_full());
    }

    #[test]
    fn test_from_vec_checks_len() {
        assert!(Mask::from_vec(2, 2, vec![true; 3]).is_err());
        assert!(Mask::from_vec(2, 2, vec![true; 4]).unwrap().is_full());
    }
}
