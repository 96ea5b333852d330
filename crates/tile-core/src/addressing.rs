//! Offset arithmetic for a single grid cell.
//!
//! Every kernel derives its addresses the same way: a [`BlockRange`] per axis
//! gives `block * size + [0, size)` and the matching in-bounds [`Mask`], and a
//! [`TileDesc`] turns per-axis local indices into flat offsets through
//! [`outer_sum`]. Block sizes are powers of two; logical extents are not, so
//! the last block along an axis is partially masked unless the extent
//! divides evenly.

use std::ops::Range;

use crate::mask::Mask;
use crate::{Result, TileError};

/// Ceiling division, `ceil(a / b)`.
pub fn cdiv(a: usize, b: usize) -> usize {
    a.div_ceil(b)
}

/// Smallest power of two `>= n` (and at least 1).
pub fn next_power_of_two(n: usize) -> usize {
    n.max(1).next_power_of_two()
}

/// Reject block sizes a grid cell cannot be built from.
pub fn check_block_size(axis: &'static str, size: usize) -> Result<()> {
    if size == 0 {
        return Err(TileError::InvalidBlockSize {
            axis,
            size,
            reason: "must be non-zero",
        });
    }
    if !size.is_power_of_two() {
        return Err(TileError::InvalidBlockSize {
            axis,
            size,
            reason: "must be a power of two",
        });
    }
    Ok(())
}

/// One axis of a cell's addressing: block index, block size, logical extent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockRange {
    block: usize,
    size: usize,
    extent: usize,
}

impl BlockRange {
    pub fn new(block: usize, size: usize, extent: usize) -> Self {
        debug_assert!(size.is_power_of_two(), "block size {size} not a power of two");
        Self {
            block,
            size,
            extent,
        }
    }

    /// First global index covered by this block.
    pub fn start(&self) -> usize {
        self.block * self.size
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn extent(&self) -> usize {
        self.extent
    }

    /// Local lane indices `[0, size)`.
    pub fn local(&self) -> Range<usize> {
        0..self.size
    }

    /// Global indices `block * size + [0, size)`.
    pub fn indices(&self) -> Vec<usize> {
        let start = self.start();
        self.local().map(|i| start + i).collect()
    }

    fn bits(&self) -> Vec<bool> {
        let start = self.start();
        self.local().map(|i| start + i < self.extent).collect()
    }

    /// `1 × size` mask, `index < extent`.
    pub fn mask(&self) -> Mask {
        Mask::row(self.bits())
    }

    /// Same predicate laid out as a `size × 1` column.
    pub fn column_mask(&self) -> Mask {
        Mask::column(self.bits())
    }

    /// Whether any lane of this block falls past the extent.
    pub fn is_partial(&self) -> bool {
        self.start() + self.size > self.extent
    }
}

/// A `rows × cols` grid of flat buffer offsets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Offsets {
    rows: usize,
    cols: usize,
    data: Vec<usize>,
}

impl Offsets {
    /// `1 × n` offsets, used by 1-D kernels.
    pub fn row(data: Vec<usize>) -> Self {
        Self {
            rows: 1,
            cols: data.len(),
            data,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.data
    }

    /// Add a scalar base to every offset.
    pub fn shifted(mut self, base: usize) -> Self {
        for o in &mut self.data {
            *o += base;
        }
        self
    }
}

/// Explicit 2-D broadcast: `out[r][c] = col[r] + row[c]`.
///
/// `col` holds row offsets already multiplied by the row stride; `row` holds
/// column offsets.
pub fn outer_sum(col: &[usize], row: &[usize]) -> Offsets {
    let mut data = Vec::with_capacity(col.len() * row.len());
    for &r in col {
        for &c in row {
            data.push(r + c);
        }
    }
    Offsets {
        rows: col.len(),
        cols: row.len(),
        data,
    }
}

/// The part of a buffer one grid cell touches: base offset, per-axis
/// extent of the local index range, and per-axis stride.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileDesc {
    pub base: usize,
    pub extent: [usize; 2],
    pub stride: [usize; 2],
}

impl TileDesc {
    pub fn new(base: usize, extent: [usize; 2], stride: [usize; 2]) -> Self {
        Self {
            base,
            extent,
            stride,
        }
    }

    /// Tile of a row-major buffer whose rows are `row_stride` elements apart.
    pub fn row_major(base: usize, rows: usize, cols: usize, row_stride: usize) -> Self {
        Self::new(base, [rows, cols], [row_stride, 1])
    }

    /// Flat offsets `base + r * stride[0] + c * stride[1]` for every lane.
    pub fn offsets(&self) -> Offsets {
        let col: Vec<usize> = (0..self.extent[0])
            .map(|r| self.base + r * self.stride[0])
            .collect();
        let row: Vec<usize> = (0..self.extent[1]).map(|c| c * self.stride[1]).collect();
        outer_sum(&col, &row)
    }

    /// The same tile moved `steps` elements along `axis`.
    pub fn advance(&self, axis: usize, steps: usize) -> Self {
        Self {
            base: self.base + steps * self.stride[axis],
            ..*self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cdiv_and_pow2() {
        assert_eq!(cdiv(1000, 1024), 1);
        assert_eq!(cdiv(1024, 1024), 1);
        assert_eq!(cdiv(1025, 1024), 2);
        assert_eq!(next_power_of_two(0), 1);
        assert_eq!(next_power_of_two(3), 4);
        assert_eq!(next_power_of_two(64), 64);
        assert_eq!(next_power_of_two(781), 1024);
    }

    #[test]
    fn test_check_block_size() {
        assert!(check_block_size("n", 16).is_ok());
        assert!(matches!(
            check_block_size("n", 24),
            Err(TileError::InvalidBlockSize { size: 24, .. })
        ));
        assert!(check_block_size("n", 0).is_err());
    }

    #[test]
    fn test_block_range_tail_mask() {
        let r = BlockRange::new(1, 4, 6);
        assert_eq!(r.indices(), vec![4, 5, 6, 7]);
        assert_eq!(r.mask().as_slice(), &[true, true, false, false]);
        assert!(r.is_partial());
        assert!(!BlockRange::new(0, 4, 6).is_partial());
    }

    #[test]
    fn test_outer_sum() {
        let o = outer_sum(&[0, 10], &[0, 1, 2]);
        assert_eq!(o.shape(), (2, 3));
        assert_eq!(o.as_slice(), &[0, 1, 2, 10, 11, 12]);
    }

    #[test]
    fn test_tile_desc_advance_along_k() {
        // 2x2 slab of a 4x8 row-major buffer, starting at row 2.
        let t = TileDesc::row_major(2 * 8, 2, 2, 8);
        assert_eq!(t.offsets().as_slice(), &[16, 17, 24, 25]);
        let next = t.advance(1, 2);
        assert_eq!(next.offsets().as_slice(), &[18, 19, 26, 27]);

        // Column slab of a K x N buffer advances by whole rows.
        let y = TileDesc::row_major(1, 2, 2, 5);
        assert_eq!(y.advance(0, 2).offsets().as_slice(), &[11, 12, 16, 17]);
    }
}
