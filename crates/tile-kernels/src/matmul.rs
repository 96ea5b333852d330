//! Blocked matrix multiplication: `out (M × N) = x (M × K) @ y (K × N)`.
//!
//! The grid has one cell per `(Sm × Sn)` output tile. Each cell keeps an
//! `f32` accumulator and walks K in chunks of `Sk`, loading an `Sm × Sk` slab
//! of `x` and an `Sk × Sn` slab of `y` per step. Both slab masks are rebuilt
//! every step because only the last K-chunk is partial. The accumulator is
//! cast to the output element type and stored once, masked on both the M and
//! N edges.

use serde::Serialize;
use tile_core::addressing::check_block_size;
use tile_core::{
    Block, BlockRange, CellWriter, Element, FlatBuffer, Grid, GridCell, Launcher, Mask, Result,
    Shape, TileDesc, TileError, cdiv, load,
};
use tracing::debug;

/// Tile extents along M, N and K.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MatmulBlocks {
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

impl Default for MatmulBlocks {
    fn default() -> Self {
        Self {
            m: 32,
            n: 32,
            k: 32,
        }
    }
}

impl MatmulBlocks {
    pub fn new(m: usize, n: usize, k: usize) -> Self {
        Self { m, n, k }
    }

    /// Every extent must be a power of two no smaller than `min_tile`.
    pub fn validate(&self, min_tile: usize) -> Result<()> {
        for (axis, size) in [("m", self.m), ("n", self.n), ("k", self.k)] {
            check_block_size(axis, size)?;
            if size < min_tile {
                return Err(TileError::InvalidBlockSize {
                    axis,
                    size,
                    reason: "below the configured tile floor",
                });
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
struct Dims {
    m: usize,
    n: usize,
    k: usize,
}

/// Check `x @ y` is well formed and return `(M, N, K)`.
pub(crate) fn matmul_dims<T: Element>(
    x: &FlatBuffer<T>,
    y_rows: usize,
    y_cols: usize,
) -> Result<(usize, usize, usize)> {
    let (m, k) = x.matrix_dims()?;
    if k != y_rows {
        return Err(TileError::ShapeMismatch {
            expected: vec![m, k],
            got: vec![y_rows, y_cols],
        });
    }
    Ok((m, y_cols, k))
}

/// Blocked `x @ y` with an `f32` accumulator, stored as `O`.
pub fn matmul<T: Element, O: Element>(
    launcher: &Launcher,
    x: &FlatBuffer<T>,
    y: &FlatBuffer<T>,
    blocks: MatmulBlocks,
) -> Result<FlatBuffer<O>> {
    let (y_rows, y_cols) = y.matrix_dims()?;
    let (m, n, k) = matmul_dims(x, y_rows, y_cols)?;
    blocks.validate(launcher.config().min_tile)?;

    let dims = Dims { m, n, k };
    let mut out = FlatBuffer::zeros(Shape::matrix(m, n));
    let grid = Grid::for_extents(&[m, n], &[blocks.m, blocks.n])?;
    let report = launcher.launch(grid, out.as_mut_slice(), |cell, w| {
        matmul_kernel(cell, x.as_slice(), y.as_slice(), dims, blocks, w)
    })?;
    debug!(
        kernel = "matmul",
        m,
        n,
        k,
        blocks = ?blocks,
        out_dtype = %O::DTYPE,
        cells = report.cells,
        elapsed_us = report.elapsed_us
    );
    Ok(out)
}

fn matmul_kernel<T: Element, O: Element>(
    cell: GridCell,
    x: &[T],
    y: &[T],
    dims: Dims,
    blocks: MatmulBlocks,
    out: &mut CellWriter<O>,
) -> Result<()> {
    let rows = BlockRange::new(cell.program_id(0), blocks.m, dims.m);
    let cols = BlockRange::new(cell.program_id(1), blocks.n, dims.n);
    let row_mask = rows.column_mask();
    let col_mask = cols.mask();

    let mut x_slab = TileDesc::row_major(rows.start() * dims.k, blocks.m, blocks.k, dims.k);
    let mut y_slab = TileDesc::row_major(cols.start(), blocks.k, blocks.n, dims.n);
    let mut acc = Block::zeros(blocks.m, blocks.n);

    for kk in 0..cdiv(dims.k, blocks.k) {
        let ks = BlockRange::new(kk, blocks.k, dims.k);
        let x_mask = Mask::outer_and(&row_mask, &ks.mask());
        let y_mask = Mask::outer_and(&ks.column_mask(), &col_mask);
        let a = load(x, &x_slab.offsets(), &x_mask, 0.0)?;
        let b = load(y, &y_slab.offsets(), &y_mask, 0.0)?;
        acc = acc.add(&a.dot(&b)?)?;
        x_slab = x_slab.advance(1, blocks.k);
        y_slab = y_slab.advance(0, blocks.k);
    }

    let out_tile = TileDesc::row_major(
        rows.start() * dims.n + cols.start(),
        blocks.m,
        blocks.n,
        dims.n,
    );
    out.store(&out_tile.offsets(), &acc, &Mask::outer_and(&row_mask, &col_mask))
}
