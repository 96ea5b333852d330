//! Elementwise vector addition, the minimal grid-cell contract.

use tile_core::addressing::check_block_size;
use tile_core::{
    BlockRange, CellWriter, Element, FlatBuffer, Grid, GridCell, Launcher, Offsets, Result,
    TileError, load,
};
use tracing::debug;

/// `out = x + y` over buffers of identical shape, `block_size` lanes per cell.
pub fn vector_add<T: Element>(
    launcher: &Launcher,
    x: &FlatBuffer<T>,
    y: &FlatBuffer<T>,
    block_size: usize,
) -> Result<FlatBuffer<T>> {
    if x.shape() != y.shape() {
        return Err(TileError::ShapeMismatch {
            expected: x.shape().dims().to_vec(),
            got: y.shape().dims().to_vec(),
        });
    }
    check_block_size("n", block_size)?;

    let n = x.len();
    let mut out = FlatBuffer::zeros(x.shape().clone());
    let grid = Grid::for_extents(&[n], &[block_size])?;
    let report = launcher.launch(grid, out.as_mut_slice(), |cell, w| {
        add_kernel(cell, x.as_slice(), y.as_slice(), n, block_size, w)
    })?;
    debug!(kernel = "vector_add", n, block_size, cells = report.cells, elapsed_us = report.elapsed_us);
    Ok(out)
}

fn add_kernel<T: Element>(
    cell: GridCell,
    x: &[T],
    y: &[T],
    n: usize,
    block_size: usize,
    out: &mut CellWriter<T>,
) -> Result<()> {
    let range = BlockRange::new(cell.program_id(0), block_size, n);
    let offsets = Offsets::row(range.indices());
    let mask = range.mask();
    let a = load(x, &offsets, &mask, 0.0)?;
    let b = load(y, &offsets, &mask, 0.0)?;
    out.store(&offsets, &a.add(&b)?, &mask)
}
