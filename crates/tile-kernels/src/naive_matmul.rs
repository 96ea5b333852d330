//! One-element-per-cell matmul.
//!
//! Cell `(i, j)` loads row `i` of `x` and row `j` of `y_t` (`y` transposed,
//! so both loads are contiguous), multiplies them lane-wise and reduces the
//! K axis. Slow next to [`crate::matmul`], but it has no tile arithmetic to
//! get wrong, which makes it a useful cross-check.

use tile_core::{
    BlockRange, CellWriter, Element, FlatBuffer, Grid, GridCell, Launcher, Mask, Offsets, Result,
    Shape, TileDesc, TileError, load, next_power_of_two,
};
use tracing::debug;

/// `x (M × K) @ y (K × N)`. Transposes `y` and defers to
/// [`matmul_naive_transposed`].
pub fn matmul_naive<T: Element>(
    launcher: &Launcher,
    x: &FlatBuffer<T>,
    y: &FlatBuffer<T>,
) -> Result<FlatBuffer<T>> {
    matmul_naive_transposed(launcher, x, &y.transpose()?)
}

/// `x (M × K) @ y`, where `y_t` is `y` already transposed to `N × K`.
pub fn matmul_naive_transposed<T: Element>(
    launcher: &Launcher,
    x: &FlatBuffer<T>,
    y_t: &FlatBuffer<T>,
) -> Result<FlatBuffer<T>> {
    let (m, k) = x.matrix_dims()?;
    let (n, k2) = y_t.matrix_dims()?;
    if k != k2 {
        return Err(TileError::ShapeMismatch {
            expected: vec![n, k],
            got: vec![n, k2],
        });
    }

    let block_k = next_power_of_two(k);
    let mut out = FlatBuffer::zeros(Shape::matrix(m, n));
    let report = launcher.launch(Grid::new_2d(m, n), out.as_mut_slice(), |cell, w| {
        dot_kernel(cell, x.as_slice(), y_t.as_slice(), n, k, block_k, w)
    })?;
    debug!(
        kernel = "matmul_naive",
        m,
        n,
        k,
        cells = report.cells,
        elapsed_us = report.elapsed_us
    );
    Ok(out)
}

fn dot_kernel<T: Element>(
    cell: GridCell,
    x: &[T],
    y_t: &[T],
    n: usize,
    k: usize,
    block_k: usize,
    out: &mut CellWriter<T>,
) -> Result<()> {
    let (row, col) = (cell.program_id(0), cell.program_id(1));
    let mask = BlockRange::new(0, block_k, k).mask();
    let a = load(x, &TileDesc::row_major(row * k, 1, block_k, k).offsets(), &mask, 0.0)?;
    let b = load(y_t, &TileDesc::row_major(col * k, 1, block_k, k).offsets(), &mask, 0.0)?;
    let acc = a.mul(&b)?.sum(1)?;
    out.store(&Offsets::row(vec![row * n + col]), &acc, &Mask::all(1, 1))
}
