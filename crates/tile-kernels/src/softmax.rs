//! Row-wise softmax forward and backward.
//!
//! One grid cell per row; the whole row fits in a single power-of-two block.
//! Both directions compute `exp(x - max(x))` so the exponent never overflows.
//!
//! The backward pass does not read the forward output. It takes the original
//! input, recomputes the forward intermediates through
//! [`SoftmaxStats::recompute`] (the same routine the forward kernel uses), and
//! applies the chain rule through `out = e * (1 / sum(e))` with
//! `e = exp(x - m)`:
//!
//! 1. `num_grad = dy * inv`
//! 2. `inv_grad = sum(dy * e)`
//! 3. `denom_grad = -inv_grad / d^2`
//! 4. `num_grad += denom_grad`
//! 5. `normed_grad = num_grad * e`
//! 6. `max_grad = -sum(normed_grad)`
//! 7. `dx = normed_grad + max_grad * (x == m)`
//!
//! Step 7 routes `max_grad` to every element equal to the row max. With ties
//! each tied element receives the full contribution, which is not the exact
//! subgradient of `max`. `max_grad` is zero up to rounding, so the effect is
//! at the rounding level.

use tile_core::addressing::check_block_size;
use tile_core::{
    Block, BlockRange, CellWriter, Element, FlatBuffer, Grid, GridCell, Launcher, Mask, Offsets,
    Result, TileDesc, TileError, load, next_power_of_two,
};
use tracing::debug;

/// Forward intermediates of one row, recomputed wherever they are needed.
#[derive(Clone, Debug)]
pub struct SoftmaxStats {
    /// Row max `m`.
    pub max: f32,
    /// `e = exp(x - m)`; masked lanes are `0`.
    pub exp: Block,
    /// `d = sum(e)`.
    pub denom: f32,
    /// `inv = 1 / d`.
    pub inv: f32,
    /// `out = e * inv`.
    pub out: Block,
}

impl SoftmaxStats {
    /// Recompute from a row loaded with `-inf` in masked lanes.
    pub fn recompute(row: &Block) -> Result<Self> {
        let max = row.max_all();
        let exp = row.sub(&Block::scalar(max))?.exp();
        let denom = exp.sum_all();
        let inv = 1.0 / denom;
        let out = exp.scale(inv);
        Ok(Self {
            max,
            exp,
            denom,
            inv,
            out,
        })
    }
}

struct RowLayout {
    rows: usize,
    cols: usize,
    block: usize,
}

impl RowLayout {
    fn of<T: Element>(x: &FlatBuffer<T>, block_size: Option<usize>) -> Result<Self> {
        let cols = x.shape().dim(-1).ok_or_else(|| {
            TileError::InvalidArgument("softmax requires at least 1 dimension".into())
        })?;
        let rows = if cols == 0 { 0 } else { x.len() / cols };
        let block = match block_size {
            None => next_power_of_two(cols),
            Some(b) => {
                check_block_size("cols", b)?;
                if b < cols {
                    return Err(TileError::InvalidBlockSize {
                        axis: "cols",
                        size: b,
                        reason: "must cover the whole row",
                    });
                }
                b
            }
        };
        Ok(Self { rows, cols, block })
    }

    /// Offsets and mask of row `row`.
    fn row_tile(&self, row: usize) -> (Offsets, Mask) {
        let tile = TileDesc::row_major(row * self.cols, 1, self.block, self.cols);
        (tile.offsets(), BlockRange::new(0, self.block, self.cols).mask())
    }
}

/// Softmax over the last axis. `block_size` defaults to the next power of two
/// of the row length.
pub fn softmax_forward<T: Element>(
    launcher: &Launcher,
    x: &FlatBuffer<T>,
    block_size: Option<usize>,
) -> Result<FlatBuffer<T>> {
    let layout = RowLayout::of(x, block_size)?;
    let mut out = FlatBuffer::zeros(x.shape().clone());
    let report = launcher.launch(Grid::new_1d(layout.rows), out.as_mut_slice(), |cell, w| {
        forward_kernel(cell, x.as_slice(), &layout, w)
    })?;
    debug!(
        kernel = "softmax_forward",
        rows = layout.rows,
        cols = layout.cols,
        block = layout.block,
        elapsed_us = report.elapsed_us
    );
    Ok(out)
}

fn forward_kernel<T: Element>(
    cell: GridCell,
    x: &[T],
    layout: &RowLayout,
    out: &mut CellWriter<T>,
) -> Result<()> {
    let (offsets, mask) = layout.row_tile(cell.program_id(0));
    let row = load(x, &offsets, &mask, f32::NEG_INFINITY)?;
    let stats = SoftmaxStats::recompute(&row)?;
    let y = stats.exp.div(&Block::scalar(stats.denom))?;
    out.store(&offsets, &y, &mask)
}

/// Gradient of [`softmax_forward`] with respect to `x`, given the upstream
/// gradient `dy`. Uses the same block size as the forward call.
pub fn softmax_backward<T: Element>(
    launcher: &Launcher,
    x: &FlatBuffer<T>,
    dy: &FlatBuffer<T>,
    block_size: Option<usize>,
) -> Result<FlatBuffer<T>> {
    if x.shape() != dy.shape() {
        return Err(TileError::ShapeMismatch {
            expected: x.shape().dims().to_vec(),
            got: dy.shape().dims().to_vec(),
        });
    }
    let layout = RowLayout::of(x, block_size)?;
    let mut dx = FlatBuffer::zeros(x.shape().clone());
    let report = launcher.launch(Grid::new_1d(layout.rows), dx.as_mut_slice(), |cell, w| {
        backward_kernel(cell, x.as_slice(), dy.as_slice(), &layout, w)
    })?;
    debug!(
        kernel = "softmax_backward",
        rows = layout.rows,
        cols = layout.cols,
        block = layout.block,
        elapsed_us = report.elapsed_us
    );
    Ok(dx)
}

fn backward_kernel<T: Element>(
    cell: GridCell,
    x: &[T],
    dy: &[T],
    layout: &RowLayout,
    out: &mut CellWriter<T>,
) -> Result<()> {
    let (offsets, mask) = layout.row_tile(cell.program_id(0));
    let row = load(x, &offsets, &mask, f32::NEG_INFINITY)?;
    let dy = load(dy, &offsets, &mask, 0.0)?;
    let s = SoftmaxStats::recompute(&row)?;

    let num_grad = dy.scale(s.inv);
    let inv_grad = dy.mul(&s.exp)?.sum_all();
    let denom_grad = -inv_grad / (s.denom * s.denom);
    let num_grad = num_grad.add(&Block::scalar(denom_grad))?;
    // Masked lanes have e = 0, so denom_grad does not leak into them here.
    let normed_grad = num_grad.mul(&s.exp)?;
    let max_grad = -normed_grad.sum_all();

    let at_max = row.eq_indicator(&Block::scalar(s.max))?;
    let dx = normed_grad.add(&at_max.scale(max_grad))?;
    out.store(&offsets, &dx, &mask)
}

/// Forward/backward pairing that keeps only the forward input.
///
/// The backward call recomputes every intermediate from the saved input;
/// nothing computed by the forward launch is carried over.
#[derive(Clone, Debug)]
pub struct SavedSoftmax<T> {
    input: FlatBuffer<T>,
    block_size: Option<usize>,
}

impl<T: Element> SavedSoftmax<T> {
    pub fn forward(
        launcher: &Launcher,
        x: &FlatBuffer<T>,
        block_size: Option<usize>,
    ) -> Result<(FlatBuffer<T>, Self)> {
        let y = softmax_forward(launcher, x, block_size)?;
        Ok((
            y,
            Self {
                input: x.clone(),
                block_size,
            },
        ))
    }

    pub fn backward(&self, launcher: &Launcher, dy: &FlatBuffer<T>) -> Result<FlatBuffer<T>> {
        softmax_backward(launcher, &self.input, dy, self.block_size)
    }

    pub fn input(&self) -> &FlatBuffer<T> {
        &self.input
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tile_core::Shape;

    fn matrix(rows: usize, cols: usize, data: Vec<f32>) -> FlatBuffer<f32> {
        FlatBuffer::from_vec(data, Shape::matrix(rows, cols)).unwrap()
    }

    #[test]
    fn test_forward_rows_sum_to_one() {
        let x = matrix(2, 3, vec![1.0, 2.0, 3.0, -1.0, 0.0, 5.0]);
        let y = softmax_forward(&Launcher::serial(), &x, None).unwrap();
        let data = y.as_slice();
        assert!((data[0..3].iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!((data[3..6].iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(data[2] > data[1] && data[1] > data[0]);
    }

    #[test]
    fn test_forward_large_values_stay_finite() {
        let x = matrix(1, 3, vec![1000.0, 1001.0, 1002.0]);
        let y = softmax_forward(&Launcher::serial(), &x, None).unwrap();
        assert!(y.as_slice().iter().all(|v| v.is_finite()));
        assert!((y.as_slice().iter().sum::<f32>() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_block_must_cover_row() {
        let x = matrix(1, 5, vec![0.0; 5]);
        assert!(matches!(
            softmax_forward(&Launcher::serial(), &x, Some(4)),
            Err(TileError::InvalidBlockSize { size: 4, .. })
        ));
        assert!(softmax_forward(&Launcher::serial(), &x, Some(16)).is_ok());
    }

    #[test]
    fn test_recompute_matches_forward_definition() {
        let row = Block::row(vec![0.5, 1.5, f32::NEG_INFINITY, f32::NEG_INFINITY]);
        let s = SoftmaxStats::recompute(&row).unwrap();
        assert_eq!(s.max, 1.5);
        assert_eq!(s.exp.as_slice()[2], 0.0);
        assert!((s.denom - (1.0 + (-1.0f32).exp())).abs() < 1e-6);
        assert!((s.out.sum_all() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_backward_uniform_upstream_is_zero() {
        let x = matrix(1, 3, vec![0.2, -0.7, 1.1]);
        let dy = matrix(1, 3, vec![1.0, 1.0, 1.0]);
        let dx = softmax_backward(&Launcher::serial(), &x, &dy, None).unwrap();
        for &v in dx.as_slice() {
            assert!(v.abs() < 1e-6, "expected ~0, got {v}");
        }
    }

    #[test]
    fn test_backward_shape_mismatch() {
        let x = matrix(2, 3, vec![0.0; 6]);
        let dy = matrix(3, 2, vec![0.0; 6]);
        assert!(matches!(
            softmax_backward(&Launcher::serial(), &x, &dy, None),
            Err(TileError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_saved_softmax_pairs_forward_and_backward() {
        let launcher = Launcher::serial();
        let x = matrix(2, 5, (0..10).map(|i| (i as f32 * 0.37).sin()).collect());
        let (y, saved) = SavedSoftmax::forward(&launcher, &x, None).unwrap();
        assert_eq!(saved.input(), &x);

        let dy = matrix(2, 5, (0..10).map(|i| i as f32 * 0.1 - 0.4).collect());
        let dx = saved.backward(&launcher, &dy).unwrap();

        // dx = y * (dy - sum(y * dy)) per row
        for r in 0..2 {
            let ys = &y.as_slice()[r * 5..(r + 1) * 5];
            let ds = &dy.as_slice()[r * 5..(r + 1) * 5];
            let dot: f32 = ys.iter().zip(ds).map(|(a, b)| a * b).sum();
            for c in 0..5 {
                let expected = ys[c] * (ds[c] - dot);
                let got = dx.as_slice()[r * 5 + c];
                assert!((got - expected).abs() < 1e-5, "[{r},{c}] {got} vs {expected}");
            }
        }
    }
}
