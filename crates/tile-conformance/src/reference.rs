//! Unblocked reference kernels over row-major `f32` slices.
//!
//! Straight loops with no tiling, masking or launcher, used only to check
//! the blocked kernels.

use tile_core::{Result, TileError};

fn check_len(data: &[f32], expected: usize) -> Result<()> {
    if data.len() != expected {
        return Err(TileError::ShapeMismatch {
            expected: vec![expected],
            got: vec![data.len()],
        });
    }
    Ok(())
}

pub fn add(a: &[f32], b: &[f32]) -> Result<Vec<f32>> {
    check_len(b, a.len())?;
    Ok(a.iter().zip(b).map(|(x, y)| x + y).collect())
}

/// Softmax over each length-`cols` row.
pub fn softmax(x: &[f32], cols: usize) -> Result<Vec<f32>> {
    let mut data = x.to_vec();
    if cols == 0 {
        return Ok(data);
    }
    if x.len() % cols != 0 {
        return Err(TileError::InvalidArgument(format!(
            "length {} is not a multiple of row length {cols}",
            x.len()
        )));
    }
    for row in data.chunks_mut(cols) {
        let max_val = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut sum_exp = 0.0f32;
        for v in row.iter_mut() {
            *v = (*v - max_val).exp();
            sum_exp += *v;
        }
        for v in row.iter_mut() {
            *v /= sum_exp;
        }
    }
    Ok(data)
}

/// Softmax backward from the forward output `s`:
///
/// dx_i = s_i * (dy_i - sum(dy * s))
pub fn softmax_vjp(dy: &[f32], s: &[f32], cols: usize) -> Result<Vec<f32>> {
    check_len(dy, s.len())?;
    if cols == 0 {
        return Ok(Vec::new());
    }
    let mut result = vec![0.0f32; s.len()];
    for ((out, s), dy) in result
        .chunks_mut(cols)
        .zip(s.chunks(cols))
        .zip(dy.chunks(cols))
    {
        let dot: f32 = dy.iter().zip(s).map(|(d, s)| d * s).sum();
        for ((o, &si), &di) in out.iter_mut().zip(s).zip(dy) {
            *o = si * (di - dot);
        }
    }
    Ok(result)
}

/// Triple-loop `a (m × k) @ b (k × n)`.
pub fn matmul(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>> {
    check_len(a, m * k)?;
    check_len(b, k * n)?;
    let mut data = vec![0.0f32; m * n];
    for i in 0..m {
        for j in 0..n {
            let mut sum = 0.0f32;
            for p in 0..k {
                sum += a[i * k + p] * b[p * n + j];
            }
            data[i * n + j] = sum;
        }
    }
    Ok(data)
}
