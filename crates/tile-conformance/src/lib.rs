//! Conformance testing infrastructure.
//!
//! Blocked kernels are compared against the unblocked loops in [`reference`],
//! using deterministic seeded data and configurable tolerances.

pub mod reference;

use serde::Serialize;

/// Absolute plus relative tolerance: `|a - b| <= atol + rtol * |b|`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Tolerance {
    pub atol: f32,
    pub rtol: f32,
}

impl Tolerance {
    pub const fn new(atol: f32, rtol: f32) -> Self {
        Self { atol, rtol }
    }

    /// Tolerance for `f32` storage.
    pub const F32: Self = Self::new(1e-5, 1e-5);
    /// Tolerance for half-precision storage.
    pub const HALF: Self = Self::new(1e-2, 1e-2);

    pub fn accepts(&self, actual: f32, expected: f32) -> bool {
        (actual - expected).abs() <= self.atol + self.rtol * expected.abs()
    }
}

/// Assert two f32 slices are element-wise close.
pub fn assert_allclose(a: &[f32], b: &[f32], atol: f32, rtol: f32) {
    assert_eq!(
        a.len(),
        b.len(),
        "length mismatch: actual={} expected={}",
        a.len(),
        b.len()
    );
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        let diff = (x - y).abs();
        let tol = atol + rtol * y.abs();
        assert!(
            diff <= tol,
            "mismatch at [{i}]: actual={x} expected={y} diff={diff} tol={tol}"
        );
    }
}

/// Non-panicking form of [`assert_allclose`].
pub fn allclose(a: &[f32], b: &[f32], tol: Tolerance) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(&x, &y)| tol.accepts(x, y))
}

/// Largest elementwise `|a - b|`; infinite when the lengths differ.
pub fn max_abs_diff(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f32::max)
}

fn lcg(seed: u64) -> impl FnMut() -> u64 {
    let mut state = seed;
    move || {
        // Numerical Recipes parameters
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        state
    }
}

/// Deterministic f32 data in roughly [-1, 1] from a simple LCG.
///
/// Not cryptographically random, just reproducible across platforms.
pub fn gen_data(n: usize, seed: u64) -> Vec<f32> {
    let mut next = lcg(seed);
    (0..n)
        .map(|_| ((next() >> 33) as f64 / (1u64 << 31) as f64 * 2.0 - 1.0) as f32)
        .collect()
}

/// Deterministic f32 data in [0, 1).
pub fn gen_uniform(n: usize, seed: u64) -> Vec<f32> {
    let mut next = lcg(seed);
    // 24 bits fit the f32 mantissa exactly, so 1.0 is never produced.
    (0..n)
        .map(|_| (next() >> 40) as f32 / (1u64 << 24) as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allclose_exact() {
        assert_allclose(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0], 1e-6, 1e-6);
    }

    #[test]
    fn test_allclose_within_tolerance() {
        assert_allclose(&[1.0001], &[1.0], 1e-3, 1e-3);
        assert!(allclose(&[1.0001], &[1.0], Tolerance::new(1e-3, 1e-3)));
    }

    #[test]
    #[should_panic(expected = "mismatch")]
    fn test_allclose_fails() {
        assert_allclose(&[1.0], &[2.0], 1e-6, 1e-6);
    }

    #[test]
    #[should_panic(expected = "length mismatch")]
    fn test_allclose_length_mismatch() {
        assert_allclose(&[1.0, 2.0], &[1.0], 1e-6, 1e-6);
    }

    #[test]
    fn test_max_abs_diff() {
        assert_eq!(max_abs_diff(&[1.0, 2.0, 3.0], &[1.0, 2.5, 2.0]), 1.0);
        assert_eq!(max_abs_diff(&[], &[]), 0.0);
        assert!(max_abs_diff(&[1.0], &[]).is_infinite());
    }

    #[test]
    fn test_gen_data_deterministic() {
        assert_eq!(gen_data(100, 42), gen_data(100, 42));
        assert_ne!(gen_data(100, 42), gen_data(100, 43));
    }

    #[test]
    fn test_gen_ranges() {
        for &x in &gen_data(10000, 1) {
            assert!((-1.0..=1.0).contains(&x), "value {x} out of range");
        }
        for &x in &gen_uniform(10000, 1) {
            assert!((0.0..1.0).contains(&x), "value {x} out of range");
        }
    }
}
