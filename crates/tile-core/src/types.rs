//! Core type definitions: DType, Element, Shape.

use half::{bf16, f16};
use serde::Serialize;
use smallvec::SmallVec;

/// Supported storage types for buffer elements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum DType {
    F32,
    F16,
    BF16,
}

impl DType {
    /// Size in bytes of a single element.
    pub fn size_bytes(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 | DType::BF16 => 2,
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DType::F32 => write!(f, "f32"),
            DType::F16 => write!(f, "f16"),
            DType::BF16 => write!(f, "bf16"),
        }
    }
}

/// A storable scalar. Lane arithmetic always happens in `f32`; elements are
/// widened on load and narrowed on store.
pub trait Element: Copy + Default + Send + Sync + std::fmt::Debug + 'static {
    const DTYPE: DType;

    fn to_f32(self) -> f32;

    fn from_f32(value: f32) -> Self;
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        value
    }
}

impl Element for f16 {
    const DTYPE: DType = DType::F16;

    #[inline]
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        f16::from_f32(value)
    }
}

impl Element for bf16 {
    const DTYPE: DType = DType::BF16;

    #[inline]
    fn to_f32(self) -> f32 {
        bf16::to_f32(self)
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        bf16::from_f32(value)
    }
}

/// Buffer shape (dimensions), outermost first.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Shape(pub SmallVec<[usize; 4]>);

impl Shape {
    pub fn new(dims: &[usize]) -> Self {
        Self(SmallVec::from_slice(dims))
    }

    /// Rank-1 shape of length `n`.
    pub fn vector(n: usize) -> Self {
        Self::new(&[n])
    }

    /// Rank-2 row-major shape.
    pub fn matrix(rows: usize, cols: usize) -> Self {
        Self::new(&[rows, cols])
    }

    /// Number of dimensions (rank).
    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.0.iter().product()
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Get dimension at axis (supports negative indexing).
    pub fn dim(&self, axis: i32) -> Option<usize> {
        let ndim = self.0.len() as i32;
        let idx = if axis < 0 { ndim + axis } else { axis };
        if idx >= 0 && idx < ndim {
            Some(self.0[idx as usize])
        } else {
            None
        }
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_numel() {
        assert_eq!(Shape::new(&[2, 3, 4]).numel(), 24);
        assert_eq!(Shape::new(&[]).numel(), 1);
        assert_eq!(Shape::matrix(0, 5).numel(), 0);
    }

    #[test]
    fn test_shape_dim_negative_index() {
        let s = Shape::new(&[2, 3, 4]);
        assert_eq!(s.dim(0), Some(2));
        assert_eq!(s.dim(-1), Some(4));
        assert_eq!(s.dim(-3), Some(2));
        assert_eq!(s.dim(3), None);
    }

    #[test]
    fn test_shape_display() {
        assert_eq!(Shape::matrix(32, 64).to_string(), "[32, 64]");
    }

    #[test]
    fn test_element_roundtrip_small_integers() {
        for v in [0.0f32, 1.0, -2.0, 14.0, 2048.0] {
            assert_eq!(<f16 as Element>::from_f32(v).to_f32(), v);
            assert_eq!(<bf16 as Element>::from_f32(v).to_f32(), v);
        }
        assert_eq!(f16::DTYPE.size_bytes(), 2);
        assert_eq!(<f32 as Element>::DTYPE, DType::F32);
    }
}
