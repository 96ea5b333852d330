//! Host-owned flat buffers.
//!
//! A [`FlatBuffer`] is the only storage kernels see. Kernel bodies never index
//! it directly; they go through [`crate::load`] and [`crate::CellWriter`].

use crate::types::{DType, Element, Shape};
use crate::{Result, TileError};

/// Contiguous row-major storage plus its logical shape.
#[derive(Clone, Debug, PartialEq)]
pub struct FlatBuffer<T> {
    data: Vec<T>,
    shape: Shape,
}

impl<T: Element> FlatBuffer<T> {
    /// Wrap existing data. The length must match the shape.
    pub fn from_vec(data: Vec<T>, shape: Shape) -> Result<Self> {
        let expected = shape.numel();
        if data.len() != expected {
            return Err(TileError::InvalidArgument(format!(
                "data length {} does not match shape {} (expected {})",
                data.len(),
                shape,
                expected,
            )));
        }
        Ok(Self { data, shape })
    }

    /// Build from `f32` values, narrowing to `T`.
    pub fn from_f32(data: &[f32], shape: Shape) -> Result<Self> {
        Self::from_vec(data.iter().map(|&v| T::from_f32(v)).collect(), shape)
    }

    pub fn zeros(shape: Shape) -> Self {
        Self {
            data: vec![T::default(); shape.numel()],
            shape,
        }
    }

    /// Values `0, 1, 2, ...` in row-major order.
    pub fn arange(shape: Shape) -> Self {
        let data = (0..shape.numel()).map(|i| T::from_f32(i as f32)).collect();
        Self { data, shape }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    pub fn to_vec_f32(&self) -> Vec<f32> {
        self.data.iter().map(|v| v.to_f32()).collect()
    }

    /// Convert every element to another storage type.
    pub fn cast<U: Element>(&self) -> FlatBuffer<U> {
        FlatBuffer {
            data: self.data.iter().map(|v| U::from_f32(v.to_f32())).collect(),
            shape: self.shape.clone(),
        }
    }

    /// `(rows, cols)` of a rank-2 buffer.
    pub fn matrix_dims(&self) -> Result<(usize, usize)> {
        match self.shape.dims() {
            &[rows, cols] => Ok((rows, cols)),
            dims => Err(TileError::InvalidArgument(format!(
                "expected a 2-D buffer, got shape {:?}",
                dims
            ))),
        }
    }

    /// Rank-2 transpose into a new row-major buffer.
    pub fn transpose(&self) -> Result<Self> {
        let (rows, cols) = self.matrix_dims()?;
        let mut data = Vec::with_capacity(self.data.len());
        for c in 0..cols {
            for r in 0..rows {
                data.push(self.data[r * cols + c]);
            }
        }
        Ok(Self {
            data,
            shape: Shape::matrix(cols, rows),
        })
    }
}
