//! Flat buffers, block addressing and the grid launcher for tiled CPU kernels.
//!
//! `tile-core` provides the primitives every kernel body in the workspace is
//! written against:
//!
//! - [`FlatBuffer`]: contiguous, row-major element storage plus a [`Shape`]
//! - [`BlockRange`], [`TileDesc`], [`outer_sum`]: offset arithmetic for one
//!   grid cell's tile
//! - [`Mask`]: in-bounds predicate paired with every block-sized access
//! - [`Block`]: the `f32` lane values of a tile, with axis reductions
//! - [`load`] / [`CellWriter::store`]: masked buffer access
//! - [`Launcher`]: runs one kernel instance per [`GridCell`], serially or on
//!   a rayon pool

pub mod addressing;
pub mod block;
pub mod buffer;
pub mod launch;
pub mod mask;
pub mod memory;
pub mod types;

pub use addressing::{BlockRange, Offsets, TileDesc, cdiv, next_power_of_two, outer_sum};
pub use block::Block;
pub use buffer::FlatBuffer;
pub use launch::{
    ExecMode, Grid, GridCell, LaunchConfig, LaunchReport, Launcher, default_launcher,
};
pub use mask::Mask;
pub use memory::{CellWriter, load};
pub use types::{DType, Element, Shape};

pub type Result<T> = std::result::Result<T, TileError>;

#[derive(thiserror::Error, Debug)]
pub enum TileError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    #[error("Invalid block size {size} for axis {axis}: {reason}")]
    InvalidBlockSize {
        axis: &'static str,
        size: usize,
        reason: &'static str,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Two grid cells wrote output offset {offset}")]
    OverlappingWrite { offset: usize },

    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}
