//! Block-parallel kernels on the `tile-core` launcher.
//!
//! Each module pairs a kernel body (what one grid cell does) with a host
//! function that validates shapes, sizes the grid and launches it:
//!
//! - [`vector_add`]: 1-D grid, one masked block per cell
//! - [`softmax_forward`] / [`softmax_backward`]: one row per cell, row
//!   reductions, backward recomputes the forward intermediates
//! - [`matmul`]: 2-D grid of output tiles, K-chunk accumulation loop
//! - [`matmul_naive`]: one output element per cell

pub mod matmul;
pub mod naive_matmul;
pub mod softmax;
pub mod vector_add;

pub use matmul::{MatmulBlocks, matmul};
pub use naive_matmul::{matmul_naive, matmul_naive_transposed};
pub use softmax::{SavedSoftmax, SoftmaxStats, softmax_backward, softmax_forward};
pub use vector_add::vector_add;
