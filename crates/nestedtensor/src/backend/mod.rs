//! Backend abstraction for dense kernels.
//!
//! # Backends
//!
//! - `GenericBackend`: loop-based gather and packing of strided views
//!   (the `PackBackend` trait)
//!
//! # faer Integration
//!
//! The `faer_interop` module maps row-major tensor data onto faer's
//! column-major matrix views for matrix products.

mod faer_interop;
mod generic;
mod pack;

pub use faer_interop::{gemm_row_major, matrix_view};
pub use generic::GenericBackend;
pub use pack::PackBackend;
