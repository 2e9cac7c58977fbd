//! # Response Processing
//!
//! Decoding of binary API responses and the local geometry that builds on
//! them.

pub mod archive;
pub mod geometry;

// Re-export main types for convenience
pub use archive::{read_npz, NdArray};
pub use geometry::{dedup_exact, partial_centers, rotate_about, TriangleMesh};
