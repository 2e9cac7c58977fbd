//! Client library for the Vixiv lattice packing and meshing API.
//!
//! All geometry processing happens server-side; this crate builds requests,
//! streams files (inline or through a cloud bucket), and decodes responses
//! into typed results. See [`VixivClient`] for the available operations.

pub mod client;
pub mod common;
pub mod error;
pub mod processing;
pub mod storage;

pub use client::VixivClient;
pub use common::config::{load_config, ClientConfig, CloudCredentials, StorageConfig};
pub use common::messages::{
    Axis, CellType, MeshOptions, MeshVoxels, PackOptions, RotatedCenters, ServiceStatus,
    ShaderRequest, VisualizationData, VoxelSampling,
};
pub use common::routes::{Backend, Operation};
pub use error::{Result, VixivError};
pub use processing::{NdArray, TriangleMesh};
pub use storage::PackingSource;
