//! # Client Core
//!
//! [`VixivClient`] exposes one async method per API operation. Each method
//! validates its local input, builds the request descriptor, hands it to the
//! [`Transport`] and decodes the typed result. Routing, headers, bucket
//! staging and status handling all live in the
//! [middleware](super::middleware).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vixiv_client::{ClientConfig, PackOptions, VixivClient};
//!
//! let config = ClientConfig::new("sk-...")
//!     .with_packing_url("https://packing.example.com")
//!     .with_meshing_url("https://meshing.example.com");
//! let client = VixivClient::new(config)?;
//!
//! let packing = client.voxelize(Path::new("part.stl"), &PackOptions::default()).await?;
//! let mesh = client.generate_mesh((&packing).into(), &MeshOptions::default()).await?;
//! mesh.export_stl(Path::new("out/lattice.stl"))?;
//! ```

use glam::DVec3;
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

use crate::client::middleware::{FileRole, Transport};
use crate::common::config::ClientConfig;
use crate::common::messages::{
    CellType, CellVolumeRequest, FormFields, MeshOptions, MeshVoxels, PackOptions,
    RotatedCenters, ServiceStatus, ShaderRequest, VisualizationData, VoxelCentersRequest,
    VoxelSampling,
};
use crate::common::routes::Operation;
use crate::error::{Result, VixivError};
use crate::processing::archive::{read_npz, take_array, NdArray};
use crate::processing::geometry::{partial_centers, validate_stl_path, TriangleMesh};
use crate::storage::staging::{PackingSource, StagedFile};

/// Client for the Vixiv packing and meshing API.
///
/// Immutable after construction. Every method performs one independent
/// request; no state is carried between calls.
pub struct VixivClient {
    transport: Transport,
}

impl VixivClient {
    /// Create a client from a resolved configuration.
    ///
    /// # Errors
    ///
    /// [`VixivError::Configuration`] if the API key is missing or a placeholder.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Ok(Self {
            transport: Transport::new(config)?,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        self.transport.config()
    }

    fn staging_dir(&self) -> Option<&Path> {
        self.config().storage.staging_dir.as_deref()
    }

    /// Voxelize (pack) an STL mesh. Returns the opaque packing blob.
    ///
    /// The blob is what [`visualization_data`](Self::visualization_data) and
    /// [`generate_mesh`](Self::generate_mesh) consume; store it with a `.vox`
    /// suffix.
    pub async fn voxelize(&self, mesh: &Path, options: &PackOptions) -> Result<Vec<u8>> {
        validate_stl_path(mesh)?;
        info!("📤 Voxelizing {}", mesh.display());

        let op = Operation::Voxelize;
        let response = self
            .transport
            .send_with_file(op, options.to_fields(), FileRole::Mesh, mesh)
            .await?;
        self.transport.read_binary(op, response).await
    }

    /// Voxelize `mesh` and write the packing blob to `out`, creating parent
    /// directories as needed.
    pub async fn voxelize_to_file(
        &self,
        mesh: &Path,
        options: &PackOptions,
        out: &Path,
    ) -> Result<PathBuf> {
        let blob = self.voxelize(mesh, options).await?;
        write_creating_dirs(out, &blob)?;
        info!("✅ Saved packing to {}", out.display());
        Ok(out.to_path_buf())
    }

    /// Fetch the cell layout of a packing and derive its partial centers.
    pub async fn visualization_data(&self, packing: PackingSource<'_>) -> Result<VisualizationData> {
        let staged = StagedFile::stage(packing, self.staging_dir())?;

        let op = Operation::VisualizationData;
        let response = self
            .transport
            .send_with_file(op, FormFields::new(), FileRole::Packing, staged.path())
            .await?;
        let bytes = self.transport.read_binary(op, response).await?;

        let mut arrays = read_npz(&bytes)?;
        let cell_size = take_array(&mut arrays, "cell_size")?.to_vec3()?;
        let cell_centers = take_array(&mut arrays, "cell_centers")?.to_points()?;
        let rotation = take_array(&mut arrays, "rotation")?.to_mat3()?;
        let rotation_point = take_array(&mut arrays, "rotation_point")?.to_vec3()?;
        let candidates = take_array(&mut arrays, "candidate_centers")?.to_points()?;

        let partial = partial_centers(&candidates, &cell_centers, rotation, rotation_point);
        info!(
            "✅ {} placed cells, {} partial cells",
            cell_centers.len(),
            partial.len()
        );

        Ok(VisualizationData {
            cell_size,
            cell_centers,
            rotation,
            rotation_point,
            partial_centers: partial,
        })
    }

    /// Generate the lattice mesh of a packing.
    pub async fn generate_mesh(
        &self,
        packing: PackingSource<'_>,
        options: &MeshOptions,
    ) -> Result<TriangleMesh> {
        let staged = StagedFile::stage(packing, self.staging_dir())?;
        info!(
            "📤 Generating {} lattice (beam {} mm)",
            options.cell_type, options.beam_diameter
        );

        let op = Operation::GenerateMesh;
        let response = self
            .transport
            .send_with_file(op, options.to_fields(), FileRole::Packing, staged.path())
            .await?;
        let bytes = self.transport.read_binary(op, response).await?;

        let mut arrays = read_npz(&bytes)?;
        let vertices = take_array(&mut arrays, "vertices")?.to_points()?;
        let faces = take_array(&mut arrays, "triangles")?.to_triangles()?;
        let mesh = TriangleMesh::new(vertices, faces)?;
        info!(
            "✅ Lattice mesh with {} vertices, {} triangles",
            mesh.vertices().len(),
            mesh.faces().len()
        );
        Ok(mesh)
    }

    /// Volume of a single unit cell.
    pub async fn cell_volume(
        &self,
        cell_type: CellType,
        beam_radius: f64,
        cell_size: DVec3,
    ) -> Result<f64> {
        let op = Operation::CellVolume;
        let request = CellVolumeRequest {
            cell_type,
            beam_radius,
            cell_size: cell_size.to_array(),
        };
        let response = self.transport.send_json(op, &request).await?;
        let envelope = self.transport.read_envelope(op, response).await?;

        let volume = envelope
            .result
            .as_ref()
            .and_then(|r| r.as_f64())
            .or_else(|| envelope.field("volume").and_then(|v| v.as_f64()))
            .ok_or_else(|| VixivError::Decode("cell-volume response has no volume".to_string()))?;
        if !volume.is_finite() || volume < 0.0 {
            return Err(VixivError::Decode(format!(
                "cell-volume returned invalid volume {}",
                volume
            )));
        }
        Ok(volume)
    }

    /// Status of the packing backend.
    pub async fn status(&self) -> Result<ServiceStatus> {
        self.service_report(Operation::Status).await
    }

    /// Compute accelerators available on the meshing backend.
    pub async fn accelerators(&self) -> Result<ServiceStatus> {
        self.service_report(Operation::Accelerators).await
    }

    async fn service_report(&self, op: Operation) -> Result<ServiceStatus> {
        let response = self.transport.send_empty(op).await?;
        let map = self.transport.read_object(op, response).await?;
        Ok(ServiceStatus(map))
    }

    /// Sample the voxel layout of an STL mesh.
    pub async fn mesh_voxels(&self, mesh: &Path, sampling: &VoxelSampling) -> Result<MeshVoxels> {
        validate_stl_path(mesh)?;

        let op = Operation::MeshVoxels;
        let response = self
            .transport
            .send_with_file(op, sampling.to_fields(), FileRole::Mesh, mesh)
            .await?;
        let envelope = self.transport.read_envelope(op, response).await?;

        Ok(MeshVoxels {
            location_table: NdArray::from_json(envelope.require("location_table")?)?,
            offsets: NdArray::from_json(envelope.require("offsets")?)?,
            cell_centers: NdArray::from_json(envelope.require("cell_centers")?)?,
        })
    }

    /// Rotate cell centers about `rotation_point` so `force_dir` is aligned
    /// with the lattice; the server picks the angle.
    pub async fn voxel_centers(
        &self,
        cell_centers: &[DVec3],
        force_dir: DVec3,
        rotation_point: DVec3,
    ) -> Result<RotatedCenters> {
        let op = Operation::VoxelCenters;
        let request = VoxelCentersRequest {
            cell_centers: cell_centers.iter().map(|c| c.to_array()).collect(),
            force_dir: force_dir.to_array(),
            rotation_point: rotation_point.to_array(),
        };
        let response = self.transport.send_json(op, &request).await?;
        let envelope = self.transport.read_envelope(op, response).await?;

        let centers = NdArray::from_json(envelope.require("centers")?)?.to_points()?;
        let angle = envelope
            .require("angle")?
            .as_f64()
            .ok_or_else(|| VixivError::Decode("angle is not a number".to_string()))?;
        Ok(RotatedCenters { centers, angle })
    }

    /// Generate an OpenGL shader visualizing the cell arrangement and write
    /// it to `out`, creating parent directories as needed.
    pub async fn generate_shader(&self, request: &ShaderRequest, out: &Path) -> Result<PathBuf> {
        let op = Operation::GenerateShader;
        let response = self.transport.send_json(op, request).await?;
        let envelope = self.transport.read_envelope(op, response).await?;

        let shader = envelope
            .field("shader_content")
            .or(envelope.result.as_ref())
            .and_then(|v| v.as_str())
            .ok_or_else(|| VixivError::Decode("response has no shader content".to_string()))?;
        write_creating_dirs(out, shader.as_bytes())?;
        info!("✅ Shader written to {}", out.display());
        Ok(out.to_path_buf())
    }

    /// Centre of mass of an STL mesh, computed locally.
    pub fn mesh_center(&self, mesh: &Path) -> Result<DVec3> {
        mesh_center(mesh)
    }
}

/// Centre of mass of an STL mesh. No network access.
pub fn mesh_center(mesh: &Path) -> Result<DVec3> {
    TriangleMesh::load_stl(mesh)?.center_of_mass()
}

fn write_creating_dirs(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, data)?;
    Ok(())
}
