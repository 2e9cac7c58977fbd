//! # Request and Response Types
//!
//! Request descriptors are built per call from typed parameters and flattened
//! into form fields (vectors comma-joined, e.g. `"40,40,40"`) or JSON bodies.
//! JSON responses share the [`ApiEnvelope`] convention:
//!
//! ```text
//! { "success": true,  "result": ... }
//! { "success": false, "error": "...", "traceback": "..." }
//! ```

use glam::{DMat3, DVec3};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, VixivError};
use crate::processing::archive::NdArray;

// ============================================================================
// REQUEST PARAMETERS
// ============================================================================

/// Lattice unit cell topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    #[default]
    Fcc,
    Bcc,
    Fluorite,
}

impl CellType {
    pub fn as_str(self) -> &'static str {
        match self {
            CellType::Fcc => "fcc",
            CellType::Bcc => "bcc",
            CellType::Fluorite => "fluorite",
        }
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CellType {
    type Err = VixivError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fcc" => Ok(CellType::Fcc),
            "bcc" => Ok(CellType::Bcc),
            // older servers spelled it this way
            "fluorite" | "flourite" => Ok(CellType::Fluorite),
            other => Err(VixivError::InvalidInput(format!(
                "unknown cell type `{}` (expected fcc, bcc or fluorite)",
                other
            ))),
        }
    }
}

/// Principal axis, used for the clear direction of generated meshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn as_str(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        }
    }
}

impl FromStr for Axis {
    type Err = VixivError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x" => Ok(Axis::X),
            "y" => Ok(Axis::Y),
            "z" => Ok(Axis::Z),
            other => Err(VixivError::InvalidInput(format!("unknown axis `{}`", other))),
        }
    }
}

/// Parameters for voxelizing (packing) a mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct PackOptions {
    /// Unit cell dimensions in mm
    pub cell_size: DVec3,
    /// Minimum offset between the outer surface and the lattice, in mm
    pub min_skin_thickness: f64,
    /// Force direction used to orient the unit cells
    pub force_dir: DVec3,
    /// Compute device requested from the server (see `accelerators`)
    pub device: String,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            cell_size: DVec3::splat(40.0),
            min_skin_thickness: 0.01,
            force_dir: DVec3::Z,
            device: "cpu".to_string(),
        }
    }
}

impl PackOptions {
    pub fn to_fields(&self) -> FormFields {
        let mut fields = FormFields::new();
        fields.push("cell_size", join_vec3(self.cell_size));
        fields.push("min_skin_thickness", self.min_skin_thickness.to_string());
        fields.push("force_dir", join_vec3(self.force_dir));
        fields.push("device", self.device.clone());
        fields
    }
}

/// Parameters for generating a lattice mesh from a packing.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshOptions {
    pub cell_type: CellType,
    pub beam_diameter: f64,
    /// Axis along which the lattice is cleared; omitted when `None`
    pub clear_dir: Option<Axis>,
    /// Allow truncated cells at the boundary
    pub conformal: bool,
}

impl Default for MeshOptions {
    fn default() -> Self {
        Self {
            cell_type: CellType::Fcc,
            beam_diameter: 2.0,
            clear_dir: None,
            conformal: false,
        }
    }
}

impl MeshOptions {
    pub fn to_fields(&self) -> FormFields {
        let mut fields = FormFields::new();
        fields.push("cell_type", self.cell_type.as_str());
        fields.push("beam_diameter", self.beam_diameter.to_string());
        if let Some(axis) = self.clear_dir {
            fields.push("clear_dir", axis.as_str());
        }
        fields.push("conformal", self.conformal.to_string());
        fields
    }
}

/// Parameters for sampling the voxel layout of a mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelSampling {
    pub cell_size: DVec3,
    pub min_skin_thickness: f64,
    /// Sampling resolution along x, y and z
    pub sampling_res: DVec3,
    pub force_dir: DVec3,
}

impl Default for VoxelSampling {
    fn default() -> Self {
        Self {
            cell_size: DVec3::splat(40.0),
            min_skin_thickness: 0.01,
            sampling_res: DVec3::ONE,
            force_dir: DVec3::Z,
        }
    }
}

impl VoxelSampling {
    pub fn to_fields(&self) -> FormFields {
        let mut fields = FormFields::new();
        fields.push("cell_size", join_vec3(self.cell_size));
        fields.push("min_skin_thickness", self.min_skin_thickness.to_string());
        fields.push("sampling_res", join_vec3(self.sampling_res));
        fields.push("force_dir", join_vec3(self.force_dir));
        fields
    }
}

/// JSON body of a `cell-volume` call.
#[derive(Debug, Clone, Serialize)]
pub struct CellVolumeRequest {
    pub cell_type: CellType,
    pub beam_radius: f64,
    pub cell_size: [f64; 3],
}

/// JSON body of a `voxel-centers` call.
#[derive(Debug, Clone, Serialize)]
pub struct VoxelCentersRequest {
    pub cell_centers: Vec<[f64; 3]>,
    pub force_dir: [f64; 3],
    pub rotation_point: [f64; 3],
}

/// JSON body of a `generate-shader` call.
#[derive(Debug, Clone, Serialize)]
pub struct ShaderRequest {
    pub cell_type: CellType,
    pub cell_size: [f64; 3],
    pub beam_diameter: f64,
    pub cell_centers: Vec<[f64; 3]>,
    /// Shade by surface normal instead of smooth shading
    pub view_normals: bool,
    /// Anti-aliasing passes per frame
    pub aa_passes: u32,
    pub angle: f64,
    pub rotation_point: [f64; 3],
    pub force_dir: [f64; 3],
}

impl ShaderRequest {
    pub fn new(cell_type: CellType, cell_size: DVec3, beam_diameter: f64, cell_centers: &[DVec3]) -> Self {
        Self {
            cell_type,
            cell_size: cell_size.to_array(),
            beam_diameter,
            cell_centers: cell_centers.iter().map(|c| c.to_array()).collect(),
            view_normals: false,
            aa_passes: 0,
            angle: 0.0,
            rotation_point: [0.0; 3],
            force_dir: [0.0, 0.0, 1.0],
        }
    }
}

/// Ordered form fields of a multipart or urlencoded request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FormFields(Vec<(String, String)>);

impl FormFields {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn keys(&self) -> Vec<&str> {
        self.0.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Comma-join a 3-vector the way the API expects it: `"40,40,40"`.
pub fn join_vec3(v: DVec3) -> String {
    format!("{},{},{}", v.x, v.y, v.z)
}

// ============================================================================
// RESPONSES
// ============================================================================

/// Common JSON response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub traceback: Option<String>,
    /// Any other top-level fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ApiEnvelope {
    /// Turn a declared `success: false` into [`VixivError::Application`].
    pub fn into_success(self) -> Result<Self> {
        if self.success == Some(false) {
            return Err(VixivError::Application {
                message: self
                    .error
                    .unwrap_or_else(|| "Unknown error occurred".to_string()),
                traceback: self.traceback,
            });
        }
        Ok(self)
    }

    /// Look up `name` inside an object `result`, falling back to the top level.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.result
            .as_ref()
            .and_then(|r| r.get(name))
            .or_else(|| self.extra.get(name))
    }

    /// Like [`field`](Self::field) but missing fields are a decode error.
    pub fn require(&self, name: &str) -> Result<&Value> {
        self.field(name)
            .ok_or_else(|| VixivError::Decode(format!("response has no `{}` field", name)))
    }
}

/// Free-form status / capability report of a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceStatus(pub Map<String, Value>);

impl ServiceStatus {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Decoded `visualization-data` archive.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualizationData {
    pub cell_size: DVec3,
    /// Centers of cells placed wholly inside the solid
    pub cell_centers: Vec<DVec3>,
    pub rotation: DMat3,
    pub rotation_point: DVec3,
    /// Cells that may lie partially or wholly outside the solid
    pub partial_centers: Vec<DVec3>,
}

/// Decoded `mesh-voxels` result.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshVoxels {
    pub location_table: NdArray,
    pub offsets: NdArray,
    pub cell_centers: NdArray,
}

/// Decoded `voxel-centers` result.
#[derive(Debug, Clone, PartialEq)]
pub struct RotatedCenters {
    pub centers: Vec<DVec3>,
    /// Rotation angle in radians
    pub angle: f64,
}
