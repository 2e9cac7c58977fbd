//! # Geometry Helpers
//!
//! Local computations that need no server round-trip:
//!
//! - rotating candidate cell centers back into the part frame and merging
//!   them with the placed centers ([`partial_centers`]),
//! - exact de-duplication of 3-vectors ([`dedup_exact`]),
//! - a minimal indexed triangle mesh with STL read/write and centre of mass.

use glam::{DMat3, DVec3};
use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::{Result, VixivError};

/// Rotate `points` about `pivot` by `rotation`.
///
/// For row vectors this is `(p - pivot) · Rᵀ + pivot`, i.e. `R (p - pivot) + pivot`.
pub fn rotate_about(points: &[DVec3], rotation: DMat3, pivot: DVec3) -> Vec<DVec3> {
    points
        .iter()
        .map(|&p| rotation * (p - pivot) + pivot)
        .collect()
}

/// Rotate `candidates`, append `placed` and drop exact duplicates.
///
/// The result is the set of cells that may lie partially or wholly outside
/// the solid, sorted lexicographically.
pub fn partial_centers(
    candidates: &[DVec3],
    placed: &[DVec3],
    rotation: DMat3,
    pivot: DVec3,
) -> Vec<DVec3> {
    let mut all = rotate_about(candidates, rotation, pivot);
    all.extend_from_slice(placed);
    dedup_exact(all)
}

fn lexicographic(a: &DVec3, b: &DVec3) -> Ordering {
    a.x.total_cmp(&b.x)
        .then(a.y.total_cmp(&b.y))
        .then(a.z.total_cmp(&b.z))
}

/// Exact-value uniqueness over 3-vectors. Idempotent.
///
/// `-0.0` is folded into `0.0` first so both sort together.
pub fn dedup_exact(points: Vec<DVec3>) -> Vec<DVec3> {
    let mut points: Vec<DVec3> = points.into_iter().map(|p| p + DVec3::ZERO).collect();
    points.sort_by(lexicographic);
    points.dedup_by(|a, b| a == b);
    points
}

/// Check that `path` exists and carries an `.stl` extension (any case).
pub fn validate_stl_path(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(VixivError::FileNotFound(path.to_path_buf()));
    }
    let is_stl = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("stl"));
    if !is_stl {
        return Err(VixivError::UnsupportedFormat {
            path: path.to_path_buf(),
            expected: "stl",
        });
    }
    Ok(())
}

/// Indexed triangle mesh.
///
/// Every face index is below `vertices.len()`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TriangleMesh {
    vertices: Vec<DVec3>,
    faces: Vec<[u32; 3]>,
}

impl TriangleMesh {
    /// Build a mesh, rejecting faces that reference missing vertices.
    pub fn new(vertices: Vec<DVec3>, faces: Vec<[u32; 3]>) -> Result<Self> {
        let count = vertices.len();
        if let Some(face) = faces
            .iter()
            .find(|f| f.iter().any(|&i| i as usize >= count))
        {
            return Err(VixivError::Decode(format!(
                "face {:?} references a vertex beyond {}",
                face, count
            )));
        }
        Ok(Self { vertices, faces })
    }

    pub fn vertices(&self) -> &[DVec3] {
        &self.vertices
    }

    pub fn faces(&self) -> &[[u32; 3]] {
        &self.faces
    }

    /// Read an ASCII or binary STL file.
    pub fn load_stl(path: &Path) -> Result<Self> {
        validate_stl_path(path)?;
        let mut reader = BufReader::new(File::open(path)?);
        let mesh = stl_io::read_stl(&mut reader)?;
        let vertices = mesh
            .vertices
            .iter()
            .map(|v| DVec3::new(v.0[0] as f64, v.0[1] as f64, v.0[2] as f64))
            .collect();
        let faces = mesh
            .faces
            .iter()
            .map(|f| {
                [
                    f.vertices[0] as u32,
                    f.vertices[1] as u32,
                    f.vertices[2] as u32,
                ]
            })
            .collect();
        Self::new(vertices, faces)
    }

    /// Write the mesh as binary STL, creating parent directories as needed.
    pub fn export_stl(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let triangles: Vec<stl_io::Triangle> = self
            .faces
            .iter()
            .map(|f| {
                let [a, b, c] = self.corners(f);
                let normal = (b - a).cross(c - a).normalize_or_zero();
                stl_io::Triangle {
                    normal: stl_io::Normal::new(to_f32(normal)),
                    vertices: [
                        stl_io::Vertex::new(to_f32(a)),
                        stl_io::Vertex::new(to_f32(b)),
                        stl_io::Vertex::new(to_f32(c)),
                    ],
                }
            })
            .collect();
        let mut writer = BufWriter::new(File::create(path)?);
        stl_io::write_stl(&mut writer, triangles.iter())?;
        Ok(())
    }

    fn corners(&self, face: &[u32; 3]) -> [DVec3; 3] {
        face.map(|i| self.vertices[i as usize])
    }

    /// Signed enclosed volume (positive for outward-facing winding).
    pub fn volume(&self) -> f64 {
        self.faces
            .iter()
            .map(|f| {
                let [a, b, c] = self.corners(f);
                a.dot(b.cross(c)) / 6.0
            })
            .sum()
    }

    /// Volume-weighted centre of mass.
    ///
    /// Falls back to the area-weighted surface centroid for open or flat
    /// meshes whose enclosed volume vanishes.
    pub fn center_of_mass(&self) -> Result<DVec3> {
        if self.faces.is_empty() {
            return Err(VixivError::InvalidInput("mesh has no faces".to_string()));
        }

        let mut volume = 0.0;
        let mut moment = DVec3::ZERO;
        let mut area = 0.0;
        let mut surface = DVec3::ZERO;
        for f in &self.faces {
            let [a, b, c] = self.corners(f);
            let v = a.dot(b.cross(c)) / 6.0;
            volume += v;
            moment += (a + b + c) * (v / 4.0);

            let t = (b - a).cross(c - a).length() / 2.0;
            area += t;
            surface += (a + b + c) * (t / 3.0);
        }

        let scale = self.bounding_extent().max(f64::MIN_POSITIVE);
        if volume.abs() > 1e-12 * scale.powi(3) {
            Ok(moment / volume)
        } else if area > 0.0 {
            Ok(surface / area)
        } else {
            Err(VixivError::InvalidInput(
                "mesh is degenerate (zero area)".to_string(),
            ))
        }
    }

    fn bounding_extent(&self) -> f64 {
        let (min, max) = self.vertices.iter().fold(
            (DVec3::splat(f64::INFINITY), DVec3::splat(f64::NEG_INFINITY)),
            |(lo, hi), &v| (lo.min(v), hi.max(v)),
        );
        (max - min).max_element()
    }
}

fn to_f32(v: DVec3) -> [f32; 3] {
    [v.x as f32, v.y as f32, v.z as f32]
}
