//! # Endpoint Routing
//!
//! Every logical operation lives on exactly one of two backends. The mapping
//! is a constant table; [`route`] checks that an operation appears exactly
//! once so a duplicated or missing entry surfaces as a [`VixivError::Routing`]
//! instead of a silent misroute.

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, VixivError};

/// Versioned path prefix shared by both backends.
pub const API_PREFIX: &str = "v1";

/// The two logical backends of the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Voxelization / packing service
    Packing,
    /// Lattice meshing service
    Meshing,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Packing => write!(f, "packing"),
            Backend::Meshing => write!(f, "meshing"),
        }
    }
}

/// A single remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Voxelize,
    VisualizationData,
    MeshVoxels,
    VoxelCenters,
    Status,
    GenerateMesh,
    CellVolume,
    GenerateShader,
    Accelerators,
}

/// HTTP method used by an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

const ROUTES: &[(Operation, Backend)] = &[
    (Operation::Voxelize, Backend::Packing),
    (Operation::VisualizationData, Backend::Packing),
    (Operation::MeshVoxels, Backend::Packing),
    (Operation::VoxelCenters, Backend::Packing),
    (Operation::Status, Backend::Packing),
    (Operation::GenerateMesh, Backend::Meshing),
    (Operation::CellVolume, Backend::Meshing),
    (Operation::GenerateShader, Backend::Meshing),
    (Operation::Accelerators, Backend::Meshing),
];

impl Operation {
    pub const ALL: [Operation; 9] = [
        Operation::Voxelize,
        Operation::VisualizationData,
        Operation::MeshVoxels,
        Operation::VoxelCenters,
        Operation::Status,
        Operation::GenerateMesh,
        Operation::CellVolume,
        Operation::GenerateShader,
        Operation::Accelerators,
    ];

    /// Endpoint name as it appears in the URL path.
    pub fn name(self) -> &'static str {
        match self {
            Operation::Voxelize => "voxelize",
            Operation::VisualizationData => "visualization-data",
            Operation::MeshVoxels => "mesh-voxels",
            Operation::VoxelCenters => "voxel-centers",
            Operation::Status => "status",
            Operation::GenerateMesh => "generate-mesh",
            Operation::CellVolume => "cell-volume",
            Operation::GenerateShader => "generate-shader",
            Operation::Accelerators => "accelerators",
        }
    }

    pub fn method(self) -> Method {
        match self {
            Operation::Status | Operation::Accelerators => Method::Get,
            _ => Method::Post,
        }
    }

    /// Path relative to the backend base URL, e.g. `v1/voxelize`.
    pub fn path(self) -> String {
        format!("{}/{}", API_PREFIX, self.name())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = VixivError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().replace('_', "-").to_ascii_lowercase();
        Operation::ALL
            .into_iter()
            .find(|op| op.name() == wanted)
            .ok_or_else(|| VixivError::Routing(format!("unknown operation `{}`", s)))
    }
}

/// Look up the backend serving `op`.
pub fn route(op: Operation) -> Result<Backend> {
    lookup(ROUTES, op)
}

fn lookup(table: &[(Operation, Backend)], op: Operation) -> Result<Backend> {
    let mut matches = table.iter().filter(|(candidate, _)| *candidate == op);
    match (matches.next(), matches.next()) {
        (Some((_, backend)), None) => Ok(*backend),
        (None, _) => Err(VixivError::Routing(format!(
            "operation `{}` is not served by any backend",
            op
        ))),
        (Some(_), Some(_)) => Err(VixivError::Routing(format!(
            "operation `{}` is mapped to more than one backend",
            op
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_operation_routes_once() {
        for op in Operation::ALL {
            assert!(route(op).is_ok(), "{} has no unique route", op);
        }
    }

    #[test]
    fn test_known_routes() {
        assert_eq!(route(Operation::Voxelize).unwrap(), Backend::Packing);
        assert_eq!(route(Operation::GenerateMesh).unwrap(), Backend::Meshing);
        assert_eq!(route(Operation::CellVolume).unwrap(), Backend::Meshing);
        assert_eq!(route(Operation::Status).unwrap(), Backend::Packing);
    }

    #[test]
    fn test_missing_and_ambiguous_entries() {
        let missing = [(Operation::Status, Backend::Packing)];
        assert!(matches!(
            lookup(&missing, Operation::Voxelize),
            Err(VixivError::Routing(_))
        ));

        let doubled = [
            (Operation::Status, Backend::Packing),
            (Operation::Status, Backend::Meshing),
        ];
        assert!(matches!(
            lookup(&doubled, Operation::Status),
            Err(VixivError::Routing(_))
        ));
    }

    #[test]
    fn test_parse_operation_names() {
        assert_eq!(
            "cell_volume".parse::<Operation>().unwrap(),
            Operation::CellVolume
        );
        assert_eq!(
            "Generate-Mesh".parse::<Operation>().unwrap(),
            Operation::GenerateMesh
        );
        assert!(matches!(
            "teleport".parse::<Operation>(),
            Err(VixivError::Routing(_))
        ));
    }

    #[test]
    fn test_paths_and_methods() {
        assert_eq!(Operation::Voxelize.path(), "v1/voxelize");
        assert_eq!(Operation::Status.method(), Method::Get);
        assert_eq!(Operation::GenerateShader.method(), Method::Post);
    }
}
