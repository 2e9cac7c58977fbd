//! # Vixiv Command Line
//!
//! Thin wrapper over [`VixivClient`] exposing every API operation as a
//! subcommand.
//!
//! ## Usage
//!
//! ```bash
//! vixiv --config config/client.toml status
//! vixiv --config config/client.toml voxelize part.stl --out part.vox
//! vixiv --config config/client.toml mesh part.vox --out lattice.stl --cell-type bcc
//! vixiv center part.stl
//! ```
//!
//! The API key is taken from `--api-key`, then the config file, then the
//! `VIXIV_API_KEY` environment variable.

use anyhow::Context;
use clap::{Parser, Subcommand};
use env_logger::Builder;
use glam::DVec3;
use log::{info, LevelFilter};
use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};

use vixiv_client::client::mesh_center;
use vixiv_client::{
    load_config, Axis, CellType, ClientConfig, MeshOptions, PackOptions, PackingSource,
    ShaderRequest, VixivClient, VoxelSampling,
};

/// Command-line arguments for the vixiv binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the client configuration file (TOML format)
    ///
    /// Example: config/client.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// API key (overrides config and environment)
    #[arg(long, global = true)]
    api_key: Option<String>,

    #[arg(long, global = true)]
    packing_url: Option<String>,

    #[arg(long, global = true)]
    meshing_url: Option<String>,

    #[arg(long, global = true)]
    user_id: Option<String>,

    /// Always send files inline, never through the bucket
    #[arg(long, global = true)]
    no_bucket: bool,

    /// Debug logging and request echo
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Status of the packing backend
    Status,
    /// Compute accelerators of the meshing backend
    Accelerators,
    /// Pack an STL mesh with unit cells
    Voxelize {
        mesh: PathBuf,
        /// Where to write the packing blob
        #[arg(short, long, default_value = "packing.vox")]
        out: PathBuf,
        /// Unit cell size in mm, as x,y,z
        #[arg(long, default_value = "40,40,40", value_parser = parse_vec3)]
        cell_size: DVec3,
        #[arg(long, default_value_t = 0.01)]
        min_skin_thickness: f64,
        #[arg(long, default_value = "0,0,1", value_parser = parse_vec3)]
        force_dir: DVec3,
        #[arg(long, default_value = "cpu")]
        device: String,
    },
    /// Print the cell layout of a packing as JSON
    Visualize { packing: PathBuf },
    /// Generate the lattice mesh of a packing
    Mesh {
        packing: PathBuf,
        #[arg(short, long, default_value = "lattice.stl")]
        out: PathBuf,
        #[arg(long, default_value = "fcc")]
        cell_type: CellType,
        #[arg(long, default_value_t = 2.0)]
        beam_diameter: f64,
        #[arg(long)]
        clear_dir: Option<Axis>,
        #[arg(long)]
        conformal: bool,
    },
    /// Volume of a single unit cell
    Volume {
        #[arg(long, default_value = "fcc")]
        cell_type: CellType,
        #[arg(long)]
        beam_radius: f64,
        #[arg(long, default_value = "40,40,40", value_parser = parse_vec3)]
        cell_size: DVec3,
    },
    /// Centre of mass of an STL mesh (local, no API key needed)
    Center { mesh: PathBuf },
    /// Sample the voxel layout of an STL mesh
    MeshVoxels {
        mesh: PathBuf,
        #[arg(long, default_value = "40,40,40", value_parser = parse_vec3)]
        cell_size: DVec3,
        #[arg(long, default_value_t = 0.01)]
        min_skin_thickness: f64,
        #[arg(long, default_value = "1,1,1", value_parser = parse_vec3)]
        sampling_res: DVec3,
        #[arg(long, default_value = "0,0,1", value_parser = parse_vec3)]
        force_dir: DVec3,
    },
    /// Generate a shader previewing the cells of a packing
    Shader {
        packing: PathBuf,
        #[arg(short, long, default_value = "lattice.frag")]
        out: PathBuf,
        #[arg(long, default_value = "fcc")]
        cell_type: CellType,
        #[arg(long, default_value_t = 2.0)]
        beam_diameter: f64,
        #[arg(long)]
        view_normals: bool,
    },
}

fn parse_vec3(s: &str) -> Result<DVec3, String> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("`{}`: {}", s, e))?;
    match parts.as_slice() {
        [x, y, z] => Ok(DVec3::new(*x, *y, *z)),
        _ => Err(format!("`{}`: expected three comma-separated numbers", s)),
    }
}

/// Initialize the logging system with timestamp, level, and message formatting.
///
/// Format: `[HH:MM:SS] [LEVEL] message`
fn init_logger(verbose: bool) {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .init();
}

fn resolve_config(args: &Args) -> anyhow::Result<ClientConfig> {
    let mut config: ClientConfig = match &args.config {
        Some(path) => load_config(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ClientConfig::default(),
    };

    if let Some(key) = &args.api_key {
        config.api_key = Some(key.clone());
    }
    if let Some(url) = &args.packing_url {
        config.packing_url = Some(url.clone());
    }
    if let Some(url) = &args.meshing_url {
        config.meshing_url = Some(url.clone());
    }
    if let Some(id) = &args.user_id {
        config.user_id = id.clone();
    }
    if args.no_bucket {
        config.storage.use_bucket = false;
    }
    if args.verbose {
        config.debug = true;
    }

    Ok(config.with_env_api_key())
}

fn print_center(mesh: &Path) -> anyhow::Result<()> {
    let center = mesh_center(mesh)?;
    println!("{:.6} {:.6} {:.6}", center.x, center.y, center.z);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logger(args.verbose);

    let config = resolve_config(&args)?;

    // Purely local, works without credentials
    if let Command::Center { mesh } = &args.command {
        return print_center(mesh);
    }

    let client = VixivClient::new(config)?;

    match args.command {
        Command::Status => {
            let status = client.status().await?;
            println!("{}", serde_json::to_string_pretty(&status.0)?);
        }
        Command::Accelerators => {
            let accelerators = client.accelerators().await?;
            println!("{}", serde_json::to_string_pretty(&accelerators.0)?);
        }
        Command::Voxelize {
            mesh,
            out,
            cell_size,
            min_skin_thickness,
            force_dir,
            device,
        } => {
            let options = PackOptions {
                cell_size,
                min_skin_thickness,
                force_dir,
                device,
            };
            client.voxelize_to_file(&mesh, &options, &out).await?;
        }
        Command::Visualize { packing } => {
            let data = client
                .visualization_data(PackingSource::Path(&packing))
                .await?;
            let summary = json!({
                "cell_size": data.cell_size.to_array(),
                "rotation": data.rotation.transpose().to_cols_array_2d(),
                "rotation_point": data.rotation_point.to_array(),
                "cell_centers": data.cell_centers.iter().map(|c| c.to_array()).collect::<Vec<_>>(),
                "partial_centers": data.partial_centers.iter().map(|c| c.to_array()).collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Mesh {
            packing,
            out,
            cell_type,
            beam_diameter,
            clear_dir,
            conformal,
        } => {
            let options = MeshOptions {
                cell_type,
                beam_diameter,
                clear_dir,
                conformal,
            };
            let mesh = client
                .generate_mesh(PackingSource::Path(&packing), &options)
                .await?;
            mesh.export_stl(&out)?;
            info!("✅ Lattice written to {}", out.display());
        }
        Command::Volume {
            cell_type,
            beam_radius,
            cell_size,
        } => {
            let volume = client.cell_volume(cell_type, beam_radius, cell_size).await?;
            println!("{}", volume);
        }
        Command::MeshVoxels {
            mesh,
            cell_size,
            min_skin_thickness,
            sampling_res,
            force_dir,
        } => {
            let sampling = VoxelSampling {
                cell_size,
                min_skin_thickness,
                sampling_res,
                force_dir,
            };
            let voxels = client.mesh_voxels(&mesh, &sampling).await?;
            println!("location_table: {:?}", voxels.location_table.shape());
            println!("offsets:        {:?}", voxels.offsets.shape());
            println!("cell_centers:   {:?}", voxels.cell_centers.shape());
        }
        Command::Shader {
            packing,
            out,
            cell_type,
            beam_diameter,
            view_normals,
        } => {
            let data = client
                .visualization_data(PackingSource::Path(&packing))
                .await?;
            let mut request =
                ShaderRequest::new(cell_type, data.cell_size, beam_diameter, &data.cell_centers);
            request.view_normals = view_normals;
            request.rotation_point = data.rotation_point.to_array();
            client.generate_shader(&request, &out).await?;
        }
        Command::Center { mesh } => print_center(&mesh)?,
    }

    Ok(())
}
