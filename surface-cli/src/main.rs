use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

/// Terrain analysis CLI tool
#[derive(Parser)]
#[command(name = "surface")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Layer root: tiles directly inside and each sub-directory of tiles are layers
    #[arg(short, long, env = "SURFACE_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Maximum tiles in cache per layer
    #[arg(
        short,
        long,
        env = "SURFACE_CACHE_SIZE",
        default_value = "100",
        global = true
    )]
    cache_size: u64,

    /// Enabled capabilities: comma-separated labels, or "all"
    #[arg(long, env = "SURFACE_CAPABILITIES", default_value = "all", global = true)]
    capabilities: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the published surface layers
    Layers,

    /// Query elevation at a WGS84 coordinate
    Query {
        /// Surface layer id
        #[arg(short, long, default_value = "0")]
        layer: i64,

        /// Longitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Latitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Output result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Request any resource or operation and print the JSON reply
    Call {
        /// Resource path, e.g. SurfaceLayers/0/GetSlope
        path: String,

        /// Operation name, when not the last path segment
        #[arg(long)]
        op: Option<String>,

        /// Operation input as name=value; values are parsed as JSON when possible
        #[arg(short, long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,
    },

    /// Add elevations to every coordinate of a CSV or GeoJSON file
    Batch {
        /// Input file (CSV or GeoJSON)
        input: PathBuf,

        /// Output file (same format as input if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Surface layer id
        #[arg(short, long, default_value = "0")]
        layer: i64,

        /// Column name for longitude (CSV only)
        #[arg(long, default_value = "lon")]
        lon_col: String,

        /// Column name for latitude (CSV only)
        #[arg(long, default_value = "lat")]
        lat_col: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let open = || commands::Session::open(cli.data_dir.clone(), cli.cache_size, &cli.capabilities);

    match &cli.command {
        Commands::Layers => commands::layers::run(&open()?),
        Commands::Query {
            layer,
            lon,
            lat,
            json,
        } => commands::query::run(&open()?, *layer, *lon, *lat, *json),
        Commands::Call { path, op, params } => {
            commands::call::run(&open()?, path, op.as_deref(), params)
        }
        Commands::Batch {
            input,
            output,
            layer,
            lon_col,
            lat_col,
        } => commands::batch::run(&open()?, *layer, input, output.clone(), lon_col, lat_col),
    }
}
