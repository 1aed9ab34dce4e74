use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};

/// Builds a KMZ map of a GTFS bus network together with curated metro lines.
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct Config {
    /// GTFS zip: http(s) URL, file:// URL or local path
    #[arg(long, env = "GTFS_URL")]
    pub feed: String,

    /// Metro line source (KMZ, KML, GeoJSON or CSV)
    #[arg(long, env = "METRO_URL")]
    pub metro_url: Option<String>,

    /// Bearer token for the metro line source
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[arg(long, env = "OUTPUT_PATH", default_value = "transit.kmz")]
    pub output: PathBuf,

    /// Fail the run when the metro lines can't be loaded. `false` allows a bus-only map.
    #[arg(long, env = "METRO_REQUIRED", default_value_t = true, action = ArgAction::Set)]
    pub metro_required: bool,

    /// Which source keeps its geometry when a GTFS route id equals a metro line id
    #[arg(long, env = "CONFLICT_POLICY", value_enum, default_value_t = ConflictPolicy::MetroWins)]
    pub conflict_policy: ConflictPolicy,

    #[arg(long, env = "OUTPUT_FORMAT", value_enum, default_value_t = OutputFormat::Kmz)]
    pub format: OutputFormat,

    #[arg(long, default_value = "Transit Network")]
    pub document_name: String,

    /// HTTP request timeout
    #[arg(long, default_value_t = 60)]
    pub timeout_secs: u64,

    #[arg(long, env = "LOG_DIR", default_value = "./logs")]
    pub log_dir: PathBuf,

    /// Export spans over OTLP/gRPC when set
    #[arg(long, env = "OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConflictPolicy {
    MetroWins,
    BusWins,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Kmz,
    Kml,
}
