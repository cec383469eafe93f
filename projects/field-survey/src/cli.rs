use crate::run_artifacts::TreatmentMethod;
use crate::survey::types::Weather;
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// JSON file with engine settings; missing fields use defaults
    #[arg(long, env = "FIELD_SURVEY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Root directory for run artifacts
    #[arg(long, env = "FIELD_SURVEY_OUTPUT_ROOT", default_value = "runs", global = true)]
    pub output_root: PathBuf,

    /// Persistence backend base URL; runs keep data in memory when unset
    #[arg(long, env = "FIELD_SURVEY_BACKEND_URL", global = true)]
    pub backend_url: Option<String>,

    /// Coverage grid cell size in degrees (overrides the config file)
    #[arg(long, global = true)]
    pub cell_size: Option<f64>,

    /// Milliseconds between simulation ticks (overrides the config file)
    #[arg(long, global = true)]
    pub tick_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the HTTP API
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: IpAddr,

        /// Port to bind to
        #[arg(long, default_value_t = 12206)]
        port: u16,
    },
    /// Run one survey scenario from a JSON file and write its artifacts
    Simulate {
        /// Scenario file: polygon, conditions, method, seed, specimen_count
        scenario: PathBuf,

        /// Random seed (overrides the scenario file)
        #[arg(long)]
        seed: Option<u64>,

        /// Treatment method (overrides the scenario file)
        #[arg(long, value_enum)]
        method: Option<TreatmentMethod>,

        /// Weather (overrides the scenario file)
        #[arg(long, value_enum)]
        weather: Option<Weather>,
    },
    /// Re-derive the stats of every exported plan under a directory
    Verify {
        /// Directory to search; defaults to the output root
        root: Option<PathBuf>,
    },
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
