use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use utils::logging::LogFormat;

use crate::config::discovery::DiscoveryArgs;
use crate::config::run::RunArgs;

#[derive(Parser)]
#[command(about, long_about, version)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "LOG_FORMAT",
        value_enum,
        ignore_case = true,
        default_value_t = LogFormat::Text,
        help = "Log output format"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan the node once and print the discovered devices as JSON
    Discover(DiscoveryArgs),
    /// Publish the device inventory and rescan periodically
    Run(Box<RunArgs>),
    /// Verify a checkpoint file and print its prepared claims
    Checkpoint(CheckpointArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct CheckpointArgs {
    #[arg(value_hint = clap::ValueHint::FilePath, help = "Path of the checkpoint file")]
    pub path: PathBuf,
}
