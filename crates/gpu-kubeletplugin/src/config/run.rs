use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::discovery::DiscoveryArgs;

pub const DEFAULT_CHECKPOINT_DIR: &str = "/var/lib/kubelet/plugins/gpu.amd.com";

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub discovery: DiscoveryArgs,

    #[arg(
        long,
        env = "CHECKPOINT_DIR",
        default_value = DEFAULT_CHECKPOINT_DIR,
        value_hint = clap::ValueHint::DirPath,
        help = "Directory holding the prepared-claims checkpoint"
    )]
    pub checkpoint_dir: PathBuf,

    #[arg(
        long,
        default_value_t = 60,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Seconds between device rescans"
    )]
    pub rescan_interval_secs: u64,
}

impl RunArgs {
    pub fn rescan_interval(&self) -> Duration {
        Duration::from_secs(self.rescan_interval_secs)
    }
}
