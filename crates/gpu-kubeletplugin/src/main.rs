use std::io::Write;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use gpu_kubeletplugin::app::PluginApp;
use gpu_kubeletplugin::checkpoint;
use gpu_kubeletplugin::checkpoint::CheckpointStore;
use gpu_kubeletplugin::config::CheckpointArgs;
use gpu_kubeletplugin::config::Cli;
use gpu_kubeletplugin::config::Commands;
use gpu_kubeletplugin::config::DiscoveryArgs;
use gpu_kubeletplugin::config::RunArgs;
use gpu_kubeletplugin::discovery::Discovery;
use gpu_kubeletplugin::platform::DrmHardwareQuery;
use tokio_util::sync::CancellationToken;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    utils::logging::init(cli.log_format);

    match cli.command {
        Commands::Discover(args) => run_discover(args),
        Commands::Run(args) => run_plugin(*args).await,
        Commands::Checkpoint(args) => run_checkpoint(args),
    }
}

fn discovery(args: &DiscoveryArgs) -> Discovery<DrmHardwareQuery> {
    let layout = args.layout();
    Discovery::new(
        layout.clone(),
        DrmHardwareQuery::new(layout),
        args.capacity_defaults(),
    )
}

fn run_discover(args: DiscoveryArgs) -> Result<()> {
    let inventory = discovery(&args)
        .scan()
        .map_err(|e| anyhow::anyhow!("Device discovery failed: {e:?}"))?;
    let devices = inventory
        .render_all()
        .map_err(|e| anyhow::anyhow!("Failed to render devices: {e:?}"))?;

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &devices).context("write devices")?;
    writeln!(stdout).context("write devices")?;
    Ok(())
}

async fn run_plugin(args: RunArgs) -> Result<()> {
    tracing::info!(
        "Starting gpu-kubeletplugin {} (sysfs root {}, checkpoint dir {})",
        env!("CARGO_PKG_VERSION"),
        args.discovery.sysfs_root.display(),
        args.checkpoint_dir.display()
    );

    let app = PluginApp::new(
        discovery(&args.discovery),
        CheckpointStore::new(&args.checkpoint_dir),
    );
    let claims = app
        .start()
        .map_err(|e| anyhow::anyhow!("Plugin startup failed: {e:?}"))?;
    tracing::info!(
        "Restored {} prepared claims, publishing {} devices",
        claims.len(),
        app.inventory().snapshot().len()
    );

    let token = CancellationToken::new();
    let shutdown = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl+C, shutting down..."),
            Err(e) => tracing::error!("Failed to listen for Ctrl+C: {e}"),
        }
        shutdown.cancel();
    });

    app.run(args.rescan_interval(), token).await;
    Ok(())
}

fn run_checkpoint(args: CheckpointArgs) -> Result<()> {
    let bytes = std::fs::read(&args.path)
        .with_context(|| format!("read checkpoint {}", args.path.display()))?;
    let claims = checkpoint::load(&bytes)
        .map_err(|e| anyhow::anyhow!("Checkpoint {} is invalid: {e:?}", args.path.display()))?;

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &claims).context("write claims")?;
    writeln!(stdout).context("write claims")?;
    Ok(())
}
