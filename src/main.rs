mod cli;
mod config;
mod core;
mod error;
mod hardware;
mod input;
mod playback;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::Cli;
use config::{resolve_config, ChannelMap};
use hardware::{BringUp, IpLinkBringUp, SystemConnector};
use playback::{ConsoleStatus, ReplayScheduler};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = resolve_config(cli.config.as_deref(), &cli.log)?;
    println!("LOG: {}", cli.log.display());
    println!("CFG: {}", config_path.display());

    let channels = ChannelMap::load(&config_path)?;
    let frames = input::load_file(&cli.log)
        .with_context(|| format!("Failed to load {}", cli.log.display()))?;
    info!("Loaded {} frames for {} channels", frames.len(), channels.channels.len());

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let options = cli.replay_options();
    let connector = SystemConnector::new(options.io_timeout);
    let ip_link = IpLinkBringUp {
        use_sudo: cli.sudo,
        ..Default::default()
    };
    let bring_up: Option<&dyn BringUp> = if options.bring_up { Some(&ip_link) } else { None };

    let mut scheduler = ReplayScheduler::open(
        &channels,
        &connector,
        bring_up,
        &options,
        ConsoleStatus::stdout(options.verbose),
    )
    .await;

    let outcome = scheduler.run(frames, &cancel).await;
    scheduler.close().await;

    if outcome.snapshot.frames_unrouted > 0 {
        warn!("{} frames had no enabled interface", outcome.snapshot.frames_unrouted);
    }
    info!(
        "{} after {:.3}s, {} frames dispatched",
        outcome.reason,
        outcome.snapshot.elapsed.as_secs_f64(),
        outcome.snapshot.frames_dispatched
    );
    println!("done");
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
