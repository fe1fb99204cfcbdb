use anyhow::Context;
use clap::Parser;
use ftp_harvester::harvest::{FtpTransport, HarvestCycle, SftpTransport, Transport};
use ftp_harvester::{
    load_config, watch_interrupts, EventSink, HarvestScheduler, HarvestSettings, JsonLinesSink,
    TransportKind,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ftp-harvester")]
#[command(about = "Polls FTP/SFTP servers and emits one JSON event per line of each file", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "ftp-harvester.toml")]
    config: PathBuf,

    /// Run a single harvest cycle and exit
    #[arg(long)]
    once: bool,

    /// Validate the configuration, print the effective settings and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the event stream.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ftp_harvester=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let settings = load_config(&cli.config)
        .await
        .with_context(|| format!("Invalid configuration in {}", cli.config.display()))?;
    settings.log_summary();
    if cli.check {
        return Ok(());
    }

    let settings = Arc::new(settings);
    let stop = CancellationToken::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            match watch_interrupts(tokio::signal::ctrl_c, stop).await {
                Ok(()) => std::process::exit(130),
                Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
            }
        });
    }

    let sink = JsonLinesSink::stdout();
    match settings.transport {
        TransportKind::Ftp => {
            let transport = FtpTransport::new(settings.connect_timeout, settings.operation_timeout);
            harvest(transport, sink, settings, cli.once, stop).await
        }
        TransportKind::Sftp => {
            let transport =
                SftpTransport::new(settings.connect_timeout, settings.host_key_fingerprint.clone());
            harvest(transport, sink, settings, cli.once, stop).await
        }
    }
}

async fn harvest<T, S>(
    transport: T,
    sink: S,
    settings: Arc<HarvestSettings>,
    once: bool,
    stop: CancellationToken,
) -> anyhow::Result<()>
where
    T: Transport,
    S: EventSink,
{
    let scheduler = HarvestScheduler::from_settings(&settings);
    let cycle = HarvestCycle::new(transport, sink, settings);

    if once {
        cycle.run().await.context("Harvest cycle failed")?;
        return Ok(());
    }

    let cycles = scheduler
        .run(&cycle, &stop)
        .await
        .context("Harvesting stopped on a failed cycle")?;
    info!(cycles, "Harvester stopped");
    Ok(())
}
