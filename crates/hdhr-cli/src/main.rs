use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use hdhr_core::{
    fetch_snapshot, BroadcastDiscoverer, DeviceBoard, DeviceEvent, DeviceInfo, DeviceSnapshot,
    Discoverer, HttpDiscoverer, HttpStatusFetcher, Poller, PollerConfig, SystemClock,
    DEFAULT_DISCOVER_URL,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod viewer;
#[cfg(test)]
mod viewer_tests;

#[derive(Debug, Parser)]
#[command(name = "hdhrtray")]
#[command(about = "HDHomeRun tuner and recording status monitor (read-only)")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, value_enum, default_value = "broadcast")]
    discovery: DiscoveryMethod,

    #[arg(long, default_value = DEFAULT_DISCOVER_URL)]
    discover_url: String,

    /// Extra addresses to send the discover request to, e.g. 192.168.2.255:65001
    #[arg(long = "discover-target")]
    discover_targets: Vec<SocketAddr>,

    #[arg(long, default_value_t = 1000)]
    discovery_window_ms: u64,

    #[arg(long, default_value_t = 30)]
    discovery_interval_secs: u64,

    #[arg(long, default_value_t = 2000)]
    poll_interval_ms: u64,

    #[arg(long, default_value_t = 1500)]
    fetch_timeout_ms: u64,

    #[arg(long, default_value_t = 3)]
    failure_threshold: u32,
}

#[derive(Debug, Subcommand)]
enum Command {
    Scan,
    Status {
        #[arg(long)]
        device_id: Option<String>,
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    Watch {
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    View,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DiscoveryMethod {
    Broadcast,
    Http,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Ndjson,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let config = PollerConfig {
        poll_interval: Duration::from_millis(cli.poll_interval_ms),
        discovery_interval: Duration::from_secs(cli.discovery_interval_secs),
        failure_threshold: cli.failure_threshold,
        fetch_timeout: Duration::from_millis(cli.fetch_timeout_ms),
        discovery_timeout: Duration::from_millis(cli.discovery_window_ms) + Duration::from_secs(4),
        ..PollerConfig::default()
    };
    config.validate()?;

    let discoverer = build_discoverer(&cli, &config)?;
    let fetcher = Arc::new(HttpStatusFetcher::new(config.fetch_timeout)?);

    match cli.command {
        Command::Scan => {
            let devices = discoverer.discover().await?;
            println!("{}", serde_json::to_string_pretty(&devices)?);
        }
        Command::Status { device_id, format } => {
            let devices = discoverer.discover().await?;
            let selected: Vec<_> = devices
                .into_iter()
                .filter(|d| device_id.as_deref().map_or(true, |id| d.id.as_str().eq_ignore_ascii_case(id)))
                .collect();
            if selected.is_empty() {
                bail!("no matching devices found");
            }

            for device in &selected {
                match fetch_snapshot(fetcher.as_ref(), &SystemClock, device, config.fetch_timeout).await {
                    Ok(snapshot) => print_snapshot(device, &snapshot, format)?,
                    Err(err) => warn!(device_id = %device.id, error = %err, "status unavailable"),
                }
            }
        }
        Command::Watch { format } => {
            let poller = Poller::new(config, discoverer, fetcher)?;
            stream_loop(poller, format).await?;
        }
        Command::View => {
            let poller = Poller::new(config, discoverer, fetcher)?;
            viewer::run_viewer(poller).await?;
        }
    }

    Ok(())
}

fn build_discoverer(cli: &Cli, config: &PollerConfig) -> Result<Arc<dyn Discoverer>> {
    let window = Duration::from_millis(cli.discovery_window_ms);
    let discoverer: Arc<dyn Discoverer> = match cli.discovery {
        DiscoveryMethod::Broadcast => {
            let mut broadcast = BroadcastDiscoverer::new(window);
            if !cli.discover_targets.is_empty() {
                broadcast = broadcast.with_targets(cli.discover_targets.clone());
            }
            Arc::new(broadcast)
        }
        DiscoveryMethod::Http => Arc::new(HttpDiscoverer::new(
            cli.discover_url.clone(),
            config.discovery_timeout,
        )?),
    };
    Ok(discoverer)
}

async fn stream_loop(poller: Poller, format: OutputFormat) -> Result<()> {
    let (tx, mut rx) = mpsc::channel(64);
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(poller.run(tx, shutdown.clone()));
    let mut board = DeviceBoard::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("received ctrl-c, stopping");
                break;
            }
            event = rx.recv() => {
                let Some(event) = event else { break };
                board.apply(&event);
                print_event(&event, &board, format)?;
            }
        }
    }

    shutdown.cancel();
    drop(rx);
    task.await?;
    info!("stopped");
    Ok(())
}

fn print_event(event: &DeviceEvent, board: &DeviceBoard, format: OutputFormat) -> Result<()> {
    let summary = board.summary();
    match format {
        OutputFormat::Json => {
            let out = serde_json::json!({ "event": event, "summary": summary });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Ndjson => {
            let out = serde_json::json!({ "event": event, "summary": summary });
            println!("{}", serde_json::to_string(&out)?);
        }
        OutputFormat::Human => {
            let now = chrono::Local::now().format("%H:%M:%S");
            match event {
                DeviceEvent::DeviceDiscovered { device } => {
                    println!(
                        "[{now}] {} discovered ({:?} at {})",
                        device.id, device.kind, device.base_url
                    );
                }
                DeviceEvent::DeviceUpdated { device_id, snapshot } => {
                    println!(
                        "[{now}] {device_id} updated: {}/{} tuners active, {} recording(s)",
                        snapshot.active_tuners(),
                        snapshot.tuners.len(),
                        snapshot.recordings.len()
                    );
                }
                DeviceEvent::DeviceLost { device_id } => {
                    println!("[{now}] {device_id} lost");
                }
            }
            println!("           tray: {:?} - {}", summary.status, summary.tooltip());
        }
    }

    Ok(())
}

fn print_snapshot(device: &DeviceInfo, snapshot: &DeviceSnapshot, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let out = serde_json::json!({ "device": device, "snapshot": snapshot });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Ndjson => {
            let out = serde_json::json!({ "device": device, "snapshot": snapshot });
            println!("{}", serde_json::to_string(&out)?);
        }
        OutputFormat::Human => {
            println!("=== HDHomeRun {} ===", device.id);
            println!("Time:       {}", snapshot.ts.to_rfc3339());
            println!("Kind:       {:?}", device.kind);
            println!("Address:    {} ({})", device.address, device.base_url);

            for (position, tuner) in snapshot.tuners.iter().enumerate() {
                let label = tuner
                    .index()
                    .map_or_else(|| format!("#{position}"), |index| format!("tuner{index}"));
                if tuner.is_active() {
                    println!(
                        "  {label:<8} active  {:>7.2} MHz  -> {}",
                        tuner.frequency() as f64 / 1_000_000.0,
                        if tuner.target_ip().is_empty() { "n/a" } else { tuner.target_ip() }
                    );
                } else {
                    println!("  {label:<8} idle");
                }
            }

            if !snapshot.recordings.is_empty() {
                println!("Recordings:");
                for recording in &snapshot.recordings {
                    let name = if recording.name().is_empty() { "(unnamed)" } else { recording.name() };
                    println!("  {name}");
                }
            }
        }
    }

    Ok(())
}
