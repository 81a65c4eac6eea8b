//! ata-probe
//!
//! Runs the discovery engine against a simulated ATA/SATA bus described in a
//! TOML file and reports what it finds.

mod bus;
mod config;

use anyhow::{Context, Result, anyhow};
use async_channel::Receiver;
use bus::{BridgeTransport, spawn_bus_worker};
use clap::Parser;
use common::{BusBridge, BusCommand, BusEvent, create_bus_bridge, setup_logging};
use protocol::{DevicePath, TargetAddress};
use tokio::signal;
use tracing::{error, info, warn};
use xpt::{ChannelNotifier, DeviceRecord, ScanReport, Xpt, XptEvent};

type Engine = Xpt<BridgeTransport, ChannelNotifier>;

#[derive(Parser, Debug)]
#[command(name = "ata-probe")]
#[command(
    author,
    version,
    about = "Discover and configure devices on a simulated ATA/SATA bus"
)]
#[command(long_about = "
Scans every target of the configured bus, identifies ATA disks, ATAPI
drives and port multipliers, negotiates transfer modes and prints the
resulting device table.

EXAMPLES:
    # Scan the default bus
    ata-probe

    # Scan a bus described in a file, with debug logging
    ata-probe --config bench.toml --log-level debug

    # Re-probe target 0 after the scan, expecting a replaced drive
    ata-probe --reprobe 0

    # Machine-readable output
    ata-probe --json

CONFIGURATION:
    The configuration is looked up in the following order:
    1. Path specified with --config
    2. ~/.config/ata-probe/config.toml
    3. /etc/ata-probe/config.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level or filter directive (e.g. info, xpt=debug)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Print events and the final report as JSON lines
    #[arg(long)]
    json: bool,

    /// Re-probe this target after the scan, expecting a different device
    #[arg(long, value_name = "TARGET")]
    reprobe: Option<u8>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = config::ServerConfig::default();
        let path = config::ServerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        config::ServerConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        config::ServerConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.server.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("ata-probe v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let reprobe = args
        .reprobe
        .map(|raw| TargetAddress::from_raw(raw).map(|t| DevicePath::new(config.bus.id(), t)))
        .transpose()
        .context("Invalid --reprobe target")?;

    let (bridge, worker) = create_bus_bridge();
    let worker_handle =
        spawn_bus_worker(worker, config.bus.clone()).context("Failed to spawn bus worker")?;

    let result = run(&config, bridge.clone(), args.json, reprobe).await;

    info!("Shutting down bus...");
    if let Err(e) = bridge.send_command(BusCommand::Shutdown).await {
        error!("Error shutting down bus worker: {:#}", e);
    }
    if let Err(e) = worker_handle.join() {
        error!("Bus worker thread panicked: {:?}", e);
    }

    result
}

async fn run(
    config: &config::ServerConfig,
    bridge: BusBridge,
    json: bool,
    reprobe: Option<DevicePath>,
) -> Result<()> {
    let bus = config.bus.id();
    let transport = BridgeTransport::connect(bridge.clone(), &[bus]).await?;
    let (notifier, events) = ChannelNotifier::channel(256);
    let mut xpt = Xpt::new(transport, notifier, config.probe.clone())
        .context("Failed to start discovery engine")?;

    let mut scan = xpt.start_bus_scan(bus).context("Failed to start bus scan")?;
    let report = drive(&mut xpt, &bridge, &events, json, || scan.try_report()).await?;
    print_report(&report, json)?;

    if let Some(path) = reprobe {
        info!("{}: re-probing", path);
        let mut probe = xpt.start_address_probe(path, true);
        let outcome = drive(&mut xpt, &bridge, &events, json, || probe.try_outcome()).await?;
        if !outcome.is_configured() {
            warn!("{}: nothing configured after re-probe", path);
        }
    }

    print_devices(&xpt, json)?;
    Ok(())
}

/// Feed completions to the engine until `done` yields a value
async fn drive<T>(
    xpt: &mut Engine,
    bridge: &BusBridge,
    events: &Receiver<XptEvent>,
    json: bool,
    mut done: impl FnMut() -> Option<T>,
) -> Result<T> {
    loop {
        while let Ok(event) = events.try_recv() {
            print_event(&event, json)?;
        }
        if let Some(value) = done() {
            return Ok(value);
        }

        tokio::select! {
            event = bridge.recv_event() => {
                let BusEvent::Completed(completion) = event.context("Bus worker stopped")?;
                xpt.complete(completion);
            }
            _ = signal::ctrl_c() => {
                return Err(anyhow!("Interrupted with {} request(s) in flight", xpt.inflight()));
            }
        }
    }
}

fn print_event(event: &XptEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        XptEvent::DeviceFound { record } => {
            println!("{}: found {}", record.path, describe(record));
        }
        XptEvent::DeviceLost { path } => println!("{}: lost", path),
        XptEvent::IdentityChanged { path } => println!("{}: identity changed", path),
        XptEvent::NegotiationChanged { path, params } => {
            if let Some(mode) = params.mode {
                println!("{}: transfer mode {}", path, mode);
            }
        }
    }
    Ok(())
}

fn print_report(report: &ScanReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(report)?);
        return Ok(());
    }
    println!(
        "{}: scan finished, {} target(s) probed, {} device(s) configured{}",
        report.bus,
        report.probed.len(),
        report.found.len(),
        if report.port_multiplier {
            ", port multiplier attached"
        } else {
            ""
        }
    );
    Ok(())
}

fn print_devices(xpt: &Engine, json: bool) -> Result<()> {
    let configured: Vec<&DeviceRecord> = xpt.registry().configured().collect();
    if json {
        println!("{}", serde_json::to_string(&configured)?);
        return Ok(());
    }
    if configured.is_empty() {
        println!("No devices configured.");
        return Ok(());
    }
    println!("\nConfigured devices:\n");
    for record in configured {
        println!("  [{}] {}", record.path, describe(record));
    }
    Ok(())
}

fn describe(record: &DeviceRecord) -> String {
    let mut text = format!("{} \"{}\"", record.protocol, record.model());
    if let Some(ident) = &record.identify {
        if !ident.serial.is_empty() {
            text.push_str(&format!(" serial {}", ident.serial));
        }
    }
    if let Some(mode) = record.mode {
        text.push_str(&format!(", {}", mode));
    }
    text
}
