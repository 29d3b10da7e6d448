//! Sensornode - sensor telemetry node
//!
//! Runs the node against the simulated timer and ADC, sending packets over a
//! real UDP socket.

use anyhow::{Context, Result};
use sensornode::settings::{NodeSettings, DEFAULT_SETTINGS_FILE};
use sensornode::storage::JsonFileStore;
use sensornode::{ConfigKey, ConfigStore, Node, SimulatedTimer};
use sensornode_core::acquisition::adc::SimulatedAdc;
use sensornode_core::net::link::UdpLink;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Options given on the command line
#[derive(Debug, Default)]
struct CliOptions {
    settings_path: Option<PathBuf>,
    node_id: Option<u8>,
    sample_rate: Option<u32>,
    remote: Option<String>,
    calibrate_secs: Option<u64>,
    raw: bool,
    threshold: Option<u8>,
    save_settings: bool,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sensornode=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(options) = parse_args(&args) else {
        return Ok(());
    };

    println!("╔════════════════════════════════════════════════════════════╗");
    println!(
        "║      Sensornode v{} ({}) - Telemetry Node       ║",
        sensornode::VERSION,
        sensornode::BUILD_DATE
    );
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();

    run(options)
}

/// Parse arguments; `None` means the process should exit (help, version, error)
fn parse_args(args: &[String]) -> Option<CliOptions> {
    let mut options = CliOptions::default();
    let mut i = 1;

    while i < args.len() {
        let value = args.get(i + 1);
        match args[i].as_str() {
            "--version" | "-v" => {
                println!("sensornode {} (built {})", sensornode::VERSION, sensornode::BUILD_DATE);
                return None;
            }
            "--help" | "-h" => {
                print_help();
                return None;
            }
            "--raw" => {
                options.raw = true;
                i += 1;
                continue;
            }
            "--save-settings" => {
                options.save_settings = true;
                i += 1;
                continue;
            }
            "--settings" | "-s" => {
                let Some(path) = value else {
                    eprintln!("Error: --settings requires a path");
                    return None;
                };
                options.settings_path = Some(PathBuf::from(path));
            }
            "--node-id" | "-n" => {
                options.node_id = value.and_then(|v| v.parse().ok());
                if options.node_id.is_none() {
                    eprintln!("Error: --node-id requires a value 0-255");
                    return None;
                }
            }
            "--rate" | "-r" => {
                options.sample_rate = value.and_then(|v| v.parse().ok());
                if options.sample_rate.is_none() {
                    eprintln!("Error: --rate requires a sample rate in Hz");
                    return None;
                }
            }
            "--remote" => {
                let Some(remote) = value else {
                    eprintln!("Error: --remote requires IP or IP:PORT");
                    return None;
                };
                options.remote = Some(remote.clone());
            }
            "--calibrate" | "-c" => {
                options.calibrate_secs = value.and_then(|v| v.parse().ok());
                if options.calibrate_secs.is_none() {
                    eprintln!("Error: --calibrate requires a duration in seconds");
                    return None;
                }
            }
            "--threshold" | "-t" => {
                options.threshold = value.and_then(|v| v.parse().ok()).filter(|p| *p <= 100);
                if options.threshold.is_none() {
                    eprintln!("Error: --threshold requires a percentage 0-100");
                    return None;
                }
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                return None;
            }
        }
        i += 2;
    }

    Some(options)
}

fn print_help() {
    println!("Usage: sensornode [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -s, --settings PATH     Settings file (default: {})", DEFAULT_SETTINGS_FILE);
    println!("  -n, --node-id N         Store a new node id before starting");
    println!("  -r, --rate HZ           Sample rate (default: 60)");
    println!("      --remote ADDR       Primary remote, IP or IP:PORT");
    println!("  -c, --calibrate SECS    Run a calibration for SECS seconds after start");
    println!("      --raw               Send raw filtered samples instead of bitmasks");
    println!("  -t, --threshold PCT     Threshold percentage 0-100");
    println!("      --save-settings     Write the effective settings back to the file");
    println!("  -v, --version           Show version");
    println!("  -h, --help              Show this help");
    println!();
    println!("Examples:");
    println!("  sensornode --remote 127.0.0.1:16501 --calibrate 10");
    println!("  sensornode -r 120 --raw");
    println!();
    println!("Set RUST_LOG=sensornode=debug for more detail.");
}

fn run(options: CliOptions) -> Result<()> {
    let settings_path = options
        .settings_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
    let mut settings = NodeSettings::load(&settings_path);

    if let Some(rate) = options.sample_rate {
        settings.sample_rate_hz = rate;
    }
    if let Some(remote) = &options.remote {
        settings.set_remote(remote)?;
    }
    settings.validate().context("Invalid settings")?;
    if options.save_settings {
        settings.save(&settings_path)?;
    }

    let store = Arc::new(
        JsonFileStore::open(&settings.store_path)
            .with_context(|| format!("Failed to open store {}", settings.store_path.display()))?,
    );
    if let Some(node_id) = options.node_id {
        store
            .set(ConfigKey::NodeId, u16::from(node_id))
            .context("Failed to store node id")?;
    }

    let remote = settings.remote_addr()?;
    let link = UdpLink::bind(settings.local_addr(), remote)
        .with_context(|| format!("Failed to bind UDP port {}", settings.local_port))?;
    let seed = chrono::Utc::now().timestamp_subsec_nanos();
    let adc = SimulatedAdc::new(settings.sample_rate_hz, seed);

    println!("Sample rate: {} Hz", settings.sample_rate_hz);
    println!("Remote:      {}", remote);
    println!("Store:       {}", settings.store_path.display());
    println!();

    let mut node = Node::start(
        settings.to_node_config(),
        Arc::new(SimulatedTimer::new()),
        Box::new(adc),
        Box::new(link),
        store,
    )?;

    if let Some(percent) = options.threshold {
        if let Err(e) = node.set_threshold_percent(percent) {
            error!("Failed to set threshold: {}", e);
        }
    }
    node.set_raw_mode(options.raw);

    let calibration_deadline = options.calibrate_secs.map(|secs| {
        node.start_calibration();
        info!(secs, "Calibrating");
        Instant::now() + Duration::from_secs(secs)
    });
    let mut calibrating = calibration_deadline.is_some();

    println!("Node {} running. Press Ctrl+C to stop.", node.node_id());
    println!();
    println!("Status:");
    println!("────────────────────────────────────────");

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .ok();

    let mut last_status = String::new();
    while running.load(Ordering::SeqCst) {
        if calibrating && calibration_deadline.is_some_and(|d| Instant::now() >= d) {
            node.stop_calibration();
            calibrating = false;
            info!("Calibration window closed");
        }

        let stats = node.stats();
        let mode = if options.raw {
            "RAW"
        } else if calibrating {
            "CAL"
        } else {
            "THRESH"
        };
        let status_line = format!(
            "Node: {:>3} | Mode: {:<6} | Samples: {:>8} | Dropped: {:>5} ({:>4.1}%) | Sent: {:>8} | Failed: {:>4}",
            node.node_id(),
            mode,
            stats.samples_captured,
            stats.samples_dropped,
            stats.sample_drop_percent(),
            stats.packets_sent,
            stats.send_failures,
        );

        // Only print if changed (reduce spam)
        if status_line != last_status {
            println!("{}", status_line);
            last_status = status_line;
        }

        std::thread::sleep(Duration::from_millis(500));
    }

    println!();
    println!("Stopping...");
    node.stop();
    println!("{}", serde_json::to_string_pretty(&node.stats())?);
    println!("Done.");

    Ok(())
}
