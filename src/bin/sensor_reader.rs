//! Sensor Reader - text viewer for the shared sensor interface
//!
//! Polls the region once per interval and prints one row per entry. Waits
//! quietly while no producer is running and reconnects after one restarts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use sensor_exchange::config::REGION_NAME;
use sensor_exchange::{ExchangeConfig, Snapshot, Watcher};

#[derive(Parser, Debug)]
#[command(name = "sensor-reader")]
#[command(about = "Print readings from the shared sensor interface", long_about = None)]
struct Cli {
    /// Protocol name of the shared region
    #[arg(long, env = "SX_REGION_NAME", default_value = REGION_NAME)]
    region: String,

    /// Polling interval in milliseconds
    #[arg(short, long, default_value = "1000")]
    interval_ms: u64,

    /// Print a single snapshot and exit
    #[arg(long)]
    once: bool,
}

fn render(snapshot: &Snapshot) {
    println!("Last Update: {}", snapshot.header.last_update);
    println!(
        "Sensors: {}, Entries: {}",
        snapshot.header.sensor_element_count, snapshot.header.entry_element_count
    );
    println!("{}", "-".repeat(40));
    for row in snapshot.rows() {
        println!("{}", row);
    }
    println!("{}", "-".repeat(40));
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Cli::parse();
    let config = ExchangeConfig {
        region_name: args.region,
        ..ExchangeConfig::default()
    };
    let mut watcher = Watcher::new(config.clone());

    if args.once {
        let snapshot = watcher
            .poll()?
            .with_context(|| format!("shared region '{}' is not available", config.region_name))?;
        render(&snapshot);
        return Ok(());
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("failed to install Ctrl+C handler")?;

    let interval = Duration::from_millis(args.interval_ms);
    while running.load(Ordering::SeqCst) {
        // Clear screen
        print!("\x1b[2J\x1b[H");
        match watcher.poll()? {
            Some(snapshot) => {
                render(&snapshot);
                println!("Press Ctrl+C to exit.");
            }
            None => println!(
                "Waiting for shared region '{}'... (is the emulator running?)",
                config.region_name
            ),
        }
        std::thread::sleep(interval);
    }

    watcher.disconnect();
    Ok(())
}
