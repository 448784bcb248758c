//! Sensor Emulator - publishes a fake sensor with synthetic waveforms
//!
//! Creates the shared region with one sensor and two entries, then feeds a
//! sine temperature and a cosine fan speed once per interval until Ctrl+C.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use sensor_exchange::config::{MUTEX_NAME, REGION_NAME};
use sensor_exchange::{EntrySpec, EntryType, ExchangeConfig, FlushOutcome, Producer, Topology};

const SENSOR_ID: u32 = 0xF000;
const TEMP_ID: u32 = 0xF001;
const FAN_ID: u32 = 0xF002;

#[derive(Parser, Debug)]
#[command(name = "sensor-emulator")]
#[command(about = "Publish synthetic readings through the shared sensor interface", long_about = None)]
struct Cli {
    /// Protocol name of the shared region
    #[arg(long, env = "SX_REGION_NAME", default_value = REGION_NAME)]
    region: String,

    /// Protocol name of the named mutex
    #[arg(long, env = "SX_MUTEX_NAME", default_value = MUTEX_NAME)]
    mutex: String,

    /// Publishing interval in milliseconds
    #[arg(short, long, default_value = "1000")]
    interval_ms: u64,

    /// Bounded mutex wait in milliseconds
    #[arg(long, default_value = "1000")]
    lock_timeout_ms: u64,

    /// Existing regions with more sensors than this are treated as the genuine agent
    #[arg(long, default_value = "5")]
    conflict_threshold: u32,
}

fn demo_topology() -> Topology {
    let mut topology = Topology::new();
    let sensor = topology.add_sensor(SENSOR_ID, 1, "Aquasuite Fake Sensor");
    topology.add_entry(
        sensor,
        EntrySpec::new(TEMP_ID, "Fake Temp", "°C", EntryType::Temperature).with_value(45.0),
    );
    topology.add_entry(
        sensor,
        EntrySpec::new(FAN_ID, "Fake Fan", "RPM", EntryType::Fan).with_value(1200.0),
    );
    topology
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Cli::parse();
    let config = ExchangeConfig::default()
        .with_names(args.region, args.mutex)
        .with_lock_timeout(Duration::from_millis(args.lock_timeout_ms))
        .with_conflict_threshold(args.conflict_threshold);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("failed to install Ctrl+C handler")?;

    let mut producer = Producer::new(demo_topology(), config);
    producer.create().context("failed to publish the sensor exchange")?;
    info!("Fake sensor started. Press Ctrl+C to stop.");

    let interval = Duration::from_millis(args.interval_ms);
    let start = Instant::now();

    while running.load(Ordering::SeqCst) {
        let t = start.elapsed().as_secs_f64();
        let values = [
            (TEMP_ID, 45.0 + 10.0 * t.sin()),
            (FAN_ID, 1200.0 + 100.0 * t.cos()),
        ];

        if producer.update(&values) == FlushOutcome::LockTimedOut {
            debug!("Mutex busy, skipped this tick");
        }
        std::thread::sleep(interval);
    }

    info!("Stopping fake sensor");
    producer.close();
    Ok(())
}
