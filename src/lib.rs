//! Sensor Exchange - emulated shared-memory sensor interface
//!
//! This library publishes synthetic sensor readings through the fixed binary
//! shared-memory layout used by a popular hardware-monitoring agent, so tools
//! that read that interface can consume them.
//!
//! # Architecture
//!
//! - **Producer**: Owns the region, writes the topology once, then flushes
//!   values under a system-wide named mutex
//! - **Consumers**: Map the region read-only and copy it without locking
//!
//! A pre-existing region that looks like it belongs to the genuine agent is
//! never overwritten.

pub mod error;
pub mod config;
pub mod layout;
pub mod shm;
pub mod mutex;
pub mod topology;
pub mod producer;
pub mod consumer;
pub mod bindings;

pub use error::{ExchangeError, Result};
pub use config::ExchangeConfig;
pub use layout::{compute_layout, EntryType, RegionLayout};
pub use topology::{EntryHandle, EntrySpec, SensorHandle, Topology};
pub use producer::{FlushOutcome, Producer, ProducerState};
pub use consumer::{Consumer, EntryReading, HeaderInfo, Row, SensorReading, Snapshot, Watcher};
