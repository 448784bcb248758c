//! Producer side of the exchange
//!
//! A producer publishes the topology once and then flushes mutable fields
//! (timestamp, value, running min/max) under the named mutex. Every live
//! producer holds a shared lock on the region; the last one to close removes
//! the region's name.
//!
//! # Conflict detection
//!
//! An existing region whose header carries the classic magic and more sensors
//! than `ExchangeConfig::conflict_sensor_threshold` is assumed to belong to a
//! genuine monitoring agent and is never overwritten. Any other existing
//! region is treated as a leftover emulator region and overwritten.

use std::ptr::addr_of_mut;
use std::sync::atomic::{fence, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info, warn};

use crate::config::ExchangeConfig;
use crate::error::{ExchangeError, Result};
use crate::layout::{
    compute_layout_with_min, RawEntry, RawHeader, RawSensor, RegionLayout, HEADER_MAGIC,
};
use crate::mutex::NamedMutex;
use crate::shm::SharedRegion;
use crate::topology::{EntryHandle, EntrySpec, SensorHandle, Topology};

/// Producer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Unpublished,
    Published,
    Closed,
}

/// Result of a flush attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Mutable fields were written
    Flushed,
    /// The producer is not published; nothing was written
    NotPublished,
    /// The mutex was busy past the bound; this cycle was skipped
    LockTimedOut,
}

/// Resources held while published. Fields drop in order: mapping first.
struct Publication {
    region: SharedRegion,
    mutex: NamedMutex,
    layout: RegionLayout,
}

impl Publication {
    fn header_ptr(&self) -> *mut RawHeader {
        self.region.as_ptr().cast()
    }

    fn entry_ptr(&self, index: usize) -> *mut RawEntry {
        entry_ptr(&self.region, &self.layout, index)
    }
}

fn sensor_ptr(region: &SharedRegion, layout: &RegionLayout, index: usize) -> *mut RawSensor {
    debug_assert!(index < layout.sensor_count);
    // SAFETY: the mapping covers layout.used_size bytes
    unsafe {
        region
            .as_ptr()
            .add(layout.sensor_offset + index * std::mem::size_of::<RawSensor>())
            .cast()
    }
}

fn entry_ptr(region: &SharedRegion, layout: &RegionLayout, index: usize) -> *mut RawEntry {
    debug_assert!(index < layout.entry_count);
    // SAFETY: the mapping covers layout.used_size bytes
    unsafe {
        region
            .as_ptr()
            .add(layout.entry_offset + index * std::mem::size_of::<RawEntry>())
            .cast()
    }
}

/// Publishes a topology into the shared region
pub struct Producer {
    config: ExchangeConfig,
    topology: Topology,
    state: ProducerState,
    publication: Option<Publication>,
}

impl Producer {
    pub fn new(topology: Topology, config: ExchangeConfig) -> Self {
        Self {
            config,
            topology,
            state: ProducerState::Unpublished,
            publication: None,
        }
    }

    pub fn state(&self) -> ProducerState {
        self.state
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Add a sensor before publishing
    pub fn add_sensor(&mut self, id: u32, instance: u32, name: &str) -> Result<SensorHandle> {
        self.require(ProducerState::Unpublished, "add a sensor")?;
        Ok(self.topology.add_sensor(id, instance, name))
    }

    /// Add an entry before publishing. Returns `None` for a foreign sensor handle.
    pub fn add_entry(&mut self, sensor: SensorHandle, spec: EntrySpec) -> Result<Option<EntryHandle>> {
        self.require(ProducerState::Unpublished, "add an entry")?;
        Ok(self.topology.add_entry(sensor, spec))
    }

    /// Allocate the region, publish the topology and flush once.
    pub fn create(&mut self) -> Result<()> {
        self.require(ProducerState::Unpublished, "create")?;

        let layout = compute_layout_with_min(
            self.topology.sensor_count(),
            self.topology.entry_count(),
            self.config.min_region_size,
        );
        let header = layout.header().ok_or_else(|| {
            ExchangeError::allocation(
                &self.config.region_name,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "topology too large for 32-bit offsets"),
            )
        })?;

        info!(
            sensors = layout.sensor_count,
            entries = layout.entry_count,
            size = layout.total_size,
            "Initializing sensor exchange"
        );

        let mutex = NamedMutex::open(&self.config.mutex_name)?;
        let region = {
            // Held across the conflict check and the topology write
            let _guard = mutex.lock_timeout(self.config.lock_timeout)?;

            // Checked before the region is created or resized
            if let Some(existing) = SharedRegion::probe(&self.config.region_name)? {
                self.check_conflict(&existing)?;
            }

            let region = SharedRegion::open_or_create(&self.config.region_name, layout.total_size)?;
            region.hold_shared()?;
            if region.existed() {
                warn!(region = %self.config.region_name, "Re-using existing shared memory block");
            }
            self.write_topology(&region, &layout, header);
            region
        };

        let publication = Publication {
            region,
            mutex,
            layout,
        };
        self.publication = Some(publication);
        self.state = ProducerState::Published;
        self.flush();

        info!(region = %self.config.region_name, "Sensor exchange published");
        Ok(())
    }

    /// Stage values by entry id and flush them.
    ///
    /// Ids that match no entry are ignored.
    pub fn update(&mut self, values: &[(u32, f64)]) -> FlushOutcome {
        if self.state != ProducerState::Published {
            return FlushOutcome::NotPublished;
        }
        for &(id, value) in values {
            self.topology.record_by_id(id, value);
        }
        self.flush()
    }

    /// Stage a value for one entry without flushing
    pub fn set_value(&mut self, handle: EntryHandle, value: f64) -> bool {
        match self.topology.entry_mut(handle) {
            Some(entry) => {
                entry.record(value);
                true
            }
            None => false,
        }
    }

    /// Stage a value on every entry with `id` without flushing
    pub fn set_value_by_id(&mut self, id: u32, value: f64) -> usize {
        self.topology.record_by_id(id, value)
    }

    /// Write the timestamp and every entry's value, min and max.
    ///
    /// Skips the cycle if the mutex stays busy past the configured bound.
    pub fn flush(&mut self) -> FlushOutcome {
        let publication = match (&self.state, &self.publication) {
            (ProducerState::Published, Some(publication)) => publication,
            _ => return FlushOutcome::NotPublished,
        };

        let _guard = match publication.mutex.lock_timeout(self.config.lock_timeout) {
            Ok(guard) => guard,
            Err(e) => {
                debug!(error = %e, "Skipping flush");
                return FlushOutcome::LockTimedOut;
            }
        };

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        // SAFETY: pointers stay inside the mapping; field writes are unaligned
        unsafe {
            addr_of_mut!((*publication.header_ptr()).last_update).write_unaligned(now);
            for (index, (_, entry)) in self.topology.entries().enumerate() {
                let raw = publication.entry_ptr(index);
                addr_of_mut!((*raw).value).write_unaligned(entry.value);
                addr_of_mut!((*raw).value_min).write_unaligned(entry.value_min);
                addr_of_mut!((*raw).value_max).write_unaligned(entry.value_max);
            }
        }
        fence(Ordering::Release);

        FlushOutcome::Flushed
    }

    /// Release the mapping and the mutex handle.
    ///
    /// The region is removed only when no other producer still publishes
    /// into it. Idempotent. Also runs on drop.
    pub fn close(&mut self) {
        if self.state == ProducerState::Closed {
            return;
        }
        if let Some(Publication { mut region, mutex, .. }) = self.publication.take() {
            // Serialized with `create` so a starting producer is always counted
            match mutex.lock_timeout(self.config.lock_timeout) {
                Ok(_guard) => match region.is_last_writer() {
                    Ok(true) => {
                        region.set_owner(true);
                        drop(region);
                        info!(region = %self.config.region_name, "Sensor exchange closed and removed");
                    }
                    Ok(false) => {
                        drop(region);
                        info!(region = %self.config.region_name, "Sensor exchange closed; still in use by another producer");
                    }
                    Err(e) => {
                        drop(region);
                        warn!(error = %e, "Leaving shared memory block in place");
                    }
                },
                Err(e) => {
                    drop(region);
                    warn!(error = %e, "Leaving shared memory block in place");
                }
            }
        }
        self.state = ProducerState::Closed;
    }

    fn require(&self, expected: ProducerState, operation: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ExchangeError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn check_conflict(&self, existing: &RawHeader) -> Result<()> {
        let magic = existing.magic;
        let sensor_count = existing.sensor_element_count;
        let threshold = self.config.conflict_sensor_threshold;

        if magic == HEADER_MAGIC && sensor_count > threshold {
            error!(
                region = %self.config.region_name,
                sensor_count,
                "Genuine monitoring agent detected"
            );
            return Err(ExchangeError::RegionConflict {
                name: self.config.region_name.clone(),
                sensor_count,
                threshold,
            });
        }
        Ok(())
    }

    fn write_topology(&self, region: &SharedRegion, layout: &RegionLayout, header: RawHeader) {
        // SAFETY: the mapping covers layout.used_size bytes
        unsafe {
            region.as_ptr().cast::<RawHeader>().write_unaligned(header);

            for (index, sensor) in self.topology.sensors().iter().enumerate() {
                let raw = RawSensor::new(sensor.id, sensor.instance, &sensor.name);
                sensor_ptr(region, layout, index).write_unaligned(raw);
            }

            for (index, (sensor_index, entry)) in self.topology.entries().enumerate() {
                let mut raw = RawEntry::new(
                    entry.spec.entry_type,
                    sensor_index as u32,
                    entry.spec.id,
                    &entry.spec.name,
                    &entry.spec.units,
                    entry.value,
                );
                raw.value_min = entry.value_min;
                raw.value_max = entry.value_max;
                raw.value_avg = entry.value_avg;
                entry_ptr(region, layout, index).write_unaligned(raw);
            }
        }
        fence(Ordering::Release);
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.close();
    }
}
