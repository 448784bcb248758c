//! Consumer side of the exchange
//!
//! Consumers map the region read-only and never take the named mutex. A
//! snapshot copies the header and both tables in one pass; a value updated
//! while the copy runs may be seen half-written (for example a new `value`
//! next to the previous `value_max`). This trades strict consistency for a
//! lock-free polling path.

use std::fmt;

use tracing::debug;

use crate::config::ExchangeConfig;
use crate::error::{ExchangeError, Result};
use crate::layout::{
    decode_text, EntryType, RawEntry, RawHeader, RawSensor, ENTRY_RECORD_SIZE, HEADER_MAGIC,
    HEADER_SIZE, SENSOR_RECORD_SIZE,
};
use crate::shm::SharedRegion;

/// Sensor name shown for entries whose owner index is out of range
pub const UNKNOWN_SENSOR: &str = "Unknown";

/// Decoded header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderInfo {
    pub magic: u32,
    pub version: u32,
    pub version2: u32,
    pub last_update: i64,
    pub sensor_section_offset: u32,
    pub sensor_element_size: u32,
    pub sensor_element_count: u32,
    pub entry_section_offset: u32,
    pub entry_element_size: u32,
    pub entry_element_count: u32,
}

impl From<RawHeader> for HeaderInfo {
    fn from(raw: RawHeader) -> Self {
        Self {
            magic: raw.magic,
            version: raw.version,
            version2: raw.version2,
            last_update: raw.last_update,
            sensor_section_offset: raw.sensor_section_offset,
            sensor_element_size: raw.sensor_element_size,
            sensor_element_count: raw.sensor_element_count,
            entry_section_offset: raw.entry_section_offset,
            entry_element_size: raw.entry_element_size,
            entry_element_count: raw.entry_element_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub id: u32,
    pub instance: u32,
    pub name_original: String,
    pub name_user: String,
    pub name_display: String,
}

impl From<&RawSensor> for SensorReading {
    fn from(raw: &RawSensor) -> Self {
        Self {
            id: raw.id,
            instance: raw.instance,
            name_original: decode_text(&raw.name_original),
            name_user: decode_text(&raw.name_user),
            name_display: decode_text(&raw.name_display),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryReading {
    /// Raw type code as found in the region
    pub entry_type: u32,
    pub sensor_index: u32,
    pub id: u32,
    pub name_original: String,
    pub name_user: String,
    pub units: String,
    pub value: f64,
    pub value_min: f64,
    pub value_max: f64,
    pub value_avg: f64,
    pub name_display: String,
    pub units_display: String,
}

impl EntryReading {
    /// Known entry type, or `None` for codes outside the protocol's range
    pub fn kind(&self) -> Option<EntryType> {
        EntryType::from_code(self.entry_type)
    }
}

impl From<&RawEntry> for EntryReading {
    fn from(raw: &RawEntry) -> Self {
        Self {
            entry_type: raw.entry_type,
            sensor_index: raw.sensor_index,
            id: raw.id,
            name_original: decode_text(&raw.name_original),
            name_user: decode_text(&raw.name_user),
            units: decode_text(&raw.units),
            value: raw.value,
            value_min: raw.value_min,
            value_max: raw.value_max,
            value_avg: raw.value_avg,
            name_display: decode_text(&raw.name_display),
            units_display: decode_text(&raw.units_display),
        }
    }
}

/// One rendered line of a viewer
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub sensor: String,
    pub entry: String,
    pub value: f64,
    pub units: String,
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {:.2} {}", self.sensor, self.entry, self.value, self.units)
    }
}

/// Copy of the region's header and tables at one point in time
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub header: HeaderInfo,
    pub sensors: Vec<SensorReading>,
    pub entries: Vec<EntryReading>,
}

impl Snapshot {
    /// Owning sensor of `entry`, or `None` if its index is out of range
    pub fn owner(&self, entry: &EntryReading) -> Option<&SensorReading> {
        self.sensors.get(entry.sensor_index as usize)
    }

    /// Entries owned by the sensor at `sensor_index`
    pub fn entries_of(&self, sensor_index: usize) -> impl Iterator<Item = &EntryReading> + '_ {
        self.entries
            .iter()
            .filter(move |e| e.sensor_index as usize == sensor_index)
    }

    /// First entry with `id`
    pub fn find_entry(&self, id: u32) -> Option<&EntryReading> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn rows(&self) -> Vec<Row> {
        self.entries
            .iter()
            .map(|entry| Row {
                sensor: self
                    .owner(entry)
                    .map(|s| s.name_display.clone())
                    .unwrap_or_else(|| UNKNOWN_SENSOR.to_string()),
                entry: entry.name_display.clone(),
                value: entry.value,
                units: entry.units.clone(),
            })
            .collect()
    }
}

/// Read-only connection to a published region
pub struct Consumer {
    region: SharedRegion,
}

impl Consumer {
    /// Map the configured region and validate its header.
    ///
    /// `NotFound` means no producer has published yet; retry later.
    pub fn connect(config: &ExchangeConfig) -> Result<Self> {
        Self::connect_named(&config.region_name)
    }

    pub fn connect_named(name: &str) -> Result<Self> {
        let region = SharedRegion::open_readonly(name)?;
        let consumer = Self { region };
        consumer.header()?;
        Ok(consumer)
    }

    /// Protocol name of the connected region
    pub fn name(&self) -> &str {
        self.region.name()
    }

    /// Whether the producer removed the region since this connection was made
    pub fn is_vanished(&self) -> bool {
        self.region.is_unlinked()
    }

    /// Read and validate the header
    pub fn header(&self) -> Result<HeaderInfo> {
        let header = HeaderInfo::from(self.region.read_header());
        if header.magic != HEADER_MAGIC {
            return Err(ExchangeError::invalid_format(
                self.name(),
                format!("magic 0x{:08X}, expected 0x{:08X}", header.magic, HEADER_MAGIC),
            ));
        }
        Ok(header)
    }

    /// Copy the header, sensor table and entry table.
    ///
    /// Element strides come from the header, so regions whose records are
    /// larger than the ones this crate writes are read correctly.
    pub fn snapshot(&self) -> Result<Snapshot> {
        if self.is_vanished() {
            return Err(ExchangeError::NotFound {
                name: self.name().to_string(),
            });
        }

        let header = self.header()?;
        self.check_section(
            "sensor",
            header.sensor_section_offset,
            header.sensor_element_size,
            header.sensor_element_count,
            SENSOR_RECORD_SIZE,
        )?;
        self.check_section(
            "entry",
            header.entry_section_offset,
            header.entry_element_size,
            header.entry_element_count,
            ENTRY_RECORD_SIZE,
        )?;

        let base = self.region.as_ptr() as *const u8;
        let record = |offset: u32, size: u32, index: u32| -> *const u8 {
            let at = offset as usize + index as usize * size as usize;
            // SAFETY: bounds validated by check_section
            unsafe { base.add(at) }
        };

        let sensors = (0..header.sensor_element_count)
            .map(|i| {
                let ptr = record(header.sensor_section_offset, header.sensor_element_size, i);
                // SAFETY: plain packed data inside the mapping
                let raw = unsafe { std::ptr::read_unaligned(ptr.cast::<RawSensor>()) };
                SensorReading::from(&raw)
            })
            .collect();

        let entries = (0..header.entry_element_count)
            .map(|i| {
                let ptr = record(header.entry_section_offset, header.entry_element_size, i);
                // SAFETY: plain packed data inside the mapping
                let raw = unsafe { std::ptr::read_unaligned(ptr.cast::<RawEntry>()) };
                EntryReading::from(&raw)
            })
            .collect();

        Ok(Snapshot {
            header,
            sensors,
            entries,
        })
    }

    fn check_section(&self, section: &str, offset: u32, size: u32, count: u32, min_size: usize) -> Result<()> {
        if count > 0 && (size as usize) < min_size {
            return Err(ExchangeError::invalid_format(
                self.name(),
                format!("{} element size {} is below {}", section, size, min_size),
            ));
        }
        if (offset as usize) < HEADER_SIZE && count > 0 {
            return Err(ExchangeError::invalid_format(
                self.name(),
                format!("{} section at {} overlaps the header", section, offset),
            ));
        }
        let end = (offset as u64) + (size as u64) * (count as u64);
        if end > self.region.size() as u64 {
            return Err(ExchangeError::invalid_format(
                self.name(),
                format!(
                    "{} section ends at {} past the {}-byte region",
                    section,
                    end,
                    self.region.size()
                ),
            ));
        }
        Ok(())
    }
}

/// Consumer that reconnects whenever its connection fails
pub struct Watcher {
    config: ExchangeConfig,
    consumer: Option<Consumer>,
}

impl Watcher {
    pub fn new(config: ExchangeConfig) -> Self {
        Self {
            config,
            consumer: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.consumer.is_some()
    }

    /// Take one snapshot, connecting first if needed.
    ///
    /// Returns `Ok(None)` when the region is missing or invalid; the
    /// connection is dropped and retried on the next poll. Other errors are
    /// returned as-is.
    pub fn poll(&mut self) -> Result<Option<Snapshot>> {
        if self.consumer.is_none() {
            match Consumer::connect(&self.config) {
                Ok(consumer) => {
                    debug!(region = %self.config.region_name, "Connected");
                    self.consumer = Some(consumer);
                }
                Err(e) if e.is_recoverable() => {
                    debug!(error = %e, "Region not available");
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }

        let result = match &self.consumer {
            Some(consumer) => consumer.snapshot(),
            None => return Ok(None),
        };

        match result {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) if e.is_recoverable() => {
                debug!(error = %e, "Dropping connection");
                self.consumer = None;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Drop the current connection, if any
    pub fn disconnect(&mut self) {
        self.consumer = None;
    }
}
