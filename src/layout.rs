//! Binary layout of the sensor exchange region
//!
//! The region is one contiguous block:
//!
//! ```text
//! [Header (44 B)][Sensor x sensor_count (392 B each)][Entry x entry_count (460 B each)]
//! ```
//!
//! All records are 1-byte aligned with no padding. Readers locate the sensor
//! and entry tables from the header's offset/size/count fields only.

use std::mem;

/// Classic header magic, `"SiWH"` in memory order
pub const HEADER_MAGIC: u32 = 0x4857_6953;

/// Newer header magic (`"HWiS"`). Recognized, never emitted.
pub const HEADER_MAGIC_NEW: u32 = 0x5369_5748;

pub const PROTOCOL_VERSION: u32 = 1;
pub const PROTOCOL_VERSION2: u32 = 1;

/// Width of every name field
pub const NAME_LEN: usize = 128;

/// Width of every units field
pub const UNITS_LEN: usize = 16;

/// Minimum size of the mapped region (16 MiB)
pub const MIN_REGION_SIZE: usize = 16 * 1024 * 1024;

pub const HEADER_SIZE: usize = mem::size_of::<RawHeader>();
pub const SENSOR_RECORD_SIZE: usize = mem::size_of::<RawSensor>();
pub const ENTRY_RECORD_SIZE: usize = mem::size_of::<RawEntry>();

/// Region header at offset 0
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawHeader {
    pub magic: u32,
    pub version: u32,
    pub version2: u32,
    /// Unix timestamp in seconds
    pub last_update: i64,
    pub sensor_section_offset: u32,
    pub sensor_element_size: u32,
    pub sensor_element_count: u32,
    pub entry_section_offset: u32,
    pub entry_element_size: u32,
    pub entry_element_count: u32,
}

/// Static descriptor of a logical sensor
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct RawSensor {
    pub id: u32,
    pub instance: u32,
    pub name_original: [u8; NAME_LEN],
    pub name_user: [u8; NAME_LEN],
    pub name_display: [u8; NAME_LEN],
}

/// One measurable quantity owned by a sensor
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct RawEntry {
    pub entry_type: u32,
    /// Position of the owning sensor in the sensor table
    pub sensor_index: u32,
    pub id: u32,
    pub name_original: [u8; NAME_LEN],
    pub name_user: [u8; NAME_LEN],
    pub units: [u8; UNITS_LEN],
    pub value: f64,
    pub value_min: f64,
    pub value_max: f64,
    pub value_avg: f64,
    pub name_display: [u8; NAME_LEN],
    pub units_display: [u8; UNITS_LEN],
}

const _: () = assert!(HEADER_SIZE == 44);
const _: () = assert!(SENSOR_RECORD_SIZE == 392);
const _: () = assert!(ENTRY_RECORD_SIZE == 460);

impl RawSensor {
    /// Build a sensor record; the three name fields carry the same text.
    pub fn new(id: u32, instance: u32, name: &str) -> Self {
        let name = encode_text::<NAME_LEN>(name);
        Self {
            id,
            instance,
            name_original: name,
            name_user: name,
            name_display: name,
        }
    }
}

impl RawEntry {
    /// Build an entry record with `value_min == value_max == value_avg == value`.
    pub fn new(
        entry_type: EntryType,
        sensor_index: u32,
        id: u32,
        name: &str,
        units: &str,
        value: f64,
    ) -> Self {
        let name = encode_text::<NAME_LEN>(name);
        let units = encode_text::<UNITS_LEN>(units);
        Self {
            entry_type: entry_type.code(),
            sensor_index,
            id,
            name_original: name,
            name_user: name,
            units,
            value,
            value_min: value,
            value_max: value,
            value_avg: value,
            name_display: name,
            units_display: units,
        }
    }
}

/// Kind of reading carried by an entry
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    None = 0,
    Temperature = 1,
    Voltage = 2,
    Fan = 3,
    Current = 4,
    Power = 5,
    Clock = 6,
    Usage = 7,
    Other = 8,
}

impl EntryType {
    #[inline]
    pub const fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => EntryType::None,
            1 => EntryType::Temperature,
            2 => EntryType::Voltage,
            3 => EntryType::Fan,
            4 => EntryType::Current,
            5 => EntryType::Power,
            6 => EntryType::Clock,
            7 => EntryType::Usage,
            8 => EntryType::Other,
            _ => return None,
        })
    }
}

/// Section offsets and total size of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionLayout {
    pub sensor_count: usize,
    pub entry_count: usize,
    pub sensor_offset: usize,
    pub entry_offset: usize,
    /// Bytes actually used by header and both tables
    pub used_size: usize,
    /// Mapped size, never below the minimum region size
    pub total_size: usize,
}

/// Compute the layout for a topology using the protocol's minimum region size.
pub fn compute_layout(sensor_count: usize, entry_count: usize) -> RegionLayout {
    compute_layout_with_min(sensor_count, entry_count, MIN_REGION_SIZE)
}

/// Compute the layout with an explicit lower bound on the total size.
pub fn compute_layout_with_min(sensor_count: usize, entry_count: usize, min_size: usize) -> RegionLayout {
    let sensor_offset = HEADER_SIZE;
    let entry_offset = sensor_offset + sensor_count * SENSOR_RECORD_SIZE;
    let used_size = entry_offset + entry_count * ENTRY_RECORD_SIZE;

    RegionLayout {
        sensor_count,
        entry_count,
        sensor_offset,
        entry_offset,
        used_size,
        total_size: used_size.max(min_size),
    }
}

impl RegionLayout {
    /// Header describing this layout. `last_update` is left at zero.
    ///
    /// Returns `None` when an offset or count does not fit the header's
    /// 32-bit fields.
    pub fn header(&self) -> Option<RawHeader> {
        Some(RawHeader {
            magic: HEADER_MAGIC,
            version: PROTOCOL_VERSION,
            version2: PROTOCOL_VERSION2,
            last_update: 0,
            sensor_section_offset: u32::try_from(self.sensor_offset).ok()?,
            sensor_element_size: SENSOR_RECORD_SIZE as u32,
            sensor_element_count: u32::try_from(self.sensor_count).ok()?,
            entry_section_offset: u32::try_from(self.entry_offset).ok()?,
            entry_element_size: ENTRY_RECORD_SIZE as u32,
            entry_element_count: u32::try_from(self.entry_count).ok()?,
        })
    }
}

/// Encode text into a NUL-padded fixed field.
///
/// Text longer than the field is cut at a UTF-8 character boundary. Text
/// that exactly fills the field carries no terminator.
pub fn encode_text<const N: usize>(text: &str) -> [u8; N] {
    let mut out = [0u8; N];
    let mut len = text.len().min(N);
    while !text.is_char_boundary(len) {
        len -= 1;
    }
    out[..len].copy_from_slice(&text.as_bytes()[..len]);
    out
}

/// Decode a fixed text field up to its first NUL, replacing invalid UTF-8.
pub fn decode_text(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn test_record_field_offsets() {
        assert_eq!(offset_of!(RawHeader, last_update), 12);
        assert_eq!(offset_of!(RawHeader, sensor_section_offset), 20);
        assert_eq!(offset_of!(RawHeader, entry_element_count), 40);

        assert_eq!(offset_of!(RawSensor, name_original), 8);
        assert_eq!(offset_of!(RawSensor, name_display), 264);

        assert_eq!(offset_of!(RawEntry, name_original), 12);
        assert_eq!(offset_of!(RawEntry, units), 268);
        assert_eq!(offset_of!(RawEntry, value), 284);
        assert_eq!(offset_of!(RawEntry, value_avg), 308);
        assert_eq!(offset_of!(RawEntry, name_display), 316);
        assert_eq!(offset_of!(RawEntry, units_display), 444);
    }

    #[test]
    fn test_layout_offsets_follow_counts() {
        for &(sensors, entries) in &[(0, 0), (1, 2), (7, 40), (300, 9000)] {
            let layout = compute_layout(sensors, entries);
            assert_eq!(layout.sensor_offset, HEADER_SIZE);
            assert!(layout.entry_offset >= layout.sensor_offset + sensors * SENSOR_RECORD_SIZE);
            let used = layout.entry_offset + entries * ENTRY_RECORD_SIZE;
            assert!(layout.total_size >= used.max(MIN_REGION_SIZE));
        }
    }

    #[test]
    fn test_layout_grows_past_minimum() {
        let entries = MIN_REGION_SIZE / ENTRY_RECORD_SIZE + 10;
        let layout = compute_layout(1, entries);
        assert_eq!(layout.total_size, layout.used_size);
        assert!(layout.total_size > MIN_REGION_SIZE);
    }

    #[test]
    fn test_header_from_layout() {
        let header = compute_layout(2, 3).header().unwrap();
        assert_eq!({ header.magic }, HEADER_MAGIC);
        assert_eq!({ header.sensor_section_offset }, 44);
        assert_eq!({ header.entry_section_offset }, 44 + 2 * 392);
        assert_eq!({ header.entry_element_size }, 460);
        assert_eq!({ header.entry_element_count }, 3);
    }

    #[test]
    fn test_text_truncates_on_char_boundary() {
        let field = encode_text::<4>("a°C");
        assert_eq!(&field, b"a\xc2\xb0C");
        assert_eq!(decode_text(&field), "a°C");

        // "°" would straddle the boundary, so it is dropped entirely
        let field = encode_text::<2>("a°");
        assert_eq!(&field, b"a\0");
        assert_eq!(decode_text(&field), "a");
    }

    #[test]
    fn test_entry_type_codes() {
        assert_eq!(EntryType::Temperature.code(), 1);
        assert_eq!(EntryType::Fan.code(), 3);
        assert_eq!(EntryType::from_code(8), Some(EntryType::Other));
        assert_eq!(EntryType::from_code(42), None);
    }
}
