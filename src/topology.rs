//! Sensor/entry topology held by a producer
//!
//! Sensors and entries live in flat tables and refer to each other by
//! position. The published entry table lists each sensor's entries in order,
//! sensor by sensor, so an entry's flat index depends on the whole topology.

use crate::layout::EntryType;

/// Position of a sensor in the sensor table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SensorHandle(pub(crate) usize);

impl SensorHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Position of an entry within its owning sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryHandle {
    pub(crate) sensor: usize,
    pub(crate) entry: usize,
}

impl EntryHandle {
    pub fn sensor(self) -> SensorHandle {
        SensorHandle(self.sensor)
    }
}

/// Static description of an entry
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySpec {
    pub id: u32,
    pub name: String,
    pub units: String,
    pub entry_type: EntryType,
    /// Initial value; also the initial min, max and average
    pub value: f64,
}

impl EntrySpec {
    pub fn new(id: u32, name: impl Into<String>, units: impl Into<String>, entry_type: EntryType) -> Self {
        Self {
            id,
            name: name.into(),
            units: units.into(),
            entry_type,
            value: 0.0,
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = value;
        self
    }
}

/// An entry with its locally staged values
#[derive(Debug, Clone)]
pub struct EntryState {
    pub spec: EntrySpec,
    pub value: f64,
    pub value_min: f64,
    pub value_max: f64,
    /// Written once at publish time, never recomputed
    pub value_avg: f64,
}

impl EntryState {
    fn new(spec: EntrySpec) -> Self {
        let value = spec.value;
        Self {
            spec,
            value,
            value_min: value,
            value_max: value,
            value_avg: value,
        }
    }

    /// Stage a new value, extending the running extrema.
    ///
    /// Extrema cover every value seen since the entry was created.
    pub fn record(&mut self, value: f64) {
        self.value = value;
        self.value_min = self.value_min.min(value);
        self.value_max = self.value_max.max(value);
    }
}

/// A sensor and the entries it owns
#[derive(Debug, Clone)]
pub struct SensorDef {
    pub id: u32,
    pub instance: u32,
    pub name: String,
    pub entries: Vec<EntryState>,
}

/// The full set of sensors and entries to publish
#[derive(Debug, Clone, Default)]
pub struct Topology {
    sensors: Vec<SensorDef>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sensor; ids are caller-assigned
    pub fn add_sensor(&mut self, id: u32, instance: u32, name: impl Into<String>) -> SensorHandle {
        self.sensors.push(SensorDef {
            id,
            instance,
            name: name.into(),
            entries: Vec::new(),
        });
        SensorHandle(self.sensors.len() - 1)
    }

    /// Add an entry owned by `sensor`.
    ///
    /// Returns `None` if the handle does not belong to this topology.
    pub fn add_entry(&mut self, sensor: SensorHandle, spec: EntrySpec) -> Option<EntryHandle> {
        let owner = self.sensors.get_mut(sensor.0)?;
        owner.entries.push(EntryState::new(spec));
        Some(EntryHandle {
            sensor: sensor.0,
            entry: owner.entries.len() - 1,
        })
    }

    pub fn sensors(&self) -> &[SensorDef] {
        &self.sensors
    }

    pub fn sensor_count(&self) -> usize {
        self.sensors.len()
    }

    pub fn entry_count(&self) -> usize {
        self.sensors.iter().map(|s| s.entries.len()).sum()
    }

    pub fn entry(&self, handle: EntryHandle) -> Option<&EntryState> {
        self.sensors.get(handle.sensor)?.entries.get(handle.entry)
    }

    pub fn entry_mut(&mut self, handle: EntryHandle) -> Option<&mut EntryState> {
        self.sensors.get_mut(handle.sensor)?.entries.get_mut(handle.entry)
    }

    /// Stage `value` on every entry carrying `id`; returns how many matched.
    pub fn record_by_id(&mut self, id: u32, value: f64) -> usize {
        let mut matched = 0;
        for entry in self.entries_mut().filter(|e| e.spec.id == id) {
            entry.record(value);
            matched += 1;
        }
        matched
    }

    /// Entries in published table order, with their owning sensor's index
    pub fn entries(&self) -> impl Iterator<Item = (usize, &EntryState)> + '_ {
        self.sensors
            .iter()
            .enumerate()
            .flat_map(|(index, sensor)| sensor.entries.iter().map(move |e| (index, e)))
    }

    fn entries_mut(&mut self) -> impl Iterator<Item = &mut EntryState> + '_ {
        self.sensors.iter_mut().flat_map(|s| s.entries.iter_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_are_ordered_by_sensor() {
        let mut topology = Topology::new();
        let cpu = topology.add_sensor(1, 0, "CPU");
        let gpu = topology.add_sensor(2, 0, "GPU");

        // Interleave additions across sensors
        topology.add_entry(gpu, EntrySpec::new(20, "GPU Temp", "°C", EntryType::Temperature));
        topology.add_entry(cpu, EntrySpec::new(10, "CPU Temp", "°C", EntryType::Temperature));
        topology.add_entry(gpu, EntrySpec::new(21, "GPU Fan", "RPM", EntryType::Fan));

        let order: Vec<(usize, u32)> = topology.entries().map(|(s, e)| (s, e.spec.id)).collect();
        assert_eq!(order, vec![(0, 10), (1, 20), (1, 21)]);
        assert_eq!(topology.entry_count(), 3);
    }

    #[test]
    fn test_running_extrema() {
        let mut topology = Topology::new();
        let sensor = topology.add_sensor(1, 0, "S");
        let handle = topology
            .add_entry(sensor, EntrySpec::new(7, "E", "", EntryType::Other).with_value(10.0))
            .unwrap();

        for v in [10.0, 5.0, 20.0, 15.0] {
            topology.record_by_id(7, v);
        }

        let entry = topology.entry(handle).unwrap();
        assert_eq!(entry.value, 15.0);
        assert_eq!(entry.value_min, 5.0);
        assert_eq!(entry.value_max, 20.0);
        assert_eq!(entry.value_avg, 10.0);
    }

    #[test]
    fn test_foreign_handle_is_rejected() {
        let mut topology = Topology::new();
        assert!(topology
            .add_entry(SensorHandle(3), EntrySpec::new(1, "E", "", EntryType::Other))
            .is_none());
        assert_eq!(topology.record_by_id(99, 1.0), 0);
    }
}
