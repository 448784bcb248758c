//! Producer/consumer round trips over real shared memory

use std::time::Duration;

use sensor_exchange::mutex::NamedMutex;
use sensor_exchange::{
    Consumer, EntrySpec, EntryType, ExchangeConfig, ExchangeError, FlushOutcome, Producer, Topology,
    Watcher,
};

fn test_config(label: &str) -> ExchangeConfig {
    let pid = std::process::id();
    ExchangeConfig::default()
        .with_names(
            format!("Global\\sx_it_{}_{}", label, pid),
            format!("Global\\sx_it_mutex_{}_{}", label, pid),
        )
        .with_min_region_size(256 * 1024)
        .with_lock_timeout(Duration::from_millis(200))
}

/// Three sensors, entries added out of sensor order
fn hardware_topology() -> Topology {
    let mut topology = Topology::new();
    let cpu = topology.add_sensor(0x100, 0, "CPU [#0]: Fake Processor");
    let gpu = topology.add_sensor(0x200, 1, "GPU [#0]: Fake Graphics");
    let psu = topology.add_sensor(0x300, 0, "PSU");

    topology.add_entry(gpu, EntrySpec::new(0x201, "GPU Temperature", "°C", EntryType::Temperature).with_value(52.0));
    topology.add_entry(cpu, EntrySpec::new(0x101, "Core VID", "V", EntryType::Voltage).with_value(1.25));
    topology.add_entry(cpu, EntrySpec::new(0x102, "Core Clock", "MHz", EntryType::Clock).with_value(4200.0));
    topology.add_entry(gpu, EntrySpec::new(0x202, "GPU Fan", "RPM", EntryType::Fan).with_value(1500.0));
    topology.add_entry(psu, EntrySpec::new(0x301, "Total Power", "W", EntryType::Power).with_value(310.0));
    topology.add_entry(psu, EntrySpec::new(0x302, "Load", "%", EntryType::Usage).with_value(40.0));
    topology
}

fn cleanup(config: &ExchangeConfig) {
    NamedMutex::remove(&config.mutex_name).unwrap();
}

#[test]
fn test_published_topology_reads_back() {
    let config = test_config("roundtrip");
    let topology = hardware_topology();
    let mut producer = Producer::new(topology.clone(), config.clone());
    producer.create().unwrap();

    let consumer = Consumer::connect(&config).unwrap();
    let snapshot = consumer.snapshot().unwrap();

    assert_eq!(snapshot.header.sensor_element_count, 3);
    assert_eq!(snapshot.header.entry_element_count, 6);
    assert_eq!(snapshot.header.sensor_section_offset, 44);
    assert_eq!(snapshot.header.entry_section_offset, 44 + 3 * 392);
    assert_eq!(snapshot.header.version, 1);
    assert_eq!(snapshot.header.version2, 1);

    for (reading, sensor) in snapshot.sensors.iter().zip(topology.sensors()) {
        assert_eq!(reading.id, sensor.id);
        assert_eq!(reading.instance, sensor.instance);
        assert_eq!(reading.name_original, sensor.name);
        assert_eq!(reading.name_user, sensor.name);
        assert_eq!(reading.name_display, sensor.name);
    }

    for (reading, (sensor_index, entry)) in snapshot.entries.iter().zip(topology.entries()) {
        assert_eq!(reading.id, entry.spec.id);
        assert_eq!(reading.sensor_index as usize, sensor_index);
        assert_eq!(reading.kind(), Some(entry.spec.entry_type));
        assert_eq!(reading.name_display, entry.spec.name);
        assert_eq!(reading.units, entry.spec.units);
        assert_eq!(reading.units_display, entry.spec.units);
        assert_eq!(reading.value, entry.spec.value);
        assert_eq!(reading.value_avg, entry.spec.value);
    }

    let gpu_entries: Vec<u32> = snapshot.entries_of(1).map(|e| e.id).collect();
    assert_eq!(gpu_entries, vec![0x201, 0x202]);
    assert_eq!(snapshot.rows()[0].to_string(), "[CPU [#0]: Fake Processor] Core VID: 1.25 V");

    drop(producer);
    cleanup(&config);
}

#[test]
fn test_repeated_identical_updates_are_stable() {
    let config = test_config("idempotent");
    let mut producer = Producer::new(hardware_topology(), config.clone());
    producer.create().unwrap();
    let consumer = Consumer::connect(&config).unwrap();
    let before = consumer.snapshot().unwrap();

    for _ in 0..5 {
        assert_eq!(producer.update(&[(0x201, 52.0)]), FlushOutcome::Flushed);
    }

    let after = consumer.snapshot().unwrap();
    let temp = after.find_entry(0x201).unwrap();
    assert_eq!(temp.value, 52.0);
    assert_eq!(temp.value_min, 52.0);
    assert_eq!(temp.value_max, 52.0);

    assert_eq!(before.sensors, after.sensors);
    for (a, b) in before.entries.iter().zip(&after.entries) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.entry_type, b.entry_type);
        assert_eq!(a.sensor_index, b.sensor_index);
        assert_eq!(a.name_original, b.name_original);
        assert_eq!(a.units, b.units);
    }

    drop(producer);
    cleanup(&config);
}

#[test]
fn test_running_extrema_are_visible_to_consumers() {
    let config = test_config("extrema");
    let mut topology = Topology::new();
    let sensor = topology.add_sensor(1, 0, "Probe");
    topology.add_entry(sensor, EntrySpec::new(7, "Reading", "", EntryType::Other).with_value(10.0));

    let mut producer = Producer::new(topology, config.clone());
    producer.create().unwrap();

    for v in [10.0, 5.0, 20.0, 15.0] {
        producer.update(&[(7, v)]);
    }

    let snapshot = Consumer::connect(&config).unwrap().snapshot().unwrap();
    let entry = snapshot.find_entry(7).unwrap();
    assert_eq!(entry.value, 15.0);
    assert_eq!(entry.value_min, 5.0);
    assert_eq!(entry.value_max, 20.0);
    assert_eq!(entry.value_avg, 10.0);
    assert!(snapshot.header.last_update > 0);

    drop(producer);
    cleanup(&config);
}

#[test]
fn test_consumer_connects_after_producer_starts() {
    let config = test_config("late");

    assert!(matches!(
        Consumer::connect(&config),
        Err(ExchangeError::NotFound { .. })
    ));

    let mut producer = Producer::new(hardware_topology(), config.clone());
    producer.create().unwrap();

    let snapshot = Consumer::connect(&config).unwrap().snapshot().unwrap();
    assert_eq!(snapshot.sensors.len(), 3);
    assert_eq!(snapshot.entries.len(), 6);

    drop(producer);
    cleanup(&config);
}

#[test]
fn test_watcher_follows_producer_restart() {
    let config = test_config("restart");
    let mut watcher = Watcher::new(config.clone());
    assert!(watcher.poll().unwrap().is_none());

    let mut first = Producer::new(hardware_topology(), config.clone());
    first.create().unwrap();
    assert_eq!(watcher.poll().unwrap().unwrap().entries.len(), 6);

    first.close();
    assert!(watcher.poll().unwrap().is_none());
    assert!(Consumer::connect(&config).is_err());

    let mut topology = Topology::new();
    let sensor = topology.add_sensor(9, 0, "Replacement");
    topology.add_entry(sensor, EntrySpec::new(90, "Only", "x", EntryType::Other));
    let mut second = Producer::new(topology, config.clone());
    second.create().unwrap();

    let snapshot = watcher.poll().unwrap().unwrap();
    assert_eq!(snapshot.sensors[0].name_display, "Replacement");
    assert_eq!(snapshot.entries.len(), 1);

    drop(second);
    cleanup(&config);
}

#[test]
fn test_close_removes_region() {
    let config = test_config("close");
    let mut producer = Producer::new(hardware_topology(), config.clone());
    producer.create().unwrap();
    let consumer = Consumer::connect(&config).unwrap();

    producer.close();
    assert!(consumer.is_vanished());
    assert!(matches!(
        consumer.snapshot(),
        Err(ExchangeError::NotFound { .. })
    ));

    cleanup(&config);
}

#[test]
fn test_long_names_are_truncated() {
    let config = test_config("names");
    let long = "Ä".repeat(100); // 200 bytes of UTF-8
    let mut topology = Topology::new();
    let sensor = topology.add_sensor(1, 0, long.clone());
    topology.add_entry(sensor, EntrySpec::new(2, long.clone(), "°C°C°C°C°C°C", EntryType::Temperature));

    let mut producer = Producer::new(topology, config.clone());
    producer.create().unwrap();
    let snapshot = Consumer::connect(&config).unwrap().snapshot().unwrap();

    assert_eq!(snapshot.sensors[0].name_display, "Ä".repeat(64));
    assert_eq!(snapshot.entries[0].units, "°C°C°C°C°C");

    drop(producer);
    cleanup(&config);
}
