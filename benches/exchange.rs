use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sensor_exchange::mutex::NamedMutex;
use sensor_exchange::{Consumer, EntrySpec, EntryType, ExchangeConfig, Producer, Topology};

fn bench_config() -> ExchangeConfig {
    let pid = std::process::id();
    ExchangeConfig::default().with_names(
        format!("Global\\sx_bench_{}", pid),
        format!("Global\\sx_bench_mutex_{}", pid),
    )
}

fn wide_topology() -> Topology {
    let mut topology = Topology::new();
    for s in 0..16u32 {
        let sensor = topology.add_sensor(s, 0, format!("Sensor {}", s));
        for e in 0..16u32 {
            let id = s * 100 + e;
            topology.add_entry(sensor, EntrySpec::new(id, format!("Entry {}", id), "°C", EntryType::Temperature));
        }
    }
    topology
}

fn bench_exchange(c: &mut Criterion) {
    let config = bench_config();
    let mut producer = Producer::new(wide_topology(), config.clone());
    producer.create().expect("create");
    let consumer = Consumer::connect(&config).expect("connect");

    let values: Vec<(u32, f64)> = (0..16u32)
        .flat_map(|s| (0..16u32).map(move |e| (s * 100 + e, 40.0 + e as f64)))
        .collect();

    c.bench_function("update_256_entries", |b| {
        b.iter(|| producer.update(black_box(&values)))
    });

    c.bench_function("snapshot_256_entries", |b| {
        b.iter(|| black_box(consumer.snapshot().expect("snapshot")))
    });

    drop(consumer);
    drop(producer);
    let _ = NamedMutex::remove(&config.mutex_name);
}

criterion_group!(benches, bench_exchange);
criterion_main!(benches);
