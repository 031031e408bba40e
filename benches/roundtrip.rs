#![allow(missing_docs)]

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use persistream::{Handle, InputStream, OutputStream, Persistence, Persistent, Registry};
use std::hint::black_box;

#[derive(Default, Persistent)]
#[persist(name = "bench::Item")]
struct BenchItem {
    id: u64,
    payload: Vec<u64>,
    owner: Option<Handle>,
}

#[derive(Default, Persistent)]
#[persist(name = "bench::Owner")]
struct BenchOwner {
    name: String,
}

fn registry() -> Registry {
    Registry::builder()
        .register::<BenchItem>()
        .register::<BenchOwner>()
        .build()
        .expect("Failed to build registry")
}

/// Items sharing a handful of owners, so back-references are exercised.
fn generate_data(count: usize) -> Vec<Handle> {
    let owners: Vec<Handle> = (0..16)
        .map(|i| Handle::new(BenchOwner { name: format!("owner-{i}") }))
        .collect();
    (0..count)
        .map(|i| {
            Handle::new(BenchItem {
                id: i as u64,
                payload: vec![i as u64; 32],
                owner: Some(owners[i % owners.len()].clone()),
            })
        })
        .collect()
}

// --- BENCHMARKS ---

fn bench_write(c: &mut Criterion) {
    let item_count = 10_000;
    let registry = registry();
    let data = generate_data(item_count);

    let mut group = c.benchmark_group("Stream Write");
    group.throughput(Throughput::Elements(item_count as u64));

    group.bench_function("write_graph", |b| {
        let mut buffer = Vec::with_capacity(4 << 20);
        b.iter(|| {
            buffer.clear();
            let mut out = OutputStream::new(&registry, &mut buffer);
            out.put(black_box(&data)).expect("Failed to write graph");
            out.close().expect("Failed to close stream");
        });
    });

    group.bench_function("write_flushed_events", |b| {
        let mut buffer = Vec::with_capacity(4 << 20);
        b.iter(|| {
            buffer.clear();
            let mut out = OutputStream::new(&registry, &mut buffer);
            for item in black_box(&data) {
                out.write_object(Some(item)).expect("Failed to write item");
                out.flush().expect("Failed to flush");
            }
            out.close().expect("Failed to close stream");
        });
    });

    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let item_count = 10_000;
    let registry = registry();
    let data = generate_data(item_count);

    let mut bytes = Vec::new();
    let mut out = OutputStream::new(&registry, &mut bytes);
    out.put(&data).expect("Failed to write graph");
    out.close().expect("Failed to close stream");
    println!("Stream size: {} bytes", bytes.len());

    let mut group = c.benchmark_group("Stream Read");
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    group.bench_function("read_graph", |b| {
        b.iter(|| {
            let mut input =
                InputStream::new(&registry, black_box(bytes.as_slice())).expect("Failed to open");
            let items: Vec<Handle> = input.get().expect("Failed to read graph");
            assert_eq!(items.len(), item_count);
        });
    });

    let facade = Persistence::new(&registry);
    let single = facade.to_bytes(data.first()).expect("Failed to write item");
    group.bench_function("read_single_item", |b| {
        b.iter(|| {
            let _item = facade
                .from_bytes(black_box(&single))
                .expect("Failed to read item");
        });
    });

    group.finish();
}

criterion_group!(benches, bench_write, bench_read);
criterion_main!(benches);
