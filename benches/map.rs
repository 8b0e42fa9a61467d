use criterion::Criterion;
use criterion::Throughput;
use criterion::{criterion_group, criterion_main};
use rand::{thread_rng, Rng};
use relaymap::RelayMap;

const NUM_KEYS: usize = 1 << 14;
const NUM_OPS: u64 = 1_000_000;

fn bench_relaymap(c: &mut Criterion) {
    let mut group = c.benchmark_group("relaymap");
    group.throughput(Throughput::Elements(NUM_OPS * 2));
    group.sample_size(10);
    group.bench_function("insert_and_remove", |b| {
        let map = RelayMap::with_capacity(NUM_KEYS);

        let mut rng = thread_rng();
        b.iter(|| {
            for i in 0..NUM_OPS {
                let key = (rng.gen::<u32>() & (NUM_KEYS as u32 - 1)) as i32 + 1;
                map.put(key, (i & 0xFFFF) as i32 + 1).unwrap();
                let key = (rng.gen::<u32>() & (NUM_KEYS as u32 - 1)) as i32 + 1;
                map.remove(key).unwrap();
            }
        })
    });
    group.finish();
}

fn bench_std_hashmap(c: &mut Criterion) {
    let mut group = c.benchmark_group("std_hashmap");
    group.throughput(Throughput::Elements(NUM_OPS * 2));
    group.sample_size(10);
    group.bench_function("insert_and_remove", |b| {
        let mut map = std::collections::HashMap::with_capacity(NUM_KEYS);

        let mut rng = thread_rng();
        b.iter(|| {
            for i in 0..NUM_OPS {
                let key = (rng.gen::<u32>() & (NUM_KEYS as u32 - 1)) as i32 + 1;
                map.insert(key, (i & 0xFFFF) as i32 + 1);
                let key = (rng.gen::<u32>() & (NUM_KEYS as u32 - 1)) as i32 + 1;
                map.remove(&key);
            }
        })
    });
    group.finish();
}

criterion_group!(benches, bench_std_hashmap, bench_relaymap);
criterion_main!(benches);
