use criterion::{
    black_box, criterion_group, criterion_main, Criterion, Throughput,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use lpm_table::{LpmPrefix, LpmTable, LEVEL_MAX};

const PREFIXES_NUM: usize = 20_000;
const SEARCHES_NUM: u64 = 10_000;

fn random_prefixes(num: usize) -> Vec<LpmPrefix> {
    let mut rng = StdRng::seed_from_u64(0x7a_6b_5c_4d);
    let mut pfxs = Vec::with_capacity(num);
    for _ in 0..num {
        let mut addr = [0u8; LEVEL_MAX];
        for byte in addr.iter_mut().take(4) {
            *byte = rng.gen();
        }
        let len = rng.gen_range(8..=28);
        pfxs.push(LpmPrefix::new(addr, len).unwrap().truncate_to_len());
    }
    pfxs
}

fn build_table(pfxs: &[LpmPrefix]) -> LpmTable<u32> {
    let mut table = LpmTable::new("bench");
    for (i, pfx) in pfxs.iter().enumerate() {
        // duplicates conflict, which is fine for a benchmark corpus
        let _ = table.insert(pfx, i as u32);
    }
    table
}

fn criterion_benchmark(c: &mut Criterion) {
    let pfxs = random_prefixes(PREFIXES_NUM);

    let mut group = c.benchmark_group("insert");
    group.sample_size(10);
    group.throughput(Throughput::Elements(PREFIXES_NUM as u64));
    group.bench_function("full_table", |b| {
        b.iter(|| build_table(black_box(&pfxs)))
    });
    group.finish();

    let table = build_table(&pfxs);
    let mut rng = StdRng::seed_from_u64(0x11_22_33_44);
    let keys: Vec<[u8; LEVEL_MAX]> = (0..SEARCHES_NUM)
        .map(|_| {
            let mut addr = [0u8; LEVEL_MAX];
            for byte in addr.iter_mut().take(4) {
                *byte = rng.gen();
            }
            addr
        })
        .collect();

    let mut group = c.benchmark_group("search");
    group.throughput(Throughput::Elements(SEARCHES_NUM));
    group.bench_function("random_keys", |b| {
        b.iter(|| {
            let mut hits = 0u64;
            for key in &keys {
                if table.search(black_box(key)).payload.is_some() {
                    hits += 1;
                }
            }
            hits
        })
    });
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
