use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use rangedb::{Attrs, Table};

fn populated(n: u64) -> Table {
    let mut table = Table::new("asm_lines");
    for i in 0..n {
        // Mostly disjoint lines with a long range every 64 entries
        let len: u64 = if i % 64 == 0 { 256 } else { 4 };
        let _ = table.add(i * 4, len, None, Attrs::new());
    }
    table
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("table_insert");
    for n in [1_000u64, 10_000] {
        group.throughput(Throughput::Elements(n));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| populated(black_box(n)))
        });
    }
    group.finish();
}

fn bench_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("table_query");
    let table = populated(100_000);
    group.bench_function("get_at", |b| {
        let mut addr = 0u64;
        b.iter(|| {
            addr = (addr + 4099) % 400_000;
            black_box(table.get_at(addr))
        })
    });
    group.bench_function("iter_where_overlaps", |b| {
        let mut addr = 0u64;
        b.iter(|| {
            addr = (addr + 4099) % 400_000;
            black_box(table.iter_where_overlaps(addr, addr + 64).count())
        })
    });
    group.finish();
}

criterion_group!(benches, bench_insert, bench_queries);
criterion_main!(benches);
