use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use formula_olap::{
    Aggregator, AggregationKind, CubeEngine, CubeQuery, InMemoryTable, MeasureRegistry, Value,
};
use std::time::Duration;

fn bench_rows() -> usize {
    std::env::var("FORMULA_OLAP_REDUCER_BENCH_ROWS")
        .ok()
        .and_then(|v| v.replace('_', "").parse::<usize>().ok())
        .filter(|&v| v >= 10_000 && v <= 5_000_000)
        .unwrap_or(200_000)
}

fn build_table(rows: usize, pre_aggregate: bool) -> InMemoryTable {
    let mut table =
        InMemoryTable::new("trades", ["desk", "ccy", "qty", "price"]).pre_aggregate(pre_aggregate);
    for i in 0..rows {
        table
            .push_row([
                ("desk", Value::from(format!("desk{}", i % 50))),
                ("ccy", Value::from(["EUR", "USD", "JPY"][i % 3])),
                ("qty", Value::from((i % 100) as i64)),
                ("price", Value::from((i % 1_000) as f64 / 10.0)),
            ])
            .unwrap();
    }
    table
}

fn registry() -> MeasureRegistry {
    let mut registry = MeasureRegistry::new();
    registry.add(Aggregator::sum("qty.sum", "qty")).unwrap();
    registry
        .add(Aggregator::new("price.max", "price", AggregationKind::Max))
        .unwrap();
    registry.add(Aggregator::count_rows("count")).unwrap();
    registry
}

fn bench_reducer(c: &mut Criterion) {
    let rows = bench_rows();
    let query = CubeQuery::builder()
        .measures(["qty.sum", "price.max", "count"])
        .group_by(["desk", "ccy"])
        .build();

    let mut group = c.benchmark_group("reducer");
    group.throughput(Throughput::Elements(rows as u64));
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(10);

    for pre_aggregate in [false, true] {
        let engine = CubeEngine::new(registry(), build_table(rows, pre_aggregate));
        let label = if pre_aggregate { "pre_aggregated" } else { "raw" };
        group.bench_with_input(BenchmarkId::new(label, rows), &query, |b, query| {
            b.iter(|| black_box(engine.execute(query).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_reducer);
criterion_main!(benches);
