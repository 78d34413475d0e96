//! Latency benchmarks for the signal-detection hot path.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rust_decimal::Decimal;

use whalecopy::core::types::{Market, PositionSample, PositionSide};
use whalecopy::tracker::{confidence_score, diff_positions};

fn book(size: usize, offset: usize) -> Vec<PositionSample> {
    (0..size)
        .map(|i| PositionSample {
            symbol: format!("SYM{}USDT", i + offset),
            market: Market::UsdmFutures,
            side: if i % 2 == 0 {
                PositionSide::Long
            } else {
                PositionSide::Short
            },
            quantity: Decimal::new(i as i64 + 1, 2),
            entry_price: Decimal::new(50_000 + i as i64, 0),
            leverage: Some((i % 20 + 1) as u32),
            roe: Some(Decimal::new(i as i64 % 40, 0)),
        })
        .collect()
}

fn bench_snapshot_diff(c: &mut Criterion) {
    let previous = book(50, 0);
    let current = book(50, 10); // 10 closed, 10 opened, 40 unchanged

    c.bench_function("diff_50_positions", |b| {
        b.iter(|| diff_positions(black_box(&previous), black_box(&current)))
    });
}

fn bench_confidence(c: &mut Criterion) {
    c.bench_function("confidence_score", |b| {
        b.iter(|| {
            confidence_score(
                black_box(85),
                black_box(Some(Decimal::new(23, 0))),
                black_box(Some(12)),
            )
        })
    });
}

criterion_group!(benches, bench_snapshot_diff, bench_confidence);
criterion_main!(benches);
