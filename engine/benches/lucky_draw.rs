//! Lucky draw and availability benchmarks.
//!
//! Measures the hot read paths against a keyspace that is mostly sold, where
//! random draws collide often and the fallback enumeration kicks in.
//!
//! Run with: `cargo bench -p raffle-engine`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use raffle_core::{AvailabilitySet, TicketNumber};
use raffle_engine::{AvailabilityIndex, BuyerSession, EngineConfig, RaffleEngine, RandomAllocator};
use raffle_testing::fixtures::{buyer, epoch, paid_row};
use raffle_testing::mocks::test_clock;
use raffle_testing::InMemoryTicketStore;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

/// Store with every number whose value is not a multiple of `keep_every` sold.
fn sold_store(keep_every: u32) -> InMemoryTicketStore {
    let store = InMemoryTicketStore::new();
    let seller = buyer(9);
    store.seed(
        TicketNumber::all()
            .filter(|n| n.value() % keep_every != 0)
            .map(|n| paid_row(n.value(), &seller, epoch())),
    );
    store
}

fn benchmark_refresh(c: &mut Criterion) {
    let mut group = c.benchmark_group("availability_refresh");
    group.sample_size(20);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime");

    for keep_every in [2u32, 10] {
        let store = sold_store(keep_every);
        let config = EngineConfig::default();
        group.throughput(Throughput::Elements(store.len() as u64));

        group.bench_with_input(
            BenchmarkId::new("sold_rows", store.len()),
            &store,
            |b, store| {
                b.to_async(&runtime).iter(|| async {
                    let snapshot = AvailabilityIndex::new(store, &config)
                        .refresh(epoch())
                        .await
                        .expect("refresh");
                    black_box(snapshot.free_count())
                });
            },
        );
    }

    group.finish();
}

fn benchmark_draw(c: &mut Criterion) {
    let mut group = c.benchmark_group("lucky_draw");
    group.sample_size(20);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime");

    // 90% sold; the snapshot is current, so no candidate is evicted.
    let store = sold_store(10);
    let config = EngineConfig::default();
    let snapshot: AvailabilitySet = runtime
        .block_on(AvailabilityIndex::new(&store, &config).refresh(epoch()))
        .expect("refresh");

    for quantity in [1usize, 50, 500] {
        group.bench_with_input(
            BenchmarkId::new("current_snapshot", quantity),
            &quantity,
            |b, &quantity| {
                let allocator =
                    RandomAllocator::new(AvailabilityIndex::new(&store, &config), &config);
                b.to_async(&runtime).iter(|| {
                    let mut snapshot = snapshot.clone();
                    async move {
                        let mut rng = StdRng::seed_from_u64(42);
                        allocator
                            .draw(quantity, &mut snapshot, &[], &mut rng, epoch())
                            .await
                            .expect("draw")
                    }
                });
            },
        );
    }

    // Full engine path: refresh, draw, verify.
    let engine = RaffleEngine::new(
        Arc::new(store.clone()),
        Arc::new(test_clock()),
        config.clone(),
    );
    group.bench_function("engine_draw_lucky_50", |b| {
        b.to_async(&runtime).iter(|| async {
            let mut session = BuyerSession::with_seed(buyer(1), 7);
            engine.draw_lucky(&mut session, 50).await.expect("draw")
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_refresh, benchmark_draw);
criterion_main!(benches);
