use std::hint::black_box;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use gametree::{GameTree, PackedMove, Ply, Promotion};
use movechain::{Options, Store};
use tempfile::TempDir;

struct Fixture {
    _tmp: TempDir,
    store: Store,
    games: Vec<GameTree>,
}

impl Fixture {
    fn new(game_count: usize) -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = Store::create(tmp.path().join("db"), Options::default()).expect("store");
        let games = (0..game_count).map(|seed| synthetic_game(seed as u64)).collect();
        Self {
            _tmp: tmp,
            store,
            games,
        }
    }
}

fn synthetic_game(seed: u64) -> GameTree {
    let plies = (0..40u64)
        .map(|i| {
            let from = ((seed.wrapping_mul(31) + i * 7) % 64) as u8;
            let to = ((from as u64 + 17 + seed % 5) % 64) as u8;
            Ply::new(PackedMove::pack(from, to, Promotion::None).expect("valid move"))
        })
        .collect();
    GameTree::new(
        vec![
            ("Event".into(), format!("Synthetic {seed}")),
            ("Result".into(), "1/2-1/2".into()),
        ],
        plies,
    )
}

fn bench_ingest(c: &mut Criterion) {
    let mut fixture = Fixture::new(64);
    let mut next = 0usize;

    let mut group = c.benchmark_group("movechain_ingest");
    group.throughput(Throughput::Elements(1));
    group.bench_function("ingest_game_40_plies", |b| {
        b.iter(|| {
            let id = format!("bench_{next}");
            let game = &fixture.games[next % fixture.games.len()];
            next += 1;
            fixture
                .store
                .ingest_game(black_box(game), &id)
                .expect("ingest")
        })
    });
    group.finish();
}

fn bench_reconstruct(c: &mut Criterion) {
    let mut fixture = Fixture::new(64);
    for (i, game) in fixture.games.clone().iter().enumerate() {
        fixture
            .store
            .ingest_game(game, &format!("game_{i}"))
            .expect("ingest");
    }
    fixture.store.flush().expect("flush");

    let mut next = 0usize;
    let mut group = c.benchmark_group("movechain_reconstruct");
    group.throughput(Throughput::Elements(1));
    group.bench_function("reconstruct_40_plies", |b| {
        b.iter(|| {
            let id = format!("game_{}", next % fixture.games.len());
            next += 1;
            black_box(fixture.store.reconstruct(&id).expect("reconstruct"))
        })
    });
    group.finish();
}

criterion_group!(benches, bench_ingest, bench_reconstruct);
criterion_main!(benches);
