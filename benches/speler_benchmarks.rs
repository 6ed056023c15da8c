//! # Speler Performance Benchmarks
//!
//! Benchmarks for the hot paths of the engine.
//!
//! ## Benchmark Categories
//!
//! - **Priority**: the per-song priority formula and full candidate ranking
//! - **Selection**: `next_song` on a played-through catalog
//! - **Matchmaking**: triple search over a busy anti-repeat window
//! - **Aggregation**: play and judgment recording with propagation
//!
//! ## Running Benchmarks
//!
//! ```bash
//! cargo bench
//! cargo bench selection
//! ```

use chrono::{DateTime, Duration, Utc};
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;
use speler::cache::MemoryCache;
use speler::catalog::{add_song, NewSong};
use speler::config::EngineConfig;
use speler::selector::{self, PriorityValues, SelectionFilter};
use speler::{db, matchmaker, stats, Song};
use std::hint::black_box;

fn now() -> DateTime<Utc> {
    db::from_timestamp(1_750_000_000).expect("valid timestamp")
}

/// Catalog of `count` songs (20 per artist, 10 per album), each played once,
/// one minute apart, ending at [`now`].
fn create_benchmark_catalog(count: usize) -> (rusqlite::Connection, Vec<Song>) {
    let mut conn = db::open_in_memory().expect("Failed to open database");
    let mut songs = Vec::with_capacity(count);
    for i in 0..count {
        let new = NewSong::new(
            &format!("Artist {}", i / 20),
            &format!("Album {}", i / 10),
            &format!("Song {i:04}"),
        )
        .with_track(u32::try_from(i % 10 + 1).unwrap_or(1), 200.0);
        songs.push(add_song(&mut conn, &new).expect("Failed to add song"));
    }
    for (i, song) in songs.iter().enumerate() {
        let ago = i64::try_from(count - i).unwrap_or(0);
        stats::record_play(&mut conn, song.id, now() - Duration::minutes(ago)).expect("Failed to record play");
    }
    (conn, songs)
}

fn benchmark_priority(c: &mut Criterion) {
    let mut group = c.benchmark_group("priority");

    let (conn, songs) = create_benchmark_catalog(100);
    let values = PriorityValues {
        max_played: 3,
        max_elapsed_days: 30.0,
        reference_spread: 49.8,
    };
    let song = songs[0].clone();

    group.bench_function("single_song_priority", |b| {
        b.iter(|| selector::priority(black_box(&song), black_box(&values), now()));
    });

    group.bench_function("rank_100_candidates", |b| {
        b.iter(|| selector::ranked_candidates(&conn, &SelectionFilter::new(), black_box(&values), now()));
    });

    group.finish();
}

fn benchmark_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("selection");
    let config = EngineConfig::default();

    for size in [100, 1000] {
        let (conn, _) = create_benchmark_catalog(size);
        let cache = MemoryCache::new();
        let mut rng = StdRng::seed_from_u64(42);

        group.bench_with_input(BenchmarkId::new("next_song", size), &size, |b, _| {
            b.iter(|| {
                selector::next_song(&conn, &cache, &config, &SelectionFilter::new(), now(), &mut rng)
                    .expect("a song is selected")
            });
        });
    }

    group.finish();
}

fn benchmark_matchmaking(c: &mut Criterion) {
    let mut group = c.benchmark_group("matchmaking");
    let config = EngineConfig::default();
    let (conn, songs) = create_benchmark_catalog(60);
    let current = songs[songs.len() - 1].id;

    group.bench_function("propose_match_40_minute_window", |b| {
        b.iter(|| matchmaker::propose_match(&conn, &config, black_box(current), now()));
    });

    group.finish();
}

fn benchmark_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregation");

    group.bench_function("record_play", |b| {
        b.iter_batched(
            || create_benchmark_catalog(50),
            |(mut conn, songs)| stats::record_play(&mut conn, songs[0].id, now()),
            BatchSize::LargeInput,
        );
    });

    group.bench_function("record_judgment_two_losers", |b| {
        b.iter_batched(
            || create_benchmark_catalog(50),
            |(mut conn, songs)| stats::record_judgment(&mut conn, songs[0].id, &[songs[1].id, songs[25].id], 5, now()),
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_priority,
    benchmark_selection,
    benchmark_matchmaking,
    benchmark_aggregation
);

criterion_main!(benches);
