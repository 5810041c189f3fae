//! Benchmark tests for vela-core operations
//!
//! Run with: cargo bench -p vela-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use url::Url;

use vela_core::buffer::{
    buffered_ahead, target_buffer, BehaviorSignals, BufferStrategy, BufferStrategyConfig,
    NetworkCondition,
};
use vela_core::events::EventBus;
use vela_core::manifest::{detect_format, LevelInfo, QualityCatalogue};
use vela_core::sim::SimSurface;
use vela_core::types::*;
use vela_core::{NativeEvent, PlaybackSession, PlayerConfig, Source};

// ============================================================================
// Helpers
// ============================================================================

fn create_test_ladder(count: usize) -> Vec<LevelInfo> {
    const HEIGHTS: [u32; 6] = [240, 360, 480, 720, 1080, 2160];
    (0..count)
        .map(|i| {
            let height = HEIGHTS[i % HEIGHTS.len()];
            LevelInfo::new(400_000 * (i as u64 + 1), height * 16 / 9, height)
        })
        .collect()
}

fn create_test_signals() -> BehaviorSignals {
    BehaviorSignals {
        condition: NetworkCondition::Good,
        skip_rate: 2.5,
        pause_rate: 0.5,
        metered: true,
        playback_rate: 1.5,
        average_seek_interval: Some(20.0),
        since_last_seek: Some(5.0),
    }
}

// ============================================================================
// Event Bus Benchmarks
// ============================================================================

fn bench_bus_emit(c: &mut Criterion) {
    let mut group = c.benchmark_group("Event Bus Emit");

    for listeners in [1usize, 8, 64] {
        let bus: EventBus<&'static str, u64> = EventBus::new();
        for _ in 0..listeners {
            let _ = bus.on("timeupdate", |value: &u64| {
                black_box(value);
                Ok(())
            });
        }

        group.bench_with_input(
            BenchmarkId::new("listeners", listeners),
            &listeners,
            |b, _| {
                b.iter(|| bus.emit(black_box(&"timeupdate"), black_box(&42)));
            },
        );
    }

    group.finish();
}

fn bench_session_dispatch(c: &mut Criterion) {
    let surface = SimSurface::new("bench");
    surface.set_duration(600.0);
    let config = PlayerConfig::simple(vec![Source::new(
        Url::parse("https://cdn.example.com/movie.mp4").unwrap(),
    )]);
    let _session = PlaybackSession::new(surface.boxed(), config).unwrap();
    surface.fire(NativeEvent::LoadStart);
    surface.fire(NativeEvent::LoadedMetadata);
    surface.fire(NativeEvent::CanPlay);

    c.bench_function("session_time_update", |b| {
        b.iter(|| surface.fire(black_box(NativeEvent::TimeUpdate)));
    });
}

// ============================================================================
// Buffer Strategy Benchmarks
// ============================================================================

fn bench_target_buffer(c: &mut Criterion) {
    let signals = create_test_signals();
    let mut group = c.benchmark_group("Target Buffer");

    for strategy in [
        BufferStrategy::Conservative,
        BufferStrategy::Adaptive,
        BufferStrategy::Aggressive,
    ] {
        let config = BufferStrategyConfig {
            strategy,
            ..Default::default()
        };
        group.bench_with_input(
            BenchmarkId::new("strategy", format!("{strategy:?}")),
            &config,
            |b, config| {
                b.iter(|| target_buffer(black_box(config), black_box(&signals)));
            },
        );
    }

    group.finish();
}

fn bench_buffered_ahead(c: &mut Criterion) {
    let ranges: Vec<TimeRange> = (0..32)
        .map(|i| TimeRange::new(i as f64 * 10.0, i as f64 * 10.0 + 8.0))
        .collect();

    c.bench_function("buffered_ahead", |b| {
        b.iter(|| buffered_ahead(black_box(&ranges), black_box(155.0)));
    });
}

// ============================================================================
// Manifest Benchmarks
// ============================================================================

fn bench_quality_catalogue(c: &mut Criterion) {
    let mut group = c.benchmark_group("Quality Catalogue");

    for count in [3usize, 6, 12] {
        let ladder = create_test_ladder(count);
        group.bench_with_input(BenchmarkId::new("levels", count), &ladder, |b, ladder| {
            b.iter(|| QualityCatalogue::from_levels(black_box(ladder)));
        });
    }

    group.finish();
}

fn bench_detect_format(c: &mut Criterion) {
    let urls = [
        Url::parse("https://cdn.example.com/live/master.m3u8").unwrap(),
        Url::parse("https://cdn.example.com/vod/manifest.mpd").unwrap(),
        Url::parse("https://cdn.example.com/movie.mp4").unwrap(),
    ];

    c.bench_function("detect_format", |b| {
        b.iter(|| {
            for url in &urls {
                black_box(detect_format(url, None));
            }
        });
    });
}

criterion_group!(
    benches,
    bench_bus_emit,
    bench_session_dispatch,
    bench_target_buffer,
    bench_buffered_ahead,
    bench_quality_catalogue,
    bench_detect_format,
);
criterion_main!(benches);
