// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Benchmarks for spool recording and replay.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use heddle::design::{DebugItems, NodeFlags};
use heddle::spool::Spool;
use heddle::time::TimePoint;

const NODES: usize = 256;

fn build_items() -> DebugItems {
    let mut items = DebugItems::new();
    for n in 0..NODES {
        items.add_node(&format!("top n{:03}", n), 32, 0, NodeFlags::default());
    }
    items
}

/// Record `samples` incremental samples, each touching a handful of nodes.
fn record_timeline(samples: usize) -> Spool {
    let mut items = build_items();
    let spool = Spool::new();
    let mut recorder = spool.recorder();
    recorder.start(&items);
    recorder.record_complete(&items);
    for sample in 1..samples {
        recorder.advance_time(TimePoint::from_nanos(1));
        for n in 0..8 {
            let name = format!("top n{:03}", (sample * 7 + n * 31) % NODES);
            items.set_u64(&name, sample as u64);
        }
        recorder.record_incremental(&items);
        if sample % 512 == 0 {
            recorder.record_complete(&items);
        }
    }
    recorder.flush();
    spool
}

fn bench_record_incremental(c: &mut Criterion) {
    let mut group = c.benchmark_group("spool");
    group.bench_function("record_incremental", |b| {
        let mut items = build_items();
        let spool = Spool::new();
        let mut recorder = spool.recorder();
        recorder.start(&items);
        recorder.record_complete(&items);
        let mut sample = 0u64;
        b.iter(|| {
            sample += 1;
            recorder.advance_time(TimePoint::from_nanos(1));
            items.set_u64("top n000", sample);
            items.set_u64("top n127", sample ^ 0x5555);
            black_box(recorder.record_incremental(&items));
        });
    });
    group.finish();
}

fn bench_rewind_and_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("spool");
    for samples in [256usize, 2048] {
        let spool = record_timeline(samples);
        group.bench_with_input(BenchmarkId::new("rewind_mid", samples), &samples, |b, &samples| {
            let mut items = build_items();
            let mut player = spool.player();
            player.start(&mut items);
            let target = TimePoint::from_nanos(samples as u64 / 2);
            b.iter(|| {
                assert!(player.rewind_to_or_before(black_box(target), &mut items, None));
                black_box(items.get_u64("top n000"))
            });
        });
        group.bench_with_input(BenchmarkId::new("replay_forward", samples), &samples, |b, _| {
            let mut items = build_items();
            let mut player = spool.player();
            player.start(&mut items);
            b.iter(|| {
                if !player.replay(&mut items, None) {
                    assert!(player.rewind_to_or_before(TimePoint::ZERO, &mut items, None));
                }
                black_box(items.get_u64("top n000"))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_record_incremental, bench_rewind_and_replay);
criterion_main!(benches);
