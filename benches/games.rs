//! Benchmarks for the per-tick game math and command parsing.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;
use wanchat::catalog;
use wanchat::commands::Command;
use wanchat::games::cards::{hand_value, Deck};
use wanchat::games::drag_race::{acceleration, max_speed, TRACK_LENGTH};
use wanchat::games::horse_race::{stride, FINISH_LINE, HORSES};

fn bench_hand_value(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(7);
    let mut deck = Deck::shuffled(&mut rng);
    let hands: Vec<Vec<_>> = (0..10)
        .map(|_| (0..5).filter_map(|_| deck.draw()).collect())
        .collect();

    c.bench_function("hand_value_10x5", |b| {
        b.iter(|| {
            for hand in &hands {
                black_box(hand_value(black_box(hand)));
            }
        });
    });
}

fn bench_race_ticks(c: &mut Criterion) {
    c.bench_function("horse_race_to_finish", |b| {
        let mut rng = StdRng::seed_from_u64(42);
        b.iter(|| {
            let mut positions = [0u32; 5];
            while positions.iter().all(|p| *p < FINISH_LINE) {
                for (pos, horse) in positions.iter_mut().zip(HORSES.iter()) {
                    *pos += stride(horse, &mut rng);
                }
            }
            black_box(positions)
        });
    });
}

fn bench_drag_physics(c: &mut Criterion) {
    let specs: Vec<_> = catalog::vehicles().filter_map(|v| v.specs).collect();

    c.bench_function("drag_physics_all_vehicles", |b| {
        b.iter(|| {
            for spec in &specs {
                let top = max_speed(black_box(spec));
                let mut speed = 0.0;
                let mut position = 0.0;
                while position < TRACK_LENGTH {
                    speed = (speed + acceleration(spec, position)).min(top);
                    position += speed;
                }
                black_box(position);
            }
        });
    });
}

fn bench_command_parse(c: &mut Criterion) {
    let lines = [
        "/help",
        "/give bob 25",
        "/buy golden rock",
        "/dragbet 10 rust bucket",
        "/horse 3 50",
        "/nonsense here",
    ];
    c.bench_function("command_parse", |b| {
        b.iter(|| {
            for line in &lines {
                let _ = black_box(Command::parse(black_box(line)));
            }
        });
    });
}

criterion_group!(
    benches,
    bench_hand_value,
    bench_race_ticks,
    bench_drag_physics,
    bench_command_parse
);
criterion_main!(benches);
