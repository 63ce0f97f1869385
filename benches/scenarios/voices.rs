//! Benchmarks for note lifecycles through the full engine.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion};
use polyvoice::{NoteId, RecordingBackend, SynthConfig, SynthEngine};

use crate::VOICE_COUNTS;

fn powered(config: SynthConfig) -> SynthEngine<RecordingBackend> {
    let mut engine = SynthEngine::with_config(RecordingBackend::new(), config).unwrap();
    engine.power_on().unwrap();
    engine
}

fn chord(size: usize) -> Vec<NoteId> {
    NoteId::all().step_by(3).take(size).collect()
}

pub fn bench_voices(c: &mut Criterion) {
    let mut group = c.benchmark_group("scenarios/voices");

    for &count in VOICE_COUNTS {
        let notes = chord(count);

        // === CHORD ===
        // press, hold, release and wait out the cleanups
        let mut engine = powered(SynthConfig::default());
        group.bench_with_input(BenchmarkId::new("chord", count), &count, |b, _| {
            b.iter(|| {
                for &note in &notes {
                    engine.note_on(black_box(note), 100);
                }
                engine.backend_mut().advance(0.3);
                engine.poll();
                engine.stop_all();
                engine.backend_mut().advance(1.0);
                engine.poll();
                engine.drain_events()
            })
        });

        // === RETRIGGER ===
        // hammering the same pitches: every press retires a live entry
        let mut engine = powered(SynthConfig::default());
        group.bench_with_input(BenchmarkId::new("retrigger", count), &count, |b, _| {
            b.iter(|| {
                for &note in &notes {
                    engine.note_on(black_box(note), 100);
                }
                engine.backend_mut().advance(0.05);
                engine.poll();
                engine.drain_events()
            })
        });

        // === ZERO GUARD ===
        // same, with synchronous teardown of the replaced entry
        let mut engine = powered(SynthConfig::default().with_guard_delay(0.0));
        group.bench_with_input(BenchmarkId::new("retrigger_no_guard", count), &count, |b, _| {
            b.iter(|| {
                for &note in &notes {
                    engine.note_on(black_box(note), 100);
                }
                engine.backend_mut().advance(0.05);
                engine.poll();
                engine.drain_events()
            })
        });
    }

    group.finish();
}
