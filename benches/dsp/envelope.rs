//! Benchmarks for the ADSR envelope.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion};
use polyvoice::backend::{AudioBackend, ParamRef};
use polyvoice::dsp::envelope::{Envelope, EnvelopeParams};
use polyvoice::RecordingBackend;

pub fn bench_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("dsp/envelope");
    let params = EnvelopeParams::default();

    // Evaluation across every phase, as the UI does each frame
    let mut env = Envelope::new(params);
    let mut backend = RecordingBackend::new();
    let lane = backend.create_gain_control().unwrap().gain();
    env.trigger_attack(&mut backend, &[lane], 0.0).unwrap();
    env.trigger_release(&mut backend, &[lane], 0.6).unwrap();
    group.bench_function("value", |b| {
        b.iter(|| {
            let mut sum = 0.0;
            for step in 0..128 {
                sum += env.value(black_box(step as f64 * 0.01));
            }
            sum
        })
    });

    // Scheduling attack + release on one lane per oscillator slot
    for &lanes in &[1usize, 2, 4] {
        let mut backend = RecordingBackend::new();
        let targets: Vec<ParamRef> = (0..lanes)
            .map(|_| backend.create_gain_control().unwrap().gain())
            .collect();
        let mut env = Envelope::new(params);
        let mut now = 0.0;

        group.bench_with_input(BenchmarkId::new("retrigger", lanes), &lanes, |b, _| {
            b.iter(|| {
                now += 0.01;
                env.trigger_attack(&mut backend, black_box(&targets), now).unwrap();
                env.trigger_release(&mut backend, black_box(&targets), now + 0.005)
                    .unwrap();
            })
        });
    }

    group.finish();
}
