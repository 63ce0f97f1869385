//! Benchmarks for the envelope generator.

mod envelope;

pub use envelope::bench_envelope;
