//! Real-world scenario benchmarks.
//!
//! These drive the full engine the way a keyboard player would: chords,
//! fast retriggers and release-everything.

mod voices;

pub use voices::bench_voices;
