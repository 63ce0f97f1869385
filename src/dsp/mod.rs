//! Pure math used by the orchestration layers.
//!
//! Nothing in here talks to the audio backend except the envelope, which
//! schedules its shape as parameter automation. Everything else is
//! conversions and ranges.

/// Attack/decay/sustain/release envelope, scheduled against the audio clock.
pub mod envelope;
/// LFO rate and depth ranges.
pub mod lfo;
/// Waveform shapes and level conversions.
pub mod oscillator;

pub use envelope::{EnvelopeParams, EnvelopePhase};
