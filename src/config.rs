#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    dsp::{envelope::EnvelopeParams, oscillator::Waveform},
    synth::{filter::FilterSettings, modulation::LfoSettings, voice::OscillatorSettings},
    SynthError,
};

/// Everything the engine needs to build its shared stages and new notes.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct SynthConfig {
    pub envelope: EnvelopeParams,
    /// One template per oscillator slot
    pub oscillators: Vec<OscillatorSettings>,
    /// Pan position per oscillator slot, -1..=1
    pub pans: Vec<f32>,
    pub filter: FilterSettings,
    pub lfo: LfoSettings,
    pub master_volume_db: f32,
    /// Seconds a replaced note is given to fade before the new one starts
    pub guard_delay: f64,
    /// Extra seconds after a release before the note's nodes are torn down
    pub cleanup_buffer: f64,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            envelope: EnvelopeParams::default(),
            oscillators: vec![
                OscillatorSettings::new(Waveform::Sawtooth, -10.0),
                OscillatorSettings::new(Waveform::Square, -15.0),
            ],
            pans: vec![0.0, 0.0],
            filter: FilterSettings::default(),
            lfo: LfoSettings::default(),
            master_volume_db: -10.0,
            guard_delay: 0.1,
            cleanup_buffer: 0.1,
        }
    }
}

impl SynthConfig {
    pub fn with_envelope(mut self, envelope: EnvelopeParams) -> Self {
        self.envelope = envelope;
        self
    }

    /// Replace the oscillator slots; pans are reset to centre.
    pub fn with_oscillators(mut self, oscillators: Vec<OscillatorSettings>) -> Self {
        self.pans = vec![0.0; oscillators.len()];
        self.oscillators = oscillators;
        self
    }

    pub fn with_pan(mut self, slot: usize, pan: f32) -> Self {
        if let Some(p) = self.pans.get_mut(slot) {
            *p = pan;
        }
        self
    }

    pub fn with_filter(mut self, filter: FilterSettings) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_lfo(mut self, lfo: LfoSettings) -> Self {
        self.lfo = lfo;
        self
    }

    pub fn with_master_volume(mut self, db: f32) -> Self {
        self.master_volume_db = db;
        self
    }

    pub fn with_guard_delay(mut self, seconds: f64) -> Self {
        self.guard_delay = seconds;
        self
    }

    pub fn with_cleanup_buffer(mut self, seconds: f64) -> Self {
        self.cleanup_buffer = seconds;
        self
    }

    pub fn validate(&self) -> Result<(), SynthError> {
        self.envelope.validate()?;

        if self.pans.len() != self.oscillators.len() {
            return Err(SynthError::InvalidParameter {
                name: "pans",
                value: self.pans.len() as f32,
            });
        }
        if let Some(&pan) = self.pans.iter().find(|p| !(-1.0..=1.0).contains(*p)) {
            return Err(SynthError::InvalidParameter { name: "pan", value: pan });
        }
        if self.guard_delay.is_nan() || self.guard_delay < 0.0 {
            return Err(SynthError::InvalidParameter {
                name: "guard_delay",
                value: self.guard_delay as f32,
            });
        }
        if self.cleanup_buffer.is_nan() || self.cleanup_buffer < 0.0 {
            return Err(SynthError::InvalidParameter {
                name: "cleanup_buffer",
                value: self.cleanup_buffer as f32,
            });
        }
        Ok(())
    }
}
