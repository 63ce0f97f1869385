use std::collections::VecDeque;

#[cfg(feature = "rtrb")]
use rtrb::Consumer;

use crate::{
    backend::FilterType, dsp::oscillator::Waveform, notes::NoteId,
    synth::modulation::ModulationTarget,
};

/// Control input for the engine, produced by keyboard, MIDI or UI threads.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum SynthMessage {
    NoteOn { note: NoteId, velocity: u8 },
    NoteOff { note: NoteId },
    /// MIDI-originated note, addressed by frequency
    NoteOnFrequency { frequency: f64, velocity: u8 },
    NoteOffFrequency { frequency: f64 },
    AllNotesOff,
    PowerOn,
    PowerOff,
    PowerToggle,
    SetParam(ParamChange),
}

/// Every template parameter a control surface can change.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ParamChange {
    OscillatorWaveform { slot: usize, waveform: Waveform },
    OscillatorVolume { slot: usize, db: f32 },
    OscillatorDetune { slot: usize, cents: f32 },
    Pan { slot: usize, value: f32 },
    FilterType(FilterType),
    FilterCutoff(f32),
    FilterResonance(f32),
    /// Scale the live cutoff by a factor, leaving the configured cutoff as is.
    FilterModulation(f32),
    Attack(f32),
    Decay(f32),
    Sustain(f32),
    Release(f32),
    LfoWaveform(Waveform),
    LfoFrequency(f32),
    LfoAmplitude(f32),
    LfoTarget(ModulationTarget),
    MasterVolume(f32),
}

pub trait MessageReceiver {
    fn pop(&mut self) -> Option<SynthMessage>;
}

#[cfg(feature = "rtrb")]
impl MessageReceiver for Consumer<SynthMessage> {
    fn pop(&mut self) -> Option<SynthMessage> {
        Consumer::pop(self).ok()
    }
}

impl MessageReceiver for VecDeque<SynthMessage> {
    fn pop(&mut self) -> Option<SynthMessage> {
        self.pop_front()
    }
}
