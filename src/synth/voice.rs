use log::{debug, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    backend::{AudioBackend, BackendError, Endpoint, GainControl, SoundSource},
    dsp::oscillator::{db_to_gain, Waveform},
};

/// Template for one oscillator slot.
///
/// Each note copies the template when it is created; editing the template
/// afterwards only affects notes played later.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OscillatorSettings {
    pub waveform: Waveform,
    pub volume_db: f32,
    pub detune_cents: f32,
}

impl Default for OscillatorSettings {
    fn default() -> Self {
        Self {
            waveform: Waveform::Sine,
            volume_db: 0.0,
            detune_cents: 0.0,
        }
    }
}

impl OscillatorSettings {
    pub fn new(waveform: Waveform, volume_db: f32) -> Self {
        Self {
            waveform,
            volume_db,
            ..Self::default()
        }
    }

    pub fn with_detune(mut self, cents: f32) -> Self {
        self.detune_cents = cents;
        self
    }

    pub fn gain(&self) -> f32 {
        db_to_gain(self.volume_db)
    }
}

#[derive(Debug, Clone, Copy)]
struct Nodes {
    source: SoundSource,
    gain: GainControl,
}

/// One sound source and its gain, owned by a single note.
#[derive(Debug)]
pub struct OscillatorVoice {
    slot: usize,
    settings: OscillatorSettings,
    nodes: Option<Nodes>,
    active: bool,
}

impl OscillatorVoice {
    pub fn new(slot: usize, settings: OscillatorSettings) -> Self {
        Self {
            slot,
            settings,
            nodes: None,
            active: false,
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn settings(&self) -> &OscillatorSettings {
        &self.settings
    }

    /// Allocate the backend nodes and wire `source -> gain -> destination`.
    ///
    /// Returns the gain, which is the voice's output. Calling `init` on a
    /// voice that already has nodes returns the existing output.
    pub fn init<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        destination: Endpoint,
    ) -> Result<GainControl, BackendError> {
        if let Some(nodes) = self.nodes {
            return Ok(nodes.gain);
        }

        let source = backend.create_sound_source(self.settings.waveform)?;
        let gain = backend.create_gain_control()?;
        self.nodes = Some(Nodes { source, gain });

        self.set_detune(backend, self.settings.detune_cents)?;
        self.set_volume(backend, self.settings.volume_db)?;
        backend.connect(source.into(), gain.into())?;
        backend.connect(gain.into(), destination)?;
        Ok(gain)
    }

    /// Start playback at `frequency`.
    ///
    /// One-shot: a voice that is already playing, or has no nodes, ignores
    /// the call and returns `false`.
    pub fn start<B: AudioBackend + ?Sized>(&mut self, backend: &mut B, frequency: f64, at: f64) -> bool {
        let Some(nodes) = self.nodes else {
            debug!(target: "polyvoice::voice", "slot {} start ignored: not initialised", self.slot);
            return false;
        };
        if self.active {
            return false;
        }

        let frequency = frequency as f32;
        let started = backend
            .set_value_at(nodes.source.frequency(), frequency, at)
            .and_then(|()| backend.start(nodes.source, frequency, at));

        match started {
            Ok(()) => {
                self.active = true;
                true
            }
            Err(err) => {
                warn!(target: "polyvoice::voice", "slot {} failed to start: {}", self.slot, err);
                false
            }
        }
    }

    /// Stop playback and disconnect both nodes.
    ///
    /// Idempotent. Backend errors (e.g. a double stop) are logged, never
    /// returned, and the voice ends up inactive either way.
    pub fn stop<B: AudioBackend + ?Sized>(&mut self, backend: &mut B, at: f64) {
        if !self.active {
            return;
        }
        self.active = false;

        let Some(nodes) = self.nodes.take() else {
            return;
        };
        if let Err(err) = backend.stop(nodes.source, at) {
            warn!(target: "polyvoice::voice", "slot {} stop failed: {}", self.slot, err);
        }
        disconnect(backend, self.slot, nodes);
    }

    /// Silence and release everything this voice holds.
    ///
    /// The gain is forced to zero before the source stops so nothing that
    /// is still ringing gets cut off mid-cycle. Works on voices that were
    /// never started too.
    pub fn teardown<B: AudioBackend + ?Sized>(&mut self, backend: &mut B, now: f64) {
        let Some(nodes) = self.nodes else {
            return;
        };

        let gain = nodes.gain.gain();
        let silenced = backend
            .cancel_scheduled(gain, now)
            .and_then(|()| backend.set_value_at(gain, 0.0, now));
        if let Err(err) = silenced {
            warn!(target: "polyvoice::voice", "slot {} could not be silenced: {}", self.slot, err);
        }

        self.stop(backend, now);
        if let Some(nodes) = self.nodes.take() {
            disconnect(backend, self.slot, nodes);
        }
    }

    pub fn set_volume<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        db: f32,
    ) -> Result<(), BackendError> {
        self.settings.volume_db = db;
        match self.nodes {
            Some(nodes) => {
                let now = backend.now();
                backend.set_value_at(nodes.gain.gain(), self.settings.gain(), now)
            }
            None => Ok(()),
        }
    }

    pub fn set_detune<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        cents: f32,
    ) -> Result<(), BackendError> {
        self.settings.detune_cents = cents;
        match self.nodes {
            Some(nodes) => {
                let now = backend.now();
                backend.set_value_at(nodes.source.detune(), cents, now)
            }
            None => Ok(()),
        }
    }

    /// The voice's gain stage, once initialised.
    pub fn output(&self) -> Option<GainControl> {
        self.nodes.map(|nodes| nodes.gain)
    }

    pub fn source(&self) -> Option<SoundSource> {
        self.nodes.map(|nodes| nodes.source)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

fn disconnect<B: AudioBackend + ?Sized>(backend: &mut B, slot: usize, nodes: Nodes) {
    for node in [nodes.source.into(), nodes.gain.into()] {
        if let Err(err) = backend.disconnect(node) {
            warn!(target: "polyvoice::voice", "slot {} disconnect failed: {}", slot, err);
        }
    }
}
