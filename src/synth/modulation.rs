use log::{debug, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    backend::{AudioBackend, BackendError, GainControl, ParamRef, SoundSource},
    dsp::{
        lfo::{clamp_amplitude, clamp_frequency},
        oscillator::Waveform,
    },
    SynthError,
};

/*
Modulation Routing
==================

One LFO, one destination at a time:

    ┌─────────┐    ┌────────────┐
    │ LFO src │ ─→ │ depth gain │ ─→ ( destination parameter )
    └─────────┘    └────────────┘

The depth gain's output is summed onto the destination by the backend, on
top of whatever value that parameter is already scheduled to hold. The
router never reads or writes the destination's base value; it keeps it for
display only.

Switching destinations is a hard cutover. The depth gain is disconnected
from everything, then connected to the new parameter, so there is never a
moment with two destinations.
*/

/// Parameters the LFO can be routed to.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModulationTarget {
    #[default]
    FilterCutoff,
    /// Master gain (tremolo)
    Amplitude,
}

impl ModulationTarget {
    pub fn name(self) -> &'static str {
        match self {
            ModulationTarget::FilterCutoff => "filter",
            ModulationTarget::Amplitude => "amplitude",
        }
    }
}

impl std::fmt::Display for ModulationTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ModulationTarget {
    type Err = SynthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filter" | "cutoff" | "filter-cutoff" => Ok(ModulationTarget::FilterCutoff),
            "amplitude" | "amp" | "volume" => Ok(ModulationTarget::Amplitude),
            other => Err(SynthError::UnknownTarget(other.to_string())),
        }
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LfoSettings {
    pub waveform: Waveform,
    /// Hz, 0.1..=20
    pub frequency: f32,
    /// Depth, 0..=1
    pub amplitude: f32,
    pub target: ModulationTarget,
}

impl Default for LfoSettings {
    fn default() -> Self {
        Self {
            waveform: Waveform::Sine,
            frequency: 1.0,
            amplitude: 0.5,
            target: ModulationTarget::FilterCutoff,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LfoNodes {
    source: SoundSource,
    depth: GainControl,
}

/// The shared low-frequency oscillator and its depth stage.
#[derive(Debug)]
pub struct Lfo {
    settings: LfoSettings,
    nodes: Option<LfoNodes>,
    active: bool,
}

impl Lfo {
    pub fn new(settings: LfoSettings) -> Self {
        Self {
            settings,
            nodes: None,
            active: false,
        }
    }

    pub fn settings(&self) -> &LfoSettings {
        &self.settings
    }

    pub fn init<B: AudioBackend + ?Sized>(&mut self, backend: &mut B) -> Result<(), BackendError> {
        if self.nodes.is_some() {
            return Ok(());
        }

        let now = backend.now();
        let source = backend.create_sound_source(self.settings.waveform)?;
        let depth = backend.create_gain_control()?;
        self.nodes = Some(LfoNodes { source, depth });

        backend.set_value_at(source.frequency(), self.settings.frequency, now)?;
        backend.set_value_at(depth.gain(), self.settings.amplitude, now)?;
        backend.connect(source.into(), depth.into())
    }

    /// No-op if uninitialised or already running.
    pub fn start<B: AudioBackend + ?Sized>(&mut self, backend: &mut B) -> Result<(), BackendError> {
        let Some(nodes) = self.nodes else {
            return Ok(());
        };
        if self.active {
            return Ok(());
        }

        let now = backend.now();
        backend.start(nodes.source, self.settings.frequency, now)?;
        self.active = true;
        debug!(target: "polyvoice::modulation", "LFO started at {:.2}Hz", self.settings.frequency);
        Ok(())
    }

    pub fn stop<B: AudioBackend + ?Sized>(&mut self, backend: &mut B) {
        let Some(nodes) = self.nodes else {
            return;
        };
        if !self.active {
            return;
        }
        self.active = false;

        let now = backend.now();
        if let Err(err) = backend.stop(nodes.source, now) {
            warn!(target: "polyvoice::modulation", "error stopping LFO: {}", err);
        }
        for node in [nodes.source.into(), nodes.depth.into()] {
            if let Err(err) = backend.disconnect(node) {
                warn!(target: "polyvoice::modulation", "error disconnecting LFO: {}", err);
            }
        }
    }

    /// Stop and forget the backend nodes.
    pub fn cleanup<B: AudioBackend + ?Sized>(&mut self, backend: &mut B) {
        let was_active = self.active;
        self.stop(backend);

        if let Some(nodes) = self.nodes.take() {
            if !was_active {
                // never started: still wired source -> depth
                for node in [nodes.source.into(), nodes.depth.into()] {
                    if let Err(err) = backend.disconnect(node) {
                        warn!(target: "polyvoice::modulation", "error disconnecting LFO: {}", err);
                    }
                }
            }
        }
    }

    pub fn set_waveform<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        waveform: Waveform,
    ) -> Result<(), BackendError> {
        self.settings.waveform = waveform;
        match self.nodes {
            Some(nodes) => backend.set_waveform(nodes.source, waveform),
            None => Ok(()),
        }
    }

    pub fn set_frequency<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        frequency: f32,
    ) -> Result<(), BackendError> {
        self.settings.frequency = clamp_frequency(frequency);
        match self.nodes {
            Some(nodes) => {
                let now = backend.now();
                backend.set_value_at(nodes.source.frequency(), self.settings.frequency, now)
            }
            None => Ok(()),
        }
    }

    pub fn set_amplitude<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        amplitude: f32,
    ) -> Result<(), BackendError> {
        self.settings.amplitude = clamp_amplitude(amplitude);
        match self.nodes {
            Some(nodes) => {
                let now = backend.now();
                backend.set_value_at(nodes.depth.gain(), self.settings.amplitude, now)
            }
            None => Ok(()),
        }
    }

    /// The depth gain, i.e. the signal routed to the destination.
    pub fn output(&self) -> Option<GainControl> {
        self.nodes.map(|nodes| nodes.depth)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// The LFO's current destination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModulationRoute {
    pub target: ModulationTarget,
    pub param: ParamRef,
    /// The destination's own value when the route was made; display only
    pub base_value: f32,
}

/// Owns the LFO and the single route from it.
#[derive(Debug)]
pub struct ModulationRouter {
    lfo: Lfo,
    route: Option<ModulationRoute>,
}

impl ModulationRouter {
    pub fn new(settings: LfoSettings) -> Self {
        Self {
            lfo: Lfo::new(settings),
            route: None,
        }
    }

    pub fn lfo(&self) -> &Lfo {
        &self.lfo
    }

    pub fn lfo_mut(&mut self) -> &mut Lfo {
        &mut self.lfo
    }

    pub fn route(&self) -> Option<&ModulationRoute> {
        self.route.as_ref()
    }

    /// Initialise and start the LFO.
    pub fn start<B: AudioBackend + ?Sized>(&mut self, backend: &mut B) -> Result<(), BackendError> {
        self.lfo.init(backend)?;
        self.lfo.start(backend)
    }

    /// Route the LFO to `param`, dropping any previous route first.
    pub fn connect<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        target: ModulationTarget,
        param: ParamRef,
        base_value: f32,
    ) -> Result<(), BackendError> {
        let Some(depth) = self.lfo.output() else {
            debug!(target: "polyvoice::modulation", "connect ignored: LFO not initialised");
            return Ok(());
        };

        if let Err(err) = backend.disconnect(depth.into()) {
            debug!(target: "polyvoice::modulation", "ignoring disconnect error: {}", err);
        }
        self.route = None;
        self.lfo.settings.target = target;

        backend.connect(depth.into(), param.into())?;
        self.route = Some(ModulationRoute {
            target,
            param,
            base_value,
        });
        debug!(target: "polyvoice::modulation", "LFO routed to {}", target);
        Ok(())
    }

    /// Like [`connect`](Self::connect), but a no-op while the LFO is not
    /// running. Returns whether the route changed.
    pub fn set_target<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        target: ModulationTarget,
        param: ParamRef,
        base_value: f32,
    ) -> Result<bool, BackendError> {
        if !self.lfo.is_active() {
            return Ok(false);
        }
        self.connect(backend, target, param, base_value)?;
        Ok(true)
    }

    pub fn teardown<B: AudioBackend + ?Sized>(&mut self, backend: &mut B) {
        self.lfo.cleanup(backend);
        self.route = None;
    }
}
