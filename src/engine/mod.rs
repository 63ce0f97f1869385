//! The synth engine: power state, shared stages and input dispatch.
//!
//! Signal path, per note and oscillator slot:
//!
//! ```text
//! source -> voice gain -> lane gain -> slot panner -> filter -> master -> output
//!                         (envelope)    (shared)      (shared)  (shared)
//! ```
//!
//! The shared stages live in an [`EngineContext`] that exists only while
//! the engine is powered on. Everything runs on the caller's thread; call
//! [`SynthEngine::poll`] regularly so scheduled starts and cleanups fire.

pub mod scheduler;

use log::{debug, error, info, warn};

use crate::{
    backend::{AudioBackend, BackendError, ContextState, Endpoint, FilterType, GainControl, ParamRef},
    config::SynthConfig,
    dsp::oscillator::{db_to_gain, Waveform},
    notes::{NoteId, NoteTable},
    synth::{
        filter::{FilterStage, MAX_CUTOFF, MAX_RESONANCE, MIN_CUTOFF, MIN_RESONANCE},
        message::{MessageReceiver, ParamChange, SynthMessage},
        modulation::{ModulationRoute, ModulationRouter, ModulationTarget},
        panner::PanStage,
        poly::{LifecycleEvent, VoiceManager, VoicePatch},
    },
    SynthError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Off,
    On,
}

/// Shared stages owned by a powered-on engine.
pub struct EngineContext {
    master: GainControl,
    filter: FilterStage,
    panners: PanStage,
    modulation: ModulationRouter,
}

impl EngineContext {
    fn build<B: AudioBackend + ?Sized>(backend: &mut B, config: &SynthConfig) -> Result<Self, SynthError> {
        let master = backend.create_gain_control()?;
        let mut context = Self {
            master,
            filter: FilterStage::new(config.filter),
            panners: PanStage::new(&config.pans),
            modulation: ModulationRouter::new(config.lfo),
        };

        if let Err(err) = context.wire(backend, config) {
            context.teardown(backend);
            return Err(err);
        }
        Ok(context)
    }

    fn wire<B: AudioBackend + ?Sized>(&mut self, backend: &mut B, config: &SynthConfig) -> Result<(), SynthError> {
        let now = backend.now();
        backend.set_value_at(self.master.gain(), db_to_gain(config.master_volume_db), now)?;
        backend.connect(self.master.into(), Endpoint::Output)?;

        let filter = self.filter.init(backend, self.master.into())?;
        self.panners.init(backend, filter.into())?;

        self.modulation.start(backend)?;
        let target = config.lfo.target;
        if let Some((param, base)) = self.target_param(target, config.master_volume_db) {
            self.modulation.connect(backend, target, param, base)?;
        }
        Ok(())
    }

    fn target_param(&self, target: ModulationTarget, master_db: f32) -> Option<(ParamRef, f32)> {
        match target {
            ModulationTarget::FilterCutoff => self
                .filter
                .node()
                .map(|node| (node.cutoff(), self.filter.settings().cutoff)),
            ModulationTarget::Amplitude => Some((self.master.gain(), db_to_gain(master_db))),
        }
    }

    fn destinations(&self) -> Vec<Endpoint> {
        (0..self.panners.slots())
            .map(|slot| match self.panners.panner(slot) {
                Some(panner) => panner.into(),
                None => Endpoint::Output,
            })
            .collect()
    }

    fn teardown<B: AudioBackend + ?Sized>(&mut self, backend: &mut B) {
        self.modulation.teardown(backend);
        self.panners.teardown(backend);
        self.filter.teardown(backend);
        if let Err(err) = backend.disconnect(self.master.into()) {
            warn!(target: "polyvoice::engine", "error disconnecting master gain: {}", err);
        }
    }

    pub fn master(&self) -> GainControl {
        self.master
    }

    pub fn filter(&self) -> &FilterStage {
        &self.filter
    }

    pub fn panners(&self) -> &PanStage {
        &self.panners
    }

    pub fn modulation(&self) -> &ModulationRouter {
        &self.modulation
    }
}

pub struct SynthEngine<B: AudioBackend> {
    backend: B,
    config: SynthConfig,
    notes: NoteTable,
    context: Option<EngineContext>,
    voices: VoiceManager,
    unavailable_logged: bool,
}

impl<B: AudioBackend> SynthEngine<B> {
    /// An engine with the default patch, powered off.
    pub fn new(backend: B) -> Self {
        let config = SynthConfig::default();
        let voices = VoiceManager::new(config.guard_delay, config.cleanup_buffer);
        Self {
            backend,
            config,
            notes: NoteTable::new(),
            context: None,
            voices,
            unavailable_logged: false,
        }
    }

    pub fn with_config(backend: B, config: SynthConfig) -> Result<Self, SynthError> {
        config.validate()?;
        let mut engine = Self::new(backend);
        engine.voices = VoiceManager::new(config.guard_delay, config.cleanup_buffer);
        engine.config = config;
        Ok(engine)
    }

    /// Build the shared stages, start the LFO and accept notes.
    ///
    /// Idempotent. On failure nothing is left allocated and the engine
    /// stays off.
    pub fn power_on(&mut self) -> Result<(), SynthError> {
        if self.context.is_some() {
            return Ok(());
        }
        if self.backend.state() == ContextState::Closed {
            self.log_unavailable();
            return Err(BackendError::Unavailable.into());
        }

        if let Err(err) = self.backend.resume() {
            error!(target: "polyvoice::engine", "could not resume audio: {}", err);
            return Err(err.into());
        }

        match EngineContext::build(&mut self.backend, &self.config) {
            Ok(context) => {
                self.context = Some(context);
                self.voices.enable();
                info!(target: "polyvoice::engine", "powered on");
                Ok(())
            }
            Err(err) => {
                error!(target: "polyvoice::engine", "power on failed: {}", err);
                if let Err(err) = self.backend.suspend() {
                    warn!(target: "polyvoice::engine", "could not suspend audio: {}", err);
                }
                Err(err)
            }
        }
    }

    /// Release and tear down every note, drop the shared stages and
    /// suspend the backend. Idempotent.
    pub fn power_off(&mut self) {
        let Some(mut context) = self.context.take() else {
            return;
        };

        self.voices.stop_all(&mut self.backend);
        // suspended clocks never reach pending cleanups
        self.voices.shutdown(&mut self.backend);
        self.voices.disable();

        context.teardown(&mut self.backend);
        if let Err(err) = self.backend.suspend() {
            warn!(target: "polyvoice::engine", "could not suspend audio: {}", err);
        }
        info!(target: "polyvoice::engine", "powered off");
    }

    pub fn toggle_power(&mut self) -> Result<PowerState, SynthError> {
        match self.power() {
            PowerState::On => self.power_off(),
            PowerState::Off => self.power_on()?,
        }
        Ok(self.power())
    }

    pub fn power(&self) -> PowerState {
        if self.context.is_some() {
            PowerState::On
        } else {
            PowerState::Off
        }
    }

    pub fn is_powered(&self) -> bool {
        self.context.is_some()
    }

    /// Start `note`. Returns whether a voice was scheduled.
    pub fn note_on(&mut self, note: NoteId, velocity: u8) -> bool {
        let Some(context) = self.context.as_ref() else {
            self.ignore_while_off(note);
            return false;
        };

        let destinations = context.destinations();
        let patch = VoicePatch {
            oscillators: &self.config.oscillators,
            envelope: self.config.envelope,
            destinations: &destinations,
        };
        let frequency = self.notes.frequency_of(note);

        match self
            .voices
            .note_on(&mut self.backend, note, frequency, velocity, patch)
        {
            Ok(generation) => generation.is_some(),
            Err(err) => {
                warn!(target: "polyvoice::engine", "{} dropped: {}", note, err);
                false
            }
        }
    }

    pub fn note_off(&mut self, note: NoteId) -> bool {
        self.voices.note_off(&mut self.backend, note)
    }

    /// Start the note whose table frequency is exactly `frequency`.
    pub fn play_note_by_frequency(&mut self, frequency: f64, velocity: u8) -> bool {
        match self.notes.note_for_frequency(frequency) {
            Some(note) => self.note_on(note, velocity),
            None => {
                warn!(target: "polyvoice::engine", "{}", SynthError::UnknownFrequency(frequency));
                false
            }
        }
    }

    pub fn stop_note_by_frequency(&mut self, frequency: f64) -> bool {
        match self.notes.note_for_frequency(frequency) {
            Some(note) => self.note_off(note),
            None => {
                warn!(target: "polyvoice::engine", "{}", SynthError::UnknownFrequency(frequency));
                false
            }
        }
    }

    pub fn stop_all(&mut self) {
        self.voices.stop_all(&mut self.backend);
    }

    /// Run every scheduled start and cleanup that is due.
    pub fn poll(&mut self) -> usize {
        self.voices.poll(&mut self.backend)
    }

    /// Drain `rx` and handle each message. Returns how many were handled.
    pub fn process_messages<R: MessageReceiver + ?Sized>(&mut self, rx: &mut R) -> usize {
        let mut handled = 0;
        while let Some(message) = rx.pop() {
            self.handle_message(message);
            handled += 1;
        }
        handled
    }

    pub fn handle_message(&mut self, message: SynthMessage) {
        match message {
            SynthMessage::NoteOn { note, velocity } => {
                self.note_on(note, velocity);
            }
            SynthMessage::NoteOff { note } => {
                self.note_off(note);
            }
            SynthMessage::NoteOnFrequency {
                frequency,
                velocity,
            } => {
                self.play_note_by_frequency(frequency, velocity);
            }
            SynthMessage::NoteOffFrequency { frequency } => {
                self.stop_note_by_frequency(frequency);
            }
            SynthMessage::AllNotesOff => self.stop_all(),
            SynthMessage::PowerOn => {
                // failure is already logged
                let _ = self.power_on();
            }
            SynthMessage::PowerOff => self.power_off(),
            SynthMessage::PowerToggle => {
                let _ = self.toggle_power();
            }
            SynthMessage::SetParam(change) => {
                if let Err(err) = self.apply(change) {
                    warn!(target: "polyvoice::engine", "{:?} rejected: {}", change, err);
                }
            }
        }
    }

    pub fn apply(&mut self, change: ParamChange) -> Result<(), SynthError> {
        match change {
            ParamChange::OscillatorWaveform { slot, waveform } => {
                self.set_oscillator_waveform(slot, waveform)
            }
            ParamChange::OscillatorVolume { slot, db } => self.set_oscillator_volume(slot, db),
            ParamChange::OscillatorDetune { slot, cents } => self.set_oscillator_detune(slot, cents),
            ParamChange::Pan { slot, value } => self.set_pan(slot, value),
            ParamChange::FilterType(filter_type) => self.set_filter_type(filter_type),
            ParamChange::FilterCutoff(hz) => self.set_filter_cutoff(hz),
            ParamChange::FilterResonance(q) => self.set_filter_resonance(q),
            ParamChange::FilterModulation(amount) => self.modulate_filter_cutoff(amount),
            ParamChange::Attack(seconds) => self.config.envelope.set_attack(seconds),
            ParamChange::Decay(seconds) => self.config.envelope.set_decay(seconds),
            ParamChange::Sustain(level) => self.config.envelope.set_sustain(level),
            ParamChange::Release(seconds) => self.config.envelope.set_release(seconds),
            ParamChange::LfoWaveform(waveform) => self.set_lfo_waveform(waveform),
            ParamChange::LfoFrequency(hz) => self.set_lfo_frequency(hz),
            ParamChange::LfoAmplitude(amount) => self.set_lfo_amplitude(amount),
            ParamChange::LfoTarget(target) => self.set_lfo_target(target),
            ParamChange::MasterVolume(db) => self.set_master_volume(db),
        }
    }

    // Oscillator templates only affect notes played afterwards.

    pub fn set_oscillator_waveform(&mut self, slot: usize, waveform: Waveform) -> Result<(), SynthError> {
        self.oscillator_template(slot)?.waveform = waveform;
        Ok(())
    }

    pub fn set_oscillator_volume(&mut self, slot: usize, db: f32) -> Result<(), SynthError> {
        self.oscillator_template(slot)?.volume_db = db;
        Ok(())
    }

    pub fn set_oscillator_detune(&mut self, slot: usize, cents: f32) -> Result<(), SynthError> {
        self.oscillator_template(slot)?.detune_cents = cents;
        Ok(())
    }

    fn oscillator_template(
        &mut self,
        slot: usize,
    ) -> Result<&mut crate::synth::voice::OscillatorSettings, SynthError> {
        self.config
            .oscillators
            .get_mut(slot)
            .ok_or(SynthError::InvalidParameter {
                name: "oscillator slot",
                value: slot as f32,
            })
    }

    pub fn set_pan(&mut self, slot: usize, value: f32) -> Result<(), SynthError> {
        let pan = self.config.pans.get_mut(slot).ok_or(SynthError::InvalidParameter {
            name: "pan slot",
            value: slot as f32,
        })?;
        *pan = value.clamp(-1.0, 1.0);

        match self.context.as_mut() {
            Some(context) => context.panners.set_pan(&mut self.backend, slot, value),
            None => Ok(()),
        }
    }

    pub fn set_filter_type(&mut self, filter_type: FilterType) -> Result<(), SynthError> {
        self.config.filter.filter_type = filter_type;
        if let Some(context) = self.context.as_mut() {
            context.filter.set_type(&mut self.backend, filter_type)?;
        }
        Ok(())
    }

    pub fn set_filter_cutoff(&mut self, hz: f32) -> Result<(), SynthError> {
        self.config.filter.cutoff = hz.clamp(MIN_CUTOFF, MAX_CUTOFF);
        if let Some(context) = self.context.as_mut() {
            context.filter.set_cutoff(&mut self.backend, hz)?;
        }
        Ok(())
    }

    /// Glide the live cutoff to `amount` times the configured cutoff. A
    /// later `set_filter_cutoff` or power cycle returns to the stored value.
    pub fn modulate_filter_cutoff(&mut self, amount: f32) -> Result<(), SynthError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(SynthError::InvalidParameter {
                name: "cutoff modulation",
                value: amount,
            });
        }
        if let Some(context) = self.context.as_mut() {
            context.filter.modulate_cutoff(&mut self.backend, amount)?;
        }
        Ok(())
    }

    pub fn set_filter_resonance(&mut self, q: f32) -> Result<(), SynthError> {
        self.config.filter.resonance = q.clamp(MIN_RESONANCE, MAX_RESONANCE);
        if let Some(context) = self.context.as_mut() {
            context.filter.set_resonance(&mut self.backend, q)?;
        }
        Ok(())
    }

    pub fn set_lfo_waveform(&mut self, waveform: Waveform) -> Result<(), SynthError> {
        self.config.lfo.waveform = waveform;
        if let Some(context) = self.context.as_mut() {
            context
                .modulation
                .lfo_mut()
                .set_waveform(&mut self.backend, waveform)?;
        }
        Ok(())
    }

    pub fn set_lfo_frequency(&mut self, hz: f32) -> Result<(), SynthError> {
        self.config.lfo.frequency = crate::dsp::lfo::clamp_frequency(hz);
        if let Some(context) = self.context.as_mut() {
            context
                .modulation
                .lfo_mut()
                .set_frequency(&mut self.backend, hz)?;
        }
        Ok(())
    }

    pub fn set_lfo_amplitude(&mut self, amount: f32) -> Result<(), SynthError> {
        self.config.lfo.amplitude = crate::dsp::lfo::clamp_amplitude(amount);
        if let Some(context) = self.context.as_mut() {
            context
                .modulation
                .lfo_mut()
                .set_amplitude(&mut self.backend, amount)?;
        }
        Ok(())
    }

    /// Route the LFO to `target`. Ignored while powered off.
    pub fn set_lfo_target(&mut self, target: ModulationTarget) -> Result<(), SynthError> {
        let Some(context) = self.context.as_mut() else {
            debug!(target: "polyvoice::engine", "LFO target ignored while powered off");
            return Ok(());
        };
        self.config.lfo.target = target;

        if let Some((param, base)) = context.target_param(target, self.config.master_volume_db) {
            context
                .modulation
                .set_target(&mut self.backend, target, param, base)?;
        }
        Ok(())
    }

    /// Route the LFO by control name ("filter", "amplitude"). Unknown names
    /// are logged and ignored.
    pub fn select_lfo_target(&mut self, name: &str) -> bool {
        let target = match name.parse::<ModulationTarget>() {
            Ok(target) => target,
            Err(err) => {
                warn!(target: "polyvoice::engine", "{}", err);
                return false;
            }
        };
        match self.set_lfo_target(target) {
            Ok(()) => true,
            Err(err) => {
                warn!(target: "polyvoice::engine", "could not route LFO to {}: {}", target, err);
                false
            }
        }
    }

    pub fn set_master_volume(&mut self, db: f32) -> Result<(), SynthError> {
        self.config.master_volume_db = db;
        if let Some(context) = self.context.as_ref() {
            let now = self.backend.now();
            self.backend
                .set_value_at(context.master.gain(), db_to_gain(db), now)?;
        }
        Ok(())
    }

    pub fn set_guard_delay(&mut self, seconds: f64) {
        self.config.guard_delay = seconds.max(0.0);
        self.voices.set_guard_delay(seconds);
    }

    fn ignore_while_off(&mut self, note: NoteId) {
        if self.backend.state() == ContextState::Closed {
            self.log_unavailable();
        } else {
            debug!(target: "polyvoice::engine", "{} ignored while powered off", note);
        }
    }

    fn log_unavailable(&mut self) {
        if !self.unavailable_logged {
            self.unavailable_logged = true;
            warn!(target: "polyvoice::engine", "no audio context available; synth is silent");
        }
    }

    pub fn drain_events(&mut self) -> Vec<LifecycleEvent> {
        self.voices.drain_events()
    }

    pub fn route(&self) -> Option<&ModulationRoute> {
        self.context.as_ref()?.modulation.route()
    }

    pub fn context(&self) -> Option<&EngineContext> {
        self.context.as_ref()
    }

    pub fn voices(&self) -> &VoiceManager {
        &self.voices
    }

    pub fn config(&self) -> &SynthConfig {
        &self.config
    }

    pub fn note_table(&self) -> &NoteTable {
        &self.notes
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::Operation;
    use crate::backend::RecordingBackend;

    fn powered() -> SynthEngine<RecordingBackend> {
        let mut engine = SynthEngine::new(RecordingBackend::new());
        engine.power_on().unwrap();
        engine
    }

    #[test]
    fn power_on_wires_the_shared_stages() {
        let engine = powered();
        let context = engine.context().unwrap();
        let backend = engine.backend();

        assert_eq!(backend.state(), ContextState::Running);
        assert!(backend.is_connected(context.master().into(), Endpoint::Output));
        let filter = context.filter().node().unwrap();
        assert!(backend.is_connected(filter.into(), context.master().into()));
        for slot in 0..2 {
            let panner = context.panners().panner(slot).unwrap();
            assert!(backend.is_connected(panner.into(), filter.into()));
        }
        assert_eq!(
            engine.route().map(|r| r.target),
            Some(ModulationTarget::FilterCutoff)
        );
    }

    #[test]
    fn power_on_is_idempotent() {
        let mut engine = powered();
        let nodes = engine.backend().node_count();
        engine.power_on().unwrap();
        assert_eq!(engine.backend().node_count(), nodes);
    }

    #[test]
    fn failed_power_on_leaves_nothing_connected() {
        let mut engine = SynthEngine::new(RecordingBackend::new());
        engine.backend_mut().fail_next(Operation::Start);

        assert!(engine.power_on().is_err());
        assert_eq!(engine.power(), PowerState::Off);
        assert_eq!(engine.backend().connection_count(), 0);
        assert!(!engine.note_on(NoteId::A4, 100));
    }

    #[test]
    fn power_off_tears_everything_down() {
        let mut engine = powered();
        engine.note_on(NoteId::A4, 100);
        engine.note_on(NoteId::C4, 100);

        engine.power_off();
        assert_eq!(engine.power(), PowerState::Off);
        assert!(engine.voices().is_empty());
        assert_eq!(engine.backend().playing_sources(), 0);
        assert_eq!(engine.backend().connection_count(), 0);
        assert_eq!(engine.backend().state(), ContextState::Suspended);
    }

    #[test]
    fn power_off_survives_a_failed_lfo_stop() {
        let mut engine = powered();
        engine.backend_mut().fail_next(Operation::Stop);

        engine.power_off();
        assert_eq!(engine.backend().connection_count(), 0);
    }

    #[test]
    fn cutoff_modulation_glides_without_touching_the_config() {
        let mut engine = powered();
        engine.apply(ParamChange::FilterModulation(0.5)).unwrap();

        let cutoff = engine.context().unwrap().filter().node().unwrap().cutoff();
        assert_eq!(engine.config().filter.cutoff, 2000.0);
        assert!((engine.backend().value_at(cutoff, 1.0) - 1000.0).abs() < 1e-3);

        assert!(engine.modulate_filter_cutoff(0.0).is_err());
        assert!(engine.modulate_filter_cutoff(f32::NAN).is_err());
    }

    #[test]
    fn notes_route_through_the_slot_panners() {
        let mut engine = powered();
        assert!(engine.note_on(NoteId::A4, 100));

        let entry = engine.voices().entry(NoteId::A4).unwrap();
        let context = engine.context().unwrap();
        for (slot, lane) in entry.lanes().iter().enumerate() {
            let panner = context.panners().panner(slot).unwrap();
            assert!(engine.backend().is_connected((*lane).into(), panner.into()));
        }
    }

    #[test]
    fn unknown_frequencies_are_ignored() {
        let mut engine = powered();
        assert!(!engine.play_note_by_frequency(441.0, 100));
        assert!(engine.play_note_by_frequency(440.0, 100));
        assert!(engine.stop_note_by_frequency(440.0));
        assert!(!engine.stop_note_by_frequency(12.5));
    }

    #[test]
    fn lfo_target_selection_by_name() {
        let mut engine = powered();
        assert!(engine.select_lfo_target("amplitude"));
        let master = engine.context().unwrap().master();
        assert_eq!(engine.route().map(|r| r.param), Some(master.gain()));

        assert!(!engine.select_lfo_target("pitch"));
        assert_eq!(engine.route().map(|r| r.param), Some(master.gain()));
    }

    #[test]
    fn template_edits_do_not_touch_sounding_notes() {
        let mut engine = powered();
        engine.note_on(NoteId::A4, 100);
        engine.set_oscillator_waveform(0, Waveform::Sine).unwrap();
        engine.apply(ParamChange::Attack(1.5)).unwrap();

        let entry = engine.voices().entry(NoteId::A4).unwrap();
        assert_eq!(entry.voices()[0].settings().waveform, Waveform::Sawtooth);
        assert_eq!(entry.envelope().params().attack, 0.1);
        assert_eq!(engine.config().envelope.attack, 1.5);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let mut engine = powered();
        assert!(engine.apply(ParamChange::Sustain(2.0)).is_err());
        assert!(engine.set_oscillator_volume(5, 0.0).is_err());
        assert_eq!(engine.config().envelope.sustain, 0.7);
    }

    #[test]
    fn master_volume_applies_immediately() {
        let mut engine = powered();
        engine.backend_mut().advance(1.0);
        engine.set_master_volume(0.0).unwrap();
        let master = engine.context().unwrap().master();
        assert_eq!(engine.backend().value_at(master.gain(), 1.0), 1.0);
    }

    #[test]
    fn unavailable_backend_makes_everything_a_no_op() {
        let mut engine = SynthEngine::new(RecordingBackend::unavailable());
        assert_eq!(
            engine.power_on(),
            Err(SynthError::Backend(BackendError::Unavailable))
        );
        assert!(!engine.note_on(NoteId::A4, 100));
        assert!(!engine.note_off(NoteId::A4));
        engine.stop_all();
        engine.power_off();
        assert_eq!(engine.poll(), 0);
    }
}
