use std::collections::HashMap;

use log::{debug, warn};

use crate::{
    backend::{AudioBackend, Endpoint, GainControl, ParamRef},
    dsp::envelope::{Envelope, EnvelopeParams},
    engine::scheduler::Scheduler,
    notes::NoteId,
    synth::voice::{OscillatorSettings, OscillatorVoice},
    SynthError,
};

/*
Note Registry
=============

Every playing pitch owns one NoteEntry: its oscillator voices, one lane
gain per oscillator (the envelope's target) and a private envelope. The
registry maps NoteId -> NoteEntry, so there is at most one live entry per
pitch.

Lifecycle
---------

    ┌──────┐ note_on  ┌───────────┐  Start   ┌──────────┐
    │ Idle │ ───────→ │ Scheduled │ ───────→ │ Sounding │
    └──────┘          └───────────┘          └──────────┘
       ↑                    │ note_off             │ note_off
       │                    ↓                      ↓
       │              ┌───────────┐   Cleanup ┌─────────┐
       └── Removed ←─ │  Cleanup  │ ←──────── │Releasing│
                      └───────────┘           └─────────┘

Start and Cleanup are tasks on a delayed-task queue driven by the backend
clock. Nothing fires on its own: `poll` runs whatever is due.

Generations
-----------

Each entry gets a fresh generation number. Tasks carry (note, generation)
and re-check it when they fire; a task whose entry has been replaced or
removed in the meantime does nothing. This is what keeps a stale cleanup
from tearing down the voice that replaced it.

Retrigger
---------

note_on for a pitch that already has an entry:

    t = now                     t = now + guard
    ├─ old: fast release ──────→├─ old: Cleanup -> Removed
    │  (detached from registry) ├─ new: Start -> Sounding
    └─ new: Scheduled           │

The old entry leaves the registry immediately (a retiring list keeps it
until its cleanup), so the new entry can take the slot. Both tasks are due
at the same instant and the queue is FIFO for equal times, so the old
voice is gone before the new one starts. With guard = 0 the old entry is
silenced and torn down synchronously.
*/

/// Lifecycle state of a note entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteState {
    Scheduled,
    Sounding,
    Releasing,
    Cleanup,
    Removed,
}

/// A recorded state transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LifecycleEvent {
    pub note: NoteId,
    pub generation: u64,
    pub state: NoteState,
    pub time: f64,
}

/// What a new note is built from.
#[derive(Debug, Clone, Copy)]
pub struct VoicePatch<'a> {
    pub oscillators: &'a [OscillatorSettings],
    pub envelope: EnvelopeParams,
    /// Where each oscillator slot's lane lands; one per oscillator
    pub destinations: &'a [Endpoint],
}

#[derive(Debug)]
pub struct NoteEntry {
    note: NoteId,
    generation: u64,
    frequency: f64,
    velocity: u8,
    start_time: f64,
    state: NoteState,
    envelope: Envelope,
    voices: Vec<OscillatorVoice>,
    lanes: Vec<GainControl>,
}

impl NoteEntry {
    pub fn note(&self) -> NoteId {
        self.note
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    /// Scheduled start time; the actual start once Sounding.
    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn state(&self) -> NoteState {
        self.state
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn voices(&self) -> &[OscillatorVoice] {
        &self.voices
    }

    pub fn lanes(&self) -> &[GainControl] {
        &self.lanes
    }

    fn lane_params(&self) -> Vec<ParamRef> {
        self.lanes.iter().map(|lane| lane.gain()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VoiceTask {
    Start { note: NoteId, generation: u64 },
    Cleanup { note: NoteId, generation: u64 },
}

pub struct VoiceManager {
    entries: HashMap<NoteId, NoteEntry>,
    retiring: Vec<NoteEntry>,
    tasks: Scheduler<VoiceTask>,
    events: Vec<LifecycleEvent>,
    next_generation: u64,
    guard_delay: f64,
    cleanup_buffer: f64,
    enabled: bool,
}

impl VoiceManager {
    pub fn new(guard_delay: f64, cleanup_buffer: f64) -> Self {
        Self {
            entries: HashMap::new(),
            retiring: Vec::new(),
            tasks: Scheduler::new(),
            events: Vec::new(),
            next_generation: 1,
            guard_delay: guard_delay.max(0.0),
            cleanup_buffer: cleanup_buffer.max(0.0),
            enabled: false,
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn guard_delay(&self) -> f64 {
        self.guard_delay
    }

    pub fn set_guard_delay(&mut self, seconds: f64) {
        self.guard_delay = seconds.max(0.0);
    }

    /// Create an entry for `note` and schedule its start.
    ///
    /// An existing entry for the same pitch is retired first and the new one
    /// starts after the guard delay; a fresh pitch starts immediately.
    /// Returns the new entry's generation, or `None` while disabled.
    pub fn note_on<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        note: NoteId,
        frequency: f64,
        velocity: u8,
        patch: VoicePatch<'_>,
    ) -> Result<Option<u64>, SynthError> {
        if !self.enabled {
            debug!(target: "polyvoice::voice", "{} ignored: voice manager disabled", note);
            return Ok(None);
        }

        let now = backend.now();
        let start_at = match self.entries.remove(&note) {
            Some(old) => {
                self.retire(backend, old, now);
                now + self.guard_delay
            }
            None => now,
        };

        let generation = self.next_generation;
        self.next_generation += 1;

        let mut entry = NoteEntry {
            note,
            generation,
            frequency,
            velocity,
            start_time: start_at,
            state: NoteState::Scheduled,
            envelope: Envelope::new(patch.envelope),
            voices: Vec::with_capacity(patch.oscillators.len()),
            lanes: Vec::with_capacity(patch.oscillators.len()),
        };

        if let Err(err) = build_voices(backend, &mut entry, &patch, now) {
            warn!(target: "polyvoice::voice", "{} could not be built: {}", note, err);
            teardown_entry(backend, &mut entry, now);
            return Err(err.into());
        }

        record(&mut self.events, &entry, now);
        self.entries.insert(note, entry);
        self.tasks
            .schedule(start_at, VoiceTask::Start { note, generation });

        self.poll(backend);
        Ok(Some(generation))
    }

    /// Release `note`. Returns `false` if there was nothing to release.
    pub fn note_off<B: AudioBackend + ?Sized>(&mut self, backend: &mut B, note: NoteId) -> bool {
        let Some(entry) = self.entries.get_mut(&note) else {
            return false;
        };
        if matches!(entry.state, NoteState::Releasing | NoteState::Cleanup | NoteState::Removed) {
            return false;
        }

        let now = backend.now();
        let lanes = entry.lane_params();
        if let Err(err) = entry.envelope.trigger_release(backend, &lanes, now) {
            warn!(target: "polyvoice::voice", "{} release automation failed: {}", note, err);
        }

        entry.state = NoteState::Releasing;
        record(&mut self.events, entry, now);

        let cleanup_at = now + entry.envelope.params().release as f64 + self.cleanup_buffer;
        self.tasks.schedule(
            cleanup_at,
            VoiceTask::Cleanup {
                note,
                generation: entry.generation,
            },
        );
        true
    }

    /// Release every registered note.
    pub fn stop_all<B: AudioBackend + ?Sized>(&mut self, backend: &mut B) {
        let notes: Vec<NoteId> = self.entries.keys().copied().collect();
        for note in notes {
            self.note_off(backend, note);
        }
    }

    /// Tear every entry down right now and forget all pending tasks.
    ///
    /// For when the clock is about to stop and scheduled cleanups would
    /// never fire.
    pub fn shutdown<B: AudioBackend + ?Sized>(&mut self, backend: &mut B) {
        let now = backend.now();
        let mut doomed: Vec<NoteEntry> = self.retiring.drain(..).collect();
        doomed.extend(self.entries.drain().map(|(_, entry)| entry));

        for mut entry in doomed {
            self.finish(backend, &mut entry, now);
        }
        self.tasks.clear();
    }

    /// Run every task due at the backend's current time.
    pub fn poll<B: AudioBackend + ?Sized>(&mut self, backend: &mut B) -> usize {
        let now = backend.now();
        let mut ran = 0;
        while let Some((_, task)) = self.tasks.pop_due(now) {
            match task {
                VoiceTask::Start { note, generation } => self.start(backend, note, generation),
                VoiceTask::Cleanup { note, generation } => self.cleanup(backend, note, generation),
            }
            ran += 1;
        }
        ran
    }

    fn start<B: AudioBackend + ?Sized>(&mut self, backend: &mut B, note: NoteId, generation: u64) {
        let Some(entry) = self
            .entries
            .get_mut(&note)
            .filter(|entry| entry.generation == generation)
        else {
            debug!(target: "polyvoice::voice", "stale start for {} #{}", note, generation);
            return;
        };
        if entry.state != NoteState::Scheduled {
            // released before it ever started
            return;
        }

        let now = backend.now();
        for voice in &mut entry.voices {
            voice.start(backend, entry.frequency, now);
        }
        let lanes = entry.lane_params();
        if let Err(err) = entry.envelope.trigger_attack(backend, &lanes, now) {
            warn!(target: "polyvoice::voice", "{} attack automation failed: {}", note, err);
        }

        entry.start_time = now;
        entry.state = NoteState::Sounding;
        record(&mut self.events, entry, now);
    }

    fn cleanup<B: AudioBackend + ?Sized>(&mut self, backend: &mut B, note: NoteId, generation: u64) {
        let now = backend.now();

        if let Some(pos) = self
            .retiring
            .iter()
            .position(|entry| entry.note == note && entry.generation == generation)
        {
            let mut entry = self.retiring.swap_remove(pos);
            self.finish(backend, &mut entry, now);
            return;
        }

        let current = self
            .entries
            .get(&note)
            .is_some_and(|entry| entry.generation == generation);
        if !current {
            debug!(target: "polyvoice::voice", "stale cleanup for {} #{}", note, generation);
            return;
        }
        if let Some(mut entry) = self.entries.remove(&note) {
            self.finish(backend, &mut entry, now);
        }
    }

    /// Detach `old` from the registry and fade it out over the guard delay.
    fn retire<B: AudioBackend + ?Sized>(&mut self, backend: &mut B, mut old: NoteEntry, now: f64) {
        let lanes = old.lane_params();
        let fade = self.guard_delay as f32;
        if let Err(err) = old.envelope.fast_release(backend, &lanes, now, fade) {
            warn!(target: "polyvoice::voice", "{} retrigger fade failed: {}", old.note, err);
        }
        if old.state != NoteState::Releasing {
            old.state = NoteState::Releasing;
            record(&mut self.events, &old, now);
        }

        if self.guard_delay > 0.0 {
            self.tasks.schedule(
                now + self.guard_delay,
                VoiceTask::Cleanup {
                    note: old.note,
                    generation: old.generation,
                },
            );
            self.retiring.push(old);
        } else {
            self.finish(backend, &mut old, now);
        }
    }

    /// Cleanup -> Removed. Best effort: backend errors are logged by the
    /// voices and never stop the entry from being dropped.
    fn finish<B: AudioBackend + ?Sized>(&mut self, backend: &mut B, entry: &mut NoteEntry, now: f64) {
        entry.state = NoteState::Cleanup;
        record(&mut self.events, entry, now);

        teardown_entry(backend, entry, now);

        entry.state = NoteState::Removed;
        record(&mut self.events, entry, now);
    }

    pub fn entry(&self, note: NoteId) -> Option<&NoteEntry> {
        self.entries.get(&note)
    }

    pub fn state_of(&self, note: NoteId) -> Option<NoteState> {
        self.entries.get(&note).map(NoteEntry::state)
    }

    pub fn entries(&self) -> impl Iterator<Item = &NoteEntry> {
        self.entries.values()
    }

    /// Live entries (excludes retiring ones).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sounding_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.state == NoteState::Sounding)
            .count()
    }

    /// Replaced entries still fading out.
    pub fn retiring_count(&self) -> usize {
        self.retiring.len()
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn next_deadline(&self) -> Option<f64> {
        self.tasks.next_deadline()
    }

    pub fn drain_events(&mut self) -> Vec<LifecycleEvent> {
        std::mem::take(&mut self.events)
    }
}

fn build_voices<B: AudioBackend + ?Sized>(
    backend: &mut B,
    entry: &mut NoteEntry,
    patch: &VoicePatch<'_>,
    now: f64,
) -> Result<(), crate::backend::BackendError> {
    for (slot, settings) in patch.oscillators.iter().enumerate() {
        let destination = patch
            .destinations
            .get(slot)
            .copied()
            .unwrap_or(Endpoint::Output);

        let lane = backend.create_gain_control()?;
        entry.lanes.push(lane);
        backend.set_value_at(lane.gain(), 0.0, now)?;
        backend.connect(lane.into(), destination)?;

        let mut voice = OscillatorVoice::new(slot, *settings);
        let init = voice.init(backend, lane.into());
        entry.voices.push(voice);
        init?;
    }
    Ok(())
}

fn teardown_entry<B: AudioBackend + ?Sized>(backend: &mut B, entry: &mut NoteEntry, now: f64) {
    for voice in &mut entry.voices {
        voice.teardown(backend, now);
    }
    for lane in entry.lanes.drain(..) {
        if let Err(err) = backend.disconnect(lane.into()) {
            warn!(target: "polyvoice::voice", "{} lane disconnect failed: {}", entry.note, err);
        }
    }
}

fn record(events: &mut Vec<LifecycleEvent>, entry: &NoteEntry, time: f64) {
    debug!(
        target: "polyvoice::voice",
        "{} #{} -> {:?} at {:.3}",
        entry.note,
        entry.generation,
        entry.state,
        time
    );
    events.push(LifecycleEvent {
        note: entry.note,
        generation: entry.generation,
        state: entry.state,
        time,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::Operation;
    use crate::backend::RecordingBackend;
    use crate::dsp::oscillator::Waveform;

    const OSCILLATORS: [OscillatorSettings; 2] = [
        OscillatorSettings {
            waveform: Waveform::Sawtooth,
            volume_db: -10.0,
            detune_cents: 0.0,
        },
        OscillatorSettings {
            waveform: Waveform::Square,
            volume_db: -15.0,
            detune_cents: 0.0,
        },
    ];
    const DESTINATIONS: [Endpoint; 2] = [Endpoint::Output, Endpoint::Output];

    fn patch() -> VoicePatch<'static> {
        VoicePatch {
            oscillators: &OSCILLATORS,
            envelope: EnvelopeParams::default(),
            destinations: &DESTINATIONS,
        }
    }

    fn setup() -> (RecordingBackend, VoiceManager) {
        let mut backend = RecordingBackend::new();
        backend.resume().unwrap();
        let mut manager = VoiceManager::new(0.1, 0.1);
        manager.enable();
        (backend, manager)
    }

    fn states(events: &[LifecycleEvent], generation: u64) -> Vec<NoteState> {
        events
            .iter()
            .filter(|e| e.generation == generation)
            .map(|e| e.state)
            .collect()
    }

    #[test]
    fn fresh_note_starts_immediately() {
        let (mut backend, mut manager) = setup();
        let generation = manager
            .note_on(&mut backend, NoteId::A4, 440.0, 100, patch())
            .unwrap()
            .unwrap();

        assert_eq!(manager.state_of(NoteId::A4), Some(NoteState::Sounding));
        assert_eq!(backend.playing_sources(), 2);
        let events = manager.drain_events();
        assert_eq!(
            states(&events, generation),
            vec![NoteState::Scheduled, NoteState::Sounding]
        );
    }

    #[test]
    fn release_then_cleanup_empties_the_registry() {
        let (mut backend, mut manager) = setup();
        manager
            .note_on(&mut backend, NoteId::A4, 440.0, 100, patch())
            .unwrap();
        backend.advance(0.3);
        assert!(manager.note_off(&mut backend, NoteId::A4));
        assert_eq!(manager.state_of(NoteId::A4), Some(NoteState::Releasing));

        // release (0.5) + buffer (0.1)
        backend.advance(0.59);
        manager.poll(&mut backend);
        assert_eq!(manager.len(), 1);

        backend.advance(0.02);
        manager.poll(&mut backend);
        assert!(manager.is_empty());
        assert_eq!(backend.playing_sources(), 0);
        assert_eq!(backend.connection_count(), 0);
    }

    #[test]
    fn note_off_without_entry_is_a_no_op() {
        let (mut backend, mut manager) = setup();
        assert!(!manager.note_off(&mut backend, NoteId::C4));
        assert!(manager.drain_events().is_empty());
    }

    #[test]
    fn retrigger_replaces_after_the_guard_delay() {
        let (mut backend, mut manager) = setup();
        let first = manager
            .note_on(&mut backend, NoteId::A4, 440.0, 100, patch())
            .unwrap()
            .unwrap();
        let second = manager
            .note_on(&mut backend, NoteId::A4, 440.0, 100, patch())
            .unwrap()
            .unwrap();

        assert_eq!(manager.len(), 1);
        assert_eq!(manager.retiring_count(), 1);
        assert_eq!(manager.state_of(NoteId::A4), Some(NoteState::Scheduled));
        assert_eq!(manager.sounding_count(), 0);

        backend.advance(0.1);
        manager.poll(&mut backend);

        assert_eq!(manager.retiring_count(), 0);
        assert_eq!(manager.sounding_count(), 1);
        assert_eq!(manager.entry(NoteId::A4).map(NoteEntry::generation), Some(second));
        assert_eq!(backend.playing_sources(), 2);

        let events = manager.drain_events();
        assert_eq!(
            states(&events, first),
            vec![
                NoteState::Scheduled,
                NoteState::Sounding,
                NoteState::Releasing,
                NoteState::Cleanup,
                NoteState::Removed
            ]
        );
        // the old entry is gone before the new one sounds
        let removed = events
            .iter()
            .position(|e| e.generation == first && e.state == NoteState::Removed);
        let sounding = events
            .iter()
            .position(|e| e.generation == second && e.state == NoteState::Sounding);
        assert!(removed < sounding);
    }

    #[test]
    fn stale_cleanup_does_not_touch_the_replacement() {
        let (mut backend, mut manager) = setup();
        manager
            .note_on(&mut backend, NoteId::A4, 440.0, 100, patch())
            .unwrap();
        backend.advance(0.2);
        manager.note_off(&mut backend, NoteId::A4); // cleanup due at 0.8

        backend.advance(0.1);
        manager
            .note_on(&mut backend, NoteId::A4, 440.0, 100, patch())
            .unwrap();
        backend.advance(0.1);
        manager.poll(&mut backend);
        assert_eq!(manager.sounding_count(), 1);

        backend.advance(1.0);
        manager.poll(&mut backend);
        assert_eq!(manager.state_of(NoteId::A4), Some(NoteState::Sounding));
        assert_eq!(backend.playing_sources(), 2);
    }

    #[test]
    fn zero_guard_delay_replaces_synchronously() {
        let (mut backend, mut manager) = setup();
        manager.set_guard_delay(0.0);
        manager
            .note_on(&mut backend, NoteId::A4, 440.0, 100, patch())
            .unwrap();
        manager
            .note_on(&mut backend, NoteId::A4, 440.0, 100, patch())
            .unwrap();

        assert_eq!(manager.retiring_count(), 0);
        assert_eq!(manager.sounding_count(), 1);
        assert_eq!(backend.playing_sources(), 2);
    }

    #[test]
    fn release_before_start_never_starts() {
        let (mut backend, mut manager) = setup();
        manager
            .note_on(&mut backend, NoteId::A4, 440.0, 100, patch())
            .unwrap();
        manager
            .note_on(&mut backend, NoteId::A4, 440.0, 100, patch())
            .unwrap();
        assert!(manager.note_off(&mut backend, NoteId::A4));

        backend.advance(0.1);
        manager.poll(&mut backend);
        assert_eq!(manager.state_of(NoteId::A4), Some(NoteState::Releasing));
        assert_eq!(backend.playing_sources(), 0);

        backend.advance(1.0);
        manager.poll(&mut backend);
        assert!(manager.is_empty());
    }

    #[test]
    fn stop_all_drains_after_release_and_buffer() {
        let (mut backend, mut manager) = setup();
        for midi in [60, 64, 67] {
            let note = NoteId::from_midi(midi).unwrap();
            manager
                .note_on(&mut backend, note, note.frequency(), 90, patch())
                .unwrap();
        }
        backend.advance(0.2);
        manager.stop_all(&mut backend);
        assert_eq!(manager.len(), 3);

        backend.advance(0.61);
        manager.poll(&mut backend);
        assert!(manager.is_empty());
        assert_eq!(manager.pending_tasks(), 0);
    }

    #[test]
    fn backend_failures_never_strand_an_entry() {
        let (mut backend, mut manager) = setup();
        manager
            .note_on(&mut backend, NoteId::A4, 440.0, 100, patch())
            .unwrap();
        manager.note_off(&mut backend, NoteId::A4);

        backend.fail_next(Operation::Stop);
        backend.fail_next(Operation::Disconnect);
        backend.advance(1.0);
        manager.poll(&mut backend);

        assert!(manager.is_empty());
    }

    #[test]
    fn failed_build_leaves_nothing_behind() {
        let (mut backend, mut manager) = setup();
        backend.fail_next(Operation::Connect);
        let result = manager.note_on(&mut backend, NoteId::A4, 440.0, 100, patch());

        assert!(result.is_err());
        assert!(manager.is_empty());
        assert_eq!(backend.connection_count(), 0);
    }

    #[test]
    fn shutdown_is_synchronous() {
        let (mut backend, mut manager) = setup();
        manager
            .note_on(&mut backend, NoteId::A4, 440.0, 100, patch())
            .unwrap();
        manager
            .note_on(&mut backend, NoteId::A4, 440.0, 100, patch())
            .unwrap();
        manager.shutdown(&mut backend);

        assert!(manager.is_empty());
        assert_eq!(manager.retiring_count(), 0);
        assert_eq!(manager.pending_tasks(), 0);
        assert_eq!(backend.playing_sources(), 0);
    }

    #[test]
    fn disabled_manager_ignores_notes() {
        let (mut backend, mut manager) = setup();
        manager.disable();
        let result = manager.note_on(&mut backend, NoteId::A4, 440.0, 100, patch());
        assert_eq!(result, Ok(None));
        assert!(manager.is_empty());
    }

    #[test]
    fn envelope_targets_the_lanes() {
        let (mut backend, mut manager) = setup();
        manager
            .note_on(&mut backend, NoteId::A4, 440.0, 100, patch())
            .unwrap();
        let entry = manager.entry(NoteId::A4).unwrap();
        for lane in entry.lanes() {
            assert!((backend.value_at(lane.gain(), 0.1) - 1.0).abs() < 1e-4);
            assert!((backend.value_at(lane.gain(), 0.3) - 0.7).abs() < 1e-4);
        }
    }
}
