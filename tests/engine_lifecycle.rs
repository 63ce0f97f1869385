use std::collections::VecDeque;

use polyvoice::{
    backend::{AudioBackend, ContextState},
    io::{converter::midi_to_synth, midi::MidiEvent},
    synth::{
        message::{ParamChange, SynthMessage},
        modulation::ModulationTarget,
        poly::NoteState,
    },
    NoteId, RecordingBackend, SynthConfig, SynthEngine,
};

const EPS: f32 = 1e-4;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn engine() -> SynthEngine<RecordingBackend> {
    init_logger();
    let mut engine = SynthEngine::new(RecordingBackend::new());
    engine.power_on().unwrap();
    engine
}

fn advance(engine: &mut SynthEngine<RecordingBackend>, seconds: f64) {
    engine.backend_mut().advance(seconds);
    engine.poll();
}

#[test]
fn envelope_reaches_the_lane_gains() {
    let mut engine = engine();
    assert!(engine.note_on(NoteId::A4, 100));

    let lane = engine.voices().entry(NoteId::A4).unwrap().lanes()[0].gain();
    let backend = engine.backend();
    assert!((backend.value_at(lane, 0.05) - 0.5).abs() < EPS);
    assert!((backend.value_at(lane, 0.1) - 1.0).abs() < EPS);
    assert!((backend.value_at(lane, 0.3) - 0.7).abs() < EPS);
    assert!((backend.value_at(lane, 2.0) - 0.7).abs() < EPS);
}

#[test]
fn release_during_decay_ramps_from_the_audible_value() {
    let mut engine = engine();
    engine.note_on(NoteId::A4, 100);
    advance(&mut engine, 0.25);

    let entry = engine.voices().entry(NoteId::A4).unwrap();
    let audible = entry.envelope().value(0.25);
    assert!((audible - 0.775).abs() < EPS);

    assert!(engine.note_off(NoteId::A4));
    let entry = engine.voices().entry(NoteId::A4).unwrap();
    assert_eq!(entry.state(), NoteState::Releasing);
    assert!((entry.envelope().release_end().unwrap() - 0.75).abs() < 1e-6);

    let lane = entry.lanes()[0].gain();
    let backend = engine.backend();
    assert!((backend.value_at(lane, 0.25) - audible).abs() < EPS);
    assert!((backend.value_at(lane, 0.5) - audible / 2.0).abs() < EPS);
    assert!(backend.value_at(lane, 0.75).abs() < EPS);
}

#[test]
fn retrigger_leaves_exactly_one_sounding_entry() {
    let mut engine = engine();
    engine.note_on(NoteId::A4, 100);
    advance(&mut engine, 0.5);
    let first = engine.voices().entry(NoteId::A4).unwrap().generation();
    engine.drain_events();

    engine.note_on(NoteId::A4, 100);
    let second = engine.voices().entry(NoteId::A4).unwrap().generation();
    assert_ne!(first, second);
    assert_eq!(engine.voices().len(), 1);
    assert_eq!(engine.voices().retiring_count(), 1);
    assert_eq!(engine.voices().sounding_count(), 0);

    advance(&mut engine, 0.11);
    assert_eq!(engine.voices().sounding_count(), 1);
    assert_eq!(engine.voices().retiring_count(), 0);

    let events = engine.drain_events();
    let old: Vec<NoteState> = events
        .iter()
        .filter(|e| e.generation == first)
        .map(|e| e.state)
        .collect();
    assert_eq!(
        old,
        [NoteState::Releasing, NoteState::Cleanup, NoteState::Removed]
    );

    let removed = events
        .iter()
        .position(|e| e.generation == first && e.state == NoteState::Removed)
        .unwrap();
    let sounding = events
        .iter()
        .position(|e| e.generation == second && e.state == NoteState::Sounding)
        .unwrap();
    assert!(removed < sounding);

    // two oscillators for the new note plus the LFO
    assert_eq!(engine.backend().playing_sources(), 3);
}

#[test]
fn retrigger_without_guard_delay_is_synchronous() {
    init_logger();
    let config = SynthConfig::default().with_guard_delay(0.0);
    let mut engine = SynthEngine::with_config(RecordingBackend::new(), config).unwrap();
    engine.power_on().unwrap();

    engine.note_on(NoteId::C4, 100);
    engine.note_on(NoteId::C4, 100);
    assert_eq!(engine.voices().retiring_count(), 0);
    assert_eq!(engine.voices().sounding_count(), 1);
    assert_eq!(engine.backend().playing_sources(), 3);
}

#[test]
fn release_before_start_never_sounds() {
    let mut engine = engine();
    engine.note_on(NoteId::A4, 100);
    engine.note_on(NoteId::A4, 100);
    assert!(engine.note_off(NoteId::A4));
    assert_eq!(engine.voices().state_of(NoteId::A4), Some(NoteState::Releasing));

    advance(&mut engine, 0.11);
    assert_eq!(engine.voices().sounding_count(), 0);
    // only the LFO
    assert_eq!(engine.backend().playing_sources(), 1);

    advance(&mut engine, 0.5);
    assert!(engine.voices().is_empty());
}

#[test]
fn stop_all_drains_the_registry() {
    let mut engine = engine();
    for note in ["C4", "E4", "G4"] {
        assert!(engine.note_on(note.parse().unwrap(), 100));
    }
    advance(&mut engine, 0.3);
    assert_eq!(engine.voices().sounding_count(), 3);

    engine.stop_all();
    assert!(engine
        .voices()
        .entries()
        .all(|entry| entry.state() == NoteState::Releasing));

    advance(&mut engine, 0.5 + 0.1 + 0.01);
    assert!(engine.voices().is_empty());
    assert_eq!(engine.voices().pending_tasks(), 0);
    assert_eq!(engine.backend().playing_sources(), 1);
}

#[test]
fn switching_lfo_target_disconnects_the_cutoff() {
    let mut engine = engine();
    let context = engine.context().unwrap();
    let cutoff = context.filter().node().unwrap().cutoff();
    let master = context.master().gain();
    let depth = context.modulation().lfo().output().unwrap();

    assert_eq!(engine.backend().modulators(cutoff), [depth.0]);

    engine.set_lfo_target(ModulationTarget::FilterCutoff).unwrap();
    engine.set_lfo_target(ModulationTarget::Amplitude).unwrap();

    assert!(engine.backend().modulators(cutoff).is_empty());
    assert_eq!(engine.backend().modulators(master), [depth.0]);
    assert_eq!(engine.route().unwrap().target, ModulationTarget::Amplitude);
}

#[test]
fn lfo_target_is_ignored_while_powered_off() {
    init_logger();
    let mut engine = SynthEngine::new(RecordingBackend::new());
    engine.set_lfo_target(ModulationTarget::Amplitude).unwrap();
    assert!(engine.route().is_none());

    engine.power_on().unwrap();
    assert_eq!(engine.route().unwrap().target, ModulationTarget::FilterCutoff);
}

#[test]
fn power_cycle_releases_every_node() {
    let mut engine = engine();
    engine.note_on(NoteId::A4, 100);
    engine.note_on(NoteId::C4, 100);
    engine.note_on(NoteId::A4, 100);

    engine.power_off();
    assert_eq!(engine.backend().state(), ContextState::Suspended);
    assert_eq!(engine.backend().playing_sources(), 0);
    assert_eq!(engine.backend().connection_count(), 0);
    assert!(!engine.note_on(NoteId::A4, 100));

    engine.power_on().unwrap();
    assert!(engine.note_on(NoteId::A4, 100));
    assert_eq!(engine.voices().sounding_count(), 1);
}

#[test]
fn unavailable_backend_is_silent() {
    init_logger();
    let mut engine = SynthEngine::new(RecordingBackend::unavailable());
    assert!(engine.power_on().is_err());
    assert!(engine.power_on().is_err());
    assert!(!engine.note_on(NoteId::A4, 100));
    assert!(!engine.play_note_by_frequency(440.0, 100));
    engine.stop_all();
    assert_eq!(engine.backend().node_count(), 0);
}

#[test]
fn midi_bytes_play_notes_by_frequency() {
    let mut engine = engine();

    let on = MidiEvent::parse(&[0x90, 69, 100]).unwrap();
    engine.handle_message(midi_to_synth(on, None).unwrap());
    assert_eq!(engine.voices().state_of(NoteId::A4), Some(NoteState::Sounding));

    let off = MidiEvent::parse(&[0x80, 69, 0]).unwrap();
    engine.handle_message(midi_to_synth(off, None).unwrap());
    assert_eq!(engine.voices().state_of(NoteId::A4), Some(NoteState::Releasing));

    // MIDI 127 is above the note table
    let high = MidiEvent::parse(&[0x90, 127, 100]).unwrap();
    engine.handle_message(midi_to_synth(high, None).unwrap());
    assert_eq!(engine.voices().len(), 1);
}

#[test]
fn queued_messages_are_handled_in_order() {
    init_logger();
    let mut engine = SynthEngine::new(RecordingBackend::new());
    let mut queue = VecDeque::from([
        SynthMessage::PowerOn,
        SynthMessage::SetParam(ParamChange::Attack(0.5)),
        SynthMessage::NoteOn {
            note: NoteId::C4,
            velocity: 90,
        },
        SynthMessage::SetParam(ParamChange::Sustain(3.0)),
        SynthMessage::NoteOff { note: NoteId::C4 },
    ]);

    assert_eq!(engine.process_messages(&mut queue), 5);
    let entry = engine.voices().entry(NoteId::C4).unwrap();
    assert_eq!(entry.envelope().params().attack, 0.5);
    assert_eq!(entry.state(), NoteState::Releasing);
    assert_eq!(engine.config().envelope.sustain, 0.7);
}

#[cfg(feature = "rtrb")]
#[test]
fn ring_buffer_input_reaches_the_engine() {
    let mut engine = engine();
    let (mut tx, mut rx) = rtrb::RingBuffer::new(8);

    let producer = std::thread::spawn(move || {
        for note in [NoteId::C4, NoteId::A4] {
            tx.push(SynthMessage::NoteOn { note, velocity: 100 }).unwrap();
        }
        tx.push(SynthMessage::PowerToggle).unwrap();
    });
    producer.join().unwrap();

    assert_eq!(engine.process_messages(&mut rx), 3);
    assert!(!engine.is_powered());
    assert!(engine.voices().is_empty());
}
