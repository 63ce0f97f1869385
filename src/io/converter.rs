use crate::{io::midi::MidiEvent, notes::equal_tempered, synth::message::SynthMessage};

/// Translate a MIDI event into a synth message.
///
/// Notes are forwarded by frequency, the way a MIDI keyboard addresses the
/// synth. `channel_filter` of `None` listens on every channel.
pub fn midi_to_synth(midi: MidiEvent, channel_filter: Option<u8>) -> Option<SynthMessage> {
    if channel_filter.is_some_and(|channel| channel != midi.channel()) {
        return None;
    }

    match midi {
        MidiEvent::NoteOn { key, velocity, .. } => Some(SynthMessage::NoteOnFrequency {
            frequency: midi_note_to_freq(key),
            velocity,
        }),
        MidiEvent::NoteOff { key, .. } => Some(SynthMessage::NoteOffFrequency {
            frequency: midi_note_to_freq(key),
        }),
        // CC 123: all notes off
        MidiEvent::ControlChange {
            controller: 123, ..
        } => Some(SynthMessage::AllNotesOff),
        _ => None,
    }
}

/// `440 * 2^((note - 69) / 12)`, bit-identical to the note table.
pub fn midi_note_to_freq(note: u8) -> f64 {
    equal_tempered(note as i32 - 69)
}
