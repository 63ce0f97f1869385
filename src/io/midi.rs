/// A decoded channel voice message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn { channel: u8, key: u8, velocity: u8 },
    NoteOff { channel: u8, key: u8, velocity: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    PitchBend { channel: u8, value: i16 },
    ProgramChange { channel: u8, program: u8 },
}

impl MidiEvent {
    /// Decode one raw MIDI message.
    ///
    /// Note-on with velocity 0 is a note-off by convention. System messages
    /// (sysex, clock, ...) and truncated messages decode to `None`.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let (&status, data) = bytes.split_first()?;
        let channel = status & 0x0f;
        let data1 = data.first().map(|b| b & 0x7f);
        let data2 = data.get(1).map(|b| b & 0x7f);

        let event = match status & 0xf0 {
            0x90 => {
                let (key, velocity) = (data1?, data2?);
                if velocity > 0 {
                    MidiEvent::NoteOn {
                        channel,
                        key,
                        velocity,
                    }
                } else {
                    MidiEvent::NoteOff {
                        channel,
                        key,
                        velocity,
                    }
                }
            }
            0x80 => MidiEvent::NoteOff {
                channel,
                key: data1?,
                velocity: data2?,
            },
            0xb0 => MidiEvent::ControlChange {
                channel,
                controller: data1?,
                value: data2?,
            },
            0xe0 => {
                // 14-bit, centred on 0x2000
                let raw = (data2? as i16) << 7 | data1? as i16;
                MidiEvent::PitchBend {
                    channel,
                    value: raw - 0x2000,
                }
            }
            0xc0 => MidiEvent::ProgramChange {
                channel,
                program: data1?,
            },
            _ => {
                log::debug!(target: "polyvoice::midi", "ignoring MIDI status {:#04x}", status);
                return None;
            }
        };
        Some(event)
    }

    pub fn channel(&self) -> u8 {
        match *self {
            MidiEvent::NoteOn { channel, .. }
            | MidiEvent::NoteOff { channel, .. }
            | MidiEvent::ControlChange { channel, .. }
            | MidiEvent::PitchBend { channel, .. }
            | MidiEvent::ProgramChange { channel, .. } => channel,
        }
    }
}
