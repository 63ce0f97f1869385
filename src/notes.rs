/*
Note Identity
=============

A note is identified by its MIDI number. The synth's playable range is the
108 notes from C0 (MIDI 12) to B8 (MIDI 119):

    note_number = 12 * (octave + 1) + semitone

    semitone: C=0, C#=1, D=2, D#=3, E=4, F=5, F#=6, G=7, G#=8, A=9, A#=10, B=11

Tuning is 12-tone equal temperament anchored at A4 = 440 Hz:

    f = 440 * 2^((note - 69) / 12)

Every frequency in the crate goes through `equal_tempered`, so a frequency
computed from a MIDI number compares exactly equal to the table entry for
the same note. That is what makes exact reverse lookup usable.
*/

use crate::SynthError;

/// Tuning reference for A4 (MIDI 69)
pub const A4_FREQUENCY: f64 = 440.0;

const A4_MIDI: u8 = 69;
const LOWEST: u8 = 12; // C0
const HIGHEST: u8 = 119; // B8

pub const NOTE_COUNT: usize = (HIGHEST - LOWEST + 1) as usize;

const NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Frequency `semitones` away from A4.
#[inline]
pub fn equal_tempered(semitones: i32) -> f64 {
    A4_FREQUENCY * 2f64.powf(semitones as f64 / 12.0)
}

/// A playable pitch, C0 through B8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NoteId(u8);

impl NoteId {
    pub const A4: NoteId = NoteId(A4_MIDI);
    pub const C4: NoteId = NoteId(60);

    pub fn from_midi(note: u8) -> Option<Self> {
        (LOWEST..=HIGHEST).contains(&note).then_some(Self(note))
    }

    /// Build from octave (0..=8) and semitone within the octave (0..=11).
    pub fn new(octave: u8, semitone: u8) -> Option<Self> {
        if octave > 8 || semitone > 11 {
            return None;
        }
        Self::from_midi(12 * (octave + 1) + semitone)
    }

    /// Position in the 108-note table (C0 = 0).
    pub fn index(self) -> usize {
        (self.0 - LOWEST) as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        if index < NOTE_COUNT {
            Some(Self(LOWEST + index as u8))
        } else {
            None
        }
    }

    pub fn midi(self) -> u8 {
        self.0
    }

    pub fn octave(self) -> u8 {
        self.0 / 12 - 1
    }

    pub fn pitch_class(self) -> u8 {
        self.0 % 12
    }

    pub fn frequency(self) -> f64 {
        equal_tempered(self.0 as i32 - A4_MIDI as i32)
    }

    pub fn all() -> impl Iterator<Item = NoteId> {
        (LOWEST..=HIGHEST).map(NoteId)
    }
}

impl std::fmt::Display for NoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", NAMES[self.pitch_class() as usize], self.octave())
    }
}

impl std::str::FromStr for NoteId {
    type Err = SynthError;

    /// Parses names like `C4`, `C#4`, `Db4` or `Cs4`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || SynthError::UnknownNote(s.to_string());
        let mut chars = s.trim().chars();

        let letter = chars.next().ok_or_else(unknown)?;
        let natural: i32 = match letter.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return Err(unknown()),
        };

        let rest = chars.as_str();
        let (accidental, octave) = match rest.chars().next() {
            Some('#') | Some('s') => (1, &rest[1..]),
            Some('b') => (-1, &rest[1..]),
            _ => (0, rest),
        };

        let octave: i32 = octave.parse().map_err(|_| unknown())?;
        octave
            .checked_add(1)
            .and_then(|o| o.checked_mul(12))
            .and_then(|base| base.checked_add(natural + accidental))
            .and_then(|midi| u8::try_from(midi).ok())
            .and_then(NoteId::from_midi)
            .ok_or_else(unknown)
    }
}

/// Precomputed frequencies for every playable note.
pub struct NoteTable {
    frequencies: Vec<f64>,
}

impl NoteTable {
    pub fn new() -> Self {
        Self {
            frequencies: NoteId::all().map(NoteId::frequency).collect(),
        }
    }

    pub fn frequency_of(&self, note: NoteId) -> f64 {
        self.frequencies[note.index()]
    }

    /// Reverse lookup. Only an exact match counts.
    pub fn note_for_frequency(&self, frequency: f64) -> Option<NoteId> {
        self.frequencies
            .binary_search_by(|hz| hz.total_cmp(&frequency))
            .ok()
            .and_then(NoteId::from_index)
    }

    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }
}

impl Default for NoteTable {
    fn default() -> Self {
        Self::new()
    }
}
