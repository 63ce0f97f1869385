//! Computer keyboard as a two-octave piano.
//!
//! ```text
//!  2 3   5 6 7        s d   g h j
//! q w e r t y u      z x c v b n m
//!      C5..B5            C4..B4
//! ```

use crate::notes::NoteId;

const LOWER_ROW: [char; 12] = ['z', 's', 'x', 'd', 'c', 'v', 'g', 'b', 'h', 'n', 'j', 'm'];
const UPPER_ROW: [char; 12] = ['q', '2', 'w', '3', 'e', 'r', '5', 't', '6', 'y', '7', 'u'];

/// Note played by `key`, if it is one of the piano keys.
pub fn note_for_key(key: char) -> Option<NoteId> {
    let key = key.to_ascii_lowercase();
    if let Some(semitone) = LOWER_ROW.iter().position(|&k| k == key) {
        return NoteId::new(4, semitone as u8);
    }
    if let Some(semitone) = UPPER_ROW.iter().position(|&k| k == key) {
        return NoteId::new(5, semitone as u8);
    }
    None
}
