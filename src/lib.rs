pub mod backend; // Audio backend seam and the in-memory recorder
pub mod config;
pub mod dsp; // Envelope, LFO and oscillator math
pub mod engine; // Power state, shared stages, input dispatch
pub mod error;
pub mod io; // MIDI and computer-keyboard input
pub mod notes;
pub mod synth; // Voice lifecycle and modulation routing

pub use backend::{AudioBackend, BackendError, RecordingBackend};
pub use config::SynthConfig;
pub use engine::{PowerState, SynthEngine};
pub use error::SynthError;
pub use notes::NoteId;

pub(crate) const MIN_TIME: f32 = 1.0 / 48_000.0;
