use crate::backend::BackendError;

/// Errors surfaced to callers of the synth engine.
///
/// Most orchestration paths never return these: backend failures during
/// playback are logged and swallowed so a broken voice degrades to silence.
/// They reach the caller only where the caller has to react, such as a
/// failed power-on or an invalid parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthError {
    /// The audio backend refused an operation
    Backend(BackendError),
    /// The engine must be powered on for this operation
    PoweredOff,
    /// A note name that does not parse (e.g. "H4")
    UnknownNote(String),
    /// A frequency with no exact match in the note table
    UnknownFrequency(f64),
    /// A modulation target name that is not recognised
    UnknownTarget(String),
    /// A waveform name that is not recognised
    UnknownWaveform(String),
    /// A filter response name that is not recognised
    UnknownFilterType(String),
    /// A parameter value outside its valid range
    InvalidParameter { name: &'static str, value: f32 },
}

impl std::fmt::Display for SynthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SynthError::Backend(err) => write!(f, "audio backend error: {}", err),
            SynthError::PoweredOff => write!(f, "synth is powered off"),
            SynthError::UnknownNote(name) => write!(f, "unknown note name '{}'", name),
            SynthError::UnknownFrequency(hz) => {
                write!(f, "frequency {}Hz does not match any known note", hz)
            }
            SynthError::UnknownTarget(name) => write!(f, "unknown LFO target '{}'", name),
            SynthError::UnknownWaveform(name) => write!(f, "unknown waveform '{}'", name),
            SynthError::UnknownFilterType(name) => write!(f, "unknown filter type '{}'", name),
            SynthError::InvalidParameter { name, value } => {
                write!(f, "invalid value {} for parameter '{}'", value, name)
            }
        }
    }
}

impl std::error::Error for SynthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SynthError::Backend(err) => Some(err),
            _ => None,
        }
    }
}

impl From<BackendError> for SynthError {
    fn from(err: BackendError) -> Self {
        SynthError::Backend(err)
    }
}
