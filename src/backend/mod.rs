//! The Audio Backend seam.
//!
//! Everything that actually renders sound lives behind [`AudioBackend`]:
//! generators, gains, filters, panners and their sample-accurate parameter
//! automation. The rest of the crate only orchestrates *when* those
//! primitives are created, automated and torn down, against the backend's
//! monotonic clock.
//!
//! Nodes are addressed through a closed set of typed handles rather than a
//! dynamic node graph, so a gain can never be started and a generator can
//! never be used as a pan.

pub mod recording;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::dsp::oscillator::Waveform;

pub use recording::RecordingBackend;

/// Backend-assigned node identifier
pub type NodeId = u32;

/// A periodic signal generator (oscillator)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoundSource(pub NodeId);

/// A gain stage with a single `gain` parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GainControl(pub NodeId);

/// A biquad-style filter with `cutoff` and `q` parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Filter(pub NodeId);

/// An equal-power stereo panner with a `pan` parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StereoPan(pub NodeId);

impl SoundSource {
    pub fn frequency(self) -> ParamRef {
        ParamRef::new(self.0, ParamKind::Frequency)
    }

    pub fn detune(self) -> ParamRef {
        ParamRef::new(self.0, ParamKind::Detune)
    }
}

impl GainControl {
    pub fn gain(self) -> ParamRef {
        ParamRef::new(self.0, ParamKind::Gain)
    }
}

impl Filter {
    pub fn cutoff(self) -> ParamRef {
        ParamRef::new(self.0, ParamKind::Cutoff)
    }

    pub fn q(self) -> ParamRef {
        ParamRef::new(self.0, ParamKind::Q)
    }
}

impl StereoPan {
    pub fn pan(self) -> ParamRef {
        ParamRef::new(self.0, ParamKind::Pan)
    }
}

/// Any node the backend can connect or disconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeHandle {
    Source(SoundSource),
    Gain(GainControl),
    Filter(Filter),
    Pan(StereoPan),
}

impl NodeHandle {
    pub fn id(self) -> NodeId {
        match self {
            NodeHandle::Source(SoundSource(id))
            | NodeHandle::Gain(GainControl(id))
            | NodeHandle::Filter(Filter(id))
            | NodeHandle::Pan(StereoPan(id)) => id,
        }
    }
}

impl From<SoundSource> for NodeHandle {
    fn from(node: SoundSource) -> Self {
        NodeHandle::Source(node)
    }
}

impl From<GainControl> for NodeHandle {
    fn from(node: GainControl) -> Self {
        NodeHandle::Gain(node)
    }
}

impl From<Filter> for NodeHandle {
    fn from(node: Filter) -> Self {
        NodeHandle::Filter(node)
    }
}

impl From<StereoPan> for NodeHandle {
    fn from(node: StereoPan) -> Self {
        NodeHandle::Pan(node)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Frequency,
    Detune,
    Gain,
    Cutoff,
    Q,
    Pan,
}

/// An automatable parameter on a specific node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamRef {
    pub node: NodeId,
    pub kind: ParamKind,
}

impl ParamRef {
    pub fn new(node: NodeId, kind: ParamKind) -> Self {
        Self { node, kind }
    }
}

/// Where a connection lands.
///
/// Connecting into a [`ParamRef`] sums the source's signal onto the
/// parameter's own value, which is how the LFO modulates cutoff or gain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Node(NodeHandle),
    Param(ParamRef),
    /// The backend's final output (speakers)
    Output,
}

impl From<NodeHandle> for Endpoint {
    fn from(node: NodeHandle) -> Self {
        Endpoint::Node(node)
    }
}

impl From<ParamRef> for Endpoint {
    fn from(param: ParamRef) -> Self {
        Endpoint::Param(param)
    }
}

impl From<GainControl> for Endpoint {
    fn from(node: GainControl) -> Self {
        Endpoint::Node(node.into())
    }
}

impl From<Filter> for Endpoint {
    fn from(node: Filter) -> Self {
        Endpoint::Node(node.into())
    }
}

impl From<StereoPan> for Endpoint {
    fn from(node: StereoPan) -> Self {
        Endpoint::Node(node.into())
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterType {
    #[default]
    Lowpass,
    Highpass,
    Bandpass,
}

impl std::str::FromStr for FilterType {
    type Err = crate::SynthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lowpass" => Ok(FilterType::Lowpass),
            "highpass" => Ok(FilterType::Highpass),
            "bandpass" => Ok(FilterType::Bandpass),
            other => Err(crate::SynthError::UnknownFilterType(other.to_string())),
        }
    }
}

/// Lifecycle of the backend's processing context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Suspended,
    Running,
    /// No audio context could be obtained, or it has been closed for good
    Closed,
}

/// Errors reported by an [`AudioBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// No audio context is available
    Unavailable,
    /// Operation not valid for the node's current state (e.g. stopping a
    /// source twice)
    InvalidState { op: &'static str, node: NodeId },
    /// Handle does not refer to a node this backend created
    UnknownNode(NodeId),
    /// Backend-specific failure
    Rejected(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::Unavailable => write!(f, "no audio context available"),
            BackendError::InvalidState { op, node } => {
                write!(f, "'{}' is not valid for node {} in its current state", op, node)
            }
            BackendError::UnknownNode(node) => write!(f, "unknown node {}", node),
            BackendError::Rejected(reason) => write!(f, "backend rejected operation: {}", reason),
        }
    }
}

impl std::error::Error for BackendError {}

/// Rendering primitives the voice engine drives.
///
/// Times are seconds on the backend's monotonic clock ([`AudioBackend::now`]).
/// Parameter automation follows the usual event-list model: a set or ramp
/// event scheduled at `at` takes effect at that instant, ramps interpolate
/// from the previous event's value and time.
pub trait AudioBackend {
    /// Current time of the audio clock
    fn now(&self) -> f64;

    fn state(&self) -> ContextState;
    fn resume(&mut self) -> Result<(), BackendError>;
    fn suspend(&mut self) -> Result<(), BackendError>;

    fn create_sound_source(&mut self, waveform: Waveform) -> Result<SoundSource, BackendError>;
    fn create_gain_control(&mut self) -> Result<GainControl, BackendError>;
    fn create_filter(
        &mut self,
        filter_type: FilterType,
        cutoff: f32,
        q: f32,
    ) -> Result<Filter, BackendError>;
    fn create_stereo_pan(&mut self) -> Result<StereoPan, BackendError>;

    /// Change a generator's waveform in place
    fn set_waveform(&mut self, source: SoundSource, waveform: Waveform)
        -> Result<(), BackendError>;
    /// Change a filter's response in place
    fn set_filter_type(&mut self, filter: Filter, filter_type: FilterType)
        -> Result<(), BackendError>;

    fn connect(&mut self, src: NodeHandle, dst: Endpoint) -> Result<(), BackendError>;
    /// Remove every outgoing connection of `node`
    fn disconnect(&mut self, node: NodeHandle) -> Result<(), BackendError>;

    fn set_value_at(&mut self, param: ParamRef, value: f32, at: f64) -> Result<(), BackendError>;
    fn ramp_linear(&mut self, param: ParamRef, value: f32, at: f64) -> Result<(), BackendError>;
    fn ramp_exponential(&mut self, param: ParamRef, value: f32, at: f64)
        -> Result<(), BackendError>;
    /// Drop every automation event on `param` scheduled at or after `from`
    fn cancel_scheduled(&mut self, param: ParamRef, from: f64) -> Result<(), BackendError>;

    fn start(&mut self, source: SoundSource, frequency: f32, at: f64) -> Result<(), BackendError>;
    fn stop(&mut self, source: SoundSource, at: f64) -> Result<(), BackendError>;
}
