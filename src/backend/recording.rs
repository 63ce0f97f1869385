use std::collections::HashMap;

use log::trace;

use super::{
    AudioBackend, BackendError, ContextState, Endpoint, Filter, FilterType, GainControl,
    NodeHandle, NodeId, ParamKind, ParamRef, SoundSource, StereoPan,
};
use crate::dsp::oscillator::Waveform;

/*
Recording Backend
=================

An AudioBackend that renders no audio at all. It keeps the node graph, the
playback state of every generator and the full automation event list of
every parameter, and it can evaluate what a parameter's value would be at
any point on the clock.

That makes it the reference backend for tests (assert on what would be
audible without rendering it) and for dry runs of the voice engine. The
clock only moves when told to: `advance` for tests, `set_time` for hosts
that follow a wall clock.

Parameter Evaluation
--------------------

Events are kept sorted by time. To evaluate a parameter at time `t`:

    value
      ^          Linear(1.0 @ 0.1)
      |         ╱‾‾‾‾╲  Linear(0.7 @ 0.3)
      |        ╱      ‾‾‾‾‾‾‾‾‾‾‾‾
      |  Set(0)
      +──●──────────────────────────→ t

  - every event at or before `t` has fully taken effect
  - if the next event after `t` is a ramp, interpolate from the last value
    reached towards the ramp's target
  - a Set event in the future has no influence yet

Failure Injection
-----------------

`fail_next(Operation::Stop)` makes the next stop call fail, which is how
tests prove that a broken teardown never strands a note in the registry.
*/

/// One scheduled change of a parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Automation {
    Set { value: f32, time: f64 },
    Linear { value: f32, time: f64 },
    Exponential { value: f32, time: f64 },
}

impl Automation {
    pub fn time(&self) -> f64 {
        match *self {
            Automation::Set { time, .. }
            | Automation::Linear { time, .. }
            | Automation::Exponential { time, .. } => time,
        }
    }

    pub fn value(&self) -> f32 {
        match *self {
            Automation::Set { value, .. }
            | Automation::Linear { value, .. }
            | Automation::Exponential { value, .. } => value,
        }
    }
}

/// Backend operations that can be made to fail on purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateNode,
    Connect,
    Disconnect,
    Automate,
    Start,
    Stop,
    Resume,
    Suspend,
}

/// Playback state of a generator
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Playback {
    Idle,
    Playing { frequency: f32, since: f64 },
    Stopped { at: f64 },
}

#[derive(Debug, Clone)]
enum NodeKind {
    Source {
        waveform: Waveform,
        playback: Playback,
    },
    Gain,
    Filter {
        filter_type: FilterType,
    },
    Pan,
}

pub struct RecordingBackend {
    clock: f64,
    state: ContextState,
    next_id: NodeId,
    nodes: HashMap<NodeId, NodeKind>,
    connections: Vec<(NodeId, Endpoint)>,
    initial: HashMap<ParamRef, f32>,
    automation: HashMap<ParamRef, Vec<Automation>>,
    faults: Vec<Operation>,
}

impl RecordingBackend {
    /// A suspended context at time zero, ready to be resumed
    pub fn new() -> Self {
        Self {
            clock: 0.0,
            state: ContextState::Suspended,
            next_id: 1,
            nodes: HashMap::new(),
            connections: Vec::new(),
            initial: HashMap::new(),
            automation: HashMap::new(),
            faults: Vec::new(),
        }
    }

    /// A backend with no audio context; every operation fails
    pub fn unavailable() -> Self {
        Self {
            state: ContextState::Closed,
            ..Self::new()
        }
    }

    /// Move the clock forward by `seconds`
    pub fn advance(&mut self, seconds: f64) {
        self.clock += seconds.max(0.0);
    }

    /// Move the clock to `time`; the clock never runs backwards
    pub fn set_time(&mut self, time: f64) {
        self.clock = self.clock.max(time);
    }

    /// Make the next call of `op` fail with [`BackendError::Rejected`]
    pub fn fail_next(&mut self, op: Operation) {
        self.faults.push(op);
    }

    /// Evaluate the parameter's automation at `time`
    pub fn value_at(&self, param: ParamRef, time: f64) -> f32 {
        let mut value = self.initial.get(&param).copied().unwrap_or(0.0);
        let mut since = 0.0;

        let Some(events) = self.automation.get(&param) else {
            return value;
        };

        for event in events {
            if event.time() <= time {
                value = event.value();
                since = event.time();
                continue;
            }

            let span = event.time() - since;
            let progress = if span > 0.0 {
                ((time - since) / span) as f32
            } else {
                1.0
            };

            return match *event {
                Automation::Set { .. } => value,
                Automation::Linear { value: target, .. } => value + (target - value) * progress,
                Automation::Exponential { value: target, .. } => {
                    if value != 0.0 && target != 0.0 && value.signum() == target.signum() {
                        value * (target / value).powf(progress)
                    } else {
                        value
                    }
                }
            };
        }

        value
    }

    /// Current value of the parameter on the backend clock
    pub fn current_value(&self, param: ParamRef) -> f32 {
        self.value_at(param, self.clock)
    }

    /// Every automation event scheduled on `param`, in time order
    pub fn automation(&self, param: ParamRef) -> &[Automation] {
        self.automation
            .get(&param)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn playback(&self, source: SoundSource) -> Option<Playback> {
        match self.nodes.get(&source.0) {
            Some(NodeKind::Source { playback, .. }) => Some(*playback),
            _ => None,
        }
    }

    pub fn is_playing(&self, source: SoundSource) -> bool {
        matches!(self.playback(source), Some(Playback::Playing { .. }))
    }

    /// Number of generators that have been started and not stopped
    pub fn playing_sources(&self) -> usize {
        self.nodes
            .values()
            .filter(|kind| {
                matches!(
                    kind,
                    NodeKind::Source {
                        playback: Playback::Playing { .. },
                        ..
                    }
                )
            })
            .count()
    }

    pub fn waveform(&self, source: SoundSource) -> Option<Waveform> {
        match self.nodes.get(&source.0) {
            Some(NodeKind::Source { waveform, .. }) => Some(*waveform),
            _ => None,
        }
    }

    pub fn filter_type(&self, filter: Filter) -> Option<FilterType> {
        match self.nodes.get(&filter.0) {
            Some(NodeKind::Filter { filter_type }) => Some(*filter_type),
            _ => None,
        }
    }

    pub fn is_connected(&self, src: NodeHandle, dst: Endpoint) -> bool {
        self.connections
            .iter()
            .any(|&(from, to)| from == src.id() && to == dst)
    }

    pub fn connections_from(&self, node: NodeHandle) -> Vec<Endpoint> {
        self.connections
            .iter()
            .filter(|(from, _)| *from == node.id())
            .map(|&(_, to)| to)
            .collect()
    }

    /// Nodes whose signal is summed onto `param` (i.e. modulating it)
    pub fn modulators(&self, param: ParamRef) -> Vec<NodeId> {
        self.connections
            .iter()
            .filter(|(_, to)| *to == Endpoint::Param(param))
            .map(|&(from, _)| from)
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn check(&mut self, op: Operation) -> Result<(), BackendError> {
        if self.state == ContextState::Closed {
            return Err(BackendError::Unavailable);
        }

        if let Some(pos) = self.faults.iter().position(|fault| *fault == op) {
            self.faults.remove(pos);
            return Err(BackendError::Rejected(format!("injected {:?} failure", op)));
        }

        Ok(())
    }

    fn allocate(&mut self, kind: NodeKind, params: &[(ParamKind, f32)]) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(id, kind);
        for &(param, value) in params {
            self.initial.insert(ParamRef::new(id, param), value);
        }
        id
    }

    fn require(&self, node: NodeId) -> Result<&NodeKind, BackendError> {
        self.nodes.get(&node).ok_or(BackendError::UnknownNode(node))
    }

    fn schedule(&mut self, param: ParamRef, event: Automation) -> Result<(), BackendError> {
        self.check(Operation::Automate)?;
        self.require(param.node)?;
        trace!(target: "polyvoice::backend", "{:?} <- {:?}", param, event);

        let events = self.automation.entry(param).or_default();
        let pos = events.partition_point(|e| e.time() <= event.time());
        events.insert(pos, event);
        Ok(())
    }

    fn source_mut(&mut self, source: SoundSource) -> Result<&mut Playback, BackendError> {
        match self.nodes.get_mut(&source.0) {
            Some(NodeKind::Source { playback, .. }) => Ok(playback),
            Some(_) => Err(BackendError::InvalidState {
                op: "playback",
                node: source.0,
            }),
            None => Err(BackendError::UnknownNode(source.0)),
        }
    }
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for RecordingBackend {
    fn now(&self) -> f64 {
        self.clock
    }

    fn state(&self) -> ContextState {
        self.state
    }

    fn resume(&mut self) -> Result<(), BackendError> {
        self.check(Operation::Resume)?;
        self.state = ContextState::Running;
        Ok(())
    }

    fn suspend(&mut self) -> Result<(), BackendError> {
        self.check(Operation::Suspend)?;
        self.state = ContextState::Suspended;
        Ok(())
    }

    fn create_sound_source(&mut self, waveform: Waveform) -> Result<SoundSource, BackendError> {
        self.check(Operation::CreateNode)?;
        let kind = NodeKind::Source {
            waveform,
            playback: Playback::Idle,
        };
        let id = self.allocate(kind, &[(ParamKind::Frequency, 440.0), (ParamKind::Detune, 0.0)]);
        Ok(SoundSource(id))
    }

    fn create_gain_control(&mut self) -> Result<GainControl, BackendError> {
        self.check(Operation::CreateNode)?;
        let id = self.allocate(NodeKind::Gain, &[(ParamKind::Gain, 1.0)]);
        Ok(GainControl(id))
    }

    fn create_filter(
        &mut self,
        filter_type: FilterType,
        cutoff: f32,
        q: f32,
    ) -> Result<Filter, BackendError> {
        self.check(Operation::CreateNode)?;
        let id = self.allocate(
            NodeKind::Filter { filter_type },
            &[(ParamKind::Cutoff, cutoff), (ParamKind::Q, q)],
        );
        Ok(Filter(id))
    }

    fn create_stereo_pan(&mut self) -> Result<StereoPan, BackendError> {
        self.check(Operation::CreateNode)?;
        let id = self.allocate(NodeKind::Pan, &[(ParamKind::Pan, 0.0)]);
        Ok(StereoPan(id))
    }

    fn set_waveform(&mut self, source: SoundSource, waveform: Waveform) -> Result<(), BackendError> {
        self.check(Operation::Automate)?;
        match self.nodes.get_mut(&source.0) {
            Some(NodeKind::Source { waveform: current, .. }) => {
                *current = waveform;
                Ok(())
            }
            Some(_) => Err(BackendError::InvalidState {
                op: "set_waveform",
                node: source.0,
            }),
            None => Err(BackendError::UnknownNode(source.0)),
        }
    }

    fn set_filter_type(&mut self, filter: Filter, filter_type: FilterType) -> Result<(), BackendError> {
        self.check(Operation::Automate)?;
        match self.nodes.get_mut(&filter.0) {
            Some(NodeKind::Filter { filter_type: current }) => {
                *current = filter_type;
                Ok(())
            }
            Some(_) => Err(BackendError::InvalidState {
                op: "set_filter_type",
                node: filter.0,
            }),
            None => Err(BackendError::UnknownNode(filter.0)),
        }
    }

    fn connect(&mut self, src: NodeHandle, dst: Endpoint) -> Result<(), BackendError> {
        self.check(Operation::Connect)?;
        self.require(src.id())?;
        match dst {
            Endpoint::Node(node) => {
                self.require(node.id())?;
            }
            Endpoint::Param(param) => {
                self.require(param.node)?;
            }
            Endpoint::Output => {}
        }

        if !self.is_connected(src, dst) {
            self.connections.push((src.id(), dst));
        }
        Ok(())
    }

    fn disconnect(&mut self, node: NodeHandle) -> Result<(), BackendError> {
        self.check(Operation::Disconnect)?;
        self.require(node.id())?;
        self.connections.retain(|(from, _)| *from != node.id());
        Ok(())
    }

    fn set_value_at(&mut self, param: ParamRef, value: f32, at: f64) -> Result<(), BackendError> {
        self.schedule(param, Automation::Set { value, time: at })
    }

    fn ramp_linear(&mut self, param: ParamRef, value: f32, at: f64) -> Result<(), BackendError> {
        self.schedule(param, Automation::Linear { value, time: at })
    }

    fn ramp_exponential(&mut self, param: ParamRef, value: f32, at: f64) -> Result<(), BackendError> {
        if value <= 0.0 {
            return Err(BackendError::Rejected(format!(
                "exponential ramp target must be positive, got {}",
                value
            )));
        }
        self.schedule(param, Automation::Exponential { value, time: at })
    }

    fn cancel_scheduled(&mut self, param: ParamRef, from: f64) -> Result<(), BackendError> {
        self.check(Operation::Automate)?;
        self.require(param.node)?;
        if let Some(events) = self.automation.get_mut(&param) {
            events.retain(|e| e.time() < from);
        }
        Ok(())
    }

    fn start(&mut self, source: SoundSource, frequency: f32, at: f64) -> Result<(), BackendError> {
        self.check(Operation::Start)?;
        let playback = self.source_mut(source)?;
        match *playback {
            Playback::Idle => {
                *playback = Playback::Playing {
                    frequency,
                    since: at,
                };
                Ok(())
            }
            _ => Err(BackendError::InvalidState {
                op: "start",
                node: source.0,
            }),
        }
    }

    fn stop(&mut self, source: SoundSource, at: f64) -> Result<(), BackendError> {
        self.check(Operation::Stop)?;
        let playback = self.source_mut(source)?;
        match *playback {
            Playback::Playing { .. } => {
                *playback = Playback::Stopped { at };
                Ok(())
            }
            _ => Err(BackendError::InvalidState {
                op: "stop",
                node: source.0,
            }),
        }
    }
}
