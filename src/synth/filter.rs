use log::warn;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::backend::{AudioBackend, BackendError, Endpoint, Filter, FilterType};

pub const MIN_CUTOFF: f32 = 20.0;
pub const MAX_CUTOFF: f32 = 20_000.0;
pub const MIN_RESONANCE: f32 = 0.1;
pub const MAX_RESONANCE: f32 = 20.0;

/// Parameter changes glide over this long to avoid zipper noise.
pub const GLIDE_TIME: f64 = 0.01;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSettings {
    pub filter_type: FilterType,
    /// Hz
    pub cutoff: f32,
    /// Q
    pub resonance: f32,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            filter_type: FilterType::Lowpass,
            cutoff: 2000.0,
            resonance: 1.0,
        }
    }
}

/// The shared filter every voice is routed through.
#[derive(Debug)]
pub struct FilterStage {
    settings: FilterSettings,
    node: Option<Filter>,
}

impl FilterStage {
    pub fn new(settings: FilterSettings) -> Self {
        Self {
            settings,
            node: None,
        }
    }

    pub fn settings(&self) -> &FilterSettings {
        &self.settings
    }

    pub fn node(&self) -> Option<Filter> {
        self.node
    }

    pub fn init<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        destination: Endpoint,
    ) -> Result<Filter, BackendError> {
        if let Some(node) = self.node {
            return Ok(node);
        }
        let node = backend.create_filter(
            self.settings.filter_type,
            self.settings.cutoff.clamp(MIN_CUTOFF, MAX_CUTOFF),
            self.settings.resonance.clamp(MIN_RESONANCE, MAX_RESONANCE),
        )?;
        self.node = Some(node);
        backend.connect(node.into(), destination)?;
        Ok(node)
    }

    pub fn set_type<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        filter_type: FilterType,
    ) -> Result<(), BackendError> {
        self.settings.filter_type = filter_type;
        match self.node {
            Some(node) => backend.set_filter_type(node, filter_type),
            None => Ok(()),
        }
    }

    /// Exponential glide to `hz`, reached [`GLIDE_TIME`] from now.
    pub fn set_cutoff<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        hz: f32,
    ) -> Result<(), BackendError> {
        let from = self.settings.cutoff;
        self.settings.cutoff = hz.clamp(MIN_CUTOFF, MAX_CUTOFF);
        let Some(node) = self.node else {
            return Ok(());
        };

        let now = backend.now();
        let param = node.cutoff();
        backend.cancel_scheduled(param, now)?;
        backend.set_value_at(param, from, now)?;
        backend.ramp_exponential(param, self.settings.cutoff, now + GLIDE_TIME)
    }

    /// Linear glide to `q`, reached [`GLIDE_TIME`] from now.
    pub fn set_resonance<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        q: f32,
    ) -> Result<(), BackendError> {
        let from = self.settings.resonance;
        self.settings.resonance = q.clamp(MIN_RESONANCE, MAX_RESONANCE);
        let Some(node) = self.node else {
            return Ok(());
        };

        let now = backend.now();
        let param = node.q();
        backend.cancel_scheduled(param, now)?;
        backend.set_value_at(param, from, now)?;
        backend.ramp_linear(param, self.settings.resonance, now + GLIDE_TIME)
    }

    /// Glide the cutoff to `cutoff * amount` without changing the stored
    /// cutoff, clamped to the audible range.
    pub fn modulate_cutoff<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        amount: f32,
    ) -> Result<(), BackendError> {
        let Some(node) = self.node else {
            return Ok(());
        };
        let target = (self.settings.cutoff * amount).clamp(MIN_CUTOFF, MAX_CUTOFF);
        let now = backend.now();
        backend.ramp_linear(node.cutoff(), target, now + GLIDE_TIME)
    }

    pub fn teardown<B: AudioBackend + ?Sized>(&mut self, backend: &mut B) {
        if let Some(node) = self.node.take() {
            if let Err(err) = backend.disconnect(node.into()) {
                warn!(target: "polyvoice::engine", "error disconnecting filter: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;

    fn stage(backend: &mut RecordingBackend) -> FilterStage {
        let mut stage = FilterStage::new(FilterSettings::default());
        stage.init(backend, Endpoint::Output).unwrap();
        stage
    }

    #[test]
    fn cutoff_glides_exponentially() {
        let mut backend = RecordingBackend::new();
        let mut stage = stage(&mut backend);
        backend.advance(1.0);

        stage.set_cutoff(&mut backend, 200.0).unwrap();
        let cutoff = stage.node().unwrap().cutoff();

        assert_eq!(backend.value_at(cutoff, 1.0), 2000.0);
        assert!((backend.value_at(cutoff, 1.005) - 632.46).abs() < 0.5);
        assert!((backend.value_at(cutoff, 1.01) - 200.0).abs() < 1e-3);
    }

    #[test]
    fn values_are_clamped() {
        let mut backend = RecordingBackend::new();
        let mut stage = stage(&mut backend);

        stage.set_cutoff(&mut backend, 50_000.0).unwrap();
        stage.set_resonance(&mut backend, 0.0).unwrap();
        assert_eq!(stage.settings().cutoff, MAX_CUTOFF);
        assert_eq!(stage.settings().resonance, MIN_RESONANCE);
    }

    #[test]
    fn resonance_glides_linearly() {
        let mut backend = RecordingBackend::new();
        let mut stage = stage(&mut backend);
        stage.set_resonance(&mut backend, 11.0).unwrap();
        let q = stage.node().unwrap().q();
        assert!((backend.value_at(q, 0.005) - 6.0).abs() < 1e-3);
    }

    #[test]
    fn modulation_leaves_the_stored_cutoff_alone() {
        let mut backend = RecordingBackend::new();
        let mut stage = stage(&mut backend);

        stage.modulate_cutoff(&mut backend, 100.0).unwrap();
        let cutoff = stage.node().unwrap().cutoff();
        assert_eq!(stage.settings().cutoff, 2000.0);
        assert!((backend.value_at(cutoff, 1.0) - MAX_CUTOFF).abs() < 1e-3);
    }

    #[test]
    fn type_changes_before_init_are_kept() {
        let mut backend = RecordingBackend::new();
        let mut stage = FilterStage::new(FilterSettings::default());
        stage.set_type(&mut backend, FilterType::Highpass).unwrap();
        let node = stage.init(&mut backend, Endpoint::Output).unwrap();
        assert_eq!(backend.filter_type(node), Some(FilterType::Highpass));
    }
}
