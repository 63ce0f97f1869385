use log::warn;

use crate::{
    backend::{AudioBackend, Endpoint, StereoPan},
    SynthError,
};

/// One shared stereo panner per oscillator slot.
#[derive(Debug)]
pub struct PanStage {
    pans: Vec<f32>,
    nodes: Vec<StereoPan>,
}

impl PanStage {
    pub fn new(pans: &[f32]) -> Self {
        Self {
            pans: pans.iter().map(|p| p.clamp(-1.0, 1.0)).collect(),
            nodes: Vec::new(),
        }
    }

    /// Create one panner per slot, each feeding `destination`.
    pub fn init<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        destination: Endpoint,
    ) -> Result<(), SynthError> {
        if !self.nodes.is_empty() {
            return Ok(());
        }
        let now = backend.now();
        for &pan in &self.pans {
            let node = backend.create_stereo_pan()?;
            self.nodes.push(node);
            backend.set_value_at(node.pan(), pan, now)?;
            backend.connect(node.into(), destination)?;
        }
        Ok(())
    }

    /// Set a slot's position, -1 (left) to 1 (right), effective now.
    pub fn set_pan<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        slot: usize,
        value: f32,
    ) -> Result<(), SynthError> {
        let pan = self.pans.get_mut(slot).ok_or(SynthError::InvalidParameter {
            name: "pan slot",
            value: slot as f32,
        })?;
        *pan = value.clamp(-1.0, 1.0);

        if let Some(node) = self.nodes.get(slot) {
            let now = backend.now();
            backend.set_value_at(node.pan(), *pan, now)?;
        }
        Ok(())
    }

    pub fn pan(&self, slot: usize) -> Option<f32> {
        self.pans.get(slot).copied()
    }

    pub fn panner(&self, slot: usize) -> Option<StereoPan> {
        self.nodes.get(slot).copied()
    }

    pub fn slots(&self) -> usize {
        self.pans.len()
    }

    pub fn teardown<B: AudioBackend + ?Sized>(&mut self, backend: &mut B) {
        for node in self.nodes.drain(..) {
            if let Err(err) = backend.disconnect(node.into()) {
                warn!(target: "polyvoice::engine", "error disconnecting panner: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;

    #[test]
    fn one_panner_per_slot() {
        let mut backend = RecordingBackend::new();
        let mut stage = PanStage::new(&[-0.5, 0.5]);
        stage.init(&mut backend, Endpoint::Output).unwrap();

        let left = stage.panner(0).unwrap();
        assert_eq!(backend.value_at(left.pan(), 0.0), -0.5);
        assert!(backend.is_connected(left.into(), Endpoint::Output));
        assert!(stage.panner(2).is_none());
    }

    #[test]
    fn pan_is_clamped_and_immediate() {
        let mut backend = RecordingBackend::new();
        let mut stage = PanStage::new(&[0.0, 0.0]);
        stage.init(&mut backend, Endpoint::Output).unwrap();
        backend.advance(2.0);

        stage.set_pan(&mut backend, 1, 3.0).unwrap();
        let right = stage.panner(1).unwrap();
        assert_eq!(stage.pan(1), Some(1.0));
        assert_eq!(backend.value_at(right.pan(), 1.9), 0.0);
        assert_eq!(backend.value_at(right.pan(), 2.0), 1.0);
    }

    #[test]
    fn unknown_slot_is_rejected() {
        let mut backend = RecordingBackend::new();
        let mut stage = PanStage::new(&[0.0]);
        assert!(matches!(
            stage.set_pan(&mut backend, 4, 0.0),
            Err(SynthError::InvalidParameter { name: "pan slot", .. })
        ));
    }
}
