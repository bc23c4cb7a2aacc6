use super::{QmBackend, QmInput, QmOutput, SiteEsp};
use crate::engine::error::BackendError;
use nalgebra::Vector3;

/// A QM stand-in that reports zero energy, zero gradient and zero ESP.
///
/// Useful for dry runs of a setup and for exercising the coupling machinery
/// without an external program.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyQm;

impl QmBackend for DummyQm {
    fn evaluate(&mut self, input: &QmInput<'_>) -> Result<QmOutput, BackendError> {
        Ok(QmOutput {
            energy: 0.0,
            gradient: vec![Vector3::zeros(); input.positions.len()],
            esp: vec![SiteEsp::default(); input.mm_positions.len()],
        })
    }
}
