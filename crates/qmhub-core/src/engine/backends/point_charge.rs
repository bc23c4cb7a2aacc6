use super::{EnergyBackend, Evaluation, EvaluationRequest};
use crate::core::elec::potentials::{coulomb, coulomb_gradient, potential};
use crate::engine::error::BackendError;
use nalgebra::Vector3;

/// Mechanical-embedding reference: bare Coulomb interaction between the QM atoms
/// (with their own point charges) and the switched MM charges of the request.
///
/// QM–QM and MM–MM pairs are not counted. This is a coupling reference for tests
/// and dry runs, not a force field.
#[derive(Debug, Clone, Copy, Default)]
pub struct PointChargeMm;

impl EnergyBackend for PointChargeMm {
    fn evaluate(&mut self, request: &EvaluationRequest<'_>) -> Result<Evaluation, BackendError> {
        let positions = request.atoms.positions();
        let charges = request.atoms.charges();
        let n_qm = request.n_qm;

        let mut energy = 0.0;
        let mut gradient = vec![Vector3::zeros(); positions.len()];
        let mut esp = vec![0.0; request.n_mm()];

        for i in 0..n_qm {
            for j in n_qm..positions.len() {
                let rij = positions[j] - positions[i];
                let dist = rij.norm();
                let (qi, qj) = (charges[i], charges[j]);

                energy += coulomb(dist, qi, qj);
                let g = coulomb_gradient(&rij, qi, qj);
                gradient[i] += g;
                gradient[j] -= g;
                esp[j - n_qm] += potential(dist, qi);
            }
        }

        if !energy.is_finite() {
            return Err(BackendError::Failed(
                "point-charge energy is not finite".to_string(),
            ));
        }

        Ok(Evaluation {
            energy,
            gradient,
            esp,
        })
    }
}
