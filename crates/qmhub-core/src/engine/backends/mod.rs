//! # Backend Interfaces
//!
//! Every energy source, QM or MM, is driven through [`EnergyBackend`]. External
//! programs are plugged in through the narrower [`QmBackend`] and [`MmBackend`]
//! traits and wrapped by [`QmAdapter`] and [`MmAdapter`].
//!
//! An [`EvaluationRequest`] always lists the QM atoms first, followed by every MM
//! atom of the embedding with its switched charge. The charges before switching
//! travel alongside for backends that evaluate classical terms over the whole
//! system; [`MmAdapter`] hands those to its [`MmBackend`]. The returned [`Evaluation`]
//! carries one gradient entry per request atom and, optionally, the derivative of
//! the energy with respect to each MM charge (the electrostatic potential at the MM
//! site for Coulomb-type couplings).

pub mod dummy;
pub mod point_charge;

use super::error::BackendError;
use crate::core::models::atoms::Atoms;
use crate::core::models::element::Element;
use crate::core::models::system::CellBasis;
use nalgebra::{Point3, Vector3};

/// The atoms and QM state handed to a backend for one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationRequest<'a> {
    /// QM atoms followed by embedded MM atoms.
    pub atoms: &'a Atoms,
    /// Number of leading QM atoms in `atoms`.
    pub n_qm: usize,
    /// Charges of `atoms` before switching, one per request atom.
    pub unscaled_charges: &'a [f64],
    pub cell_basis: Option<&'a CellBasis>,
    pub charge: i32,
    pub multiplicity: u32,
}

impl EvaluationRequest<'_> {
    pub fn n_mm(&self) -> usize {
        self.atoms.len() - self.n_qm
    }

    pub fn qm_positions(&self) -> &[Point3<f64>] {
        &self.atoms.positions()[..self.n_qm]
    }

    pub fn qm_elements(&self) -> &[Element] {
        &self.atoms.elements()[..self.n_qm]
    }

    pub fn mm_positions(&self) -> &[Point3<f64>] {
        &self.atoms.positions()[self.n_qm..]
    }

    /// Switched MM charges, as seen by the QM calculation.
    pub fn mm_charges(&self) -> &[f64] {
        &self.atoms.charges()[self.n_qm..]
    }

    pub fn mm_unscaled_charges(&self) -> &[f64] {
        &self.unscaled_charges[self.n_qm..]
    }
}

/// Energy and gradient produced by one backend (or one composite engine).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    /// Energy in kcal/mol.
    pub energy: f64,
    /// Energy gradient in kcal/(mol·Å), one entry per request atom.
    pub gradient: Vec<Vector3<f64>>,
    /// `∂E/∂q` at each embedded MM site, in kcal/(mol·e). Empty when the backend
    /// does not depend on the MM charges.
    pub esp: Vec<f64>,
}

/// The polymorphic evaluation capability shared by all energy sources.
pub trait EnergyBackend: Send {
    fn evaluate(&mut self, request: &EvaluationRequest<'_>) -> Result<Evaluation, BackendError>;
}

/// Input of an external QM program.
#[derive(Debug, Clone, Copy)]
pub struct QmInput<'a> {
    pub positions: &'a [Point3<f64>],
    pub elements: &'a [Element],
    pub mm_positions: &'a [Point3<f64>],
    pub mm_charges: &'a [f64],
    pub cell_basis: Option<&'a CellBasis>,
    pub total_charge: i32,
    pub multiplicity: u32,
}

/// Electrostatic potential of the QM density at an MM site.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SiteEsp {
    /// Potential in kcal/(mol·e).
    pub potential: f64,
    /// Gradient of the potential with respect to the site position.
    pub gradient: Vector3<f64>,
}

/// Output of an external QM program.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QmOutput {
    pub energy: f64,
    /// Gradient on the QM atoms.
    pub gradient: Vec<Vector3<f64>>,
    /// ESP at each MM site, in request order.
    pub esp: Vec<SiteEsp>,
}

/// An external QM program.
pub trait QmBackend: Send {
    fn evaluate(&mut self, input: &QmInput<'_>) -> Result<QmOutput, BackendError>;
}

/// Output of an external MM program.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MmOutput {
    pub energy: f64,
    pub gradient: Vec<Vector3<f64>>,
}

/// An external MM program evaluating the classical terms over the request atoms.
///
/// It receives the real atomic charges; switching only applies to the embedding
/// seen by the QM calculation.
pub trait MmBackend: Send {
    fn evaluate(
        &mut self,
        positions: &[Point3<f64>],
        charges: &[f64],
        elements: &[Element],
    ) -> Result<MmOutput, BackendError>;
}

/// Drives a [`QmBackend`] and folds its ESP into MM-site gradients.
#[derive(Debug)]
pub struct QmAdapter<B> {
    backend: B,
}

impl<B: QmBackend> QmAdapter<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: QmBackend> EnergyBackend for QmAdapter<B> {
    fn evaluate(&mut self, request: &EvaluationRequest<'_>) -> Result<Evaluation, BackendError> {
        let input = QmInput {
            positions: request.qm_positions(),
            elements: request.qm_elements(),
            mm_positions: request.mm_positions(),
            mm_charges: request.mm_charges(),
            cell_basis: request.cell_basis,
            total_charge: request.charge,
            multiplicity: request.multiplicity,
        };
        let output = self.backend.evaluate(&input)?;

        if output.gradient.len() != request.n_qm {
            return Err(BackendError::MalformedOutput(format!(
                "expected {} QM gradient entries, got {}",
                request.n_qm,
                output.gradient.len()
            )));
        }
        if output.esp.len() != request.n_mm() {
            return Err(BackendError::MalformedOutput(format!(
                "expected ESP at {} MM sites, got {}",
                request.n_mm(),
                output.esp.len()
            )));
        }

        let mut gradient = output.gradient;
        gradient.extend(
            output
                .esp
                .iter()
                .zip(request.mm_charges())
                .map(|(site, &q)| site.gradient * q),
        );

        Ok(Evaluation {
            energy: output.energy,
            gradient,
            esp: output.esp.iter().map(|site| site.potential).collect(),
        })
    }
}

/// Drives an [`MmBackend`] over every request atom.
#[derive(Debug)]
pub struct MmAdapter<B> {
    backend: B,
}

impl<B: MmBackend> MmAdapter<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: MmBackend> EnergyBackend for MmAdapter<B> {
    fn evaluate(&mut self, request: &EvaluationRequest<'_>) -> Result<Evaluation, BackendError> {
        let atoms = request.atoms;
        let output = self.backend.evaluate(
            atoms.positions(),
            request.unscaled_charges,
            atoms.elements(),
        )?;
        if output.gradient.len() != atoms.len() {
            return Err(BackendError::MalformedOutput(format!(
                "MM gradient has {} entries for {} atom(s)",
                output.gradient.len(),
                atoms.len()
            )));
        }

        Ok(Evaluation {
            energy: output.energy,
            gradient: output.gradient,
            esp: Vec::new(),
        })
    }
}
