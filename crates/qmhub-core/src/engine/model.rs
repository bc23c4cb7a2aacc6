use super::backends::EvaluationRequest;
use super::composite::Engine;
use super::error::QmmmError;
use crate::core::elec::switching::{SwitchingFunction, SwitchingType};
use crate::core::models::atoms::Atoms;
use crate::core::models::system::{CellBasis, System};
use nalgebra::{Point3, Vector3};
use tracing::{debug, info, instrument, warn};

/// Fraction of the cutoff used as switching distance when none is given.
pub const DEFAULT_SWDIST_RATIO: f64 = 0.75;

/// Embedding parameters of a [`Model`], independent of any particular system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelConfig {
    pub switching_type: SwitchingType,
    pub cutoff: f64,
    pub swdist: Option<f64>,
    pub pbc: bool,
}

impl ModelConfig {
    pub fn new(cutoff: f64) -> Self {
        Self {
            switching_type: SwitchingType::default(),
            cutoff,
            swdist: None,
            pbc: false,
        }
    }

    pub fn switching_type(mut self, switching_type: SwitchingType) -> Self {
        self.switching_type = switching_type;
        self
    }

    pub fn swdist(mut self, swdist: f64) -> Self {
        self.swdist = Some(swdist);
        self
    }

    pub fn pbc(mut self, pbc: bool) -> Self {
        self.pbc = pbc;
        self
    }
}

/// How one MM atom is coupled to the QM region in a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmbeddedSite {
    /// Local index of the nearest QM atom.
    pub nearest_qm: usize,
    pub distance: f64,
    pub weight: f64,
    pub weight_derivative: f64,
    /// Unit vector from the nearest QM atom to the MM atom.
    pub direction: Vector3<f64>,
    /// Unscaled charge of the MM atom.
    pub charge: f64,
}

/// The per-step embedding snapshot handed to every engine of that step.
///
/// Holds the QM atoms followed by every MM atom, all positions wrapped about the
/// QM centroid for periodic models, and the MM charges multiplied by their
/// switching weight. The charges before switching are kept for MM backends.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingFrame {
    atoms: Atoms,
    unscaled_charges: Vec<f64>,
    n_qm: usize,
    sites: Vec<EmbeddedSite>,
    cell_basis: Option<CellBasis>,
    charge: i32,
    multiplicity: u32,
}

impl EmbeddingFrame {
    pub fn request(&self) -> EvaluationRequest<'_> {
        EvaluationRequest {
            atoms: &self.atoms,
            n_qm: self.n_qm,
            unscaled_charges: &self.unscaled_charges,
            cell_basis: self.cell_basis.as_ref(),
            charge: self.charge,
            multiplicity: self.multiplicity,
        }
    }

    pub fn atoms(&self) -> &Atoms {
        &self.atoms
    }

    pub fn unscaled_charges(&self) -> &[f64] {
        &self.unscaled_charges
    }

    /// Cell basis handed to engines, `None` for non-periodic models.
    pub fn cell_basis(&self) -> Option<&CellBasis> {
        self.cell_basis.as_ref()
    }

    pub fn n_qm(&self) -> usize {
        self.n_qm
    }

    pub fn n_mm(&self) -> usize {
        self.sites.len()
    }

    pub fn sites(&self) -> &[EmbeddedSite] {
        &self.sites
    }

    /// Number of MM atoms inside the cutoff.
    pub fn n_embedded(&self) -> usize {
        self.sites.iter().filter(|s| s.weight > 0.0).count()
    }
}

/// Energy, full-system gradient and MM-site ESP of one engine evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    pub energy: f64,
    /// One entry per system atom; inactive atoms stay zero.
    pub gradient: Vec<Vector3<f64>>,
    /// One entry per MM atom of the model, empty if the engine reports no ESP.
    pub esp: Vec<f64>,
}

/// Combined QM (and optional MM embedding) result of [`Model::get_result`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResult {
    pub qm_energy: f64,
    pub qm_energy_gradient: Vec<Vector3<f64>>,
    pub mm_esp: Vec<f64>,
}

/// The energy-composition model over a [`System`].
///
/// A `Model` borrows its system, so positions cannot change underneath a model in
/// use; rebuild the model after moving atoms.
#[derive(Debug, Clone)]
pub struct Model<'a> {
    system: &'a System,
    qm_indices: Vec<usize>,
    mm_indices: Vec<usize>,
    switching: SwitchingFunction,
    pbc: bool,
}

impl<'a> Model<'a> {
    /// Builds a model from the region tags and QM charge state of `system`.
    ///
    /// `swdist` defaults to `0.75 · cutoff`.
    ///
    /// # Errors
    ///
    /// - [`QmmmError::Configuration`] for a non-positive cutoff, `swdist > cutoff`,
    ///   an empty QM region, or `pbc` without a cell basis.
    /// - [`QmmmError::InvalidConfiguration`] if the QM charge and multiplicity are
    ///   inconsistent with the QM electron count.
    pub fn build(
        system: &'a System,
        switching_type: SwitchingType,
        cutoff: f64,
        swdist: Option<f64>,
        pbc: bool,
    ) -> Result<Self, QmmmError> {
        let swdist = swdist.unwrap_or(DEFAULT_SWDIST_RATIO * cutoff);
        let switching = SwitchingFunction::new(switching_type, cutoff, swdist)?;
        if switching_type == SwitchingType::Switch && swdist == cutoff {
            warn!(cutoff, "swdist equals cutoff; embedding charges are truncated without switching.");
        }

        if pbc && system.cell_basis().is_none() {
            return Err(QmmmError::Configuration(
                "periodic model requested but the system has no cell basis".to_string(),
            ));
        }

        let qm_indices = system.qm_indices();
        if qm_indices.is_empty() {
            return Err(QmmmError::Configuration(
                "the QM region is empty; select QM atoms before building the model".to_string(),
            ));
        }
        let mm_indices = system.mm_indices();

        check_charge_state(system, &qm_indices)?;

        info!(
            n_qm = qm_indices.len(),
            n_mm = mm_indices.len(),
            switching = %switching_type,
            cutoff,
            swdist,
            pbc,
            "Model built."
        );

        Ok(Self {
            system,
            qm_indices,
            mm_indices,
            switching,
            pbc,
        })
    }

    pub fn from_config(system: &'a System, config: &ModelConfig) -> Result<Self, QmmmError> {
        Self::build(
            system,
            config.switching_type,
            config.cutoff,
            config.swdist,
            config.pbc,
        )
    }

    pub fn system(&self) -> &System {
        self.system
    }

    pub fn qm_indices(&self) -> &[usize] {
        &self.qm_indices
    }

    pub fn mm_indices(&self) -> &[usize] {
        &self.mm_indices
    }

    pub fn switching(&self) -> &SwitchingFunction {
        &self.switching
    }

    pub fn is_periodic(&self) -> bool {
        self.pbc
    }

    /// Number of atoms every engine used with this model must be built for.
    pub fn n_engine_atoms(&self) -> usize {
        self.qm_indices.len() + self.mm_indices.len()
    }

    /// Builds the embedding frame for the current positions.
    ///
    /// The distance of an MM atom to the QM region is the shortest distance to
    /// any QM atom, taken between nearest images when the model is periodic.
    pub fn frame(&self) -> Result<EmbeddingFrame, QmmmError> {
        let atoms = self.system.atoms();
        let cell = self.periodic_cell()?;
        let positions = self.wrapped_positions(cell)?;
        let charges = atoms.charges();
        let elements = atoms.elements();

        let mut frame_atoms = Atoms::with_capacity(self.n_engine_atoms());
        let mut unscaled_charges = Vec::with_capacity(self.n_engine_atoms());
        for &i in &self.qm_indices {
            frame_atoms.push(positions[i], charges[i], elements[i]);
            unscaled_charges.push(charges[i]);
        }

        let mut sites = Vec::with_capacity(self.mm_indices.len());
        for &j in &self.mm_indices {
            let site = self.embed(cell, j, charges[j]);
            frame_atoms.push(positions[j], site.charge * site.weight, elements[j]);
            unscaled_charges.push(charges[j]);
            sites.push(site);
        }

        let frame = EmbeddingFrame {
            atoms: frame_atoms,
            unscaled_charges,
            n_qm: self.qm_indices.len(),
            sites,
            cell_basis: cell.cloned(),
            charge: self.system.qm_charge(),
            multiplicity: self.system.qm_multiplicity(),
        };
        debug!(
            n_embedded = frame.n_embedded(),
            n_mm = frame.n_mm(),
            "Embedding frame prepared."
        );
        Ok(frame)
    }

    fn periodic_cell(&self) -> Result<Option<&'a CellBasis>, QmmmError> {
        if !self.pbc {
            return Ok(None);
        }
        self.system.cell_basis().map(Some).ok_or_else(|| {
            QmmmError::Configuration("periodic model has no cell basis".to_string())
        })
    }

    fn wrapped_positions(&self, cell: Option<&CellBasis>) -> Result<Vec<Point3<f64>>, QmmmError> {
        let positions = self.system.atoms().positions();
        let Some(cell) = cell else {
            return Ok(positions.to_vec());
        };
        let qm = Atoms::from_atoms(self.system.atoms(), &self.qm_indices)?;
        let center = qm.centroid().unwrap_or_else(Point3::origin);
        Ok(positions
            .iter()
            .map(|p| center + cell.minimum_image(&(p - center)))
            .collect())
    }

    fn embed(&self, cell: Option<&CellBasis>, j: usize, charge: f64) -> EmbeddedSite {
        let positions = self.system.atoms().positions();
        let (nearest_qm, displacement) = self
            .qm_indices
            .iter()
            .enumerate()
            .map(|(k, &i)| {
                let d = positions[j] - positions[i];
                (k, cell.map_or(d, |cell| cell.minimum_image(&d)))
            })
            .min_by(|(_, a), (_, b)| a.norm_squared().total_cmp(&b.norm_squared()))
            .unwrap_or((0, Vector3::zeros()));

        let distance = displacement.norm();
        let direction = if distance > 0.0 {
            displacement / distance
        } else {
            Vector3::zeros()
        };

        EmbeddedSite {
            nearest_qm,
            distance,
            weight: self.switching.weight(distance),
            weight_derivative: self.switching.derivative(distance),
            direction,
            charge,
        }
    }

    /// Evaluates one engine on `frame` and projects its gradient onto system
    /// indices.
    ///
    /// When the engine reports an ESP, the derivative of the switched charges with
    /// respect to the MM–QM distance is included: each MM atom `j` with nearest QM
    /// atom `i` receives `esp_j · q_j · w'(d) · u` and `i` the opposite.
    pub fn evaluate(
        &self,
        frame: &EmbeddingFrame,
        engine: &mut Engine,
    ) -> Result<Projection, QmmmError> {
        if engine.n_atoms() != self.n_engine_atoms() {
            return Err(QmmmError::shape(
                "model engine",
                self.n_engine_atoms(),
                engine.n_atoms(),
            ));
        }
        if frame.n_qm != self.qm_indices.len() || frame.sites.len() != self.mm_indices.len() {
            return Err(QmmmError::shape(
                "embedding frame",
                self.n_engine_atoms(),
                frame.atoms.len(),
            ));
        }

        let evaluation = engine.evaluate(&frame.request())?;
        let n_qm = frame.n_qm;
        let mut gradient = vec![Vector3::zeros(); self.system.len()];

        for (k, &i) in self.qm_indices.iter().enumerate() {
            gradient[i] += evaluation.gradient[k];
        }
        for (m, &j) in self.mm_indices.iter().enumerate() {
            gradient[j] += evaluation.gradient[n_qm + m];
        }

        for (m, site) in frame.sites.iter().enumerate() {
            let Some(&esp) = evaluation.esp.get(m) else {
                break;
            };
            if site.weight_derivative == 0.0 {
                continue;
            }
            let chain = site.direction * (esp * site.charge * site.weight_derivative);
            gradient[self.mm_indices[m]] += chain;
            gradient[self.qm_indices[site.nearest_qm]] -= chain;
        }

        Ok(Projection {
            energy: evaluation.energy,
            gradient,
            esp: evaluation.esp,
        })
    }

    /// Evaluates the QM engine, then the MM embedding engine if given, on one
    /// shared frame and sums their projections.
    #[instrument(skip_all, name = "model_result")]
    pub fn get_result(
        &self,
        qm_engine: &mut Engine,
        mm_engine: Option<&mut Engine>,
    ) -> Result<ModelResult, QmmmError> {
        let frame = self.frame()?;
        let qm = self.evaluate(&frame, qm_engine)?;
        let mut result = ModelResult {
            qm_energy: qm.energy,
            qm_energy_gradient: qm.gradient,
            mm_esp: if qm.esp.is_empty() {
                vec![0.0; self.mm_indices.len()]
            } else {
                qm.esp
            },
        };

        if let Some(mm_engine) = mm_engine {
            let mm = self.evaluate(&frame, mm_engine)?;
            result.qm_energy += mm.energy;
            for (acc, g) in result.qm_energy_gradient.iter_mut().zip(&mm.gradient) {
                *acc += g;
            }
            for (acc, v) in result.mm_esp.iter_mut().zip(&mm.esp) {
                *acc += v;
            }
        }

        Ok(result)
    }
}

fn check_charge_state(system: &System, qm_indices: &[usize]) -> Result<(), QmmmError> {
    let multiplicity = system.qm_multiplicity();
    if multiplicity == 0 {
        return Err(QmmmError::InvalidConfiguration(
            "spin multiplicity must be at least 1".to_string(),
        ));
    }
    let elements = system.atoms().elements();
    let nuclear: i64 = qm_indices
        .iter()
        .map(|&i| i64::from(elements[i].atomic_number()))
        .sum();
    let electrons = nuclear - i64::from(system.qm_charge());
    let unpaired = i64::from(multiplicity) - 1;

    if electrons < 0 || unpaired > electrons || (electrons - unpaired) % 2 != 0 {
        return Err(QmmmError::InvalidConfiguration(format!(
            "charge {} and multiplicity {} are impossible for {} QM electron(s)",
            system.qm_charge(),
            multiplicity,
            electrons
        )));
    }
    Ok(())
}
