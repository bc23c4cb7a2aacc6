use super::simulation::{Protocol, Simulation, SimulationOptions, SimulationResult, SimulationState};
use crate::core::models::atoms::Atoms;
use crate::core::models::element::Element;
use crate::core::models::system::{CellBasis, Region, System};
use crate::engine::composite::Engine;
use crate::engine::error::QmmmError;
use crate::engine::model::{Model, ModelConfig};
use crate::engine::progress::{Progress, ProgressReporter};
use nalgebra::{Matrix3, Point3};
use tracing::{info, instrument};

/// One-stop entry point for driving a QM/MM calculation.
///
/// The usual sequence is [`Qmmm::new`], [`Qmmm::select_qm`], optionally
/// [`Qmmm::set_cell_basis`], [`Qmmm::build_model`], one [`Qmmm::add_engine`] per
/// engine, [`Qmmm::setup_simulation`], then [`Qmmm::run_step`] as often as needed
/// and finally [`Qmmm::return_results`].
#[derive(Debug)]
pub struct Qmmm {
    system: System,
    model_config: Option<ModelConfig>,
    simulation: Simulation,
    state: Option<SimulationState>,
}

impl Qmmm {
    /// Creates a facade over atoms that all start in the MM region.
    ///
    /// # Errors
    ///
    /// Returns [`QmmmError::ShapeMismatch`] if the three slices differ in length.
    pub fn new(
        positions: &[Point3<f64>],
        charges: &[f64],
        elements: &[Element],
    ) -> Result<Self, QmmmError> {
        if charges.len() != positions.len() {
            return Err(QmmmError::shape("charges", positions.len(), charges.len()));
        }
        if elements.len() != positions.len() {
            return Err(QmmmError::shape("elements", positions.len(), elements.len()));
        }

        let mut atoms = Atoms::with_capacity(positions.len());
        for ((&position, &charge), &element) in positions.iter().zip(charges).zip(elements) {
            atoms.push(position, charge, element);
        }
        let system = System::new(atoms, vec![Region::Mm; positions.len()])?;
        Ok(Self::from_system(system))
    }

    pub fn from_system(system: System) -> Self {
        Self {
            system,
            model_config: None,
            simulation: Simulation::new(),
            state: None,
        }
    }

    pub fn system(&self) -> &System {
        &self.system
    }

    pub fn simulation(&self) -> &Simulation {
        &self.simulation
    }

    pub fn model_config(&self) -> Option<&ModelConfig> {
        self.model_config.as_ref()
    }

    /// Current state, `None` until the simulation is set up.
    pub fn state(&self) -> Option<&SimulationState> {
        self.state.as_ref()
    }

    /// Moves `indices` into the QM region with the given charge state.
    ///
    /// Engines are sized for one partition, so the QM region cannot change once
    /// an engine is registered.
    pub fn select_qm(
        &mut self,
        indices: &[usize],
        charge: i32,
        multiplicity: u32,
    ) -> Result<(), QmmmError> {
        if self.simulation.n_engines() > 0 {
            return Err(QmmmError::Configuration(
                "the QM region cannot change after engines are registered".to_string(),
            ));
        }
        self.system.select_qm(indices, charge, multiplicity)?;
        info!(n_qm = indices.len(), charge, multiplicity, "QM region selected.");
        Ok(())
    }

    /// Sets the periodic cell (rows are lattice vectors), or removes it with `None`.
    pub fn set_cell_basis(&mut self, basis: Option<Matrix3<f64>>) -> Result<(), QmmmError> {
        let cell = basis.map(CellBasis::new).transpose()?;
        self.system.set_cell_basis(cell);
        Ok(())
    }

    /// Moves the atoms, typically between steps.
    pub fn set_positions(&mut self, positions: &[Point3<f64>]) -> Result<(), QmmmError> {
        Ok(self.system.set_positions(positions)?)
    }

    /// Validates `config` against the current system and keeps it for later steps.
    pub fn build_model(&mut self, config: ModelConfig) -> Result<(), QmmmError> {
        Model::from_config(&self.system, &config)?;
        self.model_config = Some(config);
        Ok(())
    }

    /// Number of atoms engines must be built for: QM atoms plus MM atoms.
    pub fn n_engine_atoms(&self) -> usize {
        self.system.qm_indices().len() + self.system.mm_indices().len()
    }

    /// Registers an engine, which must be built for [`Qmmm::n_engine_atoms`] atoms.
    pub fn add_engine(
        &mut self,
        name: impl Into<String>,
        engine: Engine,
        group: Option<&str>,
    ) -> Result<(), QmmmError> {
        let name = name.into();
        if engine.n_atoms() != self.n_engine_atoms() {
            return Err(QmmmError::shape(
                format!("engine '{}'", name),
                self.n_engine_atoms(),
                engine.n_atoms(),
            ));
        }
        self.simulation.add_engine(name, engine, group)
    }

    /// Sets up the schedule and resets the state to before the first step.
    pub fn setup_simulation(
        &mut self,
        protocol: Protocol,
        options: &SimulationOptions,
    ) -> Result<(), QmmmError> {
        self.simulation.check_engine_sizes(self.n_engine_atoms())?;
        self.simulation.setup_simulation(protocol, options)?;
        self.state = Some(self.simulation.initial_state());
        Ok(())
    }

    /// Advances the simulation by one step at the current positions.
    ///
    /// On failure the previous state is kept.
    pub fn run_step(&mut self) -> Result<&SimulationState, QmmmError> {
        let config = self.model_config.ok_or_else(|| {
            QmmmError::Configuration("build_model must be called before stepping".to_string())
        })?;
        let state = self.state.as_ref().ok_or_else(|| {
            QmmmError::Configuration(
                "setup_simulation must be called before stepping".to_string(),
            )
        })?;

        let model = Model::from_config(&self.system, &config)?;
        let next = self.simulation.step(&model, state)?;
        Ok(self.state.insert(next))
    }

    /// Runs `n_steps` steps at fixed positions, reporting each finished step.
    #[instrument(skip_all, name = "qmmm_run", fields(n_steps = n_steps))]
    pub fn run(
        &mut self,
        n_steps: u64,
        reporter: &ProgressReporter,
    ) -> Result<SimulationResult, QmmmError> {
        reporter.report(Progress::RunStart {
            total_steps: n_steps,
        });
        for _ in 0..n_steps {
            let state = self.run_step()?;
            let step = state.step();
            let energy = Simulation::get_energy(state.contributions());
            reporter.report(Progress::StepFinish { step, energy });
        }
        reporter.report(Progress::RunFinish);
        Ok(self.return_results(false))
    }

    /// Aggregates the current state, printing a summary when `print` is set.
    pub fn return_results(&self, print: bool) -> SimulationResult {
        match &self.state {
            Some(state) => self.simulation.return_results(state, print),
            None => self
                .simulation
                .return_results(&self.simulation.initial_state(), print),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::elec::switching::SwitchingType;
    use crate::core::elec::units::COULOMB_CONSTANT;
    use crate::engine::backends::QmAdapter;
    use crate::engine::backends::dummy::DummyQm;
    use crate::engine::backends::point_charge::PointChargeMm;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ion_pair() -> Qmmm {
        Qmmm::new(
            &[Point3::origin(), Point3::new(2.0, 0.0, 0.0), Point3::new(30.0, 0.0, 0.0)],
            &[1.0, -1.0, 0.5],
            &[Element::Na, Element::Cl, Element::K],
        )
        .unwrap()
    }

    fn ready(qmmm: &mut Qmmm) {
        qmmm.select_qm(&[0], 1, 1).unwrap();
        qmmm.build_model(ModelConfig::new(8.0)).unwrap();
        let n = qmmm.n_engine_atoms();
        qmmm.add_engine("qm", Engine::new("dummy", n, QmAdapter::new(DummyQm)), None)
            .unwrap();
        qmmm.add_engine("mm", Engine::new("point-charge", n, PointChargeMm), None)
            .unwrap();
        qmmm.setup_simulation(Protocol::Md, &SimulationOptions::new())
            .unwrap();
    }

    #[test]
    fn mismatched_inputs_are_rejected() {
        let result = Qmmm::new(&[Point3::origin()], &[0.0, 1.0], &[Element::H]);
        assert!(matches!(result, Err(QmmmError::ShapeMismatch { .. })));
    }

    #[test]
    fn selecting_a_missing_atom_fails() {
        let mut qmmm = ion_pair();
        assert!(matches!(
            qmmm.select_qm(&[3], 0, 1),
            Err(QmmmError::IndexOutOfRange { index: 3, len: 3 })
        ));
    }

    #[test]
    fn full_sequence_produces_the_coulomb_energy() {
        let mut qmmm = ion_pair();
        ready(&mut qmmm);

        let state = qmmm.run_step().unwrap();
        assert_eq!(state.step(), 1);

        let result = qmmm.return_results(false);
        // The far ion is beyond the cutoff and contributes nothing.
        assert!((result.energy + COULOMB_CONSTANT / 2.0).abs() < 1e-9);
        assert_eq!(result.gradient.len(), 3);
        assert_eq!(result.engines.len(), 2);
    }

    #[test]
    fn stepping_requires_a_model_and_a_setup() {
        let mut qmmm = ion_pair();
        qmmm.select_qm(&[0], 1, 1).unwrap();
        assert!(matches!(qmmm.run_step(), Err(QmmmError::Configuration(_))));

        qmmm.build_model(ModelConfig::new(8.0)).unwrap();
        assert!(matches!(qmmm.run_step(), Err(QmmmError::Configuration(_))));
    }

    #[test]
    fn mis_sized_engines_are_rejected_at_registration() {
        let mut qmmm = ion_pair();
        qmmm.select_qm(&[0], 1, 1).unwrap();
        let n = qmmm.n_engine_atoms();

        let result = qmmm.add_engine("mm", Engine::new("point-charge", n + 2, PointChargeMm), None);
        assert!(matches!(
            result,
            Err(QmmmError::ShapeMismatch { expected, found, .. }) if expected == n && found == n + 2
        ));
        assert_eq!(qmmm.simulation().n_engines(), 0);
    }

    #[test]
    fn qm_region_is_fixed_once_engines_are_registered() {
        let mut qmmm = ion_pair();
        qmmm.select_qm(&[0], 1, 1).unwrap();
        let n = qmmm.n_engine_atoms();
        qmmm.add_engine("mm", Engine::new("point-charge", n, PointChargeMm), None)
            .unwrap();

        assert!(matches!(
            qmmm.select_qm(&[1], -1, 1),
            Err(QmmmError::Configuration(_))
        ));
        assert_eq!(qmmm.system().qm_indices(), vec![0]);
    }

    #[test]
    fn invalid_model_is_rejected_up_front() {
        let mut qmmm = ion_pair();
        qmmm.select_qm(&[0], 1, 1).unwrap();
        let result = qmmm.build_model(ModelConfig::new(8.0).swdist(10.0));
        assert!(matches!(result, Err(QmmmError::Configuration(_))));
        assert!(qmmm.model_config().is_none());
    }

    #[test]
    fn periodic_model_needs_a_cell_and_accepts_one() {
        let mut qmmm = ion_pair();
        qmmm.select_qm(&[0], 1, 1).unwrap();
        let config = ModelConfig::new(8.0)
            .switching_type(SwitchingType::Shift)
            .pbc(true);
        assert!(qmmm.build_model(config).is_err());

        qmmm.set_cell_basis(Some(Matrix3::from_diagonal_element(40.0)))
            .unwrap();
        assert!(qmmm.build_model(config).is_ok());
        assert!(qmmm.system().is_periodic());
    }

    #[test]
    fn results_before_any_engine_are_empty() {
        let qmmm = ion_pair();
        let result = qmmm.return_results(false);
        assert_eq!(result.energy, 0.0);
        assert!(result.gradient.is_empty());
    }

    #[test]
    fn run_reports_every_step_and_moves_with_positions() {
        let mut qmmm = ion_pair();
        ready(&mut qmmm);

        let finished = AtomicUsize::new(0);
        let reporter = ProgressReporter::with_callback(Box::new(|event| {
            if let Progress::StepFinish { .. } = event {
                finished.fetch_add(1, Ordering::SeqCst);
            }
        }));
        let result = qmmm.run(3, &reporter).unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 3);
        assert_eq!(result.step, 3);

        qmmm.set_positions(&[
            Point3::origin(),
            Point3::new(4.0, 0.0, 0.0),
            Point3::new(30.0, 0.0, 0.0),
        ])
        .unwrap();
        qmmm.run_step().unwrap();
        let moved = qmmm.return_results(false);
        assert!(moved.energy > result.energy);
    }
}
