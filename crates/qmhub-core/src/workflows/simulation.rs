use crate::engine::composite::Engine;
use crate::engine::error::QmmmError;
use crate::engine::model::{EmbeddingFrame, Model, Projection};
use nalgebra::Vector3;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, instrument};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Group of engines registered without an explicit group.
pub const DEFAULT_GROUP: &str = "default";
/// Group that receives the `nrespa` shorthand multiplier.
pub const SLOW_GROUP: &str = "slow";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    /// Every engine is evaluated on every step.
    #[default]
    Md,
    /// Multiple time stepping: each group is evaluated every `multiplier` steps.
    Mts,
}

impl FromStr for Protocol {
    type Err = QmmmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md" => Ok(Protocol::Md),
            "mts" | "respa" => Ok(Protocol::Mts),
            other => Err(QmmmError::Configuration(format!(
                "unknown simulation protocol '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Md => f.write_str("md"),
            Protocol::Mts => f.write_str("mts"),
        }
    }
}

/// Group multipliers declared for [`Simulation::setup_simulation`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationOptions {
    group_multipliers: Vec<(String, usize)>,
    nrespa: Option<usize>,
}

impl SimulationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluates the engines of `name` every `multiplier` outer steps.
    pub fn group(mut self, name: impl Into<String>, multiplier: usize) -> Self {
        self.group_multipliers.push((name.into(), multiplier));
        self
    }

    /// Shorthand for the multiplier of the `"slow"` group.
    pub fn nrespa(mut self, nrespa: usize) -> Self {
        self.nrespa = Some(nrespa);
        self
    }

    pub fn group_multipliers(&self) -> &[(String, usize)] {
        &self.group_multipliers
    }

    pub fn nrespa_value(&self) -> Option<usize> {
        self.nrespa
    }
}

/// A RESPA group and its step multiplier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RespaGroup {
    pub name: String,
    pub multiplier: usize,
}

#[derive(Debug)]
struct RegisteredEngine {
    name: String,
    group: String,
    engine: Engine,
}

/// The cached result of one engine, reused until its group is due again.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineContribution {
    pub energy: f64,
    pub gradient: Vec<Vector3<f64>>,
    pub esp: Vec<f64>,
    /// Step at which the engine was last evaluated.
    pub evaluated_at: u64,
}

/// Everything that changes from one step to the next.
///
/// Produced by [`Simulation::initial_state`] and [`Simulation::step`]; a step never
/// mutates the state it is given.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationState {
    step: u64,
    group_last_evaluated: Vec<Option<u64>>,
    contributions: Vec<Option<EngineContribution>>,
}

impl SimulationState {
    /// Number of completed steps.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Per registered engine, in registration order.
    pub fn contributions(&self) -> &[Option<EngineContribution>] {
        &self.contributions
    }

    /// Per RESPA group, in the order of [`Simulation::groups`].
    pub fn group_last_evaluated(&self) -> &[Option<u64>] {
        &self.group_last_evaluated
    }
}

/// Per-engine line of a [`SimulationResult`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineReport {
    pub name: String,
    pub group: String,
    pub energy: Option<f64>,
    pub evaluated_at: Option<u64>,
}

/// Aggregated energy, gradient and ESP of a state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationResult {
    pub step: u64,
    pub energy: f64,
    pub gradient: Vec<Vector3<f64>>,
    pub esp: Vec<f64>,
    pub engines: Vec<EngineReport>,
}

impl fmt::Display for SimulationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Step {}: total energy {:.6} kcal/mol", self.step, self.energy)?;
        for report in &self.engines {
            match (report.energy, report.evaluated_at) {
                (Some(energy), Some(at)) => writeln!(
                    f,
                    "  {:<16} [{}] {:>16.6} (step {})",
                    report.name, report.group, energy, at
                )?,
                _ => writeln!(f, "  {:<16} [{}] not evaluated", report.name, report.group)?,
            }
        }
        if !self.gradient.is_empty() {
            let max = self
                .gradient
                .iter()
                .map(|g| g.norm())
                .fold(0.0_f64, f64::max);
            writeln!(f, "  max |gradient| {:.6} kcal/(mol·Å)", max)?;
        }
        Ok(())
    }
}

/// Registry of named engines and the multiple-time-step schedule that drives them.
#[derive(Debug, Default)]
pub struct Simulation {
    protocol: Protocol,
    engines: Vec<RegisteredEngine>,
    groups: Vec<RespaGroup>,
    is_setup: bool,
}

impl Simulation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn is_setup(&self) -> bool {
        self.is_setup
    }

    pub fn n_engines(&self) -> usize {
        self.engines.len()
    }

    pub fn engine_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.engines.iter().map(|e| e.name.as_str())
    }

    /// RESPA groups with their multipliers. Empty before setup.
    pub fn groups(&self) -> &[RespaGroup] {
        &self.groups
    }

    /// Number of steps in one full outer cycle (the largest multiplier).
    pub fn outer_cycle(&self) -> usize {
        self.groups.iter().map(|g| g.multiplier).max().unwrap_or(1)
    }

    /// Registers `engine` under `name` in `group` (or [`DEFAULT_GROUP`]).
    ///
    /// Registration order is evaluation and summation order.
    ///
    /// # Errors
    ///
    /// - [`QmmmError::DuplicateEngine`] if `name` is taken.
    /// - [`QmmmError::Configuration`] once the simulation is set up.
    pub fn add_engine(
        &mut self,
        name: impl Into<String>,
        engine: Engine,
        group: Option<&str>,
    ) -> Result<(), QmmmError> {
        let name = name.into();
        if self.is_setup {
            return Err(QmmmError::Configuration(format!(
                "cannot register engine '{}' after the simulation is set up",
                name
            )));
        }
        if self.engines.iter().any(|e| e.name == name) {
            return Err(QmmmError::DuplicateEngine(name));
        }
        let group = group.unwrap_or(DEFAULT_GROUP).to_string();
        debug!(engine = %name, group = %group, n_terms = engine.n_terms(), "Engine registered.");
        self.engines.push(RegisteredEngine {
            name,
            group,
            engine,
        });
        Ok(())
    }

    /// Fixes the protocol and the multiplier of every group.
    ///
    /// On error the simulation is left as it was.
    ///
    /// # Errors
    ///
    /// Returns [`QmmmError::Configuration`] for a zero multiplier, a multiplier for a
    /// group without engines, a group declared twice, a multiplier that does not
    /// divide the outermost one, or any multiplier other than 1 under
    /// [`Protocol::Md`].
    #[instrument(skip_all, name = "simulation_setup", fields(protocol = %protocol))]
    pub fn setup_simulation(
        &mut self,
        protocol: Protocol,
        options: &SimulationOptions,
    ) -> Result<(), QmmmError> {
        let mut groups: Vec<RespaGroup> = Vec::new();
        for registered in &self.engines {
            if !groups.iter().any(|g| g.name == registered.group) {
                groups.push(RespaGroup {
                    name: registered.group.clone(),
                    multiplier: 1,
                });
            }
        }

        let mut declared = options.group_multipliers.clone();
        if let Some(nrespa) = options.nrespa {
            if !declared.iter().any(|(name, _)| name == SLOW_GROUP) {
                declared.push((SLOW_GROUP.to_string(), nrespa));
            }
        }

        let mut seen: Vec<&str> = Vec::new();
        for (name, multiplier) in &declared {
            if seen.contains(&name.as_str()) {
                return Err(QmmmError::Configuration(format!(
                    "multiplier for group '{}' is declared more than once",
                    name
                )));
            }
            seen.push(name);

            if *multiplier == 0 {
                return Err(QmmmError::Configuration(format!(
                    "group '{}' has a zero step multiplier",
                    name
                )));
            }
            let group = groups.iter_mut().find(|g| &g.name == name).ok_or_else(|| {
                QmmmError::Configuration(format!(
                    "multiplier declared for group '{}' which has no engines",
                    name
                ))
            })?;
            group.multiplier = *multiplier;
        }

        if protocol == Protocol::Md {
            if let Some(group) = groups.iter().find(|g| g.multiplier != 1) {
                return Err(QmmmError::Configuration(format!(
                    "protocol 'md' evaluates every engine each step, but group '{}' has multiplier {}",
                    group.name, group.multiplier
                )));
            }
        }

        let outermost = groups.iter().map(|g| g.multiplier).max().unwrap_or(1);
        if let Some(group) = groups.iter().find(|g| outermost % g.multiplier != 0) {
            return Err(QmmmError::Configuration(format!(
                "multiplier {} of group '{}' does not divide the outer cycle of {} steps",
                group.multiplier, group.name, outermost
            )));
        }

        info!(
            n_engines = self.engines.len(),
            n_groups = groups.len(),
            outer_cycle = outermost,
            "Simulation set up."
        );
        self.protocol = protocol;
        self.groups = groups;
        self.is_setup = true;
        Ok(())
    }

    /// Checks that every registered engine operates on `n_atoms` atoms.
    ///
    /// # Errors
    ///
    /// Returns [`QmmmError::ShapeMismatch`] naming the first mis-sized engine.
    pub fn check_engine_sizes(&self, n_atoms: usize) -> Result<(), QmmmError> {
        match self.engines.iter().find(|e| e.engine.n_atoms() != n_atoms) {
            Some(registered) => Err(QmmmError::shape(
                format!("engine '{}'", registered.name),
                n_atoms,
                registered.engine.n_atoms(),
            )),
            None => Ok(()),
        }
    }

    /// A state before the first step: nothing evaluated yet.
    pub fn initial_state(&self) -> SimulationState {
        SimulationState {
            step: 0,
            group_last_evaluated: vec![None; self.groups.len()],
            contributions: vec![None; self.engines.len()],
        }
    }

    fn multiplier_of(&self, group: &str) -> usize {
        self.groups
            .iter()
            .find(|g| g.name == group)
            .map_or(1, |g| g.multiplier)
    }

    fn is_due(&self, registered: &RegisteredEngine, step: u64) -> bool {
        step % self.multiplier_of(&registered.group) as u64 == 0
    }

    /// Advances one outer step.
    ///
    /// The embedding frame is built once, before any engine runs. Every engine whose
    /// group multiplier divides the current step is evaluated; all others keep their
    /// cached contribution. The returned state has the step counter incremented.
    ///
    /// # Errors
    ///
    /// - [`QmmmError::Configuration`] if the simulation is not set up.
    /// - [`QmmmError::ShapeMismatch`] if `state` belongs to another registry or an
    ///   engine is not sized for `model`. Checked before any engine runs.
    /// - [`QmmmError::Engine`] naming the first failing engine. Engines not yet
    ///   started are skipped and no partial results are kept.
    #[instrument(skip_all, name = "simulation_step", fields(step = state.step))]
    pub fn step(
        &mut self,
        model: &Model<'_>,
        state: &SimulationState,
    ) -> Result<SimulationState, QmmmError> {
        if !self.is_setup {
            return Err(QmmmError::Configuration(
                "setup_simulation must be called before stepping".to_string(),
            ));
        }
        if state.contributions.len() != self.engines.len() {
            return Err(QmmmError::shape(
                "simulation state",
                self.engines.len(),
                state.contributions.len(),
            ));
        }

        self.check_engine_sizes(model.n_engine_atoms())?;

        let frame = model.frame()?;
        let step = state.step;
        let due: Vec<bool> = self.engines.iter().map(|e| self.is_due(e, step)).collect();

        let results = evaluate_due(&mut self.engines, &due, model, &frame)?;

        let mut next = state.clone();
        if next.group_last_evaluated.len() != self.groups.len() {
            next.group_last_evaluated = vec![None; self.groups.len()];
        }
        for (k, projection) in results {
            debug!(engine = %self.engines[k].name, energy = projection.energy, "Engine evaluated.");
            next.contributions[k] = Some(EngineContribution {
                energy: projection.energy,
                gradient: projection.gradient,
                esp: projection.esp,
                evaluated_at: step,
            });
            if let Some(g) = self
                .groups
                .iter()
                .position(|g| g.name == self.engines[k].group)
            {
                next.group_last_evaluated[g] = Some(step);
            }
        }
        next.step = step + 1;

        debug!(energy = Self::get_energy(&next.contributions), "Step complete.");
        Ok(next)
    }

    /// Sum of the cached energies.
    pub fn get_energy(contributions: &[Option<EngineContribution>]) -> f64 {
        contributions.iter().flatten().map(|c| c.energy).sum()
    }

    /// Sum of the cached gradients; empty when nothing has been evaluated.
    pub fn get_energy_gradient(contributions: &[Option<EngineContribution>]) -> Vec<Vector3<f64>> {
        let mut total: Vec<Vector3<f64>> = Vec::new();
        for contribution in contributions.iter().flatten() {
            if total.is_empty() {
                total = vec![Vector3::zeros(); contribution.gradient.len()];
            }
            for (acc, g) in total.iter_mut().zip(&contribution.gradient) {
                *acc += g;
            }
        }
        total
    }

    fn get_esp(contributions: &[Option<EngineContribution>]) -> Vec<f64> {
        let mut total: Vec<f64> = Vec::new();
        for contribution in contributions.iter().flatten() {
            if contribution.esp.is_empty() {
                continue;
            }
            if total.is_empty() {
                total = vec![0.0; contribution.esp.len()];
            }
            for (acc, v) in total.iter_mut().zip(&contribution.esp) {
                *acc += v;
            }
        }
        total
    }

    /// Aggregates the cached contributions of `state`, printing a summary to stdout
    /// when `print` is set.
    pub fn return_results(&self, state: &SimulationState, print: bool) -> SimulationResult {
        let engines = self
            .engines
            .iter()
            .enumerate()
            .map(|(k, e)| {
                let cached = state.contributions.get(k).and_then(Option::as_ref);
                EngineReport {
                    name: e.name.clone(),
                    group: e.group.clone(),
                    energy: cached.map(|c| c.energy),
                    evaluated_at: cached.map(|c| c.evaluated_at),
                }
            })
            .collect();

        let result = SimulationResult {
            step: state.step,
            energy: Self::get_energy(&state.contributions),
            gradient: Self::get_energy_gradient(&state.contributions),
            esp: Self::get_esp(&state.contributions),
            engines,
        };
        if print {
            print!("{result}");
        }
        result
    }
}

type StepResults = Vec<(usize, Projection)>;

/// Evaluates the due engines in registration order, stopping at the first failure.
fn evaluate_due(
    engines: &mut [RegisteredEngine],
    due: &[bool],
    model: &Model<'_>,
    frame: &EmbeddingFrame,
) -> Result<StepResults, QmmmError> {
    let run = |(k, registered): (usize, &mut RegisteredEngine)| {
        model
            .evaluate(frame, &mut registered.engine)
            .map(|projection| (k, projection))
            .map_err(|err| name_failure(&registered.name, err))
    };

    #[cfg(feature = "parallel")]
    let results = engines
        .par_iter_mut()
        .enumerate()
        .filter(|(k, _)| due[*k])
        .map(run)
        .collect();

    #[cfg(not(feature = "parallel"))]
    let results = engines
        .iter_mut()
        .enumerate()
        .filter(|(k, _)| due[*k])
        .map(run)
        .collect();

    results
}

fn name_failure(engine: &str, err: QmmmError) -> QmmmError {
    match err {
        QmmmError::Engine { name, source } if name != engine => QmmmError::Engine {
            name: format!("{}/{}", engine, name),
            source,
        },
        other => other,
    }
}
