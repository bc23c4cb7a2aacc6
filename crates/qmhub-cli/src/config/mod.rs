pub mod defaults;

use crate::error::{CliError, Result};
use defaults::DefaultsConfig;
use nalgebra::{Matrix3, Point3};
use qmhub::core::elec::switching::SwitchingType;
use qmhub::core::models::element::Element;
use qmhub::core::models::system::{Region, System, SystemBuilder};
use qmhub::engine::backends::QmAdapter;
use qmhub::engine::backends::dummy::DummyQm;
use qmhub::engine::backends::point_charge::PointChargeMm;
use qmhub::engine::composite::Engine;
use qmhub::engine::error::QmmmError;
use qmhub::engine::model::ModelConfig;
use qmhub::workflows::simulation::{Protocol, SimulationOptions};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
struct PartialAtom {
    element: String,
    #[serde(default)]
    charge: f64,
    position: [f64; 3],
    region: Option<Region>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialSystemConfig {
    #[serde(default)]
    atoms: Vec<PartialAtom>,
    /// Overrides the per-atom regions: listed atoms become QM, all others MM.
    qm_atoms: Option<Vec<usize>>,
    qm_charge: Option<i32>,
    qm_multiplicity: Option<u32>,
    /// Rows are the lattice vectors.
    cell: Option<[[f64; 3]; 3]>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialModelConfig {
    switching_type: Option<String>,
    cutoff: Option<f64>,
    swdist: Option<f64>,
    pbc: Option<bool>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialSimulationConfig {
    protocol: Option<String>,
    steps: Option<u64>,
    nrespa: Option<usize>,
    #[serde(default)]
    groups: BTreeMap<String, usize>,
}

/// The backends the command line knows how to construct.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    DummyQm,
    PointCharge,
}

impl BackendKind {
    fn label(&self) -> &'static str {
        match self {
            BackendKind::DummyQm => "dummy-qm",
            BackendKind::PointCharge => "point-charge",
        }
    }

    fn engine(&self, n_atoms: usize) -> Engine {
        match self {
            BackendKind::DummyQm => Engine::new(self.label(), n_atoms, QmAdapter::new(DummyQm)),
            BackendKind::PointCharge => Engine::new(self.label(), n_atoms, PointChargeMm),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
struct PartialTerm {
    kind: BackendKind,
    scale: Option<f64>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
struct PartialEngine {
    name: String,
    group: Option<String>,
    terms: Vec<PartialTerm>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialRunConfig {
    system: Option<PartialSystemConfig>,
    model: Option<PartialModelConfig>,
    simulation: Option<PartialSimulationConfig>,
    #[serde(default, rename = "engine")]
    engines: Vec<PartialEngine>,
}

/// One weighted backend inside an engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TermDefinition {
    pub kind: BackendKind,
    pub scale: f64,
}

/// A named engine, built once the number of engine atoms is known.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineDefinition {
    pub name: String,
    pub group: Option<String>,
    pub terms: Vec<TermDefinition>,
}

impl EngineDefinition {
    pub fn build(&self, n_atoms: usize) -> std::result::Result<Engine, QmmmError> {
        let mut terms = self.terms.iter();
        let first = terms.next().ok_or_else(|| {
            QmmmError::Configuration(format!("engine '{}' has no terms", self.name))
        })?;
        let mut engine = first.kind.engine(n_atoms).scaled(first.scale);
        for term in terms {
            engine = engine.add_engine(term.kind.engine(n_atoms), term.scale)?;
        }
        Ok(engine)
    }
}

/// A fully resolved run description.
#[derive(Debug)]
pub struct RunPlan {
    pub system: System,
    pub model: ModelConfig,
    pub protocol: Protocol,
    pub options: SimulationOptions,
    pub steps: u64,
    pub engines: Vec<EngineDefinition>,
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides<'a> {
    pub steps: Option<u64>,
    pub nrespa: Option<usize>,
    pub set_values: &'a [String],
}

impl PartialRunConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn merge_with_cli(mut self, overrides: &CliOverrides<'_>) -> Result<RunPlan> {
        self.apply_set_values(overrides.set_values)?;
        let defaults = DefaultsConfig::default();

        let system = Self::merge_system(self.system.take().unwrap_or_default(), &defaults)?;
        let model = Self::merge_model(self.model.take().unwrap_or_default(), &defaults)?;

        let sim = self.simulation.take().unwrap_or_default();
        let protocol: Protocol = sim
            .protocol
            .as_deref()
            .unwrap_or(defaults.protocol)
            .parse()?;
        let mut options = SimulationOptions::new();
        for (group, multiplier) in sim.groups {
            options = options.group(group, multiplier);
        }
        if let Some(nrespa) = overrides.nrespa.or(sim.nrespa) {
            options = options.nrespa(nrespa);
        }
        let steps = overrides.steps.or(sim.steps).unwrap_or(defaults.steps);

        if self.engines.is_empty() {
            return Err(CliError::Config(
                "at least one [[engine]] section is required".to_string(),
            ));
        }
        let engines = self
            .engines
            .into_iter()
            .map(|e| EngineDefinition {
                name: e.name,
                group: e.group,
                terms: e
                    .terms
                    .into_iter()
                    .map(|t| TermDefinition {
                        kind: t.kind,
                        scale: t.scale.unwrap_or(defaults.term_scale),
                    })
                    .collect(),
            })
            .collect();

        Ok(RunPlan {
            system,
            model,
            protocol,
            options,
            steps,
            engines,
        })
    }

    fn merge_system(partial: PartialSystemConfig, defaults: &DefaultsConfig) -> Result<System> {
        if partial.atoms.is_empty() {
            return Err(CliError::Config(
                "`system.atoms` must list at least one atom".to_string(),
            ));
        }
        let charge = partial.qm_charge.unwrap_or(defaults.qm_charge);
        let multiplicity = partial.qm_multiplicity.unwrap_or(defaults.qm_multiplicity);

        let mut builder = SystemBuilder::new().qm_charge(charge, multiplicity);
        for (i, atom) in partial.atoms.iter().enumerate() {
            let element: Element = atom.element.parse().map_err(|e| {
                CliError::Config(format!("atom {}: {}", i, e))
            })?;
            let [x, y, z] = atom.position;
            builder = builder.atom(
                Point3::new(x, y, z),
                atom.charge,
                element,
                atom.region.unwrap_or_default(),
            );
        }
        if let Some(c) = partial.cell {
            builder = builder.cell_basis(Matrix3::new(
                c[0][0], c[0][1], c[0][2], c[1][0], c[1][1], c[1][2], c[2][0], c[2][1], c[2][2],
            ));
        }

        let mut system = builder.build().map_err(QmmmError::from)?;
        if let Some(indices) = partial.qm_atoms {
            system
                .select_qm(&indices, charge, multiplicity)
                .map_err(QmmmError::from)?;
        }
        Ok(system)
    }

    fn merge_model(partial: PartialModelConfig, defaults: &DefaultsConfig) -> Result<ModelConfig> {
        let cutoff = partial
            .cutoff
            .ok_or_else(|| CliError::Config("`model.cutoff` is required.".to_string()))?;
        let switching_type: SwitchingType = partial
            .switching_type
            .as_deref()
            .unwrap_or(defaults.switching_type)
            .parse()
            .map_err(QmmmError::from)?;

        let mut config = ModelConfig::new(cutoff)
            .switching_type(switching_type)
            .pbc(partial.pbc.unwrap_or(false));
        if let Some(swdist) = partial.swdist {
            config = config.swdist(swdist);
        }
        Ok(config)
    }

    fn apply_set_values(&mut self, set_values: &[String]) -> Result<()> {
        for kv_pair in set_values {
            let Some((key, value_str)) = kv_pair.split_once('=') else {
                return Err(CliError::Config(format!(
                    "Invalid --set format: '{}'. Expected KEY=VALUE.",
                    kv_pair
                )));
            };

            match key {
                "model.cutoff" => {
                    self.model.get_or_insert_with(Default::default).cutoff =
                        Some(parse_value(key, value_str)?);
                }
                "model.swdist" => {
                    self.model.get_or_insert_with(Default::default).swdist =
                        Some(parse_value(key, value_str)?);
                }
                "model.switching-type" => {
                    self.model.get_or_insert_with(Default::default).switching_type =
                        Some(value_str.to_string());
                }
                "model.pbc" => {
                    self.model.get_or_insert_with(Default::default).pbc =
                        Some(parse_value(key, value_str)?);
                }
                "simulation.protocol" => {
                    self.simulation
                        .get_or_insert_with(Default::default)
                        .protocol = Some(value_str.to_string());
                }
                "simulation.steps" => {
                    self.simulation.get_or_insert_with(Default::default).steps =
                        Some(parse_value(key, value_str)?);
                }
                "simulation.nrespa" => {
                    self.simulation.get_or_insert_with(Default::default).nrespa =
                        Some(parse_value(key, value_str)?);
                }
                "system.qm-charge" => {
                    self.system.get_or_insert_with(Default::default).qm_charge =
                        Some(parse_value(key, value_str)?);
                }
                "system.qm-multiplicity" => {
                    self.system
                        .get_or_insert_with(Default::default)
                        .qm_multiplicity = Some(parse_value(key, value_str)?);
                }
                _ => {
                    if let Some(group) = key.strip_prefix("simulation.groups.") {
                        let multiplier = parse_value(key, value_str)?;
                        self.simulation
                            .get_or_insert_with(Default::default)
                            .groups
                            .insert(group.to_string(), multiplier);
                        continue;
                    }
                    return Err(CliError::Config(format!(
                        "Unsupported configuration key for --set: '{}'",
                        key
                    )));
                }
            }
        }
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        CliError::Config(format!("Invalid value for {}: {}", key, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const CONFIG: &str = r#"
        [system]
        qm-charge = 1
        atoms = [
            { element = "Na", charge = 1.0, position = [0.0, 0.0, 0.0], region = "qm" },
            { element = "Cl", charge = -1.0, position = [2.5, 0.0, 0.0] },
            { element = "O", charge = -0.8, position = [0.0, 6.0, 0.0], region = "inactive" },
        ]

        [model]
        cutoff = 8.0

        [simulation]
        protocol = "mts"
        steps = 4
        groups = { slow = 2 }

        [[engine]]
        name = "qm"
        terms = [{ kind = "dummy-qm" }]

        [[engine]]
        name = "embedding"
        group = "slow"
        terms = [{ kind = "point-charge", scale = 0.5 }, { kind = "dummy-qm" }]
    "#;

    fn merge(content: &str, overrides: &CliOverrides<'_>) -> Result<RunPlan> {
        PartialRunConfig::from_toml(content)
            .map_err(|e| CliError::Config(e.to_string()))?
            .merge_with_cli(overrides)
    }

    #[test]
    fn file_values_and_defaults_are_merged() {
        let plan = merge(CONFIG, &CliOverrides::default()).unwrap();

        assert_eq!(plan.system.len(), 3);
        assert_eq!(plan.system.qm_indices(), vec![0]);
        assert_eq!(plan.system.region(2), Some(Region::Inactive));
        assert_eq!(plan.system.qm_charge(), 1);
        assert_eq!(plan.model.cutoff, 8.0);
        assert_eq!(plan.model.switching_type, SwitchingType::Switch);
        assert_eq!(plan.protocol, Protocol::Mts);
        assert_eq!(plan.steps, 4);
        assert_eq!(
            plan.options.group_multipliers(),
            &[("slow".to_string(), 2)]
        );
        assert_eq!(plan.engines[1].terms[0].scale, 0.5);
        assert_eq!(plan.engines[1].terms[1].scale, 1.0);
    }

    #[test]
    fn cli_values_override_the_file() {
        let set_values = vec![
            "model.cutoff=10.5".to_string(),
            "model.switching-type=lrec".to_string(),
            "simulation.groups.slow=4".to_string(),
        ];
        let overrides = CliOverrides {
            steps: Some(12),
            nrespa: None,
            set_values: &set_values,
        };
        let plan = merge(CONFIG, &overrides).unwrap();

        assert_eq!(plan.steps, 12);
        assert_eq!(plan.model.cutoff, 10.5);
        assert_eq!(plan.model.switching_type, SwitchingType::Lrec);
        assert_eq!(
            plan.options.group_multipliers(),
            &[("slow".to_string(), 4)]
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let content = CONFIG.replace("cutoff = 8.0", "cutoff = 8.0\nradius = 3.0");
        assert!(PartialRunConfig::from_toml(&content).is_err());

        let set_values = vec!["model.radius=3".to_string()];
        let overrides = CliOverrides {
            set_values: &set_values,
            ..Default::default()
        };
        assert!(matches!(merge(CONFIG, &overrides), Err(CliError::Config(_))));
    }

    #[test]
    fn missing_cutoff_is_reported() {
        let content = CONFIG.replace("cutoff = 8.0", "");
        match merge(&content, &CliOverrides::default()) {
            Err(CliError::Config(msg)) => assert!(msg.contains("cutoff")),
            other => panic!("expected a config error, got {other:?}"),
        }
    }

    #[test]
    fn malformed_set_value_is_rejected() {
        let set_values = vec!["model.cutoff".to_string()];
        let overrides = CliOverrides {
            set_values: &set_values,
            ..Default::default()
        };
        assert!(matches!(merge(CONFIG, &overrides), Err(CliError::Config(_))));

        let set_values = vec!["simulation.steps=many".to_string()];
        let overrides = CliOverrides {
            set_values: &set_values,
            ..Default::default()
        };
        assert!(matches!(merge(CONFIG, &overrides), Err(CliError::Config(_))));
    }

    #[test]
    fn qm_atom_list_overrides_regions() {
        let content = CONFIG.replace("qm-charge = 1", "qm-charge = -1\nqm-atoms = [1]");
        let plan = merge(&content, &CliOverrides::default()).unwrap();
        assert_eq!(plan.system.qm_indices(), vec![1]);
        assert_eq!(plan.system.region(0), Some(Region::Mm));
        assert_eq!(plan.system.qm_charge(), -1);
    }

    #[test]
    fn engine_definitions_build_weighted_composites() {
        let plan = merge(CONFIG, &CliOverrides::default()).unwrap();
        let engine = plan.engines[1].build(2).unwrap();
        let terms: Vec<_> = engine.terms().collect();
        assert_eq!(terms, vec![("point-charge", 0.5), ("dummy-qm", 1.0)]);
    }

    #[test]
    fn from_file_reports_the_path_on_parse_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[model\ncutoff = ").unwrap();

        match PartialRunConfig::from_file(&path) {
            Err(CliError::FileParsing { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected a parsing error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_element_is_a_config_error() {
        let content = CONFIG.replace("\"Cl\"", "\"Qq\"");
        assert!(matches!(
            merge(&content, &CliOverrides::default()),
            Err(CliError::Config(_))
        ));
    }
}
