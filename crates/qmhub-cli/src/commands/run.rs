use crate::cli::RunArgs;
use crate::config::{CliOverrides, PartialRunConfig, RunPlan};
use crate::error::Result;
use crate::utils::progress::CliProgressHandler;
use qmhub::engine::progress::ProgressReporter;
use qmhub::workflows::qmmm::Qmmm;
use tracing::info;

/// Builds the facade, registers every engine and sets up the schedule.
pub fn prepare(plan: RunPlan) -> Result<(Qmmm, u64)> {
    let RunPlan {
        system,
        model,
        protocol,
        options,
        steps,
        engines,
    } = plan;

    let mut qmmm = Qmmm::from_system(system);
    qmmm.build_model(model)?;

    let n_atoms = qmmm.n_engine_atoms();
    for definition in &engines {
        let engine = definition.build(n_atoms)?;
        info!(
            "Registering engine '{}' with {} term(s).",
            definition.name,
            engine.n_terms()
        );
        qmmm.add_engine(definition.name.clone(), engine, definition.group.as_deref())?;
    }

    qmmm.setup_simulation(protocol, &options)?;
    Ok((qmmm, steps))
}

pub fn run(args: RunArgs) -> Result<()> {
    let partial_config = PartialRunConfig::from_file(&args.config)?;
    info!("Merging configuration from file and CLI arguments...");
    let plan = partial_config.merge_with_cli(&CliOverrides {
        steps: args.steps,
        nrespa: args.nrespa,
        set_values: &args.set_values,
    })?;

    let (mut qmmm, steps) = prepare(plan)?;

    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    println!("Running {} QM/MM step(s)...", steps);
    let result = qmmm.run(steps, &reporter)?;
    info!(
        "Run finished after {} step(s) with energy {:.6} kcal/mol.",
        result.step, result.energy
    );

    qmmm.return_results(true);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CliError;
    use qmhub::engine::error::QmmmError;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    const CONFIG: &str = r#"
        [system]
        qm-charge = 1
        atoms = [
            { element = "Na", charge = 1.0, position = [0.0, 0.0, 0.0], region = "qm" },
            { element = "Cl", charge = -1.0, position = [2.5, 0.0, 0.0] },
            { element = "O", charge = -0.8, position = [0.0, 7.0, 0.0] },
        ]

        [model]
        cutoff = 8.0
        swdist = 6.0

        [simulation]
        protocol = "mts"
        steps = 4
        nrespa = 2

        [[engine]]
        name = "qm"
        terms = [{ kind = "dummy-qm" }]

        [[engine]]
        name = "embedding"
        group = "slow"
        terms = [{ kind = "point-charge" }]
    "#;

    fn write_config(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("qmmm.toml");
        fs::write(&path, content).unwrap();
        path
    }

    fn plan(content: &str) -> RunPlan {
        PartialRunConfig::from_toml(content)
            .unwrap()
            .merge_with_cli(&CliOverrides::default())
            .unwrap()
    }

    #[test]
    fn prepare_registers_engines_in_their_groups() {
        let (qmmm, steps) = prepare(plan(CONFIG)).unwrap();
        let simulation = qmmm.simulation();

        assert_eq!(steps, 4);
        assert_eq!(simulation.engine_names().collect::<Vec<_>>(), vec!["qm", "embedding"]);
        assert_eq!(simulation.outer_cycle(), 2);
        assert_eq!(qmmm.n_engine_atoms(), 3);
    }

    #[test]
    fn prepare_surfaces_core_configuration_errors() {
        let content = CONFIG.replace("swdist = 6.0", "swdist = 9.0");
        let result = prepare(plan(&content));
        assert!(matches!(
            result,
            Err(CliError::Core(QmmmError::Configuration(_)))
        ));

        let content = CONFIG.replace("group = \"slow\"", "group = \"fast\"");
        let result = prepare(plan(&content));
        assert!(matches!(
            result,
            Err(CliError::Core(QmmmError::Configuration(_)))
        ));
    }

    #[test]
    fn run_command_completes_from_a_config_file() {
        let dir = tempdir().unwrap();
        let config = write_config(dir.path(), CONFIG);

        let args = RunArgs {
            config,
            steps: Some(3),
            nrespa: None,
            set_values: vec!["model.switching-type=shift".to_string()],
        };
        assert!(run(args).is_ok());
    }

    #[test]
    fn run_command_reports_a_missing_file() {
        let dir = tempdir().unwrap();
        let args = RunArgs {
            config: dir.path().join("absent.toml"),
            steps: None,
            nrespa: None,
            set_values: Vec::new(),
        };
        assert!(matches!(run(args), Err(CliError::Io(_))));
    }
}
