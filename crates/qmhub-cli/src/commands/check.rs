use super::run::prepare;
use crate::cli::CheckArgs;
use crate::config::{CliOverrides, PartialRunConfig};
use crate::error::Result;
use tracing::info;

pub fn run(args: CheckArgs) -> Result<()> {
    let plan = PartialRunConfig::from_file(&args.config)?.merge_with_cli(&CliOverrides {
        set_values: &args.set_values,
        ..Default::default()
    })?;
    let (qmmm, steps) = prepare(plan)?;

    let system = qmmm.system();
    let simulation = qmmm.simulation();
    info!("Configuration '{}' is valid.", args.config.display());

    println!(
        "System: {} atom(s), {} QM, {} MM, periodic: {}",
        system.len(),
        system.qm_indices().len(),
        system.mm_indices().len(),
        system.is_periodic()
    );
    if let Some(model) = qmmm.model_config() {
        println!(
            "Model: {} switching, cutoff {:.3} Å, pbc: {}",
            model.switching_type, model.cutoff, model.pbc
        );
    }
    println!(
        "Simulation: protocol {}, {} step(s), outer cycle {}",
        simulation.protocol(),
        steps,
        simulation.outer_cycle()
    );
    for group in simulation.groups() {
        println!("  group '{}' every {} step(s)", group.name, group.multiplier);
    }
    for name in simulation.engine_names() {
        println!("  engine '{}'", name);
    }
    Ok(())
}
