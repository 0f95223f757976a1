//! CARVE Command Line Interface
//!
//! This crate contains the CARVE CLI that can be used to verify sequential
//! integer programs given as control flow automata. The verifier runs a
//! CEGAR loop with cartesian predicate abstraction and interpolation based
//! refinement; strategy and refiner can be selected on the command line.

use ::config::Config;

use clap::Parser;
use cli::{Cli, get_smt_solver, initialize_logger, load_program};
use human_panic::setup_panic;
use log::{debug, info};

mod carve_config;
mod cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup_panic!();

    // parse the cli arguments
    let cli = Cli::parse();
    initialize_logger(cli.log_config)?;
    info!("Welcome to the CARVE verifier!");
    match cli.command {
        cli::Commands::Verify {
            input,
            config_file,
            strategy,
            refiner,
            smt_solver,
            max_iterations,
        } => {
            let cfa = load_program(input)?;

            info!("Parsed program '{}' from the input file", cfa.name());
            debug!("Parsed program: {cfa}");

            let n_edges = cfa.edges().count();
            info!("Program has {n_edges} edges");

            // Check whether a configuration file was supplied
            let mut settings = Config::builder();
            if let Some(config_file) = config_file {
                if !config_file.exists() {
                    return Err(anyhow::anyhow!(
                        "Specified configuration file '{}' does not exist.",
                        config_file.display()
                    )
                    .into());
                }

                settings = settings.add_source(config::File::from(config_file));
            }

            // Parse configuration from environment variables
            settings = settings.add_source(config::Environment::with_prefix("CARVE"));
            let mut config = settings
                .build()?
                .try_deserialize::<carve_config::CarveConfig>()?;

            // Check whether the smt solver was overridden via CLI
            if let Some(solver) = smt_solver {
                let solver_cfg = get_smt_solver(solver);
                config.set_smt_solver_builder_cfg(solver_cfg);
            }

            // Check whether the iteration bound was overridden via CLI
            if let Some(bound) = max_iterations {
                config.set_iteration_bound(bound);
            }

            cli::display_result(cfa, strategy, refiner, config);

            info!("Finished verification. Goodbye!");
            Ok(())
        }
        cli::Commands::Show { input } => {
            let cfa = load_program(input)?;
            println!("{cfa}");
            Ok(())
        }
    }
}
