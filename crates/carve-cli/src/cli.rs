//! Command Line Interface for CARVE
//!
//! CARVE uses the `clap` crate to parse command line arguments and create the
//! CLI interface. This module defines all available commands and options (and
//! their documentation) as well as some utility functions to apply these
//! options.

use std::{fs, path::PathBuf};

use anyhow::Context;

use clap::{Args, Parser, Subcommand, ValueEnum};

use log::{LevelFilter, error, info};
use log4rs::{
    Config,
    append::console::ConsoleAppender,
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
};

use carve_arg::NodeRef;
use carve_display_utils::join_iterator;
use carve_formula::cfa::Cfa;
use carve_refiner::{
    analysis::PredicateAnalysis,
    cegar::{CegarVerifier, VerificationResult},
    driver::{PathWiseRefiner, Refiner},
    global::GlobalRefiner,
    strategy::{ImpactStrategy, PredicateAbstractionStrategy, RefinementStrategy},
};
use carve_smt::{
    SMTSolution, SMTSolverBuilder, SMTSolverBuilderCfg, SMTSolverError,
    encode::PathSMTContext, interpolate::ProjectionInterpolator,
};

use crate::carve_config::CarveConfig;

/// CARVE verifier for sequential integer programs - Command Line Interface
///
/// This is the command line interface for the CARVE verifier. You can use the
/// --help / -h flag to get all available commands and options.
/// Programs are given as control flow automata in a JSON description; the
/// verifier checks whether any of the declared error locations is reachable.
///
/// If you have any questions or you encounter bugs, feel free to open an
/// issue on CARVE's GitHub repository:
///
///     https://github.com/carve-verifier/carve/issues/new/choose
///
///
#[derive(Parser, Debug)]
#[command(version, name = "CARVE CLI", about, long_about)]
pub(crate) struct Cli {
    #[command(flatten)]
    pub(crate) log_config: LoggerConfig,
    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read the program file and check whether its error locations are
    /// reachable
    Verify {
        #[command(flatten)]
        input: ProgramFileInput,

        /// Configuration file for the verifier
        #[arg(short, long, value_name = "CONFIG_FILE")]
        config_file: Option<PathBuf>,

        /// Select the refinement strategy to be used
        #[arg(short, long, value_name = "STRATEGY")]
        strategy: Option<RefinementStrategyOption>,

        /// Select how counterexamples are refined
        #[arg(short, long, value_name = "REFINER")]
        refiner: Option<RefinerOption>,

        /// Select the external SMT solver used to confirm counterexamples
        #[arg(long, value_name = "SMT_SOLVER")]
        smt_solver: Option<SMTSolverDefaultOptions>,

        /// Bound the number of CEGAR rounds before giving up
        #[arg(short, long, value_name = "MAX_ITERATIONS")]
        max_iterations: Option<u32>,
    },
    /// Read the program file and print the parsed control flow automaton
    Show {
        #[command(flatten)]
        input: ProgramFileInput,
    },
}

#[derive(Args, Debug)]
pub(crate) struct ProgramFileInput {
    /// Location and name of the program file (a control flow automaton in
    /// JSON format)
    input_file: PathBuf,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum RefinementStrategyOption {
    /// Extend the predicate precision with the atoms of the interpolants and
    /// recompute the abstraction of the refined subtree (default)
    Predicate,
    /// Like `predicate`, but split interpolant equalities into inequality
    /// pairs before extending the precision
    PredicateSplit,
    /// Strengthen the abstractions along the path with the interpolants
    /// directly, in the style of lazy abstraction
    Impact,
    /// Like `impact`, but conjoin the interpolant with the recomputed block
    /// abstraction
    ImpactRecompute,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum RefinerOption {
    /// Refine one counterexample path per CEGAR round (default)
    PathWise,
    /// Refine all spurious paths of the abstract reachability graph in a
    /// single depth first traversal
    Global,
}

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
/// SMT solvers that are supported by default
pub enum SMTSolverDefaultOptions {
    /// Z3 SMT solver
    Z3,
    /// CVC5 SMT solver
    CVC5,
}

#[derive(Debug, Args)]
pub(crate) struct LoggerConfig {
    /// Read the logger configuration from file.
    /// Logger configuration can be provided in the log4rs specification format.
    #[arg(long)]
    logger_config_file: Option<String>,

    /// Enable debug output.
    /// **Note**: This flag must be passed first, before any command.
    #[arg(short, long, default_value_t = false)]
    debug: bool,
}

/// Initialize the logger as specified in `cfg`
///
/// By default the logger is configured to log to stdout. If a log4rs
/// configuration file is given in `cfg`, the configuration from that file will
/// be used instead
pub(crate) fn initialize_logger(cfg: LoggerConfig) -> Result<(), anyhow::Error> {
    if let Some(f) = cfg.logger_config_file {
        // Read logger configuration file
        log4rs::init_file(f, Default::default())
            .with_context(|| "Failed to read logger config file")?;
        return Ok(());
    }

    let p_encoder = match cfg.debug {
        true => PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S)} - {h({l})} - [{f}:{L} - {M}] - {m}{n}"),
        false => PatternEncoder::new("{d(%H:%M:%S)} - {h({l})} - {m}{n}"),
    };

    // Log to stdout
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(p_encoder))
        .build();

    let mut level = LevelFilter::Info;
    if cfg.debug {
        level = LevelFilter::Debug;
    }

    let log_config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(level))
        .expect("Failed to initialize logger");

    log4rs::init_config(log_config).expect("Failed to initialize console logger");
    Ok(())
}

/// Get SMT solver configuration based on selected solver
pub(crate) fn get_smt_solver(smt_config: SMTSolverDefaultOptions) -> SMTSolverBuilderCfg {
    match smt_config {
        SMTSolverDefaultOptions::Z3 => SMTSolverBuilderCfg::new_z3(),
        SMTSolverDefaultOptions::CVC5 => SMTSolverBuilderCfg::new_cvc5(),
    }
}

/// Parse the input file into a control flow automaton
///
/// This tries to open the file given by `ProgramFileInput` and parses it as
/// a JSON description of a control flow automaton.
pub(crate) fn load_program(cfg: ProgramFileInput) -> Result<Cfa, anyhow::Error> {
    let f = fs::read_to_string(&cfg.input_file).with_context(|| {
        format!("Unable to read program file '{}'", cfg.input_file.display())
    })?;

    serde_json::from_str(&f).with_context(|| "Failed to parse the program description")
}

fn run_cegar<R: Refiner>(
    analysis: PredicateAnalysis,
    refiner: R,
    config: &CarveConfig,
) -> VerificationResult {
    let mut verifier = CegarVerifier::new(analysis, refiner);
    if let Some(bound) = config.get_iteration_bound() {
        verifier = verifier.with_iteration_bound(bound);
    }

    verifier.run()
}

fn run_path_wise<S: RefinementStrategy>(
    analysis: PredicateAnalysis,
    strategy: S,
    config: &CarveConfig,
) -> VerificationResult {
    let mut refiner = PathWiseRefiner::new(strategy, ProjectionInterpolator::new());
    if let Some(bound) = config.get_max_path_repeats() {
        refiner = refiner.with_max_repeats(bound);
    }

    run_cegar(analysis, refiner, config)
}

fn run_global<S: RefinementStrategy>(
    analysis: PredicateAnalysis,
    strategy: S,
    config: &CarveConfig,
) -> VerificationResult {
    let refiner = GlobalRefiner::new(strategy, ProjectionInterpolator::new());

    run_cegar(analysis, refiner, config)
}

fn run_verification(
    cfa: Cfa,
    strategy: Option<RefinementStrategyOption>,
    refiner: Option<RefinerOption>,
    config: &CarveConfig,
) -> VerificationResult {
    let strategy = strategy.unwrap_or(RefinementStrategyOption::Predicate);
    let refiner = refiner.unwrap_or(RefinerOption::PathWise);
    let analysis = PredicateAnalysis::new(cfa);

    match (refiner, strategy) {
        (RefinerOption::PathWise, RefinementStrategyOption::Predicate) => {
            run_path_wise(analysis, PredicateAbstractionStrategy::new(), config)
        }
        (RefinerOption::PathWise, RefinementStrategyOption::PredicateSplit) => run_path_wise(
            analysis,
            PredicateAbstractionStrategy::with_equality_splitting(),
            config,
        ),
        (RefinerOption::PathWise, RefinementStrategyOption::Impact) => {
            run_path_wise(analysis, ImpactStrategy::new(), config)
        }
        (RefinerOption::PathWise, RefinementStrategyOption::ImpactRecompute) => {
            run_path_wise(analysis, ImpactStrategy::with_block_recomputation(), config)
        }
        (RefinerOption::Global, RefinementStrategyOption::Predicate) => {
            run_global(analysis, PredicateAbstractionStrategy::new(), config)
        }
        (RefinerOption::Global, RefinementStrategyOption::PredicateSplit) => run_global(
            analysis,
            PredicateAbstractionStrategy::with_equality_splitting(),
            config,
        ),
        (RefinerOption::Global, RefinementStrategyOption::Impact) => {
            run_global(analysis, ImpactStrategy::new(), config)
        }
        (RefinerOption::Global, RefinementStrategyOption::ImpactRecompute) => {
            run_global(analysis, ImpactStrategy::with_block_recomputation(), config)
        }
    }
}

/// Assert the block formulas along `path` against an external solver
///
/// Prints a satisfying assignment for the error path when the solver confirms
/// it.
fn confirm_counterexample(
    path: &[NodeRef],
    builder: &SMTSolverBuilder,
) -> Result<SMTSolution, SMTSolverError> {
    let mut ctx = PathSMTContext::new(builder);
    for node in path {
        // The block formulas along a path share one SSA numbering, so they
        // can be asserted as one conjunction.
        ctx.assert_formula(node.borrow().state().abstraction().block_formula().formula())?;
    }

    let solution = ctx.check()?;
    if solution.is_sat() {
        let model = ctx.get_model()?;
        info!("Satisfying assignment along the error path:");
        for (var, value) in model {
            info!("    {var} = {value}");
        }
    }

    Ok(solution)
}

/// Confirm the error path with the configured external SMT solver
///
/// Without a configured solver this probes for an installed Z3 or cvc5. When
/// no solver is available the counterexample is reported based on the
/// internal satisfiability checks alone.
fn check_counterexample_with_solver(path: &[NodeRef], config: &CarveConfig) {
    let builder = match config.get_smt_solver_builder_cfg() {
        Some(cfg) => SMTSolverBuilder::new(&cfg),
        None => SMTSolverBuilder::new_automatic_selection(),
    };

    let builder = match builder {
        Ok(builder) => builder,
        Err(err) => {
            info!("No external SMT solver available to confirm the error path: {err}");
            return;
        }
    };

    match confirm_counterexample(path, &builder) {
        Ok(SMTSolution::SAT) => {
            info!("The error path was confirmed by the external SMT solver")
        }
        Ok(SMTSolution::UNSAT) => {
            error!("The external SMT solver rejected the error path")
        }
        Err(err) => error!("Error while confirming the error path: {err}"),
    }
}

pub(crate) fn display_result(
    cfa: Cfa,
    strategy: Option<RefinementStrategyOption>,
    refiner: Option<RefinerOption>,
    config: CarveConfig,
) {
    let result = run_verification(cfa, strategy, refiner, &config);

    match result {
        VerificationResult::Safe => {
            info!("All error locations are unreachable. The program is safe.")
        }
        VerificationResult::Unsafe(path) => {
            let locations = join_iterator(
                path.iter().map(|n| n.borrow().state().location().clone()),
                " -> ",
            );
            info!("Error path through the abstraction locations: {locations}");

            check_counterexample_with_solver(&path, &config);
            info!("The program is unsafe.")
        }
        VerificationResult::Unknown(reason) => {
            info!("The verifier could not determine whether the program is safe: {reason}")
        }
    }
}
