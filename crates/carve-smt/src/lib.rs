//! Interface to interact with SMT solvers
//!
//! External solvers are driven through the
//! [easy-smt](https://crates.io/crates/easy-smt) crate, which starts the
//! solver as a subprocess in interactive SMT-LIB2 mode. On top of that this
//! crate provides encoding of path formulas into solver terms
//! ([`encode`]) and interpolating prover sessions ([`interpolate`]) used by
//! the refinement loop. The interpolating sessions are backed by a built-in
//! linear arithmetic engine ([`linear`]) so refinement does not depend on an
//! interpolation-capable solver binary being installed.

use core::{error, fmt};
use std::{io::Write, process::Command};

use easy_smt::{Context, ContextBuilder};
use log::{debug, error, trace, warn};

#[cfg(feature = "config_deserialize")]
use serde::Deserialize;

use carve_formula::expressions::SsaVariable;

pub mod encode;
pub mod interpolate;
pub mod linear;

/// Z3 command
pub const Z3_PRG: &str = "z3";
/// Options putting Z3 into interactive SMT-LIB2 mode
pub const Z3_ARGS: [&str; 3] = ["-smt2", "-in", "-v:0"];

/// cvc5 command
pub const CVC5_PRG: &str = "cvc5";
/// Options putting cvc5 into quiet incremental SMT-LIB2 mode
pub const CVC5_ARGS: [&str; 3] = ["--quiet", "--lang=smt2", "--incremental"];

/// Interface to interact with an external SMT solver
///
/// Alias for [`easy_smt::Context`].
pub type SMTSolver = Context;

/// SMT term, an alias for [`easy_smt::SExpr`]
pub type SMTExpr = easy_smt::SExpr;

/// Configuration for an [`SMTSolverBuilder`]
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "config_deserialize", derive(Deserialize))]
pub struct SMTSolverBuilderCfg {
    /// Command to start the solver process
    command: String,
    /// Arguments passed to the solver command
    #[cfg_attr(feature = "config_deserialize", serde(default))]
    args: Vec<String>,
    /// Options to set after startup
    #[cfg_attr(feature = "config_deserialize", serde(default))]
    opts: Vec<SMTSolverOption>,
    /// Set the logic explicitly to `LIA`
    #[cfg_attr(feature = "config_deserialize", serde(default))]
    set_lia: bool,
}

impl SMTSolverBuilderCfg {
    /// Create a configuration for an arbitrary solver command
    ///
    /// The solver must accept SMT-LIB2 input on stdin in an interactive
    /// REPL mode.
    pub fn new(
        command: String,
        args: Vec<String>,
        opts: Vec<SMTSolverOption>,
        set_lia: bool,
    ) -> Self {
        Self {
            command,
            args,
            opts,
            set_lia,
        }
    }

    /// Default configuration for Z3
    pub fn new_z3() -> Self {
        Self {
            command: Z3_PRG.to_string(),
            args: Z3_ARGS.iter().map(|s| s.to_string()).collect(),
            opts: Vec::new(),
            set_lia: true,
        }
    }

    /// Default configuration for cvc5
    pub fn new_cvc5() -> Self {
        Self {
            command: CVC5_PRG.to_string(),
            args: CVC5_ARGS.iter().map(|s| s.to_string()).collect(),
            opts: Vec::new(),
            set_lia: true,
        }
    }
}

/// Error that can occur when creating a new [`SMTSolverBuilder`]
#[derive(Debug, PartialEq, Clone)]
pub enum SMTSolverBuilderError {
    /// The SMT solver seems to not be installed
    NotInstalled(String),
}

impl fmt::Display for SMTSolverBuilderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SMTSolverBuilderError::NotInstalled(s) => {
                write!(f, "SMT solver {s} is not installed")
            }
        }
    }
}

impl error::Error for SMTSolverBuilderError {}

/// Builder to create new [`SMTSolver`] instances
///
/// Every instance created by the builder runs in a separate solver process.
#[derive(Debug, Clone, PartialEq)]
pub struct SMTSolverBuilder {
    cfg: SMTSolverBuilderCfg,
}

impl SMTSolverBuilder {
    /// Create a new builder, probing that the solver command is available
    pub fn new(cfg: &SMTSolverBuilderCfg) -> Result<Self, SMTSolverBuilderError> {
        match probe_solver_version(&cfg.command) {
            Ok(Some((major, minor, patch))) => {
                trace!(
                    "SMT solver {} version {major}.{minor}.{patch} found",
                    cfg.command
                );
                if cfg.command == CVC5_PRG && (major, minor) < (1, 1) {
                    warn!(
                        "Detected cvc5 < v1.1.0 (found {major}.{minor}.{patch}). This version is not officially supported !"
                    );
                }
            }
            Ok(None) => {
                warn!("Failed to parse version of SMT solver {}", cfg.command);
            }
            Err(_) => {
                return Err(SMTSolverBuilderError::NotInstalled(cfg.command.clone()));
            }
        }

        Ok(Self { cfg: cfg.clone() })
    }

    /// Builder that automatically selects an installed solver
    ///
    /// Tries Z3 first and falls back to cvc5.
    pub fn new_automatic_selection() -> Result<Self, SMTSolverBuilderError> {
        SMTSolverBuilder::new(&SMTSolverBuilderCfg::new_z3())
            .or_else(|_| SMTSolverBuilder::new(&SMTSolverBuilderCfg::new_cvc5()))
            .map_err(|_| {
                SMTSolverBuilderError::NotInstalled("No supported SMT solver found".to_string())
            })
    }

    /// Create a new [`SMTSolver`] instance
    pub fn new_solver(&self) -> SMTSolver {
        self.build_solver(None::<std::fs::File>)
    }

    /// Create a new [`SMTSolver`] instance recording all interactions with
    /// the solver process into a replay file
    pub fn new_solver_with_replay<W>(&self, replay_file: W) -> SMTSolver
    where
        W: Write + 'static + Send,
    {
        self.build_solver(Some(replay_file))
    }

    fn build_solver<W>(&self, replay_file: Option<W>) -> SMTSolver
    where
        W: Write + 'static + Send,
    {
        trace!("Creating new solver instance of {}", self.cfg.command);
        let mut builder = ContextBuilder::new();
        if let Some(replay) = replay_file {
            builder.replay_file(Some(replay));
        }
        builder.solver(&self.cfg.command).solver_args(&self.cfg.args);

        let mut solver = builder.build().unwrap_or_else(|_| {
            panic!(
                "Failed to start interactive session with SMT solver. Command: {}",
                self.cfg.command
            )
        });

        for opt in self.cfg.opts.iter() {
            debug!("Applying SMT solver option {opt}");
            opt.apply_option(&mut solver);
        }

        if self.cfg.set_lia {
            debug!("Setting SMT solver logic to LIA");
            solver
                .set_logic("LIA")
                .expect("Failed to set logic `LIA` in the SMT solver.");
        }

        solver
    }
}

impl Default for SMTSolverBuilder {
    fn default() -> Self {
        SMTSolverBuilder::new_automatic_selection()
            .expect("Failed to create default SMT solver builder. No SMT solver found.")
    }
}

/// Trait for types that can supply a configured [`SMTSolverBuilder`]
pub trait ProvidesSMTSolverBuilder {
    /// Get the configured [`SMTSolverBuilder`]
    fn get_solver_builder(&self) -> SMTSolverBuilder;
}

impl ProvidesSMTSolverBuilder for SMTSolverBuilder {
    fn get_solver_builder(&self) -> SMTSolverBuilder {
        self.clone()
    }
}

/// Option supplied to an SMT solver after startup
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "config_deserialize", derive(Deserialize))]
pub enum SMTSolverOption {
    /// Option with boolean value
    BooleanOption {
        /// Name of the option
        name: String,
        /// Value to set the option to
        value: bool,
    },
    /// Option with unsigned integer value
    UnsignedIntOption {
        /// Name of the option
        name: String,
        /// Value to set the option to
        value: u32,
    },
}

impl SMTSolverOption {
    /// Apply the option to the given solver
    pub fn apply_option(&self, solver: &mut SMTSolver) {
        let res = match self {
            SMTSolverOption::BooleanOption { name, value } => {
                trace!("Setting SMT solver option {name} to {value}");
                let value = if *value {
                    solver.true_()
                } else {
                    solver.false_()
                };
                solver.set_option(name, value)
            }
            SMTSolverOption::UnsignedIntOption { name, value } => {
                trace!("Setting SMT solver option {name} to {value}");
                let value = solver.numeral(*value);
                solver.set_option(name, value)
            }
        };

        if let Err(e) = res {
            error!("Failed to set option {self} in SMT solver ! Error: {e}");
        }
    }
}

impl fmt::Display for SMTSolverOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SMTSolverOption::BooleanOption { name, value } => write!(f, "{name} : {value}"),
            SMTSolverOption::UnsignedIntOption { name, value } => write!(f, "{name} : {value}"),
        }
    }
}

/// Result of a satisfiability query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SMTSolution {
    /// Query was unsatisfiable
    UNSAT,
    /// Query was satisfiable
    SAT,
}

impl SMTSolution {
    /// Convert the solution to a boolean
    pub fn is_sat(&self) -> bool {
        matches!(self, SMTSolution::SAT)
    }
}

impl fmt::Display for SMTSolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SMTSolution::UNSAT => write!(f, "UNSAT"),
            SMTSolution::SAT => write!(f, "SAT"),
        }
    }
}

/// Error occurring in the interaction with a prover
#[derive(Debug)]
pub enum SMTSolverError {
    /// Error from the connection to an external SMT solver
    EasySMTErr(std::io::Error),
    /// Solver answered `unknown`
    SolverTimeout,
    /// Undeclared variable accessed during encoding
    UndeclaredVariable(SsaVariable),
    /// A formula contains a product of two non-constant terms
    NonLinearTerm(String),
    /// A coefficient left the `i64` range during constraint manipulation
    CoefficientOverflow,
    /// Failed to parse an integer out of the solution assignment
    SolutionExtractionParseIntError(String),
    /// Attempted to extract a model from an unsatisfiable query
    ExtractionFromUnsat,
}

impl error::Error for SMTSolverError {}

impl fmt::Display for SMTSolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SMTSolverError::EasySMTErr(err) => {
                write!(f, "Error from connection to SMT solver: {err}")
            }
            SMTSolverError::SolverTimeout => write!(f, "Timeout in SMT solver"),
            SMTSolverError::UndeclaredVariable(var) => {
                write!(f, "Undeclared variable: {var}")
            }
            SMTSolverError::NonLinearTerm(term) => {
                write!(f, "Term is not in linear integer arithmetic: {term}")
            }
            SMTSolverError::CoefficientOverflow => {
                write!(f, "Coefficient overflowed the i64 range during constraint manipulation")
            }
            SMTSolverError::SolutionExtractionParseIntError(s) => write!(
                f,
                "Failed to parse SMT solver supplied solution into integer: {s} not an integer"
            ),
            SMTSolverError::ExtractionFromUnsat => write!(
                f,
                "Attempted to extract the solution assignment from an unsatisfiable query"
            ),
        }
    }
}

impl From<std::io::Error> for SMTSolverError {
    fn from(error: std::io::Error) -> Self {
        SMTSolverError::EasySMTErr(error)
    }
}

/// Calls `<cmd> --version` and tries to parse the reported version
///
/// Returns `Err` if the command could not be executed at all and `Ok(None)`
/// if the output did not contain a version in the form "... version x.y.z".
fn probe_solver_version(cmd: &str) -> Result<Option<(u32, u32, u32)>, ()> {
    let out = Command::new(cmd)
        .arg("--version")
        .output()
        .map_err(|_| ())?;
    if !out.status.success() {
        return Err(());
    }

    let out_str = String::from_utf8_lossy(&out.stdout);
    let parsed = parse_solver_version(&out_str);
    if parsed.is_none() {
        debug!("Failed to parse SMT solver version from output: {out_str}");
    }
    Ok(parsed)
}

fn parse_solver_version(version_output: &str) -> Option<(u32, u32, u32)> {
    let start = version_output.find("version ")? + "version ".len();
    let version_str = version_output[start..]
        .split([' ', '\n', '\t'])
        .next()?;

    let mut parts = version_str.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }

    Some((major, minor, patch))
}

#[cfg(test)]
mod tests {
    use easy_smt::Response;

    use super::*;

    fn test_solver_interaction(solver: &mut SMTSolver) {
        let int_sort = solver.int_sort();
        let x = solver.declare_const("x", int_sort).unwrap();

        let constr = solver.and(
            solver.lte(x, solver.numeral(2)),
            solver.gt(x, solver.numeral(1)),
        );
        solver.assert(constr).unwrap();

        assert_eq!(solver.check().unwrap(), Response::Sat);

        let solution = solver.get_value(vec![x]).unwrap();
        assert_eq!(solution.len(), 1);
        assert_eq!(solver.get_u64(solution[0].1).unwrap(), 2);
    }

    // Requires a Z3 binary on the PATH
    #[test]
    #[ignore]
    fn test_z3_solver() {
        let builder = SMTSolverBuilder::new(&SMTSolverBuilderCfg::new_z3()).unwrap();
        let mut solver = builder.new_solver();
        test_solver_interaction(&mut solver);
    }

    // Requires a cvc5 binary on the PATH
    #[test]
    #[ignore]
    fn test_cvc5_solver() {
        let builder = SMTSolverBuilder::new(&SMTSolverBuilderCfg::new_cvc5()).unwrap();
        let mut solver = builder.new_solver();
        test_solver_interaction(&mut solver);
    }

    #[test]
    fn test_builder_rejects_unknown_command() {
        let cfg = SMTSolverBuilderCfg::new("surely_not_a_solver".to_string(), vec![], vec![], false);
        let builder = SMTSolverBuilder::new(&cfg);
        assert_eq!(
            builder.unwrap_err(),
            SMTSolverBuilderError::NotInstalled("surely_not_a_solver".to_string())
        );
    }

    #[test]
    fn test_parse_z3_version() {
        let out = "Z3 version 4.8.12 - 64 bit";
        assert_eq!(parse_solver_version(out), Some((4, 8, 12)));
    }

    #[test]
    fn test_parse_cvc5_version() {
        let out = "\
This is cvc5 version 1.2.0
compiled with GCC version 14.2.1 20240912 (Red Hat 14.2.1-3)
on Sep 26 2024 00:00:00
";
        assert_eq!(parse_solver_version(out), Some((1, 2, 0)));
    }

    #[test]
    fn test_parse_version_garbage() {
        assert_eq!(parse_solver_version("no version here"), None);
        assert_eq!(parse_solver_version("version one.two.three"), None);
    }

    #[test]
    fn test_display_solution() {
        assert_eq!(SMTSolution::UNSAT.to_string(), "UNSAT");
        assert_eq!(SMTSolution::SAT.to_string(), "SAT");
        assert!(SMTSolution::SAT.is_sat());
        assert!(!SMTSolution::UNSAT.is_sat());
    }

    #[test]
    fn test_solver_option_display() {
        let opt = SMTSolverOption::BooleanOption {
            name: ":produce-models".to_string(),
            value: true,
        };
        assert_eq!(opt.to_string(), ":produce-models : true");
        let opt = SMTSolverOption::UnsignedIntOption {
            name: ":seed".to_string(),
            value: 42,
        };
        assert_eq!(opt.to_string(), ":seed : 42");
    }

    #[test]
    fn test_fmt_solver_errors() {
        let err = SMTSolverError::NonLinearTerm("(x * y)".to_string());
        assert!(err.to_string().contains("not in linear integer arithmetic"));

        let err = SMTSolverError::SolverTimeout;
        assert_eq!(err.to_string(), "Timeout in SMT solver");

        let err = SMTSolverError::ExtractionFromUnsat;
        assert!(err.to_string().contains("unsatisfiable"));

        let err = SMTSolverError::from(std::io::Error::other("broken pipe"));
        assert!(matches!(err, SMTSolverError::EasySMTErr(_)));
    }

    #[test]
    fn test_fmt_builder_error() {
        let err = SMTSolverBuilderError::NotInstalled("cvc5".to_string());
        assert_eq!(err.to_string(), "SMT solver cvc5 is not installed");
    }
}
