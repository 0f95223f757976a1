//! Module for implementing advanced configuration options for the verifier.
//!
//! This module ties together all configuration options of the `CARVE`
//! verifier that can be set through configuration files or environment
//! variables, such as the external SMT solver or the CEGAR iteration bound.

use serde::Deserialize;

use carve_smt::SMTSolverBuilderCfg;

/// Type representing configuration options for the `CARVE` verifier
///
/// This struct contains options for the external SMT solver and the CEGAR
/// loop that can be set using config files or environment variables. This
/// type implements `serde::Deserialize` to easily parse the configuration
/// out of structured configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CarveConfig {
    /// Options for the external SMT solver used to confirm counterexamples
    smt: Option<SMTSolverBuilderCfg>,
    /// Bound on the number of CEGAR rounds
    max_iterations: Option<u32>,
    /// Bound on how often the path-wise refiner accepts the same
    /// counterexample path before giving up
    max_path_repeats: Option<u32>,
}

impl CarveConfig {
    /// Set the configuration for the SMT solver builder to the given value
    pub fn set_smt_solver_builder_cfg(&mut self, cfg: SMTSolverBuilderCfg) {
        self.smt = Some(cfg);
    }

    /// Get the SMT solver builder configuration
    pub fn get_smt_solver_builder_cfg(&self) -> Option<SMTSolverBuilderCfg> {
        self.smt.clone()
    }

    /// Set the bound on the number of CEGAR rounds
    pub fn set_iteration_bound(&mut self, bound: u32) {
        self.max_iterations = Some(bound);
    }

    /// Get the bound on the number of CEGAR rounds
    pub fn get_iteration_bound(&self) -> Option<u32> {
        self.max_iterations
    }

    /// Set the repeated counterexample bound of the path-wise refiner
    pub fn set_max_path_repeats(&mut self, bound: u32) {
        self.max_path_repeats = Some(bound);
    }

    /// Get the repeated counterexample bound of the path-wise refiner
    pub fn get_max_path_repeats(&self) -> Option<u32> {
        self.max_path_repeats
    }
}
