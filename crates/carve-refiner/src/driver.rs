//! Path-wise refinement driver

use std::{error, fmt};

use log::{debug, info};

use carve_arg::NodeRef;
use carve_arg::reached::ReachedSet;
use carve_formula::cfa::CfaLocation;
use carve_smt::SMTSolverError;
use carve_smt::interpolate::InterpolatorFactory;

use crate::block_formulas::BlockFormulaExtractor;
use crate::strategy::RefinementStrategy;
use crate::trace_checker::{CounterexampleTraceChecker, TraceCheckResult};

/// Result of one refinement round
#[derive(Debug)]
pub enum RefinementOutcome {
    /// The spurious path was eliminated, the analysis should resume
    Refined,
    /// A feasible error path was found, the abstraction cannot be refined;
    /// carries the abstraction boundary nodes root to target
    RealCounterexample(Vec<NodeRef>),
}

/// Failure of a refinement round
#[derive(Debug)]
pub enum RefinementError {
    /// The underlying solver failed; the verification run is inconclusive
    Solver(SMTSolverError),
    /// The same counterexample survived the configured number of
    /// refinements, the strategy does not converge on this path
    RepeatedCounterexample(u32),
}

impl fmt::Display for RefinementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefinementError::Solver(e) => write!(f, "solver failure during refinement: {e}"),
            RefinementError::RepeatedCounterexample(n) => {
                write!(f, "counterexample repeated {n} times after refinement")
            }
        }
    }
}

impl error::Error for RefinementError {}

impl From<SMTSolverError> for RefinementError {
    fn from(value: SMTSolverError) -> Self {
        RefinementError::Solver(value)
    }
}

/// Common interface of the path-wise and global refinement drivers
pub trait Refiner {
    /// Refine the abstraction until the current target paths are eliminated
    /// or one of them turns out to be feasible
    fn perform_refinement(
        &mut self,
        reached: &mut ReachedSet,
    ) -> Result<RefinementOutcome, RefinementError>;
}

/// Refines one target path per round
///
/// Extracts the block formulas of the first open target path, checks them
/// and applies the strategy to the interpolants. Identical counterexamples
/// showing up again after a refinement claimed success are detected by
/// comparing location sequences; after `max_repeats` repetitions the driver
/// fails instead of looping forever.
pub struct PathWiseRefiner<S: RefinementStrategy, F: InterpolatorFactory> {
    strategy: S,
    checker: CounterexampleTraceChecker<F>,
    extractor: BlockFormulaExtractor,
    previous_path: Option<Vec<CfaLocation>>,
    repeats: u32,
    max_repeats: u32,
}

impl<S: RefinementStrategy, F: InterpolatorFactory> PathWiseRefiner<S, F> {
    /// Create a driver with the default repetition bound
    pub fn new(strategy: S, factory: F) -> Self {
        PathWiseRefiner {
            strategy,
            checker: CounterexampleTraceChecker::new(factory),
            extractor: BlockFormulaExtractor::new(),
            previous_path: None,
            repeats: 0,
            max_repeats: 2,
        }
    }

    /// Set how often an identical counterexample may repeat before the
    /// driver gives up
    pub fn with_max_repeats(mut self, max_repeats: u32) -> Self {
        self.max_repeats = max_repeats;
        self
    }
}

impl<S: RefinementStrategy, F: InterpolatorFactory> Refiner for PathWiseRefiner<S, F> {
    fn perform_refinement(
        &mut self,
        reached: &mut ReachedSet,
    ) -> Result<RefinementOutcome, RefinementError> {
        let targets = reached.targets();
        let Some(target) = targets.first() else {
            debug!("No open target state, nothing to refine");
            return Ok(RefinementOutcome::Refined);
        };

        let root = reached.root().clone();
        let blocks = self.extractor.extract(&root, target);

        let interpolants = match self.checker.check(&blocks)? {
            TraceCheckResult::Feasible => {
                info!("Counterexample trace is feasible, real error found");
                let mut path = vec![root];
                path.extend(blocks.boundaries().iter().cloned());
                return Ok(RefinementOutcome::RealCounterexample(path));
            }
            TraceCheckResult::Spurious(interpolants) => interpolants,
        };

        let locations = blocks
            .boundaries()
            .iter()
            .map(|n| n.borrow().state().location().clone())
            .collect::<Vec<_>>();
        let repeated = self.previous_path.as_ref() == Some(&locations);
        if repeated {
            self.repeats += 1;
            if self.repeats > self.max_repeats {
                return Err(RefinementError::RepeatedCounterexample(self.repeats));
            }
        } else {
            self.repeats = 0;
        }
        self.previous_path = Some(locations);

        self.strategy.start_refinement_of_path(reached);
        let mut changed = Vec::new();
        let mut infeasible = blocks
            .boundaries()
            .last()
            .expect("A spurious path has at least one block")
            .clone();

        for (i, interpolant) in interpolants.iter().enumerate() {
            if interpolant.is_true() {
                continue;
            }
            if interpolant.is_false() {
                // everything from here on is unreachable
                infeasible = blocks.boundaries()[i].clone();
                break;
            }
            if self
                .strategy
                .perform_refinement_for_state(interpolant, &blocks.boundaries()[i])?
            {
                changed.push(blocks.boundaries()[i].clone());
            }
        }

        debug!(
            "Refined spurious path of {} blocks, {} states changed",
            blocks.len(),
            changed.len()
        );
        self.strategy
            .finish_refinement_of_path(&infeasible, &changed, reached, repeated)?;

        Ok(RefinementOutcome::Refined)
    }
}
