//! The CEGAR loop
//!
//! Alternates between forward exploration and refinement: explore until a
//! target state is reached, refine away the spurious part of the ARG, and
//! resume, until either no target remains reachable (the program is safe)
//! or a counterexample survives the trace check (the program is unsafe).

use std::fmt;

use log::{debug, info};

use carve_arg::NodeRef;
use carve_arg::precision::PredicatePrecision;
use carve_arg::reached::ReachedSet;

use crate::analysis::PredicateAnalysis;
use crate::driver::{RefinementOutcome, Refiner};

/// Verdict of a verification run
#[derive(Debug)]
pub enum VerificationResult {
    /// No target location is reachable
    Safe,
    /// A feasible error path exists; carries its abstraction boundary nodes
    Unsafe(Vec<NodeRef>),
    /// The run was aborted before a verdict was reached
    Unknown(String),
}

impl VerificationResult {
    /// Whether the verdict proves the program safe
    pub fn is_safe(&self) -> bool {
        matches!(self, VerificationResult::Safe)
    }
}

impl fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationResult::Safe => write!(f, "SAFE"),
            VerificationResult::Unsafe(path) => {
                write!(f, "UNSAFE (error path of {} abstraction states)", path.len())
            }
            VerificationResult::Unknown(reason) => write!(f, "UNKNOWN: {reason}"),
        }
    }
}

/// Verifier combining a [`PredicateAnalysis`] with a [`Refiner`]
pub struct CegarVerifier<R: Refiner> {
    analysis: PredicateAnalysis,
    refiner: R,
    max_iterations: u32,
}

impl<R: Refiner> CegarVerifier<R> {
    /// Create a verifier with the default iteration bound
    pub fn new(analysis: PredicateAnalysis, refiner: R) -> Self {
        CegarVerifier {
            analysis,
            refiner,
            max_iterations: 100,
        }
    }

    /// Bound the number of explore/refine rounds
    pub fn with_iteration_bound(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Run the loop from a fresh reached set with an empty precision
    pub fn run(&mut self) -> VerificationResult {
        let mut reached = self
            .analysis
            .initial_reached_set(PredicatePrecision::empty());
        self.run_on(&mut reached)
    }

    /// Run the loop on an existing reached set
    ///
    /// The reached set is left in its final state, so callers can inspect
    /// the ARG after the verdict.
    pub fn run_on(&mut self, reached: &mut ReachedSet) -> VerificationResult {
        for iteration in 0..self.max_iterations {
            if let Err(e) = self.analysis.explore(reached) {
                return VerificationResult::Unknown(format!(
                    "solver failure during exploration: {e}"
                ));
            }

            let targets = reached.targets();
            if targets.is_empty() {
                info!(
                    "No reachable target state after {} refinements, {} states explored",
                    iteration,
                    reached.len()
                );
                return VerificationResult::Safe;
            }

            debug!(
                "Iteration {}: {} open target states, refining",
                iteration,
                targets.len()
            );
            match self.refiner.perform_refinement(reached) {
                Ok(RefinementOutcome::Refined) => {}
                Ok(RefinementOutcome::RealCounterexample(path)) => {
                    info!("Found feasible error path of {} blocks", path.len());
                    return VerificationResult::Unsafe(path);
                }
                Err(e) => return VerificationResult::Unknown(e.to_string()),
            }
        }

        VerificationResult::Unknown(format!(
            "iteration bound of {} rounds exhausted",
            self.max_iterations
        ))
    }
}

#[cfg(test)]
mod tests {
    use carve_formula::cfa::{CfaBuilder, CfaEdgeOp, CfaLocation};
    use carve_formula::expressions::{
        BooleanExpression, ComparisonOp, IntegerExpression, Variable,
    };
    use carve_smt::interpolate::ProjectionInterpolator;

    use crate::driver::PathWiseRefiner;
    use crate::global::GlobalRefiner;
    use crate::strategy::{ImpactStrategy, PredicateAbstractionStrategy};

    use super::*;

    fn loc(id: u32) -> CfaLocation {
        CfaLocation::new(id, "main")
    }

    fn x() -> Variable {
        Variable::new("x")
    }

    fn x_cmp(op: ComparisonOp, value: i64) -> BooleanExpression<Variable> {
        BooleanExpression::ComparisonExpression(
            Box::new(IntegerExpression::Atom(x())),
            op,
            Box::new(IntegerExpression::Const(value)),
        )
    }

    /// `x := 0` into an abstraction point, then `x != 0` guards the error
    ///
    /// Safe, but the trivial abstraction at the boundary loses `x == 0`, so
    /// one refinement is required.
    fn safe_program() -> PredicateAnalysis {
        let cfa = CfaBuilder::new("safe", loc(0))
            .with_edge(loc(0), loc(1), CfaEdgeOp::Assign(x(), IntegerExpression::Const(0)))
            .with_edge(loc(1), loc(2), CfaEdgeOp::Assume(x_cmp(ComparisonOp::Neq, 0)))
            .with_abstraction_location(loc(1))
            .with_target(loc(2))
            .build()
            .unwrap();
        PredicateAnalysis::new(cfa)
    }

    /// `x := 1` into an abstraction point, then `x > 0` reaches the error
    fn unsafe_program() -> PredicateAnalysis {
        let cfa = CfaBuilder::new("unsafe", loc(0))
            .with_edge(loc(0), loc(1), CfaEdgeOp::Assign(x(), IntegerExpression::Const(1)))
            .with_edge(loc(1), loc(2), CfaEdgeOp::Assume(x_cmp(ComparisonOp::Gt, 0)))
            .with_abstraction_location(loc(1))
            .with_target(loc(2))
            .build()
            .unwrap();
        PredicateAnalysis::new(cfa)
    }

    #[test]
    fn test_safe_program_with_predicate_refinement() {
        let refiner = PathWiseRefiner::new(
            PredicateAbstractionStrategy::new(),
            ProjectionInterpolator::new(),
        );
        let mut verifier = CegarVerifier::new(safe_program(), refiner);
        let result = verifier.run();
        assert!(result.is_safe(), "expected SAFE, got {result}");
    }

    #[test]
    fn test_safe_program_with_impact_refinement() {
        let refiner = PathWiseRefiner::new(ImpactStrategy::new(), ProjectionInterpolator::new());
        let mut verifier = CegarVerifier::new(safe_program(), refiner);
        let result = verifier.run();
        assert!(result.is_safe(), "expected SAFE, got {result}");
    }

    #[test]
    fn test_unsafe_program_reports_error_path() {
        let refiner = PathWiseRefiner::new(
            PredicateAbstractionStrategy::new(),
            ProjectionInterpolator::new(),
        );
        let mut verifier = CegarVerifier::new(unsafe_program(), refiner);

        let path = match verifier.run() {
            VerificationResult::Unsafe(path) => path,
            other => panic!("expected UNSAFE, got {other}"),
        };
        assert_eq!(path.last().unwrap().borrow().state().location(), &loc(2));
    }

    #[test]
    fn test_safe_program_with_global_refiner() {
        let refiner = GlobalRefiner::new(
            PredicateAbstractionStrategy::new(),
            ProjectionInterpolator::new(),
        );
        let mut verifier = CegarVerifier::new(safe_program(), refiner);
        let result = verifier.run();
        assert!(result.is_safe(), "expected SAFE, got {result}");
    }

    #[test]
    fn test_iteration_bound_yields_unknown() {
        let refiner = PathWiseRefiner::new(
            PredicateAbstractionStrategy::new(),
            ProjectionInterpolator::new(),
        );
        let mut verifier = CegarVerifier::new(unsafe_program(), refiner).with_iteration_bound(0);
        assert!(matches!(verifier.run(), VerificationResult::Unknown(_)));
    }
}
