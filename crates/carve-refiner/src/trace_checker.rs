//! Feasibility checking of counterexample traces

use log::debug;

use carve_formula::expressions::{BooleanExpression, SsaVariable};
use carve_smt::SMTSolverError;
use carve_smt::interpolate::{InterpolatingProverSession, InterpolatorFactory};

use crate::block_formulas::BlockFormulas;

/// Verdict of a trace check
#[derive(Debug, Clone, PartialEq)]
pub enum TraceCheckResult {
    /// The blocks are jointly satisfiable, the path is a real error
    Feasible,
    /// The blocks contradict each other; carries one interpolant per cut
    /// between adjacent blocks, `n - 1` interpolants for `n` blocks
    Spurious(Vec<BooleanExpression<SsaVariable>>),
}

impl TraceCheckResult {
    /// Whether the checked path is a real error
    pub fn is_feasible(&self) -> bool {
        matches!(self, TraceCheckResult::Feasible)
    }
}

/// Checks a block formula sequence for joint satisfiability
///
/// Each check opens a fresh prover session, pushes the blocks in path order
/// and fully consumes the session (interpolant extraction included) before
/// returning, so the underlying solver can be reused afterwards.
pub struct CounterexampleTraceChecker<F: InterpolatorFactory> {
    factory: F,
}

impl<F: InterpolatorFactory> CounterexampleTraceChecker<F> {
    /// Create a checker opening sessions through `factory`
    pub fn new(factory: F) -> Self {
        CounterexampleTraceChecker { factory }
    }

    /// Check the trace described by `blocks`
    pub fn check(&self, blocks: &BlockFormulas) -> Result<TraceCheckResult, SMTSolverError> {
        let mut session = self.factory.new_session();

        let verdict = Self::check_with_session(&mut session, blocks);

        // unwind the stack before the session is dropped, even on error
        while session.depth() > 0 {
            session.pop();
        }

        verdict
    }

    fn check_with_session(
        session: &mut F::Session,
        blocks: &BlockFormulas,
    ) -> Result<TraceCheckResult, SMTSolverError> {
        for formula in blocks.formulas() {
            session.push(formula.clone());
        }

        if !session.is_unsat()? {
            debug!("Trace of {} blocks is feasible", blocks.len());
            return Ok(TraceCheckResult::Feasible);
        }

        let interpolants = session.interpolant_sequence()?;
        debug_assert_eq!(interpolants.len() + 1, blocks.len());
        debug!(
            "Trace of {} blocks is spurious, extracted {} interpolants",
            blocks.len(),
            interpolants.len()
        );

        Ok(TraceCheckResult::Spurious(interpolants))
    }
}

#[cfg(test)]
mod tests {
    use carve_arg::NodeRef;
    use carve_arg::node::ArgNode;
    use carve_arg::reached::ReachedSet;
    use carve_arg::state::PredicateAbstractState;
    use carve_formula::cfa::{CfaEdge, CfaEdgeOp, CfaLocation};
    use carve_formula::expressions::{ComparisonOp, IntegerExpression, Variable};
    use carve_smt::interpolate::ProjectionInterpolator;

    use crate::block_formulas::BlockFormulaExtractor;

    use super::*;

    fn assume_edge(from: u32, to: u32, op: ComparisonOp, value: i64) -> CfaEdge {
        CfaEdge::new(
            CfaLocation::new(from, "main"),
            CfaLocation::new(to, "main"),
            CfaEdgeOp::Assume(BooleanExpression::ComparisonExpression(
                Box::new(IntegerExpression::Atom(Variable::new("x"))),
                op,
                Box::new(IntegerExpression::Const(value)),
            )),
        )
    }

    /// Two-block path: block 1 assumes `x == 0`, block 2 assumes `x != 0`
    fn contradictory_path() -> (ReachedSet, NodeRef, NodeRef) {
        let mut reached = ReachedSet::new_mock();
        let root = reached.root().clone();
        let first = reached.add(PredicateAbstractState::new_mock_at(1), false);
        let second = reached.add(PredicateAbstractState::new_mock_at(2), true);
        ArgNode::link(&root, &first, assume_edge(0, 1, ComparisonOp::Eq, 0));
        ArgNode::link(&first, &second, assume_edge(1, 2, ComparisonOp::Neq, 0));
        (reached, root, second)
    }

    #[test]
    fn test_spurious_trace_yields_interpolants() {
        let (_reached, root, target) = contradictory_path();
        let blocks = BlockFormulaExtractor::new().extract(&root, &target);

        let checker = CounterexampleTraceChecker::new(ProjectionInterpolator::new());
        let result = checker.check(&blocks).unwrap();

        let interpolants = match result {
            TraceCheckResult::Spurious(i) => i,
            TraceCheckResult::Feasible => panic!("Contradictory trace reported feasible"),
        };
        assert_eq!(interpolants.len(), 1);

        // the interpolant must be implied by block 1 and contradict block 2
        assert!(
            carve_smt::interpolate::entails(&blocks.formulas()[0], &interpolants[0]).unwrap()
        );
        assert!(
            carve_smt::interpolate::formula_is_unsat(
                &interpolants[0].clone().and(blocks.formulas()[1].clone())
            )
            .unwrap()
        );
    }

    #[test]
    fn test_feasible_trace() {
        let mut reached = ReachedSet::new_mock();
        let root = reached.root().clone();
        let first = reached.add(PredicateAbstractState::new_mock_at(1), false);
        let second = reached.add(PredicateAbstractState::new_mock_at(2), true);
        ArgNode::link(&root, &first, assume_edge(0, 1, ComparisonOp::Geq, 0));
        ArgNode::link(&first, &second, assume_edge(1, 2, ComparisonOp::Leq, 5));
        let blocks = BlockFormulaExtractor::new().extract(&root, &second);

        let checker = CounterexampleTraceChecker::new(ProjectionInterpolator::new());
        assert_eq!(checker.check(&blocks).unwrap(), TraceCheckResult::Feasible);
    }

    #[test]
    fn test_session_consumed_between_checks() {
        let (_reached, root, target) = contradictory_path();
        let blocks = BlockFormulaExtractor::new().extract(&root, &target);
        let checker = CounterexampleTraceChecker::new(ProjectionInterpolator::new());

        // back-to-back checks must not leak frames between sessions
        let first = checker.check(&blocks).unwrap();
        let second = checker.check(&blocks).unwrap();
        assert_eq!(first, second);
    }
}
