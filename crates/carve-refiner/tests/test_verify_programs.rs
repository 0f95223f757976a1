//! Tests for the full CEGAR loop on small programs
//!
//! These tests build control flow automata with branches, loops and calls
//! and check that every strategy and refiner combination reaches the right
//! verdict.

#[cfg(test)]
mod test_verify_programs {
    use carve_formula::cfa::{Cfa, CfaBuilder, CfaEdgeOp, CfaLocation};
    use carve_formula::expressions::{
        BooleanExpression, ComparisonOp, IntegerExpression, Variable,
    };
    use carve_smt::interpolate::ProjectionInterpolator;

    use carve_refiner::analysis::PredicateAnalysis;
    use carve_refiner::cegar::{CegarVerifier, VerificationResult};
    use carve_refiner::driver::PathWiseRefiner;
    use carve_refiner::global::GlobalRefiner;
    use carve_refiner::strategy::{ImpactStrategy, PredicateAbstractionStrategy};

    fn loc(id: u32) -> CfaLocation {
        CfaLocation::new(id, "main")
    }

    fn var(name: &str) -> Variable {
        Variable::new(name)
    }

    fn cmp(name: &str, op: ComparisonOp, value: i64) -> BooleanExpression<Variable> {
        BooleanExpression::ComparisonExpression(
            Box::new(IntegerExpression::Atom(var(name))),
            op,
            Box::new(IntegerExpression::Const(value)),
        )
    }

    fn add_to(name: &str, value: i64) -> IntegerExpression<Variable> {
        IntegerExpression::BinaryExpr(
            Box::new(IntegerExpression::Atom(var(name))),
            carve_formula::expressions::IntegerOp::Add,
            Box::new(IntegerExpression::Const(value)),
        )
    }

    /// Two branches that both leave `x` positive; the error guard `x < 0`
    /// is unreachable but the trivial abstraction at the join loses that.
    fn branching_safe() -> Cfa {
        CfaBuilder::new("branching_safe", loc(0))
            .with_edge(loc(0), loc(1), CfaEdgeOp::Assign(var("x"), IntegerExpression::Const(0)))
            .with_edge(loc(1), loc(2), CfaEdgeOp::Assume(cmp("y", ComparisonOp::Gt, 0)))
            .with_edge(loc(2), loc(4), CfaEdgeOp::Assign(var("x"), add_to("x", 1)))
            .with_edge(loc(1), loc(3), CfaEdgeOp::Assume(cmp("y", ComparisonOp::Leq, 0)))
            .with_edge(loc(3), loc(4), CfaEdgeOp::Assign(var("x"), add_to("x", 2)))
            .with_edge(loc(4), loc(5), CfaEdgeOp::Assume(cmp("x", ComparisonOp::Lt, 0)))
            .with_abstraction_location(loc(1))
            .with_abstraction_location(loc(4))
            .with_target(loc(5))
            .build()
            .unwrap()
    }

    /// Like [`branching_safe`], but the error guard `x >= 2` is satisfied
    /// on the `y <= 0` branch.
    fn branching_unsafe() -> Cfa {
        CfaBuilder::new("branching_unsafe", loc(0))
            .with_edge(loc(0), loc(1), CfaEdgeOp::Assign(var("x"), IntegerExpression::Const(0)))
            .with_edge(loc(1), loc(2), CfaEdgeOp::Assume(cmp("y", ComparisonOp::Gt, 0)))
            .with_edge(loc(2), loc(4), CfaEdgeOp::Assign(var("x"), add_to("x", 1)))
            .with_edge(loc(1), loc(3), CfaEdgeOp::Assume(cmp("y", ComparisonOp::Leq, 0)))
            .with_edge(loc(3), loc(4), CfaEdgeOp::Assign(var("x"), add_to("x", 2)))
            .with_edge(loc(4), loc(5), CfaEdgeOp::Assume(cmp("x", ComparisonOp::Geq, 2)))
            .with_abstraction_location(loc(1))
            .with_abstraction_location(loc(4))
            .with_target(loc(5))
            .build()
            .unwrap()
    }

    /// A loop that never changes `x == 0`; safe once the loop head learns
    /// the invariant and the second unrolling is covered.
    fn loop_safe() -> Cfa {
        CfaBuilder::new("loop_safe", loc(0))
            .with_edge(loc(0), loc(1), CfaEdgeOp::Assign(var("x"), IntegerExpression::Const(0)))
            .with_edge(loc(1), loc(2), CfaEdgeOp::Assume(cmp("x", ComparisonOp::Eq, 0)))
            .with_edge(loc(2), loc(1), CfaEdgeOp::Skip)
            .with_edge(loc(1), loc(3), CfaEdgeOp::Assume(cmp("x", ComparisonOp::Neq, 0)))
            .with_abstraction_location(loc(1))
            .with_target(loc(3))
            .build()
            .unwrap()
    }

    /// A counting loop that reaches the error guard `x >= 2` after two
    /// iterations; each refinement forces one more unrolling.
    fn loop_unsafe() -> Cfa {
        CfaBuilder::new("loop_unsafe", loc(0))
            .with_edge(loc(0), loc(1), CfaEdgeOp::Assign(var("x"), IntegerExpression::Const(0)))
            .with_edge(loc(1), loc(2), CfaEdgeOp::Assume(cmp("x", ComparisonOp::Lt, 2)))
            .with_edge(loc(2), loc(1), CfaEdgeOp::Assign(var("x"), add_to("x", 1)))
            .with_edge(loc(1), loc(3), CfaEdgeOp::Assume(cmp("x", ComparisonOp::Geq, 2)))
            .with_abstraction_location(loc(1))
            .with_target(loc(3))
            .build()
            .unwrap()
    }

    /// Assignment inside a called function; the error guard after the
    /// return contradicts it.
    fn call_return_safe() -> Cfa {
        CfaBuilder::new("call_return_safe", loc(0))
            .with_edge(loc(0), loc(1), CfaEdgeOp::FunctionCall { callee: "set".to_string() })
            .with_edge(loc(1), loc(2), CfaEdgeOp::Assign(var("x"), IntegerExpression::Const(5)))
            .with_edge(loc(2), loc(3), CfaEdgeOp::FunctionReturn { callee: "set".to_string() })
            .with_edge(loc(3), loc(4), CfaEdgeOp::Assume(cmp("x", ComparisonOp::Neq, 5)))
            .with_abstraction_location(loc(3))
            .with_target(loc(4))
            .build()
            .unwrap()
    }

    fn verify_path_wise<S>(cfa: Cfa, strategy: S) -> VerificationResult
    where
        S: carve_refiner::strategy::RefinementStrategy,
    {
        let refiner = PathWiseRefiner::new(strategy, ProjectionInterpolator::new());
        let mut verifier = CegarVerifier::new(PredicateAnalysis::new(cfa), refiner);
        verifier.run()
    }

    fn verify_global<S>(cfa: Cfa, strategy: S) -> VerificationResult
    where
        S: carve_refiner::strategy::RefinementStrategy,
    {
        let refiner = GlobalRefiner::new(strategy, ProjectionInterpolator::new());
        let mut verifier = CegarVerifier::new(PredicateAnalysis::new(cfa), refiner);
        verifier.run()
    }

    #[test]
    fn test_branching_safe_with_predicate_refinement() {
        let result = verify_path_wise(branching_safe(), PredicateAbstractionStrategy::new());
        assert!(result.is_safe(), "expected SAFE, got {result}");
    }

    #[test]
    fn test_branching_safe_with_equality_splitting() {
        let result = verify_path_wise(
            branching_safe(),
            PredicateAbstractionStrategy::with_equality_splitting(),
        );
        assert!(result.is_safe(), "expected SAFE, got {result}");
    }

    #[test]
    fn test_branching_safe_with_impact_refinement() {
        let result = verify_path_wise(branching_safe(), ImpactStrategy::new());
        assert!(result.is_safe(), "expected SAFE, got {result}");
    }

    #[test]
    fn test_branching_safe_with_global_refiner() {
        let result = verify_global(branching_safe(), PredicateAbstractionStrategy::new());
        assert!(result.is_safe(), "expected SAFE, got {result}");

        let result = verify_global(branching_safe(), ImpactStrategy::new());
        assert!(result.is_safe(), "expected SAFE, got {result}");
    }

    #[test]
    fn test_branching_unsafe_reports_feasible_branch() {
        let result = verify_path_wise(branching_unsafe(), PredicateAbstractionStrategy::new());

        let path = match result {
            VerificationResult::Unsafe(path) => path,
            other => panic!("expected UNSAFE, got {other}"),
        };
        let last = path.last().unwrap();
        assert_eq!(*last.borrow().state().location(), loc(5));
    }

    #[test]
    fn test_loop_safe_converges_through_coverage() {
        let result = verify_path_wise(loop_safe(), PredicateAbstractionStrategy::new());
        assert!(result.is_safe(), "expected SAFE, got {result}");
    }

    #[test]
    fn test_loop_unsafe_found_after_unrolling() {
        let result = verify_path_wise(loop_unsafe(), PredicateAbstractionStrategy::new());

        let path = match result {
            VerificationResult::Unsafe(path) => path,
            other => panic!("expected UNSAFE, got {other}"),
        };
        // root, two unrollings of the loop head, the final loop head and
        // the target
        assert_eq!(path.len(), 5);
        let last = path.last().unwrap();
        assert_eq!(*last.borrow().state().location(), loc(3));
    }

    #[test]
    fn test_loop_unsafe_with_impact_refinement() {
        let result = verify_path_wise(loop_unsafe(), ImpactStrategy::new());
        assert!(
            matches!(result, VerificationResult::Unsafe(_)),
            "expected UNSAFE, got {result}"
        );
    }

    #[test]
    fn test_call_return_safe_with_predicate_refinement() {
        let result = verify_path_wise(call_return_safe(), PredicateAbstractionStrategy::new());
        assert!(result.is_safe(), "expected SAFE, got {result}");
    }

    #[test]
    fn test_call_return_safe_with_block_recomputation() {
        let result = verify_path_wise(call_return_safe(), ImpactStrategy::with_block_recomputation());
        assert!(result.is_safe(), "expected SAFE, got {result}");
    }
}
