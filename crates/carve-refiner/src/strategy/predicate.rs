//! Predicate-precision refinement strategy

use std::collections::BTreeMap;

use log::debug;

use carve_arg::NodeRef;
use carve_arg::precision::{AbstractionPredicate, PredicatePrecision, PredicateSet};
use carve_arg::reached::ReachedSet;
use carve_formula::cfa::CfaLocation;
use carve_formula::expressions::{
    BooleanExpression, ComparisonOp, SsaVariable, Variable,
};
use carve_formula::ssa;
use carve_smt::SMTSolverError;

use crate::strategy::RefinementStrategy;

/// Collects interpolant atoms as new abstraction predicates
///
/// The predicates are tagged to the CFA location of the state they were
/// discovered at and folded into a precision increment when the path
/// finishes; the subsequent re-exploration computes stronger abstractions
/// from them.
pub struct PredicateAbstractionStrategy {
    split_equalities: bool,
    /// One entry per strengthened state: location, node id and the
    /// predicates discovered there
    collected: Vec<(CfaLocation, u32, PredicateSet)>,
    /// Precision snapshot taken when the path started, used to decide
    /// whether a state contributes anything new
    known: PredicatePrecision,
}

impl PredicateAbstractionStrategy {
    /// Create a strategy keeping interpolant atoms as they are
    pub fn new() -> Self {
        PredicateAbstractionStrategy {
            split_equalities: false,
            collected: Vec::new(),
            known: PredicatePrecision::empty(),
        }
    }

    /// Create a strategy splitting equalities into two inequalities
    ///
    /// `x == c` becomes `x <= c` and `x >= c`, which lets the abstraction
    /// track the two bounds independently.
    pub fn with_equality_splitting() -> Self {
        PredicateAbstractionStrategy {
            split_equalities: true,
            ..Self::new()
        }
    }

    /// Extract the atomic comparisons of `formula`
    fn extract_predicates(&self, formula: &BooleanExpression<Variable>) -> PredicateSet {
        let mut atoms = Vec::new();
        collect_comparisons(formula, &mut atoms);

        let mut predicates = PredicateSet::new();
        for atom in atoms {
            match atom {
                BooleanExpression::ComparisonExpression(lhs, ComparisonOp::Eq, rhs)
                    if self.split_equalities =>
                {
                    predicates.insert(AbstractionPredicate::new(
                        BooleanExpression::ComparisonExpression(
                            lhs.clone(),
                            ComparisonOp::Leq,
                            rhs.clone(),
                        ),
                    ));
                    predicates.insert(AbstractionPredicate::new(
                        BooleanExpression::ComparisonExpression(lhs, ComparisonOp::Geq, rhs),
                    ));
                }
                atom => {
                    predicates.insert(AbstractionPredicate::new(atom));
                }
            }
        }
        predicates
    }
}

impl Default for PredicateAbstractionStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl RefinementStrategy for PredicateAbstractionStrategy {
    fn start_refinement_of_path(&mut self, reached: &ReachedSet) {
        self.collected.clear();
        self.known = reached.precision().clone();
    }

    fn perform_refinement_for_state(
        &mut self,
        interpolant: &BooleanExpression<SsaVariable>,
        node: &NodeRef,
    ) -> Result<bool, SMTSolverError> {
        let location = node.borrow().state().location().clone();
        let predicates = self.extract_predicates(&ssa::uninstantiate(interpolant));

        let already_known = self.known.predicates_at(&location, None);
        let new_predicates: PredicateSet = predicates
            .into_iter()
            .filter(|p| !already_known.contains(p))
            .collect();

        if new_predicates.is_empty() {
            return Ok(false);
        }

        debug!(
            "Discovered {} new predicates at {}",
            new_predicates.len(),
            location
        );
        self.collected
            .push((location, node.borrow().id(), new_predicates));
        Ok(true)
    }

    fn repair_root(&self, infeasible: &NodeRef, changed: &[NodeRef]) -> NodeRef {
        // restart from the first node with new predicates so its
        // abstraction is recomputed under the extended precision
        changed
            .first()
            .cloned()
            .unwrap_or_else(|| infeasible.clone())
    }

    fn take_precision_increment(&mut self, repeated_counterexample: bool) -> PredicatePrecision {
        let collected = std::mem::take(&mut self.collected);

        if repeated_counterexample {
            // scope the predicates to the concrete path instances, the
            // location-wide predicates were not enough to break the loop
            let per_instance: BTreeMap<(CfaLocation, u32), PredicateSet> = collected
                .into_iter()
                .map(|(loc, node_id, preds)| ((loc, node_id), preds))
                .collect();
            return PredicatePrecision::new(
                PredicateSet::new(),
                BTreeMap::new(),
                BTreeMap::new(),
                per_instance,
            );
        }

        PredicatePrecision::from_location_predicates(
            collected.into_iter().map(|(loc, _, preds)| (loc, preds)),
        )
    }
}

/// Collect every comparison subexpression of `formula`
fn collect_comparisons(
    formula: &BooleanExpression<Variable>,
    out: &mut Vec<BooleanExpression<Variable>>,
) {
    match formula {
        BooleanExpression::ComparisonExpression(..) => out.push(formula.clone()),
        BooleanExpression::BinaryExpression(lhs, _, rhs) => {
            collect_comparisons(lhs, out);
            collect_comparisons(rhs, out);
        }
        BooleanExpression::Not(inner) => collect_comparisons(inner, out),
        BooleanExpression::True | BooleanExpression::False => {}
    }
}
