//! Impact-style refinement strategy

use log::debug;

use carve_arg::NodeRef;
use carve_arg::node::ArgNode;
use carve_arg::precision::PredicatePrecision;
use carve_arg::reached::ReachedSet;
use carve_arg::state::AbstractionFormula;
use carve_formula::expressions::{BooleanExpression, SsaVariable, Variable};
use carve_formula::ssa::{self, SsaMap};
use carve_smt::{SMTSolverError, interpolate};

use crate::strategy::RefinementStrategy;

/// Strengthens abstract states with the interpolants directly
///
/// No predicates are collected; the interpolant (uninstantiated) is
/// conjoined onto the state's abstraction formula, unless the formula
/// already entails it. Strengthened states lose their ability to cover
/// until the repair engine has re-checked the coverage relation.
pub struct ImpactStrategy {
    /// Recompute the abstraction from the previous block's abstraction and
    /// the interpolant instead of conjoining onto the existing formula
    recompute_from_block: bool,
    /// Abstraction of the previously visited state on the current path
    previous_abstraction: BooleanExpression<Variable>,
    /// Nodes released from coverage while strengthening
    released: Vec<NodeRef>,
}

impl ImpactStrategy {
    /// Create a strategy conjoining interpolants onto existing abstractions
    pub fn new() -> Self {
        ImpactStrategy {
            recompute_from_block: false,
            previous_abstraction: BooleanExpression::True,
            released: Vec::new(),
        }
    }

    /// Create a strategy recomputing abstractions from the previous block
    pub fn with_block_recomputation() -> Self {
        ImpactStrategy {
            recompute_from_block: true,
            ..Self::new()
        }
    }
}

impl Default for ImpactStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl RefinementStrategy for ImpactStrategy {
    fn start_refinement_of_path(&mut self, _reached: &ReachedSet) {
        self.previous_abstraction = BooleanExpression::True;
        self.released.clear();
    }

    fn perform_refinement_for_state(
        &mut self,
        interpolant: &BooleanExpression<SsaVariable>,
        node: &NodeRef,
    ) -> Result<bool, SMTSolverError> {
        let interpolant = ssa::uninstantiate(interpolant);
        let existing = node.borrow().state().abstraction().formula().clone();

        // mutating an already entailed state would be a no-op that still
        // costs a subtree removal
        let ssa_map = SsaMap::new();
        if interpolate::entails(
            &ssa::instantiate(&existing, &ssa_map),
            &ssa::instantiate(&interpolant, &ssa_map),
        )? {
            self.previous_abstraction = existing;
            return Ok(false);
        }

        let base = if self.recompute_from_block {
            self.previous_abstraction.clone()
        } else {
            existing
        };
        let strengthened = base.and(interpolant);
        debug!(
            "Strengthening node {} to {}",
            node.borrow().id(),
            strengthened
        );

        let block = node.borrow().state().abstraction().block_formula().clone();
        node.borrow_mut()
            .state_mut()
            .set_abstraction(AbstractionFormula::from_formula(
                strengthened.clone(),
                block,
            ));
        self.previous_abstraction = strengthened;

        // the stronger formula may no longer subsume what this node covered
        self.released.extend(ArgNode::stop_covering(node));

        Ok(true)
    }

    fn take_precision_increment(&mut self, _repeated_counterexample: bool) -> PredicatePrecision {
        PredicatePrecision::empty()
    }

    fn take_released_nodes(&mut self) -> Vec<NodeRef> {
        std::mem::take(&mut self.released)
    }
}
