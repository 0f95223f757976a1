//! Refinement strategies
//!
//! A strategy decides how the interpolants of a spurious trace are turned
//! into a stronger abstraction: the predicate strategy collects new
//! abstraction predicates for the precision, the Impact strategy conjoins
//! the interpolants directly onto the abstract states.

pub mod impact;
pub mod predicate;

use carve_arg::NodeRef;
use carve_arg::precision::PredicatePrecision;
use carve_arg::reached::ReachedSet;
use carve_arg::repair::ArgRepairEngine;
use carve_formula::expressions::{BooleanExpression, SsaVariable};
use carve_smt::SMTSolverError;

pub use impact::ImpactStrategy;
pub use predicate::PredicateAbstractionStrategy;

/// How a spurious path's interpolants are applied to the ARG
///
/// Drivers call [`start_refinement_of_path`], then
/// [`perform_refinement_for_state`] once per abstraction boundary in
/// root-to-target order (skipping `true` interpolants and stopping at the
/// first `false` one), and finally [`finish_refinement_of_path`] exactly
/// once.
///
/// [`start_refinement_of_path`]: RefinementStrategy::start_refinement_of_path
/// [`perform_refinement_for_state`]: RefinementStrategy::perform_refinement_for_state
/// [`finish_refinement_of_path`]: RefinementStrategy::finish_refinement_of_path
pub trait RefinementStrategy {
    /// Begin the refinement of one path
    fn start_refinement_of_path(&mut self, reached: &ReachedSet);

    /// Apply one non-trivial interpolant to one abstraction boundary node
    ///
    /// Returns whether anything changed; "no change" means the ancestors
    /// need not be touched either, interpolants only get weaker toward the
    /// root.
    fn perform_refinement_for_state(
        &mut self,
        interpolant: &BooleanExpression<SsaVariable>,
        node: &NodeRef,
    ) -> Result<bool, SMTSolverError>;

    /// Take the predicate increment collected since the path started
    ///
    /// Strategies that strengthen states directly return an empty
    /// precision. With `repeated_counterexample` set the predicates are
    /// scoped more aggressively to break the repetition.
    fn take_precision_increment(&mut self, repeated_counterexample: bool) -> PredicatePrecision;

    /// Take the nodes released from coverage while strengthening states
    ///
    /// They must be re-added to the waitlist once the reached set may be
    /// mutated again.
    fn take_released_nodes(&mut self) -> Vec<NodeRef> {
        Vec::new()
    }

    /// The node whose subtree the ARG repair removes
    ///
    /// Strategies that strengthen states in place keep everything above the
    /// infeasible boundary; the predicate strategy instead restarts from the
    /// first node whose precision grew, so its abstraction is recomputed.
    fn repair_root(&self, infeasible: &NodeRef, _changed: &[NodeRef]) -> NodeRef {
        infeasible.clone()
    }

    /// Repair the ARG and commit the precision increment
    ///
    /// `infeasible` is the first abstraction boundary that is no longer
    /// reachable, `changed` the nodes strengthened on this path.
    fn finish_refinement_of_path(
        &mut self,
        infeasible: &NodeRef,
        changed: &[NodeRef],
        reached: &mut ReachedSet,
        repeated_counterexample: bool,
    ) -> Result<(), SMTSolverError> {
        let increment = self.take_precision_increment(repeated_counterexample);
        for released in self.take_released_nodes() {
            reached.reenqueue(&released);
        }
        ArgRepairEngine::remove_infeasible_subtree(&self.repair_root(infeasible, changed), reached);
        if !increment.is_empty() {
            reached.update_precision(&increment);
        }
        ArgRepairEngine::restore_coverage_invariant(changed, reached)?;
        Ok(())
    }
}
