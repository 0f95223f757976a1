//! Global refinement over the whole abstraction-state forest
//!
//! Instead of refining one target path per round, the global refiner walks
//! all paths towards open targets in a single depth-first traversal that
//! shares one incremental prover stack. Entering a block pushes its formula,
//! leaving it pops; an unsatisfiable prefix is refined in place from the
//! interpolants of the current stack, a satisfiable path ending in a target
//! aborts the traversal with a real counterexample. All ARG repairs are
//! collected during the traversal and applied in one batch afterwards, so
//! the walk itself never mutates the reached set.

use std::cell::Cell;
use std::collections::BTreeSet;
use std::rc::Rc;

use log::{debug, info, trace};

use carve_arg::NodeRef;
use carve_arg::precision::PredicatePrecision;
use carve_arg::reached::ReachedSet;
use carve_arg::repair::ArgRepairEngine;
use carve_smt::interpolate::{InterpolatingProverSession, InterpolatorFactory};

use crate::block_formulas::{BlockFormulaExtractor, BlockTrace, ancestor_ids};
use crate::driver::{RefinementError, RefinementOutcome, Refiner};
use crate::strategy::RefinementStrategy;

/// Refines every open target path in one traversal
pub struct GlobalRefiner<S: RefinementStrategy, F: InterpolatorFactory> {
    strategy: S,
    factory: F,
    extractor: BlockFormulaExtractor,
    cancel: Option<Rc<Cell<bool>>>,
}

impl<S: RefinementStrategy, F: InterpolatorFactory> GlobalRefiner<S, F> {
    /// Create a global refiner
    pub fn new(strategy: S, factory: F) -> Self {
        GlobalRefiner {
            strategy,
            factory,
            extractor: BlockFormulaExtractor::new(),
            cancel: None,
        }
    }

    /// Install a cancellation flag polled between branches
    ///
    /// When the flag is set the traversal stops early; repairs collected up
    /// to that point are still applied.
    pub fn with_cancellation(mut self, cancel: Rc<Cell<bool>>) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

impl<S: RefinementStrategy, F: InterpolatorFactory> Refiner for GlobalRefiner<S, F> {
    fn perform_refinement(
        &mut self,
        reached: &mut ReachedSet,
    ) -> Result<RefinementOutcome, RefinementError> {
        let targets = reached.targets();
        if targets.is_empty() {
            debug!("No open target state, nothing to refine");
            return Ok(RefinementOutcome::Refined);
        }

        let mut target_ancestors = BTreeSet::new();
        for target in &targets {
            target_ancestors.extend(ancestor_ids(target));
        }

        let mut dfs = GlobalDfs {
            session: self.factory.new_session(),
            extractor: &self.extractor,
            strategy: &mut self.strategy,
            target_ancestors,
            path: Vec::new(),
            changed: Vec::new(),
            infeasible: Vec::new(),
            increment: PredicatePrecision::empty(),
            released: Vec::new(),
            found: None,
            cancel: self.cancel.clone(),
        };

        let root = reached.root().clone();
        let result = dfs.explore(&root, &self.extractor.initial_trace(), reached);
        debug_assert_eq!(dfs.session.depth(), 0);

        let GlobalDfs {
            changed,
            infeasible,
            increment,
            released,
            found,
            ..
        } = dfs;
        // a solver failure aborts without committing the batch
        result?;

        for node in &released {
            reached.reenqueue(node);
        }
        if !increment.is_empty() {
            reached.update_precision(&increment);
        }
        for node in &infeasible {
            if reached.contains(node) {
                ArgRepairEngine::remove_infeasible_subtree(node, reached);
            }
        }
        ArgRepairEngine::restore_coverage_invariant(&changed, reached)?;

        match found {
            Some(path) => Ok(RefinementOutcome::RealCounterexample(path)),
            None => {
                info!(
                    "Global refinement eliminated {} infeasible branches",
                    infeasible.len()
                );
                Ok(RefinementOutcome::Refined)
            }
        }
    }
}

/// Traversal state of one global refinement round
struct GlobalDfs<'a, S: RefinementStrategy, P: InterpolatingProverSession> {
    session: P,
    extractor: &'a BlockFormulaExtractor,
    strategy: &'a mut S,
    target_ancestors: BTreeSet<u32>,
    /// Boundary nodes of the blocks currently on the prover stack
    path: Vec<NodeRef>,
    changed: Vec<NodeRef>,
    infeasible: Vec<NodeRef>,
    increment: PredicatePrecision,
    released: Vec<NodeRef>,
    found: Option<Vec<NodeRef>>,
    cancel: Option<Rc<Cell<bool>>>,
}

impl<S: RefinementStrategy, P: InterpolatingProverSession> GlobalDfs<'_, S, P> {
    fn explore(
        &mut self,
        node: &NodeRef,
        trace: &BlockTrace,
        reached: &ReachedSet,
    ) -> Result<(), RefinementError> {
        for (succ, succ_trace) in self.extractor.next_blocks(node, trace) {
            if self.cancelled() {
                debug!("Refinement cancelled below node {}", node.borrow().id());
                break;
            }
            if !self.target_ancestors.contains(&succ.borrow().id()) {
                continue;
            }

            self.visit(&succ, &succ_trace, reached)?;

            if self.found.is_some() {
                break;
            }
            if !node.borrow().may_cover() {
                // the strengthened node now subsumes the remaining branches
                trace!(
                    "Node {} was strengthened, skipping its other branches",
                    node.borrow().id()
                );
                break;
            }
        }
        Ok(())
    }

    /// Push the block, recurse, and pop again no matter how the recursion
    /// went
    fn visit(
        &mut self,
        node: &NodeRef,
        trace: &BlockTrace,
        reached: &ReachedSet,
    ) -> Result<(), RefinementError> {
        self.session.push(trace.formula().formula().clone());
        self.path.push(node.clone());
        let result = self.visit_pushed(node, trace, reached);
        self.path.pop();
        self.session.pop();
        result
    }

    fn visit_pushed(
        &mut self,
        node: &NodeRef,
        trace: &BlockTrace,
        reached: &ReachedSet,
    ) -> Result<(), RefinementError> {
        if self.session.is_unsat()? {
            self.refine_current_path(reached)?;
            return Ok(());
        }
        if node.borrow().is_target() {
            info!("Found feasible path to target node {}", node.borrow().id());
            self.found = Some(self.path.clone());
            return Ok(());
        }
        self.explore(node, trace, reached)
    }

    /// Refine the boundary nodes on the current stack from its interpolants
    fn refine_current_path(&mut self, reached: &ReachedSet) -> Result<(), RefinementError> {
        let interpolants = self.session.interpolant_sequence()?;
        self.strategy.start_refinement_of_path(reached);
        let changed_start = self.changed.len();

        let mut infeasible = self
            .path
            .last()
            .expect("Refined an empty prover stack")
            .clone();
        for (i, interpolant) in interpolants.iter().enumerate() {
            if interpolant.is_true() {
                continue;
            }
            if interpolant.is_false() {
                infeasible = self.path[i].clone();
                break;
            }
            if self
                .strategy
                .perform_refinement_for_state(interpolant, &self.path[i])?
            {
                self.changed.push(self.path[i].clone());
            }
        }

        trace!(
            "Branch below node {} is infeasible",
            infeasible.borrow().id()
        );
        let repair_root = self
            .strategy
            .repair_root(&infeasible, &self.changed[changed_start..]);
        let increment = self.strategy.take_precision_increment(false);
        self.increment = self.increment.union(&increment);
        self.released.extend(self.strategy.take_released_nodes());
        self.infeasible.push(repair_root);
        Ok(())
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.get())
    }
}
