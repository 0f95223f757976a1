//! Forward predicate analysis
//!
//! Explores the CFA from its entry, accumulating path formulas between
//! abstraction locations and computing a cartesian predicate abstraction at
//! every boundary. New boundary nodes are checked for coverage against the
//! nodes already reached at the same location, which is what makes the
//! exploration of programs with loops terminate.

use log::{debug, trace};

use carve_arg::NodeRef;
use carve_arg::node::ArgNode;
use carve_arg::precision::PredicatePrecision;
use carve_arg::reached::ReachedSet;
use carve_arg::state::{AbstractionFormula, PredicateAbstractState};
use carve_formula::cfa::{Cfa, CfaLocation};
use carve_formula::expressions::BooleanExpression;
use carve_formula::path_formula::{PathFormula, PathFormulaManager};
use carve_formula::ssa::{self, SsaMap};
use carve_smt::SMTSolverError;
use carve_smt::interpolate;

/// Predicate analysis over one control flow automaton
pub struct PredicateAnalysis {
    cfa: Cfa,
    manager: PathFormulaManager,
}

impl PredicateAnalysis {
    /// Create an analysis for `cfa`
    pub fn new(cfa: Cfa) -> Self {
        PredicateAnalysis {
            cfa,
            manager: PathFormulaManager::new(),
        }
    }

    /// The automaton under analysis
    pub fn cfa(&self) -> &Cfa {
        &self.cfa
    }

    /// The initial reached set: the entry location with the trivial
    /// abstraction
    pub fn initial_reached_set(&self, precision: PredicatePrecision) -> ReachedSet {
        let entry = self.cfa.entry().clone();
        let is_target = self.cfa.is_target(&entry);
        let root_state = PredicateAbstractState::new_abstraction(
            entry,
            AbstractionFormula::new_true(self.manager.make_empty()),
            self.manager.make_empty(),
        );
        ReachedSet::new(root_state, is_target, precision)
    }

    /// Expand waitlisted nodes until a target is reached or the waitlist
    /// runs dry
    ///
    /// Returns whether an (uncovered) target state was reached; the
    /// remaining waitlist is kept so exploration resumes after refinement.
    pub fn explore(&self, reached: &mut ReachedSet) -> Result<bool, SMTSolverError> {
        while let Some(node) = reached.pop_waitlist() {
            if node.borrow().is_target() {
                return Ok(true);
            }
            if self.expand(&node, reached)? {
                return Ok(true);
            }
        }
        debug!("Waitlist exhausted after {} nodes", reached.len());
        Ok(false)
    }

    /// Compute all successors of `node` and add them to the reached set
    fn expand(&self, node: &NodeRef, reached: &mut ReachedSet) -> Result<bool, SMTSolverError> {
        let location = node.borrow().state().location().clone();
        let mut reached_target = false;

        for edge in self.cfa.leaving_edges(&location) {
            let successor_location = edge.to().clone();
            let pf = {
                let borrowed = node.borrow();
                self.manager.make_and(borrowed.state().path_formula(), edge)
            };

            if self.cfa.is_abstraction_location(&successor_location) {
                let Some(abstraction) =
                    self.compute_abstraction(node, &pf, &successor_location, reached)?
                else {
                    trace!("Successor of node {} at {} is unreachable",
                        node.borrow().id(),
                        successor_location
                    );
                    continue;
                };

                let fresh = self.manager.make_empty_with_context_from(&pf);
                let is_target = self.cfa.is_target(&successor_location);
                let state = PredicateAbstractState::new_abstraction(
                    successor_location,
                    abstraction,
                    fresh,
                );
                let successor = reached.add(state, is_target);
                ArgNode::link(node, &successor, edge.clone());

                if is_target {
                    debug!("Reached target node {}", successor.borrow().id());
                    reached_target = true;
                } else {
                    self.try_to_cover(&successor, reached)?;
                }
            } else {
                let state = {
                    let borrowed = node.borrow();
                    PredicateAbstractState::new_intermediate(
                        successor_location,
                        borrowed.state().abstraction().clone(),
                        pf,
                    )
                };
                let successor = reached.add(state, false);
                ArgNode::link(node, &successor, edge.clone());
            }
        }

        Ok(reached_target)
    }

    /// Cartesian abstraction of the block ending in `pf` at `location`
    ///
    /// Returns `None` when the block context is unsatisfiable, i.e. the
    /// successor state is unreachable.
    fn compute_abstraction(
        &self,
        parent: &NodeRef,
        pf: &PathFormula,
        location: &CfaLocation,
        reached: &ReachedSet,
    ) -> Result<Option<AbstractionFormula>, SMTSolverError> {
        let context = {
            let borrowed = parent.borrow();
            borrowed
                .state()
                .abstraction()
                .instantiated()
                .clone()
                .and(pf.formula().clone())
        };
        if interpolate::formula_is_unsat(&context)? {
            return Ok(None);
        }

        let mut conjunction = BooleanExpression::True;
        for predicate in reached.precision().predicates_at(location, None) {
            let instantiated = ssa::instantiate(predicate.atom(), pf.ssa());
            if interpolate::entails(&context, &instantiated)? {
                conjunction = conjunction.and(predicate.atom().clone());
            } else if interpolate::entails(&context, &!instantiated.clone())? {
                conjunction = conjunction.and(!predicate.atom().clone());
            }
        }

        Ok(Some(AbstractionFormula::from_formula(conjunction, pf.clone())))
    }

    /// Cover `node` by the first suitable node at the same location whose
    /// abstraction subsumes it
    fn try_to_cover(
        &self,
        node: &NodeRef,
        reached: &mut ReachedSet,
    ) -> Result<(), SMTSolverError> {
        let location = node.borrow().state().location().clone();
        for candidate in reached.nodes_at_location(&location) {
            if std::rc::Rc::ptr_eq(&candidate, node) {
                continue;
            }
            {
                let borrowed = candidate.borrow();
                if !borrowed.state().is_abstraction_state()
                    || borrowed.is_covered()
                    || !borrowed.may_cover()
                {
                    continue;
                }
            }
            if self.subsumes(&candidate, node)? {
                trace!(
                    "Covering node {} by node {}",
                    node.borrow().id(),
                    candidate.borrow().id()
                );
                let released = ArgNode::cover(node, &candidate);
                for released_node in released.iter() {
                    reached.reenqueue(released_node);
                }
                return Ok(());
            }
        }
        Ok(())
    }

    /// Whether the abstraction of `covering` includes every state of
    /// `covered`
    fn subsumes(&self, covering: &NodeRef, covered: &NodeRef) -> Result<bool, SMTSolverError> {
        let ssa = SsaMap::new();
        let covering_formula =
            ssa::instantiate(covering.borrow().state().abstraction().formula(), &ssa);
        let covered_formula =
            ssa::instantiate(covered.borrow().state().abstraction().formula(), &ssa);
        interpolate::entails(&covered_formula, &covering_formula)
    }
}
