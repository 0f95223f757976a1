//! Surgical repair of the ARG after refinement
//!
//! Refinement strengthens abstraction formulas and identifies the first
//! state of a path that is no longer reachable. The repair engine removes
//! the subtree below that state and re-establishes the coverage invariant
//! for every state whose formula changed.

use std::collections::BTreeSet;
use std::rc::Rc;

use log::{debug, trace};

use carve_formula::ssa::{self, SsaMap};
use carve_smt::{SMTSolverError, interpolate};

use crate::{NodeRef, node::ArgNode, reached::ReachedSet};

/// Removes infeasible subtrees and restores the coverage invariant
pub struct ArgRepairEngine;

impl ArgRepairEngine {
    /// Delete the subgraph rooted at `first` from the ARG and reached set
    ///
    /// States outside the subtree that were covered by a node inside it
    /// are uncovered and re-added to the waitlist. The parents of `first`
    /// are re-added as well so the analysis re-explores them under the
    /// strengthened abstractions.
    pub fn remove_infeasible_subtree(first: &NodeRef, reached: &mut ReachedSet) {
        let subtree = Self::collect_subtree(first);
        debug!(
            "Removing infeasible subtree of {} nodes below node {}",
            subtree.len(),
            first.borrow().id()
        );

        let subtree_ids = subtree
            .iter()
            .map(|n| n.borrow().id())
            .collect::<BTreeSet<_>>();

        // Release coverage links crossing the subtree boundary, in both
        // directions
        for node in subtree.iter() {
            for released in ArgNode::stop_covering(node) {
                if !subtree_ids.contains(&released.borrow().id()) {
                    trace!("Uncovered node {} outside the subtree", released.borrow().id());
                    reached.reenqueue(&released);
                }
            }
            ArgNode::uncover(node);
        }

        let parents = first
            .borrow()
            .parents()
            .filter_map(|p| p.source())
            .collect::<Vec<_>>();

        ArgNode::detach_from_parents(first);

        for node in subtree.iter() {
            reached.remove_node(node);
        }

        for parent in parents {
            reached.reenqueue(&parent);
        }
    }

    /// Re-establish the coverage invariant for strengthened states
    ///
    /// Strengthening a state can break coverage in both directions: states
    /// it used to cover may no longer be subsumed, and the state itself may
    /// now be subsumed by an existing one. Both directions are checked for
    /// every changed node. A node that ends up uncovered regains its
    /// ability to cover, which strategies revoke while strengthening.
    pub fn restore_coverage_invariant(
        changed: &[NodeRef],
        reached: &mut ReachedSet,
    ) -> Result<(), SMTSolverError> {
        for node in changed {
            if !reached.contains(node) {
                continue;
            }
            Self::recheck_covered_states(node, reached)?;
            Self::try_to_cover(node, reached)?;
            if !node.borrow().is_covered() {
                ArgNode::allow_covering(node);
            }
        }
        Ok(())
    }

    /// Uncover every state the strengthened `node` no longer subsumes
    fn recheck_covered_states(
        node: &NodeRef,
        reached: &mut ReachedSet,
    ) -> Result<(), SMTSolverError> {
        // Bind the list before iterating: uncovering mutates `node`'s
        // coverage list, which must not happen under a live borrow.
        let covered_states = node.borrow().covered_by_this();
        for covered in covered_states {
            if !Self::subsumes(node, &covered)? {
                debug!(
                    "Node {} no longer covers node {} after strengthening",
                    node.borrow().id(),
                    covered.borrow().id()
                );
                ArgNode::uncover(&covered);
                reached.reenqueue(&covered);
            }
        }
        Ok(())
    }

    /// Try to cover the strengthened `node` by an existing state
    ///
    /// Candidates are uncovered nodes at the same location that are still
    /// allowed to cover and are not part of `node`'s own subtree. The first
    /// subsuming candidate wins.
    fn try_to_cover(node: &NodeRef, reached: &mut ReachedSet) -> Result<(), SMTSolverError> {
        if node.borrow().is_covered() {
            return Ok(());
        }

        let subtree_ids = Self::collect_subtree(node)
            .iter()
            .map(|n| n.borrow().id())
            .collect::<BTreeSet<_>>();

        let location = node.borrow().state().location().clone();
        for candidate in reached.nodes_at_location(&location) {
            if Rc::ptr_eq(&candidate, node)
                || subtree_ids.contains(&candidate.borrow().id())
                || candidate.borrow().is_covered()
                || !candidate.borrow().may_cover()
            {
                continue;
            }

            if Self::subsumes(&candidate, node)? {
                debug!(
                    "Covering strengthened node {} by node {}",
                    node.borrow().id(),
                    candidate.borrow().id()
                );
                for released in ArgNode::cover(node, &candidate) {
                    reached.reenqueue(&released);
                }
                return Ok(());
            }
        }
        Ok(())
    }

    /// Whether the abstraction of `covering` subsumes that of `covered`
    fn subsumes(covering: &NodeRef, covered: &NodeRef) -> Result<bool, SMTSolverError> {
        let ssa = SsaMap::new();
        let covering_formula =
            ssa::instantiate(covering.borrow().state().abstraction().formula(), &ssa);
        let covered_formula =
            ssa::instantiate(covered.borrow().state().abstraction().formula(), &ssa);
        interpolate::entails(&covered_formula, &covering_formula)
    }

    /// Collect `node` and all its descendants
    ///
    /// The ARG is a DAG, nodes reachable on several paths are collected
    /// once.
    fn collect_subtree(node: &NodeRef) -> Vec<NodeRef> {
        let mut seen = BTreeSet::new();
        let mut subtree = Vec::new();
        let mut stack = vec![node.clone()];

        while let Some(current) = stack.pop() {
            if !seen.insert(current.borrow().id()) {
                continue;
            }
            stack.extend(current.borrow().children().cloned());
            subtree.push(current);
        }

        subtree
    }
}
