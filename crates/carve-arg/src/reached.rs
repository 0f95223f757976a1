//! Reached set of the analysis
//!
//! Owns the ARG nodes discovered so far, the waitlist of nodes still to be
//! explored and the current predicate precision.

use std::collections::VecDeque;
use std::rc::Rc;

use log::debug;

use carve_formula::cfa::CfaLocation;

use crate::{
    NodeRef, node::ArgNode, precision::PredicatePrecision, state::PredicateAbstractState,
};

/// The set of abstract states reached by the analysis
#[derive(Debug)]
pub struct ReachedSet {
    root: NodeRef,
    nodes: Vec<NodeRef>,
    waitlist: VecDeque<NodeRef>,
    precision: PredicatePrecision,
    next_id: u32,
}

impl ReachedSet {
    /// Create a reached set containing only the root state
    ///
    /// The root is placed on the waitlist so the analysis starts from it.
    pub fn new(
        root_state: PredicateAbstractState,
        is_target: bool,
        precision: PredicatePrecision,
    ) -> Self {
        let root: NodeRef = ArgNode::new(0, root_state, is_target).into();
        ReachedSet {
            root: root.clone(),
            nodes: vec![root.clone()],
            waitlist: VecDeque::from([root]),
            precision,
            next_id: 1,
        }
    }

    /// The root node of the ARG
    pub fn root(&self) -> &NodeRef {
        &self.root
    }

    /// All nodes currently in the reached set
    pub fn nodes(&self) -> impl Iterator<Item = &NodeRef> {
        self.nodes.iter()
    }

    /// Number of nodes in the reached set
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the reached set only contains the root
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// All uncovered nodes at error locations
    pub fn targets(&self) -> Vec<NodeRef> {
        self.nodes
            .iter()
            .filter(|n| n.borrow().is_target() && !n.borrow().is_covered())
            .cloned()
            .collect()
    }

    /// All nodes at `loc`, in insertion order
    pub fn nodes_at_location(&self, loc: &CfaLocation) -> Vec<NodeRef> {
        self.nodes
            .iter()
            .filter(|n| n.borrow().state().location() == loc)
            .cloned()
            .collect()
    }

    /// Create a node for `state`, insert it and put it on the waitlist
    ///
    /// The caller is responsible for linking the node to its parent with
    /// [`ArgNode::link`].
    pub fn add(&mut self, state: PredicateAbstractState, is_target: bool) -> NodeRef {
        let node: NodeRef = ArgNode::new(self.next_id, state, is_target).into();
        self.next_id += 1;
        self.nodes.push(node.clone());
        self.waitlist.push_back(node.clone());
        node
    }

    /// Take the next node from the waitlist
    ///
    /// Covered nodes are skipped, covering suspends exploration.
    pub fn pop_waitlist(&mut self) -> Option<NodeRef> {
        while let Some(node) = self.waitlist.pop_front() {
            if !node.borrow().is_covered() {
                return Some(node);
            }
        }
        None
    }

    /// Whether any node is still waiting to be explored
    pub fn has_waiting(&self) -> bool {
        self.waitlist.iter().any(|n| !n.borrow().is_covered())
    }

    /// Put `node` back on the waitlist, unless it is already on it
    pub fn reenqueue(&mut self, node: &NodeRef) {
        if self.waitlist.iter().any(|n| Rc::ptr_eq(n, node)) {
            return;
        }
        debug!("Re-adding node {} to the waitlist", node.borrow().id());
        self.waitlist.push_back(node.clone());
    }

    /// Remove `node` from the storage and the waitlist
    ///
    /// Graph edges and coverage links are not touched here, detaching the
    /// node is the repair engine's job.
    pub fn remove_node(&mut self, node: &NodeRef) {
        self.nodes.retain(|n| !Rc::ptr_eq(n, node));
        self.waitlist.retain(|n| !Rc::ptr_eq(n, node));
    }

    /// Whether `node` is part of the reached set
    pub fn contains(&self, node: &NodeRef) -> bool {
        self.nodes.iter().any(|n| Rc::ptr_eq(n, node))
    }

    /// The current predicate precision
    pub fn precision(&self) -> &PredicatePrecision {
        &self.precision
    }

    /// Merge a refinement increment into the precision
    pub fn update_precision(&mut self, increment: &PredicatePrecision) {
        self.precision = self.precision.union(increment);
    }
}

#[cfg(any(test, feature = "mocks"))]
mod mock_objects {
    use carve_formula::cfa::CfaLocation;
    use carve_formula::path_formula::PathFormulaManager;

    use crate::{
        precision::PredicatePrecision,
        reached::ReachedSet,
        state::{AbstractionFormula, PredicateAbstractState},
    };

    impl ReachedSet {
        /// Create a new mock reached set rooted at `main#0`
        pub fn new_mock() -> Self {
            let mgr = PathFormulaManager::new();
            let root_state = PredicateAbstractState::new_abstraction(
                CfaLocation::new(0, "main"),
                AbstractionFormula::new_true(mgr.make_empty()),
                mgr.make_empty(),
            );
            ReachedSet::new(root_state, false, PredicatePrecision::empty())
        }
    }

    impl PredicateAbstractState {
        /// Create a new mock abstraction state at location `id` of `main`
        pub fn new_mock_at(id: u32) -> Self {
            let mgr = PathFormulaManager::new();
            PredicateAbstractState::new_abstraction(
                CfaLocation::new(id, "main"),
                AbstractionFormula::new_true(mgr.make_empty()),
                mgr.make_empty(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use carve_formula::cfa::{CfaEdge, CfaEdgeOp, CfaLocation};

    use crate::{node::ArgNode, state::PredicateAbstractState};

    use super::*;

    fn skip_edge(from: u32, to: u32) -> CfaEdge {
        CfaEdge::new(
            CfaLocation::new(from, "main"),
            CfaLocation::new(to, "main"),
            CfaEdgeOp::Skip,
        )
    }

    #[test]
    fn test_new_contains_root_on_waitlist() {
        let mut reached = ReachedSet::new_mock();
        assert_eq!(reached.len(), 1);
        assert!(reached.has_waiting());

        let popped = reached.pop_waitlist().unwrap();
        assert!(Rc::ptr_eq(&popped, reached.root()));
        assert!(!reached.has_waiting());
    }

    #[test]
    fn test_add_assigns_increasing_ids() {
        let mut reached = ReachedSet::new_mock();
        let first = reached.add(PredicateAbstractState::new_mock_at(1), false);
        let second = reached.add(PredicateAbstractState::new_mock_at(2), false);

        assert_eq!(first.borrow().id(), 1);
        assert_eq!(second.borrow().id(), 2);
        assert_eq!(reached.len(), 3);
        assert!(reached.contains(&first));
    }

    #[test]
    fn test_pop_waitlist_skips_covered() {
        let mut reached = ReachedSet::new_mock();
        let covering = reached.add(PredicateAbstractState::new_mock_at(1), false);
        let covered = reached.add(PredicateAbstractState::new_mock_at(1), false);
        ArgNode::cover(&covered, &covering);

        // root, covering and covered are waiting; covered must be skipped
        let mut popped = Vec::new();
        while let Some(node) = reached.pop_waitlist() {
            popped.push(node.borrow().id());
        }
        assert_eq!(popped, vec![0, 1]);
    }

    #[test]
    fn test_reenqueue_deduplicates() {
        let mut reached = ReachedSet::new_mock();
        let node = reached.add(PredicateAbstractState::new_mock_at(1), false);
        // freshly added nodes are already waiting
        reached.reenqueue(&node);

        let mut count = 0;
        while let Some(popped) = reached.pop_waitlist() {
            if Rc::ptr_eq(&popped, &node) {
                count += 1;
            }
        }
        assert_eq!(count, 1);
    }

    #[test]
    fn test_remove_node() {
        let mut reached = ReachedSet::new_mock();
        let node = reached.add(PredicateAbstractState::new_mock_at(1), false);
        ArgNode::link(reached.root(), &node, skip_edge(0, 1));

        reached.remove_node(&node);
        assert!(!reached.contains(&node));
        assert_eq!(reached.len(), 1);
    }

    #[test]
    fn test_targets_excludes_covered() {
        let mut reached = ReachedSet::new_mock();
        let target = reached.add(PredicateAbstractState::new_mock_at(1), true);
        let covered_target = reached.add(PredicateAbstractState::new_mock_at(1), true);
        let covering = reached.add(PredicateAbstractState::new_mock_at(1), false);
        ArgNode::cover(&covered_target, &covering);

        let targets = reached.targets();
        assert_eq!(targets.len(), 1);
        assert!(Rc::ptr_eq(&targets[0], &target));
    }

    #[test]
    fn test_nodes_at_location() {
        let mut reached = ReachedSet::new_mock();
        reached.add(PredicateAbstractState::new_mock_at(1), false);
        reached.add(PredicateAbstractState::new_mock_at(1), false);
        reached.add(PredicateAbstractState::new_mock_at(2), false);

        assert_eq!(
            reached
                .nodes_at_location(&CfaLocation::new(1, "main"))
                .len(),
            2
        );
    }
}
