//! Node type of the abstract reachability graph

use carve_formula::cfa::CfaEdge;

use crate::{NodeRef, WeakNodeRef, state::PredicateAbstractState};

/// Incoming edge of an ARG node
///
/// A node may have several parents after a join; each parent link records
/// the CFA edge the analysis took to reach the node. The parent reference
/// is weak, ownership of the graph flows strictly from parents to children.
#[derive(Debug, Clone)]
pub struct ArgParentEdge {
    source: WeakNodeRef,
    edge: CfaEdge,
}

impl ArgParentEdge {
    /// Create a new parent link
    pub fn new(source: &NodeRef, edge: CfaEdge) -> Self {
        ArgParentEdge {
            source: std::rc::Rc::downgrade(source),
            edge,
        }
    }

    /// The parent node, if it is still part of the graph
    pub fn source(&self) -> Option<NodeRef> {
        self.source.upgrade()
    }

    /// The CFA edge taken from the parent to this node
    pub fn edge(&self) -> &CfaEdge {
        &self.edge
    }
}

/// Node in the abstract reachability graph
///
/// Nodes own their children; parents, the `covered_by` back-reference and
/// the `covered_by_this` set only hold weak references so that removing a
/// subtree drops its nodes
#[derive(Debug)]
pub struct ArgNode {
    /// Unique id, assigned by the reached set on insertion
    id: u32,
    /// Abstract state of the predicate analysis
    state: PredicateAbstractState,
    /// Incoming edges from parent nodes
    parents: Vec<ArgParentEdge>,
    /// Successor nodes
    children: Vec<NodeRef>,
    /// Node whose abstraction subsumes this one, if any
    covered_by: Option<WeakNodeRef>,
    /// Nodes this one currently covers
    covered_by_this: Vec<WeakNodeRef>,
    /// Whether this node is still allowed to cover others
    may_cover: bool,
    /// Whether this node sits at an error location
    is_target: bool,
}

impl ArgNode {
    /// Create a detached node
    pub fn new(id: u32, state: PredicateAbstractState, is_target: bool) -> Self {
        ArgNode {
            id,
            state,
            parents: Vec::new(),
            children: Vec::new(),
            covered_by: None,
            covered_by_this: Vec::new(),
            may_cover: true,
            is_target,
        }
    }

    /// Unique id of this node
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The abstract state attached to this node
    pub fn state(&self) -> &PredicateAbstractState {
        &self.state
    }

    /// Mutable access to the abstract state, used by refinement to
    /// strengthen the abstraction formula
    pub fn state_mut(&mut self) -> &mut PredicateAbstractState {
        &mut self.state
    }

    /// Get the incoming edges from the parents of this node
    pub fn parents(&self) -> impl Iterator<Item = &ArgParentEdge> {
        self.parents.iter()
    }

    /// Get the successors of this node
    pub fn children(&self) -> impl Iterator<Item = &NodeRef> {
        self.children.iter()
    }

    /// The node covering this one, if any
    pub fn covered_by(&self) -> Option<NodeRef> {
        self.covered_by.as_ref().and_then(|weak| weak.upgrade())
    }

    /// Whether this node is currently covered
    pub fn is_covered(&self) -> bool {
        self.covered_by.is_some()
    }

    /// The nodes this one currently covers
    pub fn covered_by_this(&self) -> Vec<NodeRef> {
        self.covered_by_this
            .iter()
            .filter_map(|weak| weak.upgrade())
            .collect()
    }

    /// Whether this node is still allowed to cover others
    pub fn may_cover(&self) -> bool {
        self.may_cover
    }

    /// Whether this node sits at an error location
    pub fn is_target(&self) -> bool {
        self.is_target
    }

    /// Insert `child` as a successor of `parent`, reached via `edge`
    pub fn link(parent: &NodeRef, child: &NodeRef, edge: CfaEdge) {
        child
            .borrow_mut()
            .parents
            .push(ArgParentEdge::new(parent, edge));
        parent.borrow_mut().children.push(child.clone());
    }

    /// Remove `node` from the child lists of all its parents
    pub fn detach_from_parents(node: &NodeRef) {
        let parents = node
            .borrow()
            .parents
            .iter()
            .filter_map(|p| p.source())
            .collect::<Vec<_>>();

        for parent in parents {
            parent
                .borrow_mut()
                .children
                .retain(|c| !std::rc::Rc::ptr_eq(c, node));
        }

        node.borrow_mut().parents.clear();
    }

    /// Mark `node` as covered by `covering`
    ///
    /// Nodes covered by `node` up to now would form a coverage chain and
    /// are released; the returned nodes must be re-added to the waitlist by
    /// the caller. Panics if `covering` is itself covered or not allowed to
    /// cover.
    pub fn cover(node: &NodeRef, covering: &NodeRef) -> Vec<NodeRef> {
        assert!(
            !covering.borrow().is_covered() && covering.borrow().may_cover(),
            "Tried to cover a node by an unsuitable covering node"
        );
        debug_assert!(!std::rc::Rc::ptr_eq(node, covering));

        let released = Self::release_covered(node);

        node.borrow_mut().covered_by = Some(std::rc::Rc::downgrade(covering));
        covering
            .borrow_mut()
            .covered_by_this
            .push(std::rc::Rc::downgrade(node));

        released
    }

    /// Remove the coverage of `node`, detaching it from its covering node
    pub fn uncover(node: &NodeRef) {
        let covering = node.borrow().covered_by();
        node.borrow_mut().covered_by = None;

        if let Some(covering) = covering {
            covering
                .borrow_mut()
                .covered_by_this
                .retain(|weak| match weak.upgrade() {
                    Some(covered) => !std::rc::Rc::ptr_eq(&covered, node),
                    None => false,
                });
        }
    }

    /// Forbid `node` from covering others, releasing everything it covers
    ///
    /// The returned nodes are no longer covered and must be re-added to the
    /// waitlist by the caller.
    pub fn stop_covering(node: &NodeRef) -> Vec<NodeRef> {
        node.borrow_mut().may_cover = false;
        Self::release_covered(node)
    }

    /// Allow `node` to cover others again
    pub fn allow_covering(node: &NodeRef) {
        node.borrow_mut().may_cover = true;
    }

    /// Release all nodes covered by `node` and return them
    fn release_covered(node: &NodeRef) -> Vec<NodeRef> {
        let released = node.borrow().covered_by_this();
        node.borrow_mut().covered_by_this.clear();

        for covered in released.iter() {
            covered.borrow_mut().covered_by = None;
        }

        released
    }
}

#[cfg(any(test, feature = "mocks"))]
mod mock_objects {
    use carve_formula::cfa::CfaLocation;
    use carve_formula::path_formula::PathFormulaManager;

    use crate::{
        node::ArgNode,
        state::{AbstractionFormula, PredicateAbstractState},
    };

    impl ArgNode {
        /// Create a new mock node at a location of `main` with a trivial
        /// abstraction
        pub fn new_mock(id: u32, is_target: bool) -> Self {
            let mgr = PathFormulaManager::new();
            let state = PredicateAbstractState::new_abstraction(
                CfaLocation::new(id, "main"),
                AbstractionFormula::new_true(mgr.make_empty()),
                mgr.make_empty(),
            );
            ArgNode::new(id, state, is_target)
        }
    }
}
