//! Abstract reachability graph
//!
//! This crate holds the mutable state space of the analysis: the abstract
//! reachability graph (ARG) with its coverage relation, the predicate
//! abstract states attached to its nodes, the predicate precision maps, the
//! reached set with its waitlist, and the repair engine that removes
//! infeasible subtrees after a successful refinement.
//!
//! The graph is a DAG: joins during exploration give a node several
//! parents. Parents are held weakly and children strongly, so dropping a
//! subtree from its parent releases the whole subgraph.

use std::{cell::RefCell, rc::Rc};

use crate::node::ArgNode;

pub mod node;
pub mod precision;
pub mod reached;
pub mod repair;
pub mod state;

/// Type alias for references to nodes in the ARG
///
/// The graph is built using [`RefCell`], a type that implements the internal
/// mutability pattern. [`RefCell`] will check the borrow checker constraints
/// at runtime, therefore borrows must be done with care!
pub type NodeRef = Rc<RefCell<ArgNode>>;

/// Weak counterpart of [`NodeRef`] used for back references
pub type WeakNodeRef = std::rc::Weak<RefCell<ArgNode>>;

impl From<ArgNode> for NodeRef {
    fn from(value: ArgNode) -> Self {
        Rc::new(RefCell::new(value))
    }
}
