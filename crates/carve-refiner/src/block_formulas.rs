//! Extraction of block formulas from the ARG
//!
//! A block formula describes the transition between two adjacent abstraction
//! boundaries on a path. The extractor walks the sub-DAG between boundaries
//! breadth first, accumulating a path formula per node: branches conjoin
//! their assume conditions, joins disjoin the incoming formulas, calls and
//! returns keep a callstack so the SSA indices of callee locals fall back
//! into the caller's scope.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;

use log::trace;

use carve_arg::NodeRef;
use carve_formula::cfa::{CfaEdge, CfaEdgeOp};
use carve_formula::expressions::{BooleanExpression, SsaVariable, Variable};
use carve_formula::path_formula::{PathFormula, PathFormulaManager};

/// One branching decision taken on the extracted path
///
/// Records the instantiated assume condition of an assume edge leaving
/// `node_id`, used to reconstruct the concrete branching of a feasible
/// counterexample.
#[derive(Debug, Clone)]
pub struct BranchingDecision {
    node_id: u32,
    edge: CfaEdge,
    condition: BooleanExpression<SsaVariable>,
}

impl BranchingDecision {
    /// Id of the node the assume edge leaves
    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    /// The assume edge itself
    pub fn edge(&self) -> &CfaEdge {
        &self.edge
    }

    /// The condition instantiated at the point of the decision
    pub fn condition(&self) -> &BooleanExpression<SsaVariable> {
        &self.condition
    }
}

/// Call frame remembered while extraction passes through a function call
#[derive(Debug, Clone)]
struct CallFrame {
    callee: String,
    call_site: PathFormula,
}

/// Accumulated extraction state at one point of the walk
///
/// Carries the path formula since the last abstraction boundary and the
/// callstack of functions entered but not yet left.
#[derive(Debug, Clone)]
pub struct BlockTrace {
    formula: PathFormula,
    callstack: Vec<CallFrame>,
}

impl BlockTrace {
    /// The path formula accumulated in the current block
    pub fn formula(&self) -> &PathFormula {
        &self.formula
    }

    fn callstack_names(&self) -> Vec<&str> {
        self.callstack.iter().map(|f| f.callee.as_str()).collect()
    }
}

/// Block formula sequence extracted for one path root to target
///
/// Entry `i` of the formula list describes the transition from abstraction
/// boundary `i - 1` (the root for `i == 0`) to boundary `i`; the boundary
/// list holds the corresponding ARG nodes in path order, ending at the
/// target.
#[derive(Debug)]
pub struct BlockFormulas {
    formulas: Vec<BooleanExpression<SsaVariable>>,
    boundaries: Vec<NodeRef>,
    branching_decisions: Vec<BranchingDecision>,
}

impl BlockFormulas {
    /// The instantiated block formulas in path order
    pub fn formulas(&self) -> &[BooleanExpression<SsaVariable>] {
        &self.formulas
    }

    /// The abstraction boundary nodes in path order, excluding the root
    pub fn boundaries(&self) -> &[NodeRef] {
        &self.boundaries
    }

    /// Number of blocks on the path
    pub fn len(&self) -> usize {
        self.formulas.len()
    }

    /// Whether the path holds no block at all
    pub fn is_empty(&self) -> bool {
        self.formulas.is_empty()
    }

    /// The branching decisions taken along the path
    pub fn branching_decisions(&self) -> &[BranchingDecision] {
        &self.branching_decisions
    }
}

/// Type of the optional per-state strengthening hook
///
/// Invoked for every node the extraction passes; a returned assumption is
/// conjoined onto the node's accumulated path formula without advancing any
/// SSA index.
pub type StrengthenHook = Box<dyn Fn(&NodeRef) -> Option<BooleanExpression<Variable>>>;

/// Walks the ARG and turns paths into block formula sequences
pub struct BlockFormulaExtractor {
    manager: PathFormulaManager,
    strengthen: Option<StrengthenHook>,
}

impl Default for BlockFormulaExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockFormulaExtractor {
    /// Create an extractor without a strengthening hook
    pub fn new() -> Self {
        BlockFormulaExtractor {
            manager: PathFormulaManager::new(),
            strengthen: None,
        }
    }

    /// Create an extractor applying `hook` at every visited node
    pub fn with_strengthening(hook: StrengthenHook) -> Self {
        BlockFormulaExtractor {
            manager: PathFormulaManager::new(),
            strengthen: Some(hook),
        }
    }

    /// The trace extraction starts from at the ARG root
    pub fn initial_trace(&self) -> BlockTrace {
        BlockTrace {
            formula: self.manager.make_empty(),
            callstack: Vec::new(),
        }
    }

    /// Extract the block formula sequence for the path from `root` to
    /// `target`
    ///
    /// Panics if the abstraction boundaries between the two nodes do not
    /// form a single chain, or if formulas with inconsistent callstacks
    /// merge; both indicate a broken ARG.
    pub fn extract(&self, root: &NodeRef, target: &NodeRef) -> BlockFormulas {
        let ancestors = ancestor_ids(target);
        assert!(
            ancestors.contains(&root.borrow().id()),
            "Target node {} is not reachable from node {}",
            target.borrow().id(),
            root.borrow().id()
        );

        let mut formulas = Vec::new();
        let mut boundaries = Vec::new();
        let mut branching_decisions = Vec::new();

        let mut current = root.clone();
        let mut trace = self.initial_trace();

        while !Rc::ptr_eq(&current, target) {
            let terminals = self.propagate(&current, &trace, &mut branching_decisions);

            let mut on_path = terminals
                .into_iter()
                .filter(|(node, _)| ancestors.contains(&node.borrow().id()))
                .collect::<Vec<_>>();
            assert_eq!(
                on_path.len(),
                1,
                "Abstraction boundaries below node {} do not form a single path",
                current.borrow().id()
            );
            let (next, next_trace) = on_path.pop().expect("Checked length above");

            trace!(
                "Block {} ends at node {}: {}",
                formulas.len(),
                next.borrow().id(),
                next_trace.formula.formula()
            );
            formulas.push(next_trace.formula.formula().clone());
            boundaries.push(next.clone());
            current = next;
            trace = next_trace;
        }

        BlockFormulas {
            formulas,
            boundaries,
            branching_decisions,
        }
    }

    /// The abstraction boundaries directly below `from`, with the block
    /// trace accumulated on the way
    ///
    /// Used by the global refiner to walk the boundary forest one block at a
    /// time.
    pub fn next_blocks(&self, from: &NodeRef, trace: &BlockTrace) -> Vec<(NodeRef, BlockTrace)> {
        let mut decisions = Vec::new();
        self.propagate(from, trace, &mut decisions)
    }

    /// Propagate the trace from `from` to the nearest boundaries below it
    ///
    /// Breadth-first walk over the block's sub-DAG. A node is only
    /// finalized once all its in-block parents are; nodes seen earlier are
    /// re-queued until then. Joins disjoin the incoming formulas and panic
    /// when the callstacks disagree.
    fn propagate(
        &self,
        from: &NodeRef,
        incoming: &BlockTrace,
        decisions: &mut Vec<BranchingDecision>,
    ) -> Vec<(NodeRef, BlockTrace)> {
        let from_id = from.borrow().id();
        let block = block_node_ids(from);

        let start = BlockTrace {
            formula: if incoming.formula.length() == 0 {
                incoming.formula.clone()
            } else {
                self.manager.make_empty_with_context_from(&incoming.formula)
            },
            callstack: incoming.callstack.clone(),
        };

        let mut done: BTreeMap<u32, BlockTrace> = BTreeMap::new();
        done.insert(from_id, start);

        let mut queue: VecDeque<NodeRef> = from.borrow().children().cloned().collect();
        let mut terminals = Vec::new();

        while let Some(node) = queue.pop_front() {
            let node_id = node.borrow().id();
            if done.contains_key(&node_id) {
                continue;
            }

            let parent_edges = node
                .borrow()
                .parents()
                .filter_map(|p| p.source().map(|s| (s, p.edge().clone())))
                .filter(|(s, _)| {
                    let sid = s.borrow().id();
                    sid == from_id || (block.contains(&sid) && !is_boundary(s))
                })
                .collect::<Vec<_>>();
            assert!(
                !parent_edges.is_empty(),
                "Node {node_id} has no parent inside its block"
            );

            if !parent_edges
                .iter()
                .all(|(s, _)| done.contains_key(&s.borrow().id()))
            {
                // a parent is not finalized yet, try again later
                queue.push_back(node);
                continue;
            }

            let mut merged: Option<BlockTrace> = None;
            for (source, edge) in parent_edges {
                let source_trace = done
                    .get(&source.borrow().id())
                    .expect("Checked above that all parents are finalized");
                let extended = self.apply_edge(source_trace, &source, &edge, decisions);

                merged = Some(match merged {
                    None => extended,
                    Some(acc) => {
                        assert_eq!(
                            acc.callstack_names(),
                            extended.callstack_names(),
                            "Merged formulas with inconsistent callstacks at node {node_id}"
                        );
                        BlockTrace {
                            formula: self.manager.make_or(&acc.formula, &extended.formula),
                            callstack: acc.callstack,
                        }
                    }
                });
            }
            let mut trace = merged.expect("Node has at least one in-block parent");

            if let Some(hook) = &self.strengthen {
                if let Some(assumption) = hook(&node) {
                    trace.formula = self.manager.make_and_assumption(&trace.formula, &assumption);
                }
            }

            done.insert(node_id, trace.clone());

            if is_boundary(&node) {
                terminals.push((node, trace));
            } else {
                queue.extend(node.borrow().children().cloned());
            }
        }

        terminals
    }

    /// Extend `trace` over one CFA edge
    fn apply_edge(
        &self,
        trace: &BlockTrace,
        source: &NodeRef,
        edge: &CfaEdge,
        decisions: &mut Vec<BranchingDecision>,
    ) -> BlockTrace {
        let mut callstack = trace.callstack.clone();

        match edge.op() {
            CfaEdgeOp::Assume(condition) => {
                decisions.push(BranchingDecision {
                    node_id: source.borrow().id(),
                    edge: edge.clone(),
                    condition: carve_formula::ssa::instantiate(condition, trace.formula.ssa()),
                });
                BlockTrace {
                    formula: self.manager.make_and(&trace.formula, edge),
                    callstack,
                }
            }
            CfaEdgeOp::FunctionCall { callee } => {
                callstack.push(CallFrame {
                    callee: callee.clone(),
                    call_site: trace.formula.clone(),
                });
                BlockTrace {
                    formula: self.manager.make_and(&trace.formula, edge),
                    callstack,
                }
            }
            CfaEdgeOp::FunctionReturn { callee } => {
                let frame = callstack
                    .pop()
                    .unwrap_or_else(|| panic!("Return from {callee} with an empty callstack"));
                assert_eq!(
                    &frame.callee, callee,
                    "Return from {} while inside {}",
                    callee, frame.callee
                );
                let exit = self.manager.make_and(&trace.formula, edge);
                BlockTrace {
                    formula: self
                        .manager
                        .rebuild_indices_after_return(&exit, &frame.call_site, callee),
                    callstack,
                }
            }
            CfaEdgeOp::Assign(..) | CfaEdgeOp::Havoc(_) | CfaEdgeOp::Skip => BlockTrace {
                formula: self.manager.make_and(&trace.formula, edge),
                callstack,
            },
        }
    }
}

/// Whether a node cuts the accumulated formula
fn is_boundary(node: &NodeRef) -> bool {
    node.borrow().state().is_abstraction_state()
}

/// Ids of all ancestors of `node`, including the node itself
pub fn ancestor_ids(node: &NodeRef) -> BTreeSet<u32> {
    let mut seen = BTreeSet::new();
    let mut stack = vec![node.clone()];
    while let Some(current) = stack.pop() {
        if !seen.insert(current.borrow().id()) {
            continue;
        }
        stack.extend(current.borrow().parents().filter_map(|p| p.source()));
    }
    seen
}

/// Ids of the nodes inside the block below `from`
///
/// Walks children starting at `from` and stops at abstraction boundaries;
/// boundary nodes themselves are included as the block's exits.
fn block_node_ids(from: &NodeRef) -> BTreeSet<u32> {
    let mut seen = BTreeSet::new();
    let mut stack = vec![from.clone()];
    seen.insert(from.borrow().id());
    while let Some(current) = stack.pop() {
        for child in current.borrow().children() {
            if seen.insert(child.borrow().id()) && !is_boundary(child) {
                stack.push(child.clone());
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use carve_arg::node::ArgNode;
    use carve_arg::reached::ReachedSet;
    use carve_arg::state::{AbstractionFormula, PredicateAbstractState};
    use carve_formula::cfa::CfaLocation;
    use carve_formula::expressions::{
        BooleanConnective, BooleanExpression, ComparisonOp, IntegerExpression, Variable,
    };

    use super::*;

    fn loc(id: u32) -> CfaLocation {
        CfaLocation::new(id, "main")
    }

    fn assign_edge(from: u32, to: u32, var: &str, value: i64) -> CfaEdge {
        CfaEdge::new(
            loc(from),
            loc(to),
            CfaEdgeOp::Assign(Variable::new(var), IntegerExpression::Const(value)),
        )
    }

    fn assume_edge(from: u32, to: u32, var: &str, op: ComparisonOp, value: i64) -> CfaEdge {
        CfaEdge::new(
            loc(from),
            loc(to),
            CfaEdgeOp::Assume(BooleanExpression::ComparisonExpression(
                Box::new(IntegerExpression::Atom(Variable::new(var))),
                op,
                Box::new(IntegerExpression::Const(value)),
            )),
        )
    }

    fn intermediate_state(id: u32) -> PredicateAbstractState {
        let mgr = PathFormulaManager::new();
        PredicateAbstractState::new_intermediate(
            loc(id),
            AbstractionFormula::new_true(mgr.make_empty()),
            mgr.make_empty(),
        )
    }

    #[test]
    fn test_single_block_straight_line() {
        let mut reached = ReachedSet::new_mock();
        let root = reached.root().clone();
        let mid = reached.add(intermediate_state(1), false);
        let end = reached.add(PredicateAbstractState::new_mock_at(2), false);
        ArgNode::link(&root, &mid, assign_edge(0, 1, "x", 0));
        ArgNode::link(&mid, &end, assume_edge(1, 2, "x", ComparisonOp::Eq, 0));

        let blocks = BlockFormulaExtractor::new().extract(&root, &end);

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks.boundaries().len(), 1);
        assert_eq!(blocks.boundaries()[0].borrow().id(), 2);
        // x := 0 advances x to index 2, the assume reads the new index
        assert_eq!(blocks.formulas()[0].to_string(), "(x@2 == 0 && x@2 == 0)");
    }

    #[test]
    fn test_two_blocks_share_ssa_context() {
        let mut reached = ReachedSet::new_mock();
        let root = reached.root().clone();
        let first = reached.add(PredicateAbstractState::new_mock_at(1), false);
        let second = reached.add(PredicateAbstractState::new_mock_at(2), false);
        ArgNode::link(&root, &first, assign_edge(0, 1, "x", 0));
        ArgNode::link(&first, &second, assign_edge(1, 2, "x", 1));

        let blocks = BlockFormulaExtractor::new().extract(&root, &second);

        assert_eq!(blocks.len(), 2);
        // the second block continues from the first block's indices
        assert_eq!(blocks.formulas()[0].to_string(), "x@2 == 0");
        assert_eq!(blocks.formulas()[1].to_string(), "x@3 == 1");
    }

    #[test]
    fn test_join_merges_with_or() {
        let mut reached = ReachedSet::new_mock();
        let root = reached.root().clone();
        let left = reached.add(intermediate_state(1), false);
        let right = reached.add(intermediate_state(2), false);
        let join = reached.add(intermediate_state(3), false);
        let end = reached.add(PredicateAbstractState::new_mock_at(4), false);
        ArgNode::link(&root, &left, assign_edge(0, 1, "x", 0));
        ArgNode::link(&root, &right, assign_edge(0, 2, "x", 1));
        ArgNode::link(&left, &join, CfaEdge::new(loc(1), loc(3), CfaEdgeOp::Skip));
        ArgNode::link(&right, &join, CfaEdge::new(loc(2), loc(3), CfaEdgeOp::Skip));
        ArgNode::link(&join, &end, CfaEdge::new(loc(3), loc(4), CfaEdgeOp::Skip));

        let blocks = BlockFormulaExtractor::new().extract(&root, &end);

        assert_eq!(blocks.len(), 1);
        let formula = &blocks.formulas()[0];
        assert!(matches!(
            formula,
            BooleanExpression::BinaryExpression(_, BooleanConnective::Or, _)
        ));
    }

    #[test]
    fn test_branching_decisions_recorded() {
        let mut reached = ReachedSet::new_mock();
        let root = reached.root().clone();
        let end = reached.add(PredicateAbstractState::new_mock_at(1), false);
        ArgNode::link(&root, &end, assume_edge(0, 1, "x", ComparisonOp::Gt, 0));

        let blocks = BlockFormulaExtractor::new().extract(&root, &end);

        assert_eq!(blocks.branching_decisions().len(), 1);
        let decision = &blocks.branching_decisions()[0];
        assert_eq!(decision.node_id(), 0);
        assert_eq!(decision.condition().to_string(), "x@1 > 0");
    }

    #[test]
    fn test_call_and_return_rebuild_indices() {
        let mut reached = ReachedSet::new_mock();
        let root = reached.root().clone();

        // call into helper; the callee entry is an abstraction boundary
        let mgr = PathFormulaManager::new();
        let entry_state = PredicateAbstractState::new_abstraction(
            CfaLocation::new(10, "helper"),
            AbstractionFormula::new_true(mgr.make_empty()),
            mgr.make_empty(),
        );
        let entry = reached.add(entry_state, false);
        let back_state = PredicateAbstractState::new_intermediate(
            loc(1),
            AbstractionFormula::new_true(mgr.make_empty()),
            mgr.make_empty(),
        );
        let back = reached.add(back_state, false);
        let end = reached.add(PredicateAbstractState::new_mock_at(2), false);

        ArgNode::link(
            &root,
            &entry,
            CfaEdge::new(
                loc(0),
                CfaLocation::new(10, "helper"),
                CfaEdgeOp::FunctionCall {
                    callee: "helper".to_string(),
                },
            ),
        );
        ArgNode::link(
            &entry,
            &back,
            CfaEdge::new(
                CfaLocation::new(10, "helper"),
                loc(1),
                CfaEdgeOp::FunctionReturn {
                    callee: "helper".to_string(),
                },
            ),
        );
        ArgNode::link(&back, &end, CfaEdge::new(loc(1), loc(2), CfaEdgeOp::Skip));

        let blocks = BlockFormulaExtractor::new().extract(&root, &end);

        // one block up to the callee entry, one from the entry to the end
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks.boundaries()[0].borrow().id(), entry.borrow().id());
    }

    #[test]
    #[should_panic(expected = "single path")]
    fn test_two_boundary_successors_panic() {
        let mut reached = ReachedSet::new_mock();
        let root = reached.root().clone();
        let left = reached.add(PredicateAbstractState::new_mock_at(1), false);
        let right = reached.add(PredicateAbstractState::new_mock_at(2), false);
        let merged = reached.add(PredicateAbstractState::new_mock_at(3), false);
        ArgNode::link(&root, &left, CfaEdge::new(loc(0), loc(1), CfaEdgeOp::Skip));
        ArgNode::link(&root, &right, CfaEdge::new(loc(0), loc(2), CfaEdgeOp::Skip));
        ArgNode::link(&left, &merged, CfaEdge::new(loc(1), loc(3), CfaEdgeOp::Skip));
        ArgNode::link(&right, &merged, CfaEdge::new(loc(2), loc(3), CfaEdgeOp::Skip));

        BlockFormulaExtractor::new().extract(&root, &merged);
    }

    #[test]
    fn test_strengthen_hook_applied() {
        let mut reached = ReachedSet::new_mock();
        let root = reached.root().clone();
        let end = reached.add(PredicateAbstractState::new_mock_at(1), false);
        ArgNode::link(&root, &end, CfaEdge::new(loc(0), loc(1), CfaEdgeOp::Skip));

        let hook: StrengthenHook = Box::new(|_| {
            Some(BooleanExpression::ComparisonExpression(
                Box::new(IntegerExpression::Atom(Variable::new("x"))),
                ComparisonOp::Geq,
                Box::new(IntegerExpression::Const(0)),
            ))
        });
        let blocks = BlockFormulaExtractor::with_strengthening(hook).extract(&root, &end);

        assert_eq!(blocks.formulas()[0].to_string(), "x@1 >= 0");
    }

    #[test]
    fn test_next_blocks_lists_all_boundaries() {
        let mut reached = ReachedSet::new_mock();
        let root = reached.root().clone();
        let left = reached.add(PredicateAbstractState::new_mock_at(1), false);
        let right = reached.add(PredicateAbstractState::new_mock_at(2), false);
        ArgNode::link(&root, &left, CfaEdge::new(loc(0), loc(1), CfaEdgeOp::Skip));
        ArgNode::link(&root, &right, CfaEdge::new(loc(0), loc(2), CfaEdgeOp::Skip));

        let extractor = BlockFormulaExtractor::new();
        let blocks = extractor.next_blocks(&root, &extractor.initial_trace());

        let mut ids = blocks
            .iter()
            .map(|(n, _)| n.borrow().id())
            .collect::<Vec<_>>();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);
    }
}
