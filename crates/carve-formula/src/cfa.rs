//! Control-flow-automaton model
//!
//! The verifier consumes programs as control flow automata: locations
//! connected by edges carrying an operation (assumption, assignment, havoc,
//! call or return). Locations are opaque identifiers as far as the
//! refinement core is concerned; they are only used for bookkeeping and for
//! attaching predicates to program points.

use std::collections::BTreeSet;
use std::{error, fmt};

use serde::{Deserialize, Serialize};

use crate::expressions::{BooleanExpression, IntegerExpression, Variable};

/// A program location, unique within the whole program
#[derive(Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CfaLocation {
    id: u32,
    function: String,
}

impl CfaLocation {
    /// Create a location with the given id inside `function`
    pub fn new(id: u32, function: impl ToString) -> Self {
        CfaLocation {
            id,
            function: function.to_string(),
        }
    }

    /// Numeric id of the location
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Name of the function the location belongs to
    pub fn function(&self) -> &str {
        &self.function
    }
}

impl fmt::Display for CfaLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.function, self.id)
    }
}

/// Operation attached to a CFA edge
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum CfaEdgeOp {
    /// Branch condition; the edge can only be taken if the condition holds
    Assume(BooleanExpression<Variable>),
    /// Deterministic assignment `var := expr`
    Assign(Variable, IntegerExpression<Variable>),
    /// Nondeterministic assignment; `var` receives an arbitrary value
    Havoc(Variable),
    /// Call into `callee`; the target location is the callee's entry
    FunctionCall {
        /// Name of the called function
        callee: String,
    },
    /// Return from `callee` back into the caller
    FunctionReturn {
        /// Name of the function being left
        callee: String,
    },
    /// No-op edge
    Skip,
}

impl fmt::Display for CfaEdgeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CfaEdgeOp::Assume(c) => write!(f, "[{c}]"),
            CfaEdgeOp::Assign(v, e) => write!(f, "{v} := {e}"),
            CfaEdgeOp::Havoc(v) => write!(f, "havoc {v}"),
            CfaEdgeOp::FunctionCall { callee } => write!(f, "call {callee}()"),
            CfaEdgeOp::FunctionReturn { callee } => write!(f, "return from {callee}()"),
            CfaEdgeOp::Skip => write!(f, "skip"),
        }
    }
}

/// Edge of a control flow automaton
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct CfaEdge {
    from: CfaLocation,
    to: CfaLocation,
    op: CfaEdgeOp,
}

impl CfaEdge {
    /// Create a new edge
    pub fn new(from: CfaLocation, to: CfaLocation, op: CfaEdgeOp) -> Self {
        CfaEdge { from, to, op }
    }

    /// Source location
    pub fn from(&self) -> &CfaLocation {
        &self.from
    }

    /// Target location
    pub fn to(&self) -> &CfaLocation {
        &self.to
    }

    /// Operation carried by the edge
    pub fn op(&self) -> &CfaEdgeOp {
        &self.op
    }

    /// Whether this edge is an assume edge (a branching decision)
    pub fn is_assume(&self) -> bool {
        matches!(self.op, CfaEdgeOp::Assume(_))
    }
}

impl fmt::Display for CfaEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -{}-> {}", self.from, self.op, self.to)
    }
}

/// A whole program as a control flow automaton
///
/// Abstraction locations are the program points at which the analysis
/// computes abstractions (loop heads, function entries and error locations);
/// all other locations only extend the current path formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cfa {
    name: String,
    entry: CfaLocation,
    edges: Vec<CfaEdge>,
    targets: BTreeSet<CfaLocation>,
    abstraction_locations: BTreeSet<CfaLocation>,
}

impl Cfa {
    /// Name of the program
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entry location of the program
    pub fn entry(&self) -> &CfaLocation {
        &self.entry
    }

    /// All edges of the program
    pub fn edges(&self) -> impl Iterator<Item = &CfaEdge> {
        self.edges.iter()
    }

    /// All edges leaving `loc`
    pub fn leaving_edges<'a>(&'a self, loc: &'a CfaLocation) -> impl Iterator<Item = &'a CfaEdge> {
        self.edges.iter().filter(move |e| e.from() == loc)
    }

    /// Whether `loc` is an error location
    pub fn is_target(&self, loc: &CfaLocation) -> bool {
        self.targets.contains(loc)
    }

    /// Whether the analysis computes an abstraction at `loc`
    ///
    /// Targets and the program entry are always abstraction locations.
    pub fn is_abstraction_location(&self, loc: &CfaLocation) -> bool {
        self.abstraction_locations.contains(loc) || self.targets.contains(loc) || *loc == self.entry
    }
}

impl fmt::Display for Cfa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "cfa {} (entry {}):", self.name, self.entry)?;
        for edge in self.edges.iter() {
            writeln!(f, "    {edge}")?;
        }
        Ok(())
    }
}

/// Error returned when assembling an inconsistent [`Cfa`]
#[derive(Debug, PartialEq, Clone)]
pub enum CfaBuildError {
    /// An edge references a location no other edge and no declaration knows
    UnknownLocation(CfaLocation),
    /// The automaton has no edge leaving the entry location
    UnreachableEntry(CfaLocation),
}

impl fmt::Display for CfaBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CfaBuildError::UnknownLocation(loc) => {
                write!(f, "location {loc} is not part of the automaton")
            }
            CfaBuildError::UnreachableEntry(loc) => {
                write!(f, "no edge leaves the entry location {loc}")
            }
        }
    }
}

impl error::Error for CfaBuildError {}

/// Builder assembling a [`Cfa`] edge by edge
#[derive(Debug)]
pub struct CfaBuilder {
    name: String,
    entry: CfaLocation,
    edges: Vec<CfaEdge>,
    targets: BTreeSet<CfaLocation>,
    abstraction_locations: BTreeSet<CfaLocation>,
}

impl CfaBuilder {
    /// Start a new automaton with the given name and entry location
    pub fn new(name: impl ToString, entry: CfaLocation) -> Self {
        CfaBuilder {
            name: name.to_string(),
            entry,
            edges: Vec::new(),
            targets: BTreeSet::new(),
            abstraction_locations: BTreeSet::new(),
        }
    }

    /// Add an edge
    pub fn with_edge(mut self, from: CfaLocation, to: CfaLocation, op: CfaEdgeOp) -> Self {
        self.edges.push(CfaEdge::new(from, to, op));
        self
    }

    /// Mark `loc` as an error location
    pub fn with_target(mut self, loc: CfaLocation) -> Self {
        self.targets.insert(loc);
        self
    }

    /// Mark `loc` as an abstraction location (e.g. a loop head)
    pub fn with_abstraction_location(mut self, loc: CfaLocation) -> Self {
        self.abstraction_locations.insert(loc);
        self
    }

    /// Validate and build the automaton
    pub fn build(self) -> Result<Cfa, CfaBuildError> {
        let mut known: BTreeSet<&CfaLocation> = BTreeSet::new();
        known.insert(&self.entry);
        for edge in self.edges.iter() {
            known.insert(edge.from());
            known.insert(edge.to());
        }

        for loc in self.targets.iter().chain(self.abstraction_locations.iter()) {
            if !known.contains(loc) {
                return Err(CfaBuildError::UnknownLocation(loc.clone()));
            }
        }

        if !self.edges.iter().any(|e| e.from() == &self.entry) {
            return Err(CfaBuildError::UnreachableEntry(self.entry.clone()));
        }

        Ok(Cfa {
            name: self.name,
            entry: self.entry,
            edges: self.edges,
            targets: self.targets,
            abstraction_locations: self.abstraction_locations,
        })
    }
}
