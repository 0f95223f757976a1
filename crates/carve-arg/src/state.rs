//! Predicate abstract states attached to ARG nodes

use std::fmt;

use carve_formula::expressions::{BooleanExpression, SsaVariable, Variable};
use carve_formula::path_formula::PathFormula;
use carve_formula::ssa;
use carve_formula::cfa::CfaLocation;

/// The over-approximation computed at an abstraction boundary
///
/// Carries the uninstantiated formula, its instantiation under the SSA map
/// of the abstraction point, and the block formula the abstraction was
/// computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct AbstractionFormula {
    formula: BooleanExpression<Variable>,
    instantiated: BooleanExpression<SsaVariable>,
    block_formula: PathFormula,
}

impl AbstractionFormula {
    /// Create a new abstraction formula
    ///
    /// `instantiated` must be `formula` instantiated under the SSA map of
    /// `block_formula`.
    pub fn new(
        formula: BooleanExpression<Variable>,
        instantiated: BooleanExpression<SsaVariable>,
        block_formula: PathFormula,
    ) -> Self {
        AbstractionFormula {
            formula,
            instantiated,
            block_formula,
        }
    }

    /// The trivial abstraction `true`
    pub fn new_true(block_formula: PathFormula) -> Self {
        AbstractionFormula {
            formula: BooleanExpression::True,
            instantiated: BooleanExpression::True,
            block_formula,
        }
    }

    /// Build from the uninstantiated formula, instantiating under the SSA
    /// map of `block_formula`
    pub fn from_formula(formula: BooleanExpression<Variable>, block_formula: PathFormula) -> Self {
        let instantiated = ssa::instantiate(&formula, block_formula.ssa());
        AbstractionFormula {
            formula,
            instantiated,
            block_formula,
        }
    }

    /// The uninstantiated formula
    pub fn formula(&self) -> &BooleanExpression<Variable> {
        &self.formula
    }

    /// The formula instantiated at the abstraction point's SSA indices
    pub fn instantiated(&self) -> &BooleanExpression<SsaVariable> {
        &self.instantiated
    }

    /// The block formula this abstraction was computed from
    pub fn block_formula(&self) -> &PathFormula {
        &self.block_formula
    }

    /// Whether the abstraction is the trivial `true`
    pub fn is_true(&self) -> bool {
        self.formula.is_true()
    }

    /// Whether the abstraction is `false` (state unreachable)
    pub fn is_false(&self) -> bool {
        self.formula.is_false()
    }
}

impl fmt::Display for AbstractionFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.formula)
    }
}

/// Abstract state of the predicate analysis
///
/// At an abstraction boundary the state carries a freshly computed
/// [`AbstractionFormula`] and an empty path formula continuing from the
/// boundary's SSA context. Between boundaries only the path formula grows;
/// the abstraction is inherited from the last boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct PredicateAbstractState {
    location: CfaLocation,
    abstraction: AbstractionFormula,
    path_formula: PathFormula,
    is_abstraction_state: bool,
}

impl PredicateAbstractState {
    /// Create a state at an abstraction boundary
    pub fn new_abstraction(
        location: CfaLocation,
        abstraction: AbstractionFormula,
        path_formula: PathFormula,
    ) -> Self {
        PredicateAbstractState {
            location,
            abstraction,
            path_formula,
            is_abstraction_state: true,
        }
    }

    /// Create an intermediate state inheriting the last boundary's
    /// abstraction
    pub fn new_intermediate(
        location: CfaLocation,
        abstraction: AbstractionFormula,
        path_formula: PathFormula,
    ) -> Self {
        PredicateAbstractState {
            location,
            abstraction,
            path_formula,
            is_abstraction_state: false,
        }
    }

    /// The program location of this state
    pub fn location(&self) -> &CfaLocation {
        &self.location
    }

    /// The abstraction of the last boundary (or this state, at a boundary)
    pub fn abstraction(&self) -> &AbstractionFormula {
        &self.abstraction
    }

    /// The path formula accumulated since the last abstraction boundary
    pub fn path_formula(&self) -> &PathFormula {
        &self.path_formula
    }

    /// Whether this state sits at an abstraction boundary
    pub fn is_abstraction_state(&self) -> bool {
        self.is_abstraction_state
    }

    /// Replace the abstraction formula
    ///
    /// This is the core mutation performed by refinement; only abstraction
    /// states may be strengthened.
    pub fn set_abstraction(&mut self, abstraction: AbstractionFormula) {
        debug_assert!(self.is_abstraction_state);
        self.abstraction = abstraction;
    }
}

impl fmt::Display for PredicateAbstractState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_abstraction_state {
            write!(f, "{}: abstraction {}", self.location, self.abstraction)
        } else {
            write!(f, "{}: path {}", self.location, self.path_formula)
        }
    }
}
