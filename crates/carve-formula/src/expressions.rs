//! Boolean and integer expressions over program variables
//!
//! Formulas appear in two flavors throughout CARVE: *uninstantiated* formulas
//! over plain [`Variable`]s (abstraction formulas, predicates) and
//! *instantiated* formulas over [`SsaVariable`]s, where every variable carries
//! the SSA index assigned to it by a path formula. Both flavors share the same
//! expression types, which are generic over the atom.
//!
//! # Example
//!
//! ```
//! use carve_formula::expressions::*;
//!
//! // x > 0 && y <= 5
//! let expr = BooleanExpression::ComparisonExpression(
//!     Box::new(IntegerExpression::Atom(Variable::new("x"))),
//!     ComparisonOp::Gt,
//!     Box::new(IntegerExpression::Const(0)),
//! ) & BooleanExpression::ComparisonExpression(
//!     Box::new(IntegerExpression::Atom(Variable::new("y"))),
//!     ComparisonOp::Leq,
//!     Box::new(IntegerExpression::Const(5)),
//! );
//! assert_eq!(expr.to_string(), "(x > 0 && y <= 5)");
//! ```

use std::fmt::{Debug, Display};
use std::hash::Hash;

use serde::{Deserialize, Serialize};

pub mod properties;

/// Trait implemented by the atoms of an expression
///
/// Atoms are the leaves integer expressions are built from; in this crate
/// these are program variables, either plain or SSA-indexed.
pub trait Atomic: Debug + Display + Hash + Clone + Eq + Ord {
    /// The source-program name of the atom, without any SSA index
    fn name(&self) -> &str;
}

/// A program variable, without SSA index
///
/// Uninstantiated formulas (abstraction formulas, predicates) range over
/// plain variables. Variable names are unique within a program; locals are
/// qualified with their function name (`"main::x"`).
#[derive(Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Variable(String);

impl Variable {
    /// Create a new variable with the given name
    pub fn new(name: impl ToString) -> Self {
        Variable(name.to_string())
    }

    /// Create a variable local to `function`
    pub fn scoped(function: &str, name: &str) -> Self {
        Variable(format!("{function}::{name}"))
    }

    /// The function this variable is local to, if any
    pub fn function(&self) -> Option<&str> {
        self.0.split_once("::").map(|(f, _)| f)
    }

    /// Whether the variable is global (not qualified with a function name)
    pub fn is_global(&self) -> bool {
        self.function().is_none()
    }
}

impl From<&str> for Variable {
    fn from(s: &str) -> Self {
        Variable::new(s)
    }
}

impl Atomic for Variable {
    fn name(&self) -> &str {
        &self.0
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An SSA-indexed program variable
///
/// Instantiated formulas range over SSA variables: `x@3` denotes the value of
/// `x` after its third assignment on the path under consideration.
#[derive(Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SsaVariable {
    variable: Variable,
    index: u32,
}

impl SsaVariable {
    /// Instantiate `variable` with SSA index `index`
    pub fn new(variable: Variable, index: u32) -> Self {
        SsaVariable { variable, index }
    }

    /// The underlying uninstantiated variable
    pub fn variable(&self) -> &Variable {
        &self.variable
    }

    /// The SSA index
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl Atomic for SsaVariable {
    fn name(&self) -> &str {
        self.variable.name()
    }
}

impl Display for SsaVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.variable, self.index)
    }
}

/// Boolean expressions over integer expressions with atoms of type `T`
#[derive(Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BooleanExpression<T: Atomic> {
    /// Comparison between two integer expressions
    ComparisonExpression(
        Box<IntegerExpression<T>>,
        ComparisonOp,
        Box<IntegerExpression<T>>,
    ),
    /// Two boolean expressions combined through a boolean connective
    BinaryExpression(
        Box<BooleanExpression<T>>,
        BooleanConnective,
        Box<BooleanExpression<T>>,
    ),
    /// Negation of a boolean expression
    Not(Box<BooleanExpression<T>>),
    /// true
    True,
    /// false
    False,
}

/// Integer expressions over atoms of type `T` and integer constants
#[derive(Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IntegerExpression<T: Atomic> {
    /// Atom of type T
    Atom(T),
    /// Integer constant
    Const(i64),
    /// Two integer expressions combined through an arithmetic operator
    BinaryExpr(
        Box<IntegerExpression<T>>,
        IntegerOp,
        Box<IntegerExpression<T>>,
    ),
    /// Negated expression
    Neg(Box<IntegerExpression<T>>),
}

/// Operators for comparing integer expressions
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ComparisonOp {
    /// Greater
    Gt,
    /// Greater or equal
    Geq,
    /// Equal
    Eq,
    /// Not equal
    Neq,
    /// Less or equal
    Leq,
    /// Less
    Lt,
}

/// Connectives for boolean expressions
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BooleanConnective {
    /// And
    And,
    /// Or
    Or,
}

/// Binary operators for integer expressions
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IntegerOp {
    /// Addition
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
}

impl<T: Atomic> Display for BooleanExpression<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BooleanExpression::ComparisonExpression(lhs, op, rhs) => {
                write!(f, "{lhs} {op} {rhs}")
            }
            BooleanExpression::BinaryExpression(lhs, op, rhs) => {
                write!(f, "({lhs} {op} {rhs})")
            }
            BooleanExpression::Not(b) => write!(f, "!{b}"),
            BooleanExpression::True => write!(f, "true"),
            BooleanExpression::False => write!(f, "false"),
        }
    }
}

impl<T: Atomic> Display for IntegerExpression<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegerExpression::Atom(a) => write!(f, "{a}"),
            IntegerExpression::Const(c) => write!(f, "{c}"),
            IntegerExpression::BinaryExpr(lhs, op, rhs) => write!(f, "({lhs} {op} {rhs})"),
            IntegerExpression::Neg(ex) => write!(f, "-{ex}"),
        }
    }
}

impl Display for ComparisonOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComparisonOp::Gt => write!(f, ">"),
            ComparisonOp::Geq => write!(f, ">="),
            ComparisonOp::Eq => write!(f, "=="),
            ComparisonOp::Neq => write!(f, "!="),
            ComparisonOp::Leq => write!(f, "<="),
            ComparisonOp::Lt => write!(f, "<"),
        }
    }
}

impl Display for BooleanConnective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BooleanConnective::And => write!(f, "&&"),
            BooleanConnective::Or => write!(f, "||"),
        }
    }
}

impl Display for IntegerOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegerOp::Add => write!(f, "+"),
            IntegerOp::Sub => write!(f, "-"),
            IntegerOp::Mul => write!(f, "*"),
        }
    }
}
