//! Symbolic formula layer of the CARVE verifier
//!
//! This crate contains the expression types used to encode program semantics
//! symbolically:
//! - boolean and integer expressions over program variables
//!   ([`expressions`]),
//! - SSA index maps and formula instantiation ([`ssa`]),
//! - path formulas with the strongest-post style `make_and`/`make_or`
//!   operations ([`path_formula`]), and
//! - a small control-flow-automaton model the path formulas are computed
//!   from ([`cfa`]).

pub mod cfa;
pub mod expressions;
pub mod path_formula;
pub mod ssa;
