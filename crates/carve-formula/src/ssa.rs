//! SSA index maps and formula instantiation
//!
//! A path formula assigns every program variable a current SSA index; the map
//! records how often each variable has been assigned on the path so far.
//! Instantiating a formula replaces every plain variable with its indexed
//! version according to the map, uninstantiating drops the indices again.

use std::collections::BTreeMap;
use std::fmt;

use carve_display_utils::join_iterator;

use crate::expressions::{BooleanExpression, SsaVariable, Variable};

/// Index assigned to a variable that has not been assigned yet
pub const DEFAULT_SSA_INDEX: u32 = 1;

/// Map from program variables to their current SSA index
///
/// Variables missing from the map implicitly carry [`DEFAULT_SSA_INDEX`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SsaMap(BTreeMap<Variable, u32>);

impl SsaMap {
    /// Create an empty map in which every variable has its default index
    pub fn new() -> Self {
        SsaMap(BTreeMap::new())
    }

    /// The current index of `var`
    pub fn index_of(&self, var: &Variable) -> u32 {
        self.0.get(var).copied().unwrap_or(DEFAULT_SSA_INDEX)
    }

    /// Advance the index of `var` by one and return the new index
    pub fn increment(&mut self, var: &Variable) -> u32 {
        let next = self.index_of(var) + 1;
        self.0.insert(var.clone(), next);
        next
    }

    /// Force the index of `var` to `index`
    pub fn set_index(&mut self, var: Variable, index: u32) {
        self.0.insert(var, index);
    }

    /// Pointwise maximum of two maps
    ///
    /// Used when two branches of a path merge: the merged path continues with
    /// the highest index either branch produced for each variable.
    pub fn merge_max(&self, other: &SsaMap) -> SsaMap {
        let mut merged = self.0.clone();
        for (var, idx) in other.0.iter() {
            let entry = merged.entry(var.clone()).or_insert(*idx);
            *entry = (*entry).max(*idx);
        }
        SsaMap(merged)
    }

    /// Iterate over all variables with an explicitly stored index
    pub fn iter(&self) -> impl Iterator<Item = (&Variable, u32)> {
        self.0.iter().map(|(v, i)| (v, *i))
    }

    /// Instantiate `var` with its current index
    pub fn instantiate_variable(&self, var: &Variable) -> SsaVariable {
        SsaVariable::new(var.clone(), self.index_of(var))
    }
}

impl fmt::Display for SsaMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]",
            join_iterator(self.0.iter().map(|(v, i)| format!("{v}->{i}")), ", ")
        )
    }
}

/// Instantiate an uninstantiated formula with the indices of `ssa`
pub fn instantiate(
    expr: &BooleanExpression<Variable>,
    ssa: &SsaMap,
) -> BooleanExpression<SsaVariable> {
    expr.map_atoms(&|v| ssa.instantiate_variable(v))
}

/// Drop the SSA indices of an instantiated formula
///
/// Different indices of the same variable collapse onto the plain variable;
/// this is only meaningful for formulas that talk about a single point on a
/// path, such as interpolants.
pub fn uninstantiate(expr: &BooleanExpression<SsaVariable>) -> BooleanExpression<Variable> {
    expr.map_atoms(&|v| v.variable().clone())
}
