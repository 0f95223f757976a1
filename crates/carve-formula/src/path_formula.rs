//! Path formulas: SSA-indexed strongest-post encodings of CFA paths
//!
//! A path formula summarizes all concrete steps since the last abstraction
//! boundary as one instantiated boolean formula together with the SSA map
//! the encoding ended on. Path formulas are only ever extended
//! ([`PathFormulaManager::make_and`]) or merged
//! ([`PathFormulaManager::make_or`]); a new, empty formula is started at
//! every abstraction boundary.

use std::fmt;

use crate::cfa::{CfaEdge, CfaEdgeOp};
use crate::expressions::{
    BooleanExpression, ComparisonOp, IntegerExpression, SsaVariable, Variable,
};
use crate::ssa::{self, SsaMap};

/// Formula plus SSA context accumulated along a path
#[derive(Debug, Clone, PartialEq)]
pub struct PathFormula {
    formula: BooleanExpression<SsaVariable>,
    ssa: SsaMap,
    length: u32,
}

impl PathFormula {
    /// The instantiated boolean formula
    pub fn formula(&self) -> &BooleanExpression<SsaVariable> {
        &self.formula
    }

    /// The SSA map giving each variable's current index
    pub fn ssa(&self) -> &SsaMap {
        &self.ssa
    }

    /// Number of edges encoded into this formula
    pub fn length(&self) -> u32 {
        self.length
    }
}

impl fmt::Display for PathFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.formula, self.ssa)
    }
}

/// Factory for all path formula operations
///
/// The manager is stateless; it exists so the strongest-post encoding is a
/// single replaceable seam of the analysis.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathFormulaManager;

impl PathFormulaManager {
    /// Create a new manager
    pub fn new() -> Self {
        PathFormulaManager
    }

    /// The empty path formula: `true` with all variables at their default
    /// index
    pub fn make_empty(&self) -> PathFormula {
        PathFormula {
            formula: BooleanExpression::True,
            ssa: SsaMap::new(),
            length: 0,
        }
    }

    /// An empty path formula continuing from the SSA context of `pf`
    ///
    /// Used at abstraction boundaries: the fresh block starts with `true`
    /// but keeps the variable indices of the previous block so instantiated
    /// abstraction formulas line up.
    pub fn make_empty_with_context_from(&self, pf: &PathFormula) -> PathFormula {
        PathFormula {
            formula: BooleanExpression::True,
            ssa: pf.ssa.clone(),
            length: 0,
        }
    }

    /// Extend `pf` with the semantics of `edge`
    pub fn make_and(&self, pf: &PathFormula, edge: &CfaEdge) -> PathFormula {
        let mut ssa = pf.ssa.clone();
        let constraint = match edge.op() {
            CfaEdgeOp::Assume(cond) => ssa::instantiate(cond, &ssa),
            CfaEdgeOp::Assign(var, expr) => {
                let rhs = expr.map_atoms(&|v: &Variable| ssa.instantiate_variable(v));
                let new_index = ssa.increment(var);
                BooleanExpression::ComparisonExpression(
                    Box::new(IntegerExpression::Atom(SsaVariable::new(
                        var.clone(),
                        new_index,
                    ))),
                    ComparisonOp::Eq,
                    Box::new(rhs),
                )
            }
            CfaEdgeOp::Havoc(var) => {
                // fresh index, unconstrained
                ssa.increment(var);
                BooleanExpression::True
            }
            CfaEdgeOp::FunctionCall { .. } | CfaEdgeOp::FunctionReturn { .. } | CfaEdgeOp::Skip => {
                BooleanExpression::True
            }
        };

        PathFormula {
            formula: pf.formula.clone().and(constraint),
            ssa,
            length: pf.length + 1,
        }
    }

    /// Conjoin an extra assumption onto `pf` without advancing any index
    ///
    /// This is the hook analyses use to strengthen a path formula with side
    /// conditions (e.g. overflow assumptions) before an edge is applied.
    pub fn make_and_assumption(
        &self,
        pf: &PathFormula,
        assumption: &BooleanExpression<Variable>,
    ) -> PathFormula {
        PathFormula {
            formula: pf
                .formula
                .clone()
                .and(ssa::instantiate(assumption, &pf.ssa)),
            ssa: pf.ssa.clone(),
            length: pf.length,
        }
    }

    /// Disjoin two path formulas that meet at the same location
    ///
    /// The merged SSA map is the pointwise maximum; each operand is patched
    /// with equalities `x@max == x@own` for every variable whose index lags
    /// behind, so both disjuncts talk about the same final variables.
    pub fn make_or(&self, a: &PathFormula, b: &PathFormula) -> PathFormula {
        let merged_ssa = a.ssa.merge_max(&b.ssa);

        let patched_a = Self::align_to(&a.formula, &a.ssa, &merged_ssa);
        let patched_b = Self::align_to(&b.formula, &b.ssa, &merged_ssa);

        PathFormula {
            formula: patched_a.or(patched_b),
            ssa: merged_ssa,
            length: a.length.max(b.length),
        }
    }

    /// Rebuild the SSA indices after returning from `callee`
    ///
    /// The callee advanced its own locals (and any globals it touched)
    /// independently of the caller. After the return, globals continue from
    /// the callee's exit indices while the callee's locals fall back out of
    /// scope to the indices the stored call-site formula knew.
    pub fn rebuild_indices_after_return(
        &self,
        exit: &PathFormula,
        call_site: &PathFormula,
        callee: &str,
    ) -> PathFormula {
        let mut ssa = exit.ssa.clone();
        for (var, idx) in call_site.ssa.iter() {
            if var.function() == Some(callee) {
                ssa.set_index(var.clone(), idx);
            }
        }
        // callee locals unknown to the call site reset to their default
        for (var, _) in exit.ssa.iter() {
            if var.function() == Some(callee) {
                ssa.set_index(var.clone(), call_site.ssa.index_of(var));
            }
        }

        PathFormula {
            formula: exit.formula.clone(),
            ssa,
            length: exit.length,
        }
    }

    /// Patch `formula` (encoded under `own`) with equalities so it
    /// constrains the variables of `merged`
    fn align_to(
        formula: &BooleanExpression<SsaVariable>,
        own: &SsaMap,
        merged: &SsaMap,
    ) -> BooleanExpression<SsaVariable> {
        let mut patched = formula.clone();
        for (var, merged_idx) in merged.iter() {
            let own_idx = own.index_of(var);
            if own_idx < merged_idx {
                patched = patched.and(BooleanExpression::ComparisonExpression(
                    Box::new(IntegerExpression::Atom(SsaVariable::new(
                        var.clone(),
                        merged_idx,
                    ))),
                    ComparisonOp::Eq,
                    Box::new(IntegerExpression::Atom(SsaVariable::new(
                        var.clone(),
                        own_idx,
                    ))),
                ));
            }
        }
        patched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfa::CfaLocation;

    fn loc(id: u32) -> CfaLocation {
        CfaLocation::new(id, "main")
    }

    fn x() -> Variable {
        Variable::new("x")
    }

    fn assign_x_const(c: i64) -> CfaEdge {
        CfaEdge::new(
            loc(0),
            loc(1),
            CfaEdgeOp::Assign(x(), IntegerExpression::Const(c)),
        )
    }

    #[test]
    fn test_make_empty() {
        let mgr = PathFormulaManager::new();
        let pf = mgr.make_empty();
        assert!(pf.formula().is_true());
        assert_eq!(pf.length(), 0);
    }

    #[test]
    fn test_make_and_assume() {
        let mgr = PathFormulaManager::new();
        let cond = BooleanExpression::ComparisonExpression(
            Box::new(IntegerExpression::Atom(x())),
            ComparisonOp::Gt,
            Box::new(IntegerExpression::Const(0)),
        );
        let edge = CfaEdge::new(loc(0), loc(1), CfaEdgeOp::Assume(cond));

        let pf = mgr.make_and(&mgr.make_empty(), &edge);
        assert_eq!(pf.formula().to_string(), "x@1 > 0");
        assert_eq!(pf.length(), 1);
    }

    #[test]
    fn test_make_and_assign_advances_index() {
        let mgr = PathFormulaManager::new();
        let pf = mgr.make_and(&mgr.make_empty(), &assign_x_const(1));
        assert_eq!(pf.formula().to_string(), "x@2 == 1");
        assert_eq!(pf.ssa().index_of(&x()), 2);

        // self-referencing assignment reads the old index
        let edge = CfaEdge::new(
            loc(1),
            loc(2),
            CfaEdgeOp::Assign(x(), IntegerExpression::Atom(x()) + IntegerExpression::Const(1)),
        );
        let pf = mgr.make_and(&pf, &edge);
        assert_eq!(pf.formula().to_string(), "(x@2 == 1 && x@3 == (x@2 + 1))");
    }

    #[test]
    fn test_make_and_havoc() {
        let mgr = PathFormulaManager::new();
        let edge = CfaEdge::new(loc(0), loc(1), CfaEdgeOp::Havoc(x()));
        let pf = mgr.make_and(&mgr.make_empty(), &edge);
        assert!(pf.formula().is_true());
        assert_eq!(pf.ssa().index_of(&x()), 2);
    }

    #[test]
    fn test_make_or_aligns_indices() {
        let mgr = PathFormulaManager::new();
        // branch a: x := 1 (index 2); branch b: skip (index 1)
        let a = mgr.make_and(&mgr.make_empty(), &assign_x_const(1));
        let b = mgr.make_and(
            &mgr.make_empty(),
            &CfaEdge::new(loc(0), loc(1), CfaEdgeOp::Skip),
        );

        let merged = mgr.make_or(&a, &b);
        assert_eq!(merged.ssa().index_of(&x()), 2);
        // branch b must be patched with x@2 == x@1
        assert_eq!(
            merged.formula().to_string(),
            "(x@2 == 1 || x@2 == x@1)"
        );
    }

    #[test]
    fn test_make_empty_with_context() {
        let mgr = PathFormulaManager::new();
        let pf = mgr.make_and(&mgr.make_empty(), &assign_x_const(1));
        let fresh = mgr.make_empty_with_context_from(&pf);
        assert!(fresh.formula().is_true());
        assert_eq!(fresh.ssa().index_of(&x()), 2);
        assert_eq!(fresh.length(), 0);
    }

    #[test]
    fn test_make_and_assumption_keeps_indices() {
        let mgr = PathFormulaManager::new();
        let pf = mgr.make_and(&mgr.make_empty(), &assign_x_const(1));
        let cond = BooleanExpression::ComparisonExpression(
            Box::new(IntegerExpression::Atom(x())),
            ComparisonOp::Lt,
            Box::new(IntegerExpression::Const(100)),
        );
        let pf = mgr.make_and_assumption(&pf, &cond);
        assert_eq!(pf.formula().to_string(), "(x@2 == 1 && x@2 < 100)");
        assert_eq!(pf.ssa().index_of(&x()), 2);
    }

    #[test]
    fn test_rebuild_indices_after_return() {
        let mgr = PathFormulaManager::new();
        let g = Variable::new("g");
        let local = Variable::scoped("callee", "t");

        // call site: g@1, callee::t@1
        let call_site = mgr.make_empty();

        // callee advanced both g and its local t
        let mut exit = mgr.make_empty();
        exit = mgr.make_and(
            &exit,
            &CfaEdge::new(
                CfaLocation::new(0, "callee"),
                CfaLocation::new(1, "callee"),
                CfaEdgeOp::Assign(g.clone(), IntegerExpression::Const(1)),
            ),
        );
        exit = mgr.make_and(
            &exit,
            &CfaEdge::new(
                CfaLocation::new(1, "callee"),
                CfaLocation::new(2, "callee"),
                CfaEdgeOp::Assign(local.clone(), IntegerExpression::Const(2)),
            ),
        );

        let rebuilt = mgr.rebuild_indices_after_return(&exit, &call_site, "callee");
        // global continues from the callee exit, the local falls back
        assert_eq!(rebuilt.ssa().index_of(&g), 2);
        assert_eq!(rebuilt.ssa().index_of(&local), 1);
    }
}
