//! Encoding of instantiated formulas into [`SMTExpr`]s
//!
//! Used to confirm counterexamples against an external solver. Variables
//! are declared on demand: before a formula is asserted, all of its SSA
//! variables are declared as integer constants and cached, then the formula
//! is folded into a solver term.

use std::collections::{BTreeMap, HashMap};

use easy_smt::Response;

use carve_formula::expressions::{
    BooleanConnective, BooleanExpression, ComparisonOp, IntegerExpression, IntegerOp, SsaVariable,
};

use crate::{SMTExpr, SMTSolution, SMTSolver, SMTSolverBuilder, SMTSolverError};

/// Encoding of a type into an [`SMTExpr`] given a variable context
pub trait EncodeToSMT<C> {
    /// Encode `self` into a solver term
    fn encode_to_smt_with_ctx(&self, solver: &SMTSolver, ctx: &C) -> Result<SMTExpr, SMTSolverError>;
}

/// Context mapping SSA variables to their declared solver constants
pub trait SMTVariableContext {
    /// Get the solver constant for `var`
    ///
    /// Returns an error if the variable was never declared.
    fn get_expr_for(&self, var: &SsaVariable) -> Result<SMTExpr, SMTSolverError>;
}

impl SMTVariableContext for HashMap<SsaVariable, SMTExpr> {
    fn get_expr_for(&self, var: &SsaVariable) -> Result<SMTExpr, SMTSolverError> {
        self.get(var)
            .copied()
            .ok_or_else(|| SMTSolverError::UndeclaredVariable(var.clone()))
    }
}

/// Solver-side name of an SSA variable
///
/// SMT-LIB symbols may not contain `:`, so the scope separator of local
/// variables is rewritten.
pub fn smt_variable_name(var: &SsaVariable) -> String {
    format!(
        "v_{}_{}",
        var.variable().to_string().replace("::", "_"),
        var.index()
    )
}

impl<C: SMTVariableContext> EncodeToSMT<C> for IntegerExpression<SsaVariable> {
    fn encode_to_smt_with_ctx(&self, solver: &SMTSolver, ctx: &C) -> Result<SMTExpr, SMTSolverError> {
        match self {
            IntegerExpression::Atom(var) => ctx.get_expr_for(var),
            IntegerExpression::Const(c) => Ok(solver.numeral(*c)),
            IntegerExpression::BinaryExpr(lhs, op, rhs) => {
                let lhs = lhs.encode_to_smt_with_ctx(solver, ctx)?;
                let rhs = rhs.encode_to_smt_with_ctx(solver, ctx)?;

                Ok(match op {
                    IntegerOp::Add => solver.plus(lhs, rhs),
                    IntegerOp::Sub => solver.sub(lhs, rhs),
                    IntegerOp::Mul => solver.times(lhs, rhs),
                })
            }
            IntegerExpression::Neg(expr) => {
                let expr = expr.encode_to_smt_with_ctx(solver, ctx)?;
                Ok(solver.negate(expr))
            }
        }
    }
}

impl<C: SMTVariableContext> EncodeToSMT<C> for BooleanExpression<SsaVariable> {
    fn encode_to_smt_with_ctx(&self, solver: &SMTSolver, ctx: &C) -> Result<SMTExpr, SMTSolverError> {
        match self {
            BooleanExpression::ComparisonExpression(lhs, op, rhs) => {
                let lhs = lhs.encode_to_smt_with_ctx(solver, ctx)?;
                let rhs = rhs.encode_to_smt_with_ctx(solver, ctx)?;

                Ok(match op {
                    ComparisonOp::Gt => solver.gt(lhs, rhs),
                    ComparisonOp::Geq => solver.gte(lhs, rhs),
                    ComparisonOp::Eq => solver.eq(lhs, rhs),
                    ComparisonOp::Neq => solver.not(solver.eq(lhs, rhs)),
                    ComparisonOp::Leq => solver.lte(lhs, rhs),
                    ComparisonOp::Lt => solver.lt(lhs, rhs),
                })
            }
            BooleanExpression::BinaryExpression(lhs, op, rhs) => {
                let lhs = lhs.encode_to_smt_with_ctx(solver, ctx)?;
                let rhs = rhs.encode_to_smt_with_ctx(solver, ctx)?;

                Ok(match op {
                    BooleanConnective::And => solver.and(lhs, rhs),
                    BooleanConnective::Or => solver.or(lhs, rhs),
                })
            }
            BooleanExpression::Not(expr) => {
                let expr = expr.encode_to_smt_with_ctx(solver, ctx)?;
                Ok(solver.not(expr))
            }
            BooleanExpression::True => Ok(solver.true_()),
            BooleanExpression::False => Ok(solver.false_()),
        }
    }
}

/// Context for asserting path formulas against an external solver
pub struct PathSMTContext {
    solver: SMTSolver,
    vars: HashMap<SsaVariable, SMTExpr>,
}

impl PathSMTContext {
    /// Create a new context over a fresh solver instance
    pub fn new(builder: &SMTSolverBuilder) -> Self {
        PathSMTContext {
            solver: builder.new_solver(),
            vars: HashMap::new(),
        }
    }

    /// Declare any not yet declared variables of `formula` and assert it
    pub fn assert_formula(
        &mut self,
        formula: &BooleanExpression<SsaVariable>,
    ) -> Result<(), SMTSolverError> {
        for var in formula.atoms() {
            if !self.vars.contains_key(&var) {
                let expr = self
                    .solver
                    .declare_const(smt_variable_name(&var), self.solver.int_sort())?;
                self.vars.insert(var, expr);
            }
        }

        let encoded = formula.encode_to_smt_with_ctx(&self.solver, &self.vars)?;
        self.solver.assert(encoded)?;
        Ok(())
    }

    /// Check satisfiability of all asserted formulas
    pub fn check(&mut self) -> Result<SMTSolution, SMTSolverError> {
        match self.solver.check()? {
            Response::Sat => Ok(SMTSolution::SAT),
            Response::Unsat => Ok(SMTSolution::UNSAT),
            Response::Unknown => Err(SMTSolverError::SolverTimeout),
        }
    }

    /// Extract the model for all declared variables after a satisfiable check
    pub fn get_model(&mut self) -> Result<BTreeMap<SsaVariable, i64>, SMTSolverError> {
        let exprs: Vec<SMTExpr> = self.vars.values().copied().collect();
        let keys: Vec<SsaVariable> = self.vars.keys().cloned().collect();

        let solution = self.solver.get_value(exprs)?;

        solution
            .into_iter()
            .zip(keys)
            .map(|((_, value), var)| {
                let assignment = self.solver.get_i64(value).ok_or_else(|| {
                    let rendered = self.solver.display(value).to_string();
                    SMTSolverError::SolutionExtractionParseIntError(rendered)
                })?;
                Ok((var, assignment))
            })
            .collect()
    }
}
