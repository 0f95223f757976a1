//! Built-in linear integer arithmetic engine
//!
//! Formulas over SSA variables are normalized into disjunctions of
//! conjunctions of non-strict linear constraints `c1*x1 + .. + cn*xn + k >= 0`.
//! Strict comparisons are tightened using integrality (`a > b` becomes
//! `a - b - 1 >= 0`), and every constraint is divided by the gcd of its
//! variable coefficients with the constant rounded down. Satisfiability and
//! projection are decided by Fourier-Motzkin elimination.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use carve_formula::expressions::{
    BooleanConnective, BooleanExpression, ComparisonOp, IntegerExpression, IntegerOp, SsaVariable,
};
use carve_display_utils::join_iterator;

use crate::SMTSolverError;

/// A linear term `c1*x1 + .. + cn*xn + k` with integer coefficients
///
/// Coefficients are kept in a sorted map; variables with coefficient zero
/// are never stored.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinearTerm {
    coeffs: BTreeMap<SsaVariable, i64>,
    constant: i64,
}

impl LinearTerm {
    /// The constant term
    pub fn constant(&self) -> i64 {
        self.constant
    }

    fn from_constant(c: i64) -> Self {
        LinearTerm {
            coeffs: BTreeMap::new(),
            constant: c,
        }
    }

    fn from_variable(var: SsaVariable) -> Self {
        let mut coeffs = BTreeMap::new();
        coeffs.insert(var, 1);
        LinearTerm { coeffs, constant: 0 }
    }

    fn add(mut self, other: &LinearTerm) -> Result<Self, SMTSolverError> {
        for (var, c) in &other.coeffs {
            let entry = self.coeffs.entry(var.clone()).or_insert(0);
            *entry = entry
                .checked_add(*c)
                .ok_or(SMTSolverError::CoefficientOverflow)?;
            if *entry == 0 {
                self.coeffs.remove(var);
            }
        }
        self.constant = self
            .constant
            .checked_add(other.constant)
            .ok_or(SMTSolverError::CoefficientOverflow)?;
        Ok(self)
    }

    fn scale(mut self, factor: i64) -> Result<Self, SMTSolverError> {
        if factor == 0 {
            return Ok(LinearTerm::default());
        }
        for c in self.coeffs.values_mut() {
            *c = c
                .checked_mul(factor)
                .ok_or(SMTSolverError::CoefficientOverflow)?;
        }
        self.constant = self
            .constant
            .checked_mul(factor)
            .ok_or(SMTSolverError::CoefficientOverflow)?;
        Ok(self)
    }

    fn negate(self) -> Result<Self, SMTSolverError> {
        self.scale(-1)
    }

    /// Coefficient of `var`, zero if absent
    pub fn coefficient(&self, var: &SsaVariable) -> i64 {
        self.coeffs.get(var).copied().unwrap_or(0)
    }

    /// Variables with non-zero coefficient
    pub fn variables(&self) -> impl Iterator<Item = &SsaVariable> {
        self.coeffs.keys()
    }

    fn is_constant(&self) -> bool {
        self.coeffs.is_empty()
    }
}

/// Translate an integer expression into a [`LinearTerm`]
///
/// Fails with [`SMTSolverError::NonLinearTerm`] if the expression multiplies
/// two non-constant subterms.
pub fn linearize(expr: &IntegerExpression<SsaVariable>) -> Result<LinearTerm, SMTSolverError> {
    match expr {
        IntegerExpression::Atom(var) => Ok(LinearTerm::from_variable(var.clone())),
        IntegerExpression::Const(c) => Ok(LinearTerm::from_constant(*c)),
        IntegerExpression::BinaryExpr(lhs, op, rhs) => {
            let l = linearize(lhs)?;
            let r = linearize(rhs)?;
            match op {
                IntegerOp::Add => l.add(&r),
                IntegerOp::Sub => l.add(&r.negate()?),
                IntegerOp::Mul => {
                    if l.is_constant() {
                        r.scale(l.constant)
                    } else if r.is_constant() {
                        l.scale(r.constant)
                    } else {
                        Err(SMTSolverError::NonLinearTerm(expr.to_string()))
                    }
                }
            }
        }
        IntegerExpression::Neg(inner) => linearize(inner)?.negate(),
    }
}

/// A non-strict constraint `term >= 0`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConstraint {
    term: LinearTerm,
}

impl LinearConstraint {
    /// Build the constraint `term >= 0`, normalized by the gcd of the
    /// variable coefficients
    pub fn new(term: LinearTerm) -> Self {
        LinearConstraint {
            term: Self::tighten(term),
        }
    }

    /// Divide by the gcd of the variable coefficients, rounding the constant
    /// down (sound for integer solutions)
    fn tighten(mut term: LinearTerm) -> LinearTerm {
        let g = term.coeffs.values().fold(0i64, |acc, c| gcd(acc, c.abs()));
        if g > 1 {
            for c in term.coeffs.values_mut() {
                *c /= g;
            }
            term.constant = term.constant.div_euclid(g);
        }
        term
    }

    /// The underlying linear term
    pub fn term(&self) -> &LinearTerm {
        &self.term
    }

    /// A constraint without variables that can never hold
    pub fn is_contradiction(&self) -> bool {
        self.term.is_constant() && self.term.constant < 0
    }

    /// A constraint without variables that always holds
    pub fn is_trivial(&self) -> bool {
        self.term.is_constant() && self.term.constant >= 0
    }

    /// Render the constraint back into a boolean expression
    pub fn to_expression(&self) -> BooleanExpression<SsaVariable> {
        let mut lhs: Option<IntegerExpression<SsaVariable>> = None;
        let mut rhs: Option<IntegerExpression<SsaVariable>> = None;

        for (var, c) in &self.term.coeffs {
            let (side, magnitude) = if *c > 0 {
                (&mut lhs, *c)
            } else {
                (&mut rhs, -*c)
            };
            let term = if magnitude == 1 {
                IntegerExpression::Atom(var.clone())
            } else {
                IntegerExpression::Const(magnitude) * IntegerExpression::Atom(var.clone())
            };
            *side = Some(match side.take() {
                Some(acc) => acc + term,
                None => term,
            });
        }

        let k = self.term.constant;
        if k > 0 {
            let c = IntegerExpression::Const(k);
            lhs = Some(match lhs.take() {
                Some(acc) => acc + c,
                None => c,
            });
        } else if k < 0 {
            let c = IntegerExpression::Const(-k);
            rhs = Some(match rhs.take() {
                Some(acc) => acc + c,
                None => c,
            });
        }

        BooleanExpression::ComparisonExpression(
            Box::new(lhs.unwrap_or(IntegerExpression::Const(0))),
            ComparisonOp::Geq,
            Box::new(rhs.unwrap_or(IntegerExpression::Const(0))),
        )
    }
}

impl fmt::Display for LinearConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_expression())
    }
}

/// A conjunction of linear constraints
pub type Conjunct = Vec<LinearConstraint>;

/// A disjunction of conjunctions; the empty disjunction is `false` and a
/// disjunction containing an empty conjunct is `true`
pub type Dnf = Vec<Conjunct>;

/// Convert a boolean formula into disjunctive normal form
pub fn to_dnf(expr: &BooleanExpression<SsaVariable>) -> Result<Dnf, SMTSolverError> {
    to_dnf_polarity(expr, true)
}

fn to_dnf_polarity(
    expr: &BooleanExpression<SsaVariable>,
    polarity: bool,
) -> Result<Dnf, SMTSolverError> {
    match expr {
        BooleanExpression::True => Ok(if polarity { vec![vec![]] } else { vec![] }),
        BooleanExpression::False => Ok(if polarity { vec![] } else { vec![vec![]] }),
        BooleanExpression::Not(inner) => to_dnf_polarity(inner, !polarity),
        BooleanExpression::BinaryExpression(lhs, connective, rhs) => {
            let l = to_dnf_polarity(lhs, polarity)?;
            let r = to_dnf_polarity(rhs, polarity)?;
            // negation dualizes the connective
            let conjunctive = matches!(connective, BooleanConnective::And) == polarity;
            if conjunctive {
                Ok(cross_product(&l, &r))
            } else {
                Ok(l.into_iter().chain(r).collect())
            }
        }
        BooleanExpression::ComparisonExpression(lhs, op, rhs) => {
            let op = if polarity { *op } else { op.invert() };
            let diff = linearize(lhs)?.add(&linearize(rhs)?.negate()?)?;
            comparison_to_dnf(diff, op)
        }
    }
}

fn comparison_to_dnf(diff: LinearTerm, op: ComparisonOp) -> Result<Dnf, SMTSolverError> {
    fn geq(t: LinearTerm) -> LinearConstraint {
        LinearConstraint::new(t)
    }
    fn gt(t: LinearTerm) -> Result<LinearConstraint, SMTSolverError> {
        Ok(LinearConstraint::new(
            t.add(&LinearTerm::from_constant(-1))?,
        ))
    }

    match op {
        ComparisonOp::Geq => Ok(vec![vec![geq(diff)]]),
        ComparisonOp::Gt => Ok(vec![vec![gt(diff)?]]),
        ComparisonOp::Leq => Ok(vec![vec![geq(diff.negate()?)]]),
        ComparisonOp::Lt => Ok(vec![vec![gt(diff.negate()?)?]]),
        ComparisonOp::Eq => Ok(vec![vec![geq(diff.clone()), geq(diff.negate()?)]]),
        ComparisonOp::Neq => Ok(vec![vec![gt(diff.clone())?], vec![gt(diff.negate()?)?]]),
    }
}

fn cross_product(a: &Dnf, b: &Dnf) -> Dnf {
    let mut out = Vec::with_capacity(a.len() * b.len());
    for ca in a {
        for cb in b {
            let mut merged = ca.clone();
            merged.extend(cb.iter().cloned());
            out.push(merged);
        }
    }
    out
}

/// Eliminate `var` from the conjunct by Fourier-Motzkin resolution
///
/// Every pair of a lower and an upper bound on `var` is resolved into a
/// variable-free combination; constraints not mentioning `var` pass through.
/// The two multipliers are reduced by their gcd before scaling, and any
/// coefficient leaving the `i64` range is reported as an error.
pub fn eliminate_variable(conjunct: &Conjunct, var: &SsaVariable) -> Result<Conjunct, SMTSolverError> {
    let mut lower = Vec::new();
    let mut upper = Vec::new();
    let mut rest = Vec::new();

    for constraint in conjunct {
        let c = constraint.term.coefficient(var);
        if c > 0 {
            lower.push((c, constraint));
        } else if c < 0 {
            upper.push((c, constraint));
        } else {
            rest.push(constraint.clone());
        }
    }

    for (a, lo) in &lower {
        for (c, up) in &upper {
            let neg_c = c.checked_neg().ok_or(SMTSolverError::CoefficientOverflow)?;
            let g = gcd(*a, neg_c);
            let combined = lo
                .term
                .clone()
                .scale(neg_c / g)?
                .add(&up.term.clone().scale(a / g)?)?;
            debug_assert!(combined.coefficient(var) == 0);
            rest.push(LinearConstraint::new(combined));
        }
    }

    Ok(rest)
}

/// Check whether a conjunction of constraints has no integer solution
///
/// Complete for rational unsatisfiability; the gcd tightening additionally
/// catches integrality conflicts with a single variable per constraint.
pub fn conjunct_is_unsat(conjunct: &Conjunct) -> Result<bool, SMTSolverError> {
    let vars: BTreeSet<SsaVariable> = conjunct
        .iter()
        .flat_map(|c| c.term.variables().cloned())
        .collect();

    let mut current = conjunct.clone();
    if current.iter().any(LinearConstraint::is_contradiction) {
        return Ok(true);
    }

    for var in &vars {
        current = eliminate_variable(&current, var)?;
        if current.iter().any(LinearConstraint::is_contradiction) {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Check whether every conjunct of a disjunction is unsatisfiable
pub fn dnf_is_unsat(dnf: &Dnf) -> Result<bool, SMTSolverError> {
    for conjunct in dnf {
        if !conjunct_is_unsat(conjunct)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Project the conjunct onto the variables in `keep`
///
/// All other variables are eliminated. Returns `None` if the conjunct is
/// unsatisfiable, so the projection would be `false`.
pub fn project(
    conjunct: &Conjunct,
    keep: &BTreeSet<SsaVariable>,
) -> Result<Option<Conjunct>, SMTSolverError> {
    let eliminate: Vec<SsaVariable> = conjunct
        .iter()
        .flat_map(|c| c.term.variables())
        .filter(|v| !keep.contains(v))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut current = conjunct.clone();
    for var in &eliminate {
        current = eliminate_variable(&current, var)?;
    }

    if current.iter().any(LinearConstraint::is_contradiction) {
        return Ok(None);
    }

    current.retain(|c| !c.is_trivial());
    current.sort_by(|a, b| a.term.coeffs.cmp(&b.term.coeffs).then(a.term.constant.cmp(&b.term.constant)));
    current.dedup();
    Ok(Some(current))
}

/// Render a conjunct back into a boolean expression
pub fn conjunct_to_expression(conjunct: &Conjunct) -> BooleanExpression<SsaVariable> {
    BooleanExpression::and_all(conjunct.iter().map(LinearConstraint::to_expression))
}

/// Display helper listing the constraints of a conjunct
pub fn display_conjunct(conjunct: &Conjunct) -> String {
    join_iterator(conjunct.iter(), " && ")
}

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 { a } else { gcd(b, a % b) }
}
