//! Structural operations on expressions: atom collection, substitution,
//! smart constructors, evaluation under an environment and operator
//! overloads for convenient construction

use std::collections::{BTreeMap, BTreeSet};
use std::ops;

use super::{Atomic, BooleanConnective, BooleanExpression, ComparisonOp, IntegerExpression};
use crate::expressions::IntegerOp;

impl<T: Atomic> IntegerExpression<T> {
    /// Collect all atoms referenced by this expression into `out`
    pub fn collect_atoms(&self, out: &mut BTreeSet<T>) {
        match self {
            IntegerExpression::Atom(a) => {
                out.insert(a.clone());
            }
            IntegerExpression::Const(_) => {}
            IntegerExpression::BinaryExpr(lhs, _, rhs) => {
                lhs.collect_atoms(out);
                rhs.collect_atoms(out);
            }
            IntegerExpression::Neg(ex) => ex.collect_atoms(out),
        }
    }

    /// Rewrite every atom of the expression with `f`
    pub fn map_atoms<U: Atomic>(&self, f: &impl Fn(&T) -> U) -> IntegerExpression<U> {
        match self {
            IntegerExpression::Atom(a) => IntegerExpression::Atom(f(a)),
            IntegerExpression::Const(c) => IntegerExpression::Const(*c),
            IntegerExpression::BinaryExpr(lhs, op, rhs) => IntegerExpression::BinaryExpr(
                Box::new(lhs.map_atoms(f)),
                *op,
                Box::new(rhs.map_atoms(f)),
            ),
            IntegerExpression::Neg(ex) => IntegerExpression::Neg(Box::new(ex.map_atoms(f))),
        }
    }

    /// Evaluate the expression under the given variable assignment
    ///
    /// Returns `None` if the expression references an atom that is missing
    /// from the assignment.
    pub fn evaluate(&self, env: &BTreeMap<T, i64>) -> Option<i64> {
        match self {
            IntegerExpression::Atom(a) => env.get(a).copied(),
            IntegerExpression::Const(c) => Some(*c),
            IntegerExpression::BinaryExpr(lhs, op, rhs) => {
                let lhs = lhs.evaluate(env)?;
                let rhs = rhs.evaluate(env)?;
                Some(match op {
                    IntegerOp::Add => lhs + rhs,
                    IntegerOp::Sub => lhs - rhs,
                    IntegerOp::Mul => lhs * rhs,
                })
            }
            IntegerExpression::Neg(ex) => ex.evaluate(env).map(|v| -v),
        }
    }
}

impl<T: Atomic> BooleanExpression<T> {
    /// Whether this expression is syntactically `true`
    pub fn is_true(&self) -> bool {
        matches!(self, BooleanExpression::True)
    }

    /// Whether this expression is syntactically `false`
    pub fn is_false(&self) -> bool {
        matches!(self, BooleanExpression::False)
    }

    /// Conjoin two expressions, dropping neutral operands
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (BooleanExpression::True, e) | (e, BooleanExpression::True) => e,
            (BooleanExpression::False, _) | (_, BooleanExpression::False) => {
                BooleanExpression::False
            }
            (lhs, rhs) => lhs & rhs,
        }
    }

    /// Disjoin two expressions, dropping neutral operands
    pub fn or(self, other: Self) -> Self {
        match (self, other) {
            (BooleanExpression::False, e) | (e, BooleanExpression::False) => e,
            (BooleanExpression::True, _) | (_, BooleanExpression::True) => BooleanExpression::True,
            (lhs, rhs) => lhs | rhs,
        }
    }

    /// Conjunction of all expressions in the iterator
    pub fn and_all(exprs: impl IntoIterator<Item = Self>) -> Self {
        exprs
            .into_iter()
            .fold(BooleanExpression::True, |acc, e| acc.and(e))
    }

    /// Disjunction of all expressions in the iterator
    pub fn or_all(exprs: impl IntoIterator<Item = Self>) -> Self {
        exprs
            .into_iter()
            .fold(BooleanExpression::False, |acc, e| acc.or(e))
    }

    /// Collect all atoms referenced by this expression into `out`
    pub fn collect_atoms(&self, out: &mut BTreeSet<T>) {
        match self {
            BooleanExpression::ComparisonExpression(lhs, _, rhs) => {
                lhs.collect_atoms(out);
                rhs.collect_atoms(out);
            }
            BooleanExpression::BinaryExpression(lhs, _, rhs) => {
                lhs.collect_atoms(out);
                rhs.collect_atoms(out);
            }
            BooleanExpression::Not(e) => e.collect_atoms(out),
            BooleanExpression::True | BooleanExpression::False => {}
        }
    }

    /// All atoms referenced by this expression
    pub fn atoms(&self) -> BTreeSet<T> {
        let mut out = BTreeSet::new();
        self.collect_atoms(&mut out);
        out
    }

    /// Rewrite every atom of the expression with `f`
    pub fn map_atoms<U: Atomic>(&self, f: &impl Fn(&T) -> U) -> BooleanExpression<U> {
        match self {
            BooleanExpression::ComparisonExpression(lhs, op, rhs) => {
                BooleanExpression::ComparisonExpression(
                    Box::new(lhs.map_atoms(f)),
                    *op,
                    Box::new(rhs.map_atoms(f)),
                )
            }
            BooleanExpression::BinaryExpression(lhs, conn, rhs) => {
                BooleanExpression::BinaryExpression(
                    Box::new(lhs.map_atoms(f)),
                    *conn,
                    Box::new(rhs.map_atoms(f)),
                )
            }
            BooleanExpression::Not(e) => BooleanExpression::Not(Box::new(e.map_atoms(f))),
            BooleanExpression::True => BooleanExpression::True,
            BooleanExpression::False => BooleanExpression::False,
        }
    }

    /// Extract the atomic comparison expressions appearing in this formula
    ///
    /// With `split_equalities` set, an equality atom `a == b` is returned as
    /// the two inequalities `a <= b` and `a >= b` instead. Duplicates are
    /// removed; trivial constants are skipped.
    pub fn extract_atomic_comparisons(&self, split_equalities: bool) -> Vec<BooleanExpression<T>> {
        let mut out = Vec::new();
        self.collect_comparisons(split_equalities, &mut out);
        out.dedup();
        out
    }

    fn collect_comparisons(&self, split_equalities: bool, out: &mut Vec<BooleanExpression<T>>) {
        match self {
            BooleanExpression::ComparisonExpression(lhs, op, rhs) => {
                if split_equalities && *op == ComparisonOp::Eq {
                    let leq = BooleanExpression::ComparisonExpression(
                        lhs.clone(),
                        ComparisonOp::Leq,
                        rhs.clone(),
                    );
                    let geq = BooleanExpression::ComparisonExpression(
                        lhs.clone(),
                        ComparisonOp::Geq,
                        rhs.clone(),
                    );
                    if !out.contains(&leq) {
                        out.push(leq);
                    }
                    if !out.contains(&geq) {
                        out.push(geq);
                    }
                } else if !out.contains(self) {
                    out.push(self.clone());
                }
            }
            BooleanExpression::BinaryExpression(lhs, _, rhs) => {
                lhs.collect_comparisons(split_equalities, out);
                rhs.collect_comparisons(split_equalities, out);
            }
            BooleanExpression::Not(e) => e.collect_comparisons(split_equalities, out),
            BooleanExpression::True | BooleanExpression::False => {}
        }
    }

    /// Evaluate the expression under the given variable assignment
    ///
    /// Returns `None` if the expression references an atom that is missing
    /// from the assignment.
    pub fn evaluate(&self, env: &BTreeMap<T, i64>) -> Option<bool> {
        match self {
            BooleanExpression::ComparisonExpression(lhs, op, rhs) => {
                let lhs = lhs.evaluate(env)?;
                let rhs = rhs.evaluate(env)?;
                Some(match op {
                    ComparisonOp::Gt => lhs > rhs,
                    ComparisonOp::Geq => lhs >= rhs,
                    ComparisonOp::Eq => lhs == rhs,
                    ComparisonOp::Neq => lhs != rhs,
                    ComparisonOp::Leq => lhs <= rhs,
                    ComparisonOp::Lt => lhs < rhs,
                })
            }
            BooleanExpression::BinaryExpression(lhs, conn, rhs) => {
                let lhs = lhs.evaluate(env)?;
                let rhs = rhs.evaluate(env)?;
                Some(match conn {
                    BooleanConnective::And => lhs && rhs,
                    BooleanConnective::Or => lhs || rhs,
                })
            }
            BooleanExpression::Not(e) => e.evaluate(env).map(|b| !b),
            BooleanExpression::True => Some(true),
            BooleanExpression::False => Some(false),
        }
    }
}

impl ComparisonOp {
    /// The comparison that holds exactly when this one does not
    pub fn invert(self) -> Self {
        match self {
            ComparisonOp::Eq => ComparisonOp::Neq,
            ComparisonOp::Neq => ComparisonOp::Eq,
            ComparisonOp::Lt => ComparisonOp::Geq,
            ComparisonOp::Leq => ComparisonOp::Gt,
            ComparisonOp::Gt => ComparisonOp::Leq,
            ComparisonOp::Geq => ComparisonOp::Lt,
        }
    }
}

// Overloaded operators for convenient construction of expressions

impl<T: Atomic> ops::Add for IntegerExpression<T> {
    type Output = IntegerExpression<T>;

    fn add(self, other: IntegerExpression<T>) -> IntegerExpression<T> {
        IntegerExpression::BinaryExpr(Box::new(self), IntegerOp::Add, Box::new(other))
    }
}

impl<T: Atomic> ops::Sub for IntegerExpression<T> {
    type Output = IntegerExpression<T>;

    fn sub(self, other: IntegerExpression<T>) -> IntegerExpression<T> {
        IntegerExpression::BinaryExpr(Box::new(self), IntegerOp::Sub, Box::new(other))
    }
}

impl<T: Atomic> ops::Mul for IntegerExpression<T> {
    type Output = IntegerExpression<T>;

    fn mul(self, other: IntegerExpression<T>) -> IntegerExpression<T> {
        IntegerExpression::BinaryExpr(Box::new(self), IntegerOp::Mul, Box::new(other))
    }
}

impl<T: Atomic> ops::Neg for IntegerExpression<T> {
    type Output = IntegerExpression<T>;

    fn neg(self) -> IntegerExpression<T> {
        IntegerExpression::Neg(Box::new(self))
    }
}

impl<T: Atomic> ops::Not for BooleanExpression<T> {
    type Output = BooleanExpression<T>;

    fn not(self) -> BooleanExpression<T> {
        BooleanExpression::Not(Box::new(self))
    }
}

impl<T: Atomic> ops::BitAnd for BooleanExpression<T> {
    type Output = BooleanExpression<T>;

    fn bitand(self, other: BooleanExpression<T>) -> BooleanExpression<T> {
        BooleanExpression::BinaryExpression(Box::new(self), BooleanConnective::And, Box::new(other))
    }
}

impl<T: Atomic> ops::BitOr for BooleanExpression<T> {
    type Output = BooleanExpression<T>;

    fn bitor(self, other: BooleanExpression<T>) -> BooleanExpression<T> {
        BooleanExpression::BinaryExpression(Box::new(self), BooleanConnective::Or, Box::new(other))
    }
}
