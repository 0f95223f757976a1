//! Interpolating prover sessions
//!
//! A session holds a stack of formula frames. After the stack has been
//! determined unsatisfiable, the session can produce an interpolant for
//! every cut between adjacent frames. The built-in implementation computes
//! interpolants by Fourier-Motzkin projection: the interpolant at a cut is
//! the projection of the prefix conjunction onto the variables it shares
//! with the suffix. Projection yields the strongest shared consequence, so
//! each interpolant is implied by its prefix and contradicts its suffix.

use std::collections::BTreeSet;

use carve_formula::expressions::{BooleanExpression, SsaVariable};
use log::trace;

use crate::linear::{self, Dnf};
use crate::SMTSolverError;

/// Incremental prover with interpolant extraction
///
/// Frames are pushed and popped in stack discipline; misusing the stack
/// (popping an empty session, requesting interpolants without a preceding
/// unsatisfiable check) is a caller bug and panics.
pub trait InterpolatingProverSession {
    /// Push a formula frame onto the stack
    fn push(&mut self, formula: BooleanExpression<SsaVariable>);

    /// Pop the most recent frame
    ///
    /// Panics if the stack is empty.
    fn pop(&mut self);

    /// Number of frames currently on the stack
    fn depth(&self) -> usize;

    /// Check whether the conjunction of all frames is unsatisfiable
    fn is_unsat(&mut self) -> Result<bool, SMTSolverError>;

    /// Extract one interpolant per cut between adjacent frames
    ///
    /// For `n` frames this returns `n - 1` formulas. The `i`-th interpolant
    /// is implied by the conjunction of frames `0..=i`, is inconsistent with
    /// the conjunction of the remaining frames, and only mentions variables
    /// occurring on both sides of the cut.
    ///
    /// Panics if the last check did not report unsatisfiability or the
    /// stack changed since.
    fn interpolant_sequence(&mut self) -> Result<Vec<BooleanExpression<SsaVariable>>, SMTSolverError>;
}

/// Types that can open new [`InterpolatingProverSession`]s
pub trait InterpolatorFactory {
    /// Session type produced by this factory
    type Session: InterpolatingProverSession;

    /// Open a fresh session with an empty stack
    fn new_session(&self) -> Self::Session;
}

/// Factory for [`ProjectionSession`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectionInterpolator;

impl ProjectionInterpolator {
    /// Create a new factory
    pub fn new() -> Self {
        ProjectionInterpolator
    }
}

impl InterpolatorFactory for ProjectionInterpolator {
    type Session = ProjectionSession;

    fn new_session(&self) -> ProjectionSession {
        ProjectionSession {
            frames: Vec::new(),
            unsat_checked: false,
        }
    }
}

/// Interpolating session backed by the built-in linear arithmetic engine
#[derive(Debug)]
pub struct ProjectionSession {
    frames: Vec<BooleanExpression<SsaVariable>>,
    /// Whether the current stack has been checked and found unsatisfiable
    unsat_checked: bool,
}

impl ProjectionSession {
    /// DNF of the conjunction of the frames in `range`
    fn conjunction_dnf(&self, range: std::ops::Range<usize>) -> Result<Dnf, SMTSolverError> {
        let mut dnf = vec![vec![]];
        for frame in &self.frames[range] {
            let frame_dnf = linear::to_dnf(frame)?;
            let mut combined = Vec::new();
            for conjunct in &dnf {
                for frame_conjunct in &frame_dnf {
                    let mut merged = conjunct.clone();
                    merged.extend(frame_conjunct.iter().cloned());
                    combined.push(merged);
                }
            }
            dnf = combined;
        }
        Ok(dnf)
    }

    fn frame_variables(&self, range: std::ops::Range<usize>) -> BTreeSet<SsaVariable> {
        self.frames[range]
            .iter()
            .flat_map(|f| f.atoms())
            .collect()
    }
}

impl InterpolatingProverSession for ProjectionSession {
    fn push(&mut self, formula: BooleanExpression<SsaVariable>) {
        trace!("Pushing prover frame: {formula}");
        self.frames.push(formula);
        self.unsat_checked = false;
    }

    fn pop(&mut self) {
        if self.frames.pop().is_none() {
            panic!("Popped an empty prover stack");
        }
        self.unsat_checked = false;
    }

    fn depth(&self) -> usize {
        self.frames.len()
    }

    fn is_unsat(&mut self) -> Result<bool, SMTSolverError> {
        let dnf = self.conjunction_dnf(0..self.frames.len())?;
        let unsat = linear::dnf_is_unsat(&dnf)?;
        trace!(
            "Checked prover stack of depth {}: {}",
            self.frames.len(),
            if unsat { "UNSAT" } else { "SAT" }
        );
        self.unsat_checked = unsat;
        Ok(unsat)
    }

    fn interpolant_sequence(&mut self) -> Result<Vec<BooleanExpression<SsaVariable>>, SMTSolverError> {
        if !self.unsat_checked {
            panic!("Interpolant sequence requested without a preceding unsatisfiable check");
        }

        let n = self.frames.len();
        let mut interpolants = Vec::with_capacity(n.saturating_sub(1));

        for cut in 1..n {
            let prefix_vars = self.frame_variables(0..cut);
            let suffix_vars = self.frame_variables(cut..n);
            let shared: BTreeSet<SsaVariable> =
                prefix_vars.intersection(&suffix_vars).cloned().collect();

            let prefix_dnf = self.conjunction_dnf(0..cut)?;

            let mut disjuncts = Vec::new();
            for conjunct in &prefix_dnf {
                if linear::conjunct_is_unsat(conjunct)? {
                    continue;
                }
                if let Some(projected) = linear::project(conjunct, &shared)? {
                    trace!(
                        "Projected onto shared variables: {}",
                        linear::display_conjunct(&projected)
                    );
                    disjuncts.push(linear::conjunct_to_expression(&projected));
                }
            }

            let interpolant = BooleanExpression::or_all(disjuncts);
            trace!("Interpolant at cut {cut}: {interpolant}");
            interpolants.push(interpolant);
        }

        Ok(interpolants)
    }
}

/// Check whether a single formula is unsatisfiable
pub fn formula_is_unsat(formula: &BooleanExpression<SsaVariable>) -> Result<bool, SMTSolverError> {
    let dnf = linear::to_dnf(formula)?;
    linear::dnf_is_unsat(&dnf)
}

/// Check whether `lhs` entails `rhs`
pub fn entails(
    lhs: &BooleanExpression<SsaVariable>,
    rhs: &BooleanExpression<SsaVariable>,
) -> Result<bool, SMTSolverError> {
    formula_is_unsat(&lhs.clone().and(!rhs.clone()))
}

#[cfg(test)]
mod tests {
    use carve_formula::expressions::{ComparisonOp, IntegerExpression, Variable};

    use super::*;

    fn var(name: &str, index: u32) -> SsaVariable {
        SsaVariable::new(Variable::new(name), index)
    }

    fn atom(name: &str, index: u32) -> IntegerExpression<SsaVariable> {
        IntegerExpression::Atom(var(name, index))
    }

    fn cmp(
        lhs: IntegerExpression<SsaVariable>,
        op: ComparisonOp,
        rhs: IntegerExpression<SsaVariable>,
    ) -> BooleanExpression<SsaVariable> {
        BooleanExpression::ComparisonExpression(Box::new(lhs), op, Box::new(rhs))
    }

    fn eq_const(name: &str, index: u32, c: i64) -> BooleanExpression<SsaVariable> {
        cmp(atom(name, index), ComparisonOp::Eq, IntegerExpression::Const(c))
    }

    #[test]
    fn test_push_pop_depth() {
        let mut session = ProjectionInterpolator::new().new_session();
        assert_eq!(session.depth(), 0);
        session.push(BooleanExpression::True);
        session.push(eq_const("x", 1, 0));
        assert_eq!(session.depth(), 2);
        session.pop();
        assert_eq!(session.depth(), 1);
    }

    #[test]
    #[should_panic(expected = "Popped an empty prover stack")]
    fn test_pop_empty_panics() {
        let mut session = ProjectionInterpolator::new().new_session();
        session.pop();
    }

    #[test]
    fn test_satisfiable_stack() {
        let mut session = ProjectionInterpolator::new().new_session();
        session.push(eq_const("x", 1, 0));
        session.push(cmp(atom("y", 1), ComparisonOp::Geq, atom("x", 1)));
        assert!(!session.is_unsat().unwrap());
    }

    #[test]
    #[should_panic(expected = "without a preceding unsatisfiable check")]
    fn test_interpolants_require_unsat() {
        let mut session = ProjectionInterpolator::new().new_session();
        session.push(eq_const("x", 1, 0));
        let _ = session.is_unsat();
        let _ = session.interpolant_sequence();
    }

    #[test]
    fn test_two_frame_interpolant() {
        let mut session = ProjectionInterpolator::new().new_session();
        let a = eq_const("x", 2, 0);
        let b = cmp(atom("x", 2), ComparisonOp::Neq, IntegerExpression::Const(0));
        session.push(a.clone());
        session.push(b.clone());

        assert!(session.is_unsat().unwrap());
        let interpolants = session.interpolant_sequence().unwrap();
        assert_eq!(interpolants.len(), 1);

        // implied by the prefix, inconsistent with the suffix
        assert!(entails(&a, &interpolants[0]).unwrap());
        assert!(formula_is_unsat(&interpolants[0].clone().and(b)).unwrap());
    }

    #[test]
    fn test_interpolant_chain() {
        // x@1 == 0, y@1 == x@1 + 1, y@1 <= 0
        let f1 = eq_const("x", 1, 0);
        let f2 = cmp(
            atom("y", 1),
            ComparisonOp::Eq,
            atom("x", 1) + IntegerExpression::Const(1),
        );
        let f3 = cmp(atom("y", 1), ComparisonOp::Leq, IntegerExpression::Const(0));

        let mut session = ProjectionInterpolator::new().new_session();
        session.push(f1.clone());
        session.push(f2.clone());
        session.push(f3.clone());

        assert!(session.is_unsat().unwrap());
        let itps = session.interpolant_sequence().unwrap();
        assert_eq!(itps.len(), 2);

        assert!(entails(&f1, &itps[0]).unwrap());
        assert!(entails(&itps[0].clone().and(f2), &itps[1]).unwrap());
        assert!(formula_is_unsat(&itps[1].clone().and(f3)).unwrap());
    }

    #[test]
    fn test_interpolant_mentions_only_shared_variables() {
        // the prefix constrains a temporary not visible to the suffix
        let f1 = eq_const("tmp", 1, 5).and(cmp(
            atom("x", 1),
            ComparisonOp::Eq,
            atom("tmp", 1),
        ));
        let f2 = cmp(atom("x", 1), ComparisonOp::Lt, IntegerExpression::Const(0));

        let mut session = ProjectionInterpolator::new().new_session();
        session.push(f1);
        session.push(f2);

        assert!(session.is_unsat().unwrap());
        let itps = session.interpolant_sequence().unwrap();
        let vars = itps[0].atoms();
        assert!(vars.contains(&var("x", 1)));
        assert!(!vars.contains(&var("tmp", 1)));
    }

    #[test]
    fn test_stack_mutation_invalidates_check() {
        let mut session = ProjectionInterpolator::new().new_session();
        session.push(eq_const("x", 1, 0));
        session.push(eq_const("x", 1, 1));
        assert!(session.is_unsat().unwrap());

        session.pop();
        session.push(eq_const("y", 1, 1));
        assert!(!session.is_unsat().unwrap());
    }

    #[test]
    fn test_unsat_prefix_gives_false_interpolant() {
        let mut session = ProjectionInterpolator::new().new_session();
        session.push(eq_const("x", 1, 0).and(eq_const("x", 1, 1)));
        session.push(eq_const("y", 1, 0));

        assert!(session.is_unsat().unwrap());
        let itps = session.interpolant_sequence().unwrap();
        assert!(itps[0].is_false());
    }

    #[test]
    fn test_entails() {
        let x_eq_0 = eq_const("x", 1, 0);
        let x_geq_0 = cmp(atom("x", 1), ComparisonOp::Geq, IntegerExpression::Const(0));
        assert!(entails(&x_eq_0, &x_geq_0).unwrap());
        assert!(!entails(&x_geq_0, &x_eq_0).unwrap());
    }
}
