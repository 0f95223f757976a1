//! Predicate precision of the analysis
//!
//! The precision assigns sets of abstraction predicates to four scopes of
//! decreasing generality: the whole program, a function, a CFA location,
//! and a single path instance of a location. Each stored set already
//! contains the union of all coarser scopes that apply to it, so a lookup
//! is a single map access.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use carve_display_utils::join_iterator;
use carve_formula::cfa::CfaLocation;
use carve_formula::expressions::{BooleanExpression, Variable};

/// A single abstraction predicate, identified by its uninstantiated atom
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct AbstractionPredicate {
    atom: BooleanExpression<Variable>,
}

impl AbstractionPredicate {
    /// Create a predicate from its uninstantiated atom
    pub fn new(atom: BooleanExpression<Variable>) -> Self {
        AbstractionPredicate { atom }
    }

    /// The uninstantiated formula of this predicate
    pub fn atom(&self) -> &BooleanExpression<Variable> {
        &self.atom
    }
}

impl fmt::Display for AbstractionPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.atom)
    }
}

/// Set of predicates attached to one scope
pub type PredicateSet = BTreeSet<AbstractionPredicate>;

/// Immutable four-level predicate precision
///
/// Never mutated in place; refinement produces an increment and merges it
/// with [`PredicatePrecision::union`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PredicatePrecision {
    global: PredicateSet,
    per_function: BTreeMap<String, PredicateSet>,
    per_location: BTreeMap<CfaLocation, PredicateSet>,
    per_location_instance: BTreeMap<(CfaLocation, u32), PredicateSet>,
}

impl PredicatePrecision {
    /// The empty precision
    pub fn empty() -> Self {
        PredicatePrecision::default()
    }

    /// Assemble a precision from per-scope predicate sets
    ///
    /// Coarser scopes are folded into the finer ones here so that
    /// [`PredicatePrecision::predicates_at`] is a single lookup.
    pub fn new(
        global: PredicateSet,
        per_function: BTreeMap<String, PredicateSet>,
        per_location: BTreeMap<CfaLocation, PredicateSet>,
        per_location_instance: BTreeMap<(CfaLocation, u32), PredicateSet>,
    ) -> Self {
        let mut precision = PredicatePrecision {
            global,
            per_function,
            per_location,
            per_location_instance,
        };
        precision.fold_coarser_scopes();
        precision
    }

    /// A precision attaching `predicates` to a set of locations
    pub fn from_location_predicates(
        predicates: impl IntoIterator<Item = (CfaLocation, PredicateSet)>,
    ) -> Self {
        let mut per_location: BTreeMap<CfaLocation, PredicateSet> = BTreeMap::new();
        for (loc, preds) in predicates {
            per_location.entry(loc).or_default().extend(preds);
        }
        PredicatePrecision::new(
            PredicateSet::new(),
            BTreeMap::new(),
            per_location,
            BTreeMap::new(),
        )
    }

    /// Whether no scope carries any predicate
    pub fn is_empty(&self) -> bool {
        self.global.is_empty()
            && self.per_function.is_empty()
            && self.per_location.is_empty()
            && self.per_location_instance.is_empty()
    }

    /// The predicates relevant for abstraction at `loc`
    ///
    /// Falls back from the most specific scope with an entry to the global
    /// scope; the returned set already includes all coarser scopes.
    pub fn predicates_at(&self, loc: &CfaLocation, instance: Option<u32>) -> &PredicateSet {
        if let Some(instance) = instance {
            if let Some(set) = self.per_location_instance.get(&(loc.clone(), instance)) {
                return set;
            }
        }
        if let Some(set) = self.per_location.get(loc) {
            return set;
        }
        if let Some(set) = self.per_function.get(loc.function()) {
            return set;
        }
        &self.global
    }

    /// Merge two precisions scope-wise
    pub fn union(&self, other: &Self) -> Self {
        let mut global = self.global.clone();
        global.extend(other.global.iter().cloned());

        let mut per_function = self.per_function.clone();
        for (function, set) in other.per_function.iter() {
            per_function
                .entry(function.clone())
                .or_default()
                .extend(set.iter().cloned());
        }

        let mut per_location = self.per_location.clone();
        for (loc, set) in other.per_location.iter() {
            per_location
                .entry(loc.clone())
                .or_default()
                .extend(set.iter().cloned());
        }

        let mut per_location_instance = self.per_location_instance.clone();
        for (key, set) in other.per_location_instance.iter() {
            per_location_instance
                .entry(key.clone())
                .or_default()
                .extend(set.iter().cloned());
        }

        PredicatePrecision::new(global, per_function, per_location, per_location_instance)
    }

    /// Push every coarser scope's predicates into the finer scopes
    fn fold_coarser_scopes(&mut self) {
        for set in self.per_function.values_mut() {
            set.extend(self.global.iter().cloned());
        }

        for (loc, set) in self.per_location.iter_mut() {
            match self.per_function.get(loc.function()) {
                Some(function_set) => set.extend(function_set.iter().cloned()),
                None => set.extend(self.global.iter().cloned()),
            }
        }

        let mut folded_instances = self.per_location_instance.clone();
        for ((loc, _), set) in folded_instances.iter_mut() {
            let fallback = match self.per_location.get(loc) {
                Some(location_set) => location_set,
                None => match self.per_function.get(loc.function()) {
                    Some(function_set) => function_set,
                    None => &self.global,
                },
            };
            set.extend(fallback.iter().cloned());
        }
        self.per_location_instance = folded_instances;
    }
}

impl fmt::Display for PredicatePrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "global: {{{}}}", join_iterator(self.global.iter(), ", "))?;
        for (function, set) in self.per_function.iter() {
            writeln!(f, "{}: {{{}}}", function, join_iterator(set.iter(), ", "))?;
        }
        for (loc, set) in self.per_location.iter() {
            writeln!(f, "{}: {{{}}}", loc, join_iterator(set.iter(), ", "))?;
        }
        for ((loc, instance), set) in self.per_location_instance.iter() {
            writeln!(
                f,
                "{}[{}]: {{{}}}",
                loc,
                instance,
                join_iterator(set.iter(), ", ")
            )?;
        }
        Ok(())
    }
}
