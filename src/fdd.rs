//! Finite-domain view over a bit-vector: interprets a predicate over a
//! fixed set of Boolean variables as a set of unsigned integers, and
//! answers membership and witness queries on it.
//!
//! The view keeps its own position-to-variable map, so queries keep
//! working after the engine reorders variables.

use std::collections::HashMap;

use log::debug;
use num_bigint::BigUint;
use num_traits::{One, Zero};

use crate::bdd::{Bdd, BddManager};
use crate::bddv::Bddv;

/// Outcome of a witness search over a finite-domain view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindResult {
    /// The predicate is unsatisfiable.
    Empty,
    /// Exactly one value satisfies the predicate.
    Singleton(BigUint),
    /// More than one value satisfies the predicate; one witness is given.
    Multiple(BigUint),
}

impl FindResult {
    /// The witness, if the set is non-empty.
    pub fn value(&self) -> Option<&BigUint> {
        match self {
            FindResult::Empty => None,
            FindResult::Singleton(v) | FindResult::Multiple(v) => Some(v),
        }
    }
}

pub struct Fdd {
    manager: BddManager,
    pos2var: Vec<u32>,
    var2pos: HashMap<u32, usize>,
    vars: Bddv,
}

impl Fdd {
    /// A view over `num_bits` sequential variables starting at 0, LSB first.
    pub fn new(manager: &BddManager, num_bits: usize) -> Self {
        Self::with_stride(manager, num_bits, 0, 1)
    }

    /// A view over `num_bits` strided variable ids, LSB first.
    pub fn with_stride(manager: &BddManager, num_bits: usize, start: u32, step: u32) -> Self {
        let pos2var: Vec<u32> = (0..num_bits as u32).map(|i| start + i * step).collect();
        Self::from_vars(manager, &pos2var)
    }

    /// A view over explicitly chosen variable ids, LSB first.
    pub fn from_vars(manager: &BddManager, vars: &[u32]) -> Self {
        let mut var2pos = HashMap::new();
        for (pos, &var) in vars.iter().enumerate() {
            let prev = var2pos.insert(var, pos);
            assert!(prev.is_none(), "Duplicate variable {} in domain", var);
        }
        Fdd {
            manager: manager.clone(),
            pos2var: vars.to_vec(),
            var2pos,
            vars: manager.mk_var_vec(vars),
        }
    }

    pub fn num_bits(&self) -> usize {
        self.pos2var.len()
    }

    /// The variable id carrying bit `pos`.
    pub fn var(&self, pos: usize) -> u32 {
        self.pos2var[pos]
    }

    /// The domain as a bit-vector of single-variable functions.
    pub fn vars(&self) -> &Bddv {
        &self.vars
    }

    /// The predicate `x != 0`.
    pub fn non_zero(&self) -> Bdd {
        let zero = self.manager.mk_eq_num(&self.vars, &BigUint::zero());
        self.manager.apply_not(&zero)
    }

    /// The predicate `x == value`.
    pub fn mk_eq(&self, value: &BigUint) -> Bdd {
        self.manager.mk_eq_num(&self.vars, value)
    }

    /// Whether `value` satisfies the predicate `b`.
    ///
    /// Precondition: the support of `b` is contained in this domain.
    pub fn contains(&self, b: &Bdd, value: &BigUint) -> bool {
        let assignment: HashMap<u32, bool> = self
            .pos2var
            .iter()
            .enumerate()
            .map(|(pos, &var)| (var, value.bit(pos as u64)))
            .collect();
        self.manager.restrict(b, &assignment).is_true()
    }

    /// Search for a satisfying value of `b`.
    ///
    /// The walk prefers high children, and bits of variables absent from
    /// the path are zero. Precondition: the support of `b` is contained
    /// in this domain.
    pub fn find(&self, b: &Bdd) -> FindResult {
        if b.is_false() {
            return FindResult::Empty;
        }
        let mut value = BigUint::zero();
        let mut cur = b.clone();
        while !cur.is_true() {
            let var = self.manager.var_of(&cur);
            let pos = *self
                .var2pos
                .get(&var)
                .unwrap_or_else(|| panic!("Variable {} is outside the domain", var));
            let high = self.manager.high(&cur);
            if high.is_false() {
                cur = self.manager.low(&cur);
            } else {
                value |= BigUint::one() << pos;
                cur = high;
            }
        }
        debug!("find: witness = {}", value);

        // Singleton iff removing the witness empties the set.
        let eq = self.mk_eq(&value);
        let rest = b & &!&eq;
        if rest.is_false() {
            FindResult::Singleton(value)
        } else {
            FindResult::Multiple(value)
        }
    }

    /// Like [`find`](Self::find), but returns `hint` when it satisfies `b`.
    pub fn find_hint(&self, b: &Bdd, hint: &BigUint) -> FindResult {
        if b.is_false() {
            return FindResult::Empty;
        }
        if !self.contains(b, hint) {
            return self.find(b);
        }
        let eq = self.mk_eq(hint);
        let rest = b & &!&eq;
        if rest.is_false() {
            FindResult::Singleton(hint.clone())
        } else {
            FindResult::Multiple(hint.clone())
        }
    }
}
