//! The polynomial engine: canonical decision diagrams for multivariate
//! polynomials over ℤ or ℤ/2^N.
//!
//! A non-terminal node denotes `var * hi + lo`, where `lo` only mentions
//! variables strictly below `var` and `hi` may mention `var` again (that is
//! how powers are represented). Terminals carry numeric coefficients. With
//! coefficients normalized and the unique table deduplicating nodes, two
//! polynomials are equal iff their root ids are equal.
//!
//! On top of the ring operations the engine offers the Gröbner-style
//! primitives used by saturation procedures: `reduce`, `try_spoly` and
//! `resolve`, plus structural queries such as per-variable degrees,
//! factoring out powers, and 2-adic coefficient analysis.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::rc::Rc;

use log::debug;
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed, Zero};

use crate::cache::Cache;
use crate::table::Table;
use crate::utils::{hash_bigint, pairing2, pairing3, MyHash};

pub(crate) type PddId = u32;

/// The zero polynomial.
const ZERO: PddId = 1;
/// The unit polynomial.
const ONE: PddId = 2;

/// Cache tags for the memoized binary operations.
const OP_ADD: u64 = 1;
const OP_MUL: u64 = 2;

/// Coefficient domain of an engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Semantics {
    /// Polynomials over the integers.
    Integer,
    /// Polynomials over ℤ/2^N for the given bit width `N`.
    Mod2N(u32),
}

#[derive(Clone, PartialEq, Eq)]
enum PddEntry {
    Val(BigInt),
    Node { var: u32, hi: PddId, lo: PddId },
}

impl Default for PddEntry {
    fn default() -> Self {
        PddEntry::Val(BigInt::zero())
    }
}

impl MyHash for PddEntry {
    fn hash(&self) -> u64 {
        match self {
            PddEntry::Val(c) => pairing2(0, hash_bigint(c)),
            PddEntry::Node { var, hi, lo } => {
                pairing2(1, pairing3(*var as u64, *hi as u64, *lo as u64))
            }
        }
    }
}

/// One monomial of a polynomial: `coeff * vars[0] * vars[1] * ...`, with
/// repeated entries denoting powers. Variables are listed from the highest
/// level down, so monomial lists read the way the term order compares them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Monomial {
    pub coeff: BigInt,
    pub vars: Vec<u32>,
}

struct RootSlot {
    node: PddId,
    refs: u32,
}

/// Internal engine state. Algorithms work on raw ids; the public wrappers
/// in [`PddManager`] and [`Pdd`] manage root slots.
pub(crate) struct PddStore {
    storage: Table<PddEntry>,
    cache: Cache<(u64, u64, u64), PddId>,
    semantics: Semantics,
    /// `2^N` for the modular domain, unused over the integers.
    modulus: Option<BigInt>,
    num_vars: u32,
    var2level: Vec<u32>,
    level2var: Vec<u32>,
    roots: Vec<RootSlot>,
    free_slots: Vec<usize>,
}

impl PddStore {
    fn new(num_vars: u32, semantics: Semantics) -> Self {
        let mut storage = Table::new(16);

        // The two terminals live outside the unique table's buckets.
        let zero = storage.add(PddEntry::Val(BigInt::zero()));
        let one = storage.add(PddEntry::Val(BigInt::one()));
        assert_eq!(zero as PddId, ZERO);
        assert_eq!(one as PddId, ONE);

        let modulus = match semantics {
            Semantics::Integer => None,
            Semantics::Mod2N(width) => {
                assert!(width > 0, "Modular width must be positive");
                Some(BigInt::one() << (width as usize))
            }
        };

        Self {
            storage,
            cache: Cache::new(16),
            semantics,
            modulus,
            num_vars,
            var2level: (0..num_vars).collect(),
            level2var: (0..num_vars).collect(),
            roots: Vec::new(),
            free_slots: Vec::new(),
        }
    }

    fn is_val(&self, p: PddId) -> bool {
        matches!(self.storage.value(p as usize), PddEntry::Val(_))
    }

    fn val(&self, p: PddId) -> &BigInt {
        match self.storage.value(p as usize) {
            PddEntry::Val(c) => c,
            PddEntry::Node { .. } => panic!("Not a value node"),
        }
    }

    fn var_of(&self, p: PddId) -> u32 {
        match self.storage.value(p as usize) {
            PddEntry::Node { var, .. } => *var,
            PddEntry::Val(_) => panic!("Value node has no variable"),
        }
    }

    fn hi(&self, p: PddId) -> PddId {
        match self.storage.value(p as usize) {
            PddEntry::Node { hi, .. } => *hi,
            PddEntry::Val(_) => panic!("Value node has no children"),
        }
    }

    fn lo(&self, p: PddId) -> PddId {
        match self.storage.value(p as usize) {
            PddEntry::Node { lo, .. } => *lo,
            PddEntry::Val(_) => panic!("Value node has no children"),
        }
    }

    /// Level of the top variable; values sit below every variable. Higher
    /// levels are closer to the root and greater in the term order.
    fn level(&self, p: PddId) -> i64 {
        match self.storage.value(p as usize) {
            PddEntry::Val(_) => -1,
            PddEntry::Node { var, .. } => self.var2level[*var as usize] as i64,
        }
    }

    fn normalize(&self, c: BigInt) -> BigInt {
        match &self.modulus {
            None => c,
            Some(m) => c.mod_floor(m),
        }
    }

    fn mk_val(&mut self, c: BigInt) -> PddId {
        let c = self.normalize(c);
        if c.is_zero() {
            ZERO
        } else if c.is_one() {
            ONE
        } else {
            self.storage.put(PddEntry::Val(c)) as PddId
        }
    }

    fn mk_node(&mut self, var: u32, hi: PddId, lo: PddId) -> PddId {
        assert!(var < self.num_vars, "Unknown variable id {}", var);

        // A vanished coefficient means the variable is absent.
        if hi == ZERO {
            return lo;
        }

        let var_level = self.var2level[var as usize] as i64;
        debug_assert!(self.level(lo) < var_level);
        debug_assert!(self.level(hi) <= var_level);

        self.storage.put(PddEntry::Node { var, hi, lo }) as PddId
    }

    fn mk_var(&mut self, var: u32) -> PddId {
        self.mk_node(var, ONE, ZERO)
    }

    fn add(&mut self, p: PddId, q: PddId) -> PddId {
        if p == ZERO {
            return q;
        }
        if q == ZERO {
            return p;
        }
        if self.is_val(p) && self.is_val(q) {
            let c = self.val(p) + self.val(q);
            return self.mk_val(c);
        }

        let key = (OP_ADD, p.min(q) as u64, p.max(q) as u64);
        if let Some(&res) = self.cache.get(&key) {
            return res;
        }

        let (lp, lq) = (self.level(p), self.level(q));
        let res = match lp.cmp(&lq) {
            Ordering::Greater => {
                let hi = self.hi(p);
                let lo = self.add(self.lo(p), q);
                self.mk_node(self.var_of(p), hi, lo)
            }
            Ordering::Less => {
                let hi = self.hi(q);
                let lo = self.add(p, self.lo(q));
                self.mk_node(self.var_of(q), hi, lo)
            }
            Ordering::Equal => {
                let hi = self.add(self.hi(p), self.hi(q));
                let lo = self.add(self.lo(p), self.lo(q));
                self.mk_node(self.var_of(p), hi, lo)
            }
        };

        self.cache.insert(&key, res);
        res
    }

    fn mul(&mut self, p: PddId, q: PddId) -> PddId {
        if p == ZERO || q == ZERO {
            return ZERO;
        }
        if p == ONE {
            return q;
        }
        if q == ONE {
            return p;
        }
        if self.is_val(p) && self.is_val(q) {
            let c = self.val(p) * self.val(q);
            return self.mk_val(c);
        }

        let key = (OP_MUL, p.min(q) as u64, p.max(q) as u64);
        if let Some(&res) = self.cache.get(&key) {
            return res;
        }

        let res = if self.is_val(p) {
            // Scale every coefficient of q.
            let hi = self.mul(p, self.hi(q));
            let lo = self.mul(p, self.lo(q));
            self.mk_node(self.var_of(q), hi, lo)
        } else if self.is_val(q) {
            let hi = self.mul(q, self.hi(p));
            let lo = self.mul(q, self.lo(p));
            self.mk_node(self.var_of(p), hi, lo)
        } else {
            let (lp, lq) = (self.level(p), self.level(q));
            match lp.cmp(&lq) {
                Ordering::Greater => {
                    let hi = self.mul(self.hi(p), q);
                    let lo = self.mul(self.lo(p), q);
                    self.mk_node(self.var_of(p), hi, lo)
                }
                Ordering::Less => {
                    let hi = self.mul(self.hi(q), p);
                    let lo = self.mul(self.lo(q), p);
                    self.mk_node(self.var_of(q), hi, lo)
                }
                Ordering::Equal => {
                    // (x*a + b) * (x*c + d) = x*(a*q + b*c) + b*d
                    let (a, b) = (self.hi(p), self.lo(p));
                    let (c, d) = (self.hi(q), self.lo(q));
                    let aq = self.mul(a, q);
                    let bc = self.mul(b, c);
                    let hi = self.add(aq, bc);
                    let lo = self.mul(b, d);
                    self.mk_node(self.var_of(p), hi, lo)
                }
            }
        };

        self.cache.insert(&key, res);
        res
    }

    fn neg(&mut self, p: PddId) -> PddId {
        let minus_one = self.mk_val(-BigInt::one());
        self.mul(minus_one, p)
    }

    fn sub(&mut self, p: PddId, q: PddId) -> PddId {
        let nq = self.neg(q);
        self.add(p, nq)
    }

    fn pow(&mut self, p: PddId, n: u32) -> PddId {
        let mut res = ONE;
        for _ in 0..n {
            res = self.mul(res, p);
        }
        res
    }

    /// Degree of `p` in the variable `v`.
    fn degree_in(&self, p: PddId, v: u32, memo: &mut HashMap<PddId, u32>) -> u32 {
        if self.is_val(p) {
            return 0;
        }
        if self.level(p) < self.var2level[v as usize] as i64 {
            return 0;
        }
        if let Some(&d) = memo.get(&p) {
            return d;
        }
        let d = if self.var_of(p) == v {
            1 + self.degree_in(self.hi(p), v, memo)
        } else {
            let dh = self.degree_in(self.hi(p), v, memo);
            let dl = self.degree_in(self.lo(p), v, memo);
            dh.max(dl)
        };
        memo.insert(p, d);
        d
    }

    /// Total degree of `p`.
    fn total_degree(&self, p: PddId, memo: &mut HashMap<PddId, u32>) -> u32 {
        if self.is_val(p) {
            return 0;
        }
        if let Some(&d) = memo.get(&p) {
            return d;
        }
        let d = (1 + self.total_degree(self.hi(p), memo)).max(self.total_degree(self.lo(p), memo));
        memo.insert(p, d);
        d
    }

    /// Split `p = lc * v^d + rest` with `deg_v(rest) < d`; the `d == 0`
    /// convention at the public boundary is `lc = 0, rest = p`.
    fn factor(&mut self, p: PddId, v: u32, d: u32) -> (PddId, PddId) {
        if d == 0 {
            (ZERO, p)
        } else {
            self.factor_rec(p, v, d)
        }
    }

    fn factor_rec(&mut self, p: PddId, v: u32, d: u32) -> (PddId, PddId) {
        if d == 0 {
            return (p, ZERO);
        }
        if self.level(p) < self.var2level[v as usize] as i64 {
            return (ZERO, p);
        }
        if self.var_of(p) == v {
            let (lc, rest_hi) = self.factor_rec(self.hi(p), v, d - 1);
            let lo = self.lo(p);
            let rest = self.mk_node(v, rest_hi, lo);
            (lc, rest)
        } else {
            let x = self.var_of(p);
            let (lc_hi, rest_hi) = self.factor_rec(self.hi(p), v, d);
            let (lc_lo, rest_lo) = self.factor_rec(self.lo(p), v, d);
            let lc = self.mk_node(x, lc_hi, lc_lo);
            let rest = self.mk_node(x, rest_hi, rest_lo);
            (lc, rest)
        }
    }

    /// Largest `k` such that `2^k` divides every coefficient, `u32::MAX`
    /// for the zero polynomial.
    fn max_pow2_divisor(&self, p: PddId, memo: &mut HashMap<PddId, u32>) -> u32 {
        if p == ZERO {
            return u32::MAX;
        }
        if self.is_val(p) {
            return self.val(p).trailing_zeros().unwrap_or(u64::from(u32::MAX)) as u32;
        }
        if let Some(&k) = memo.get(&p) {
            return k;
        }
        let k = self
            .max_pow2_divisor(self.hi(p), memo)
            .min(self.max_pow2_divisor(self.lo(p), memo));
        memo.insert(p, k);
        k
    }

    /// Divide every coefficient by `2^k`; they must all be divisible.
    fn div_by_pow2(&mut self, p: PddId, k: u32, memo: &mut HashMap<PddId, PddId>) -> PddId {
        if p == ZERO || k == 0 {
            return p;
        }
        if self.is_val(p) {
            let c = self.val(p);
            assert!(
                c.trailing_zeros().unwrap_or(0) >= k as u64,
                "Coefficient {} is not divisible by 2^{}",
                c,
                k
            );
            let c = c >> (k as usize);
            return self.mk_val(c);
        }
        if let Some(&res) = memo.get(&p) {
            return res;
        }
        let hi = self.div_by_pow2(self.hi(p), k, memo);
        let lo = self.div_by_pow2(self.lo(p), k, memo);
        let res = self.mk_node(self.var_of(p), hi, lo);
        memo.insert(p, res);
        res
    }

    /// Gcd of all coefficients (non-negative, 0 for the zero polynomial).
    fn content(&self, p: PddId, memo: &mut HashMap<PddId, BigInt>) -> BigInt {
        if self.is_val(p) {
            return self.val(p).abs();
        }
        if let Some(c) = memo.get(&p) {
            return c.clone();
        }
        let ch = self.content(self.hi(p), memo);
        let cl = self.content(self.lo(p), memo);
        let c = ch.gcd(&cl);
        memo.insert(p, c.clone());
        c
    }

    /// Divide every coefficient by the scalar `g`; `g` must divide the
    /// content of `p`.
    fn div_scalar(&mut self, p: PddId, g: &BigInt, memo: &mut HashMap<PddId, PddId>) -> PddId {
        if g.is_one() {
            return p;
        }
        if self.is_val(p) {
            let (q, r) = self.val(p).div_rem(g);
            assert!(r.is_zero(), "Scalar {} does not divide coefficient", g);
            return self.mk_val(q);
        }
        if let Some(&res) = memo.get(&p) {
            return res;
        }
        let hi = self.div_scalar(self.hi(p), g, memo);
        let lo = self.div_scalar(self.lo(p), g, memo);
        let res = self.mk_node(self.var_of(p), hi, lo);
        memo.insert(p, res);
        res
    }

    /// The coefficient of the empty monomial.
    fn const_term(&self, p: PddId) -> BigInt {
        let mut q = p;
        while !self.is_val(q) {
            q = self.lo(q);
        }
        self.val(q).clone()
    }

    /// Over ℤ/2^N: an odd constant term plus even coefficients everywhere
    /// else guarantees the polynomial never evaluates to zero. Over ℤ only
    /// nonzero constants are recognized.
    fn is_never_zero(&self, p: PddId) -> bool {
        match self.semantics {
            Semantics::Integer => self.is_val(p) && p != ZERO,
            Semantics::Mod2N(_) => {
                let mut memo = HashMap::new();
                let mut q = p;
                while !self.is_val(q) {
                    if self.max_pow2_divisor(self.hi(q), &mut memo) < 1 {
                        return false;
                    }
                    q = self.lo(q);
                }
                self.val(q).is_odd()
            }
        }
    }

    fn subst(
        &mut self,
        p: PddId,
        values: &HashMap<u32, BigInt>,
        memo: &mut HashMap<PddId, PddId>,
    ) -> PddId {
        if self.is_val(p) {
            return p;
        }
        if let Some(&res) = memo.get(&p) {
            return res;
        }
        let x = self.var_of(p);
        let hi = self.subst(self.hi(p), values, memo);
        let lo = self.subst(self.lo(p), values, memo);
        let res = match values.get(&x) {
            Some(c) => {
                let cv = self.mk_val(c.clone());
                let scaled = self.mul(cv, hi);
                self.add(scaled, lo)
            }
            None => self.mk_node(x, hi, lo),
        };
        memo.insert(p, res);
        res
    }

    fn monomials(&self, p: PddId) -> Vec<Monomial> {
        let mut out = Vec::new();
        let mut prefix = Vec::new();
        self.monomials_rec(p, &mut prefix, &mut out);
        out.sort_by(|a, b| self.cmp_monomials(&b.vars, &a.vars));
        out
    }

    fn monomials_rec(&self, p: PddId, prefix: &mut Vec<u32>, out: &mut Vec<Monomial>) {
        match self.storage.value(p as usize) {
            PddEntry::Val(c) => {
                if !c.is_zero() {
                    out.push(Monomial {
                        coeff: c.clone(),
                        vars: prefix.clone(),
                    });
                }
            }
            PddEntry::Node { var, hi, lo } => {
                let (var, hi, lo) = (*var, *hi, *lo);
                prefix.push(var);
                self.monomials_rec(hi, prefix, out);
                prefix.pop();
                self.monomials_rec(lo, prefix, out);
            }
        }
    }

    /// Graded term order: total degree first, ties broken lexicographically
    /// with higher-level variables weighing more. Inputs are variable lists
    /// sorted by descending level.
    fn cmp_monomials(&self, a: &[u32], b: &[u32]) -> Ordering {
        a.len().cmp(&b.len()).then_with(|| {
            for (&x, &y) in a.iter().zip(b.iter()) {
                let ord = self.var2level[x as usize].cmp(&self.var2level[y as usize]);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        })
    }

    fn leading_monomial(&self, p: PddId) -> Option<Monomial> {
        self.monomials(p).into_iter().next()
    }

    /// Lexicographic comparison of the descending monomial sequences. A
    /// proper prefix compares below its extension.
    fn lm_lt(&self, p: PddId, q: PddId) -> bool {
        let pm = self.monomials(p);
        let qm = self.monomials(q);
        for (mp, mq) in pm.iter().zip(qm.iter()) {
            if mp.vars != mq.vars {
                return self.cmp_monomials(&mp.vars, &mq.vars) == Ordering::Less;
            }
        }
        pm.len() < qm.len()
    }

    fn var_counts(vars: &[u32]) -> HashMap<u32, u32> {
        let mut counts = HashMap::new();
        for &v in vars {
            *counts.entry(v).or_insert(0) += 1;
        }
        counts
    }

    fn multiset_contains(sup: &[u32], sub: &[u32]) -> bool {
        let mut counts = Self::var_counts(sup);
        sub.iter().all(|v| match counts.get_mut(v) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        })
    }

    fn multiset_diff(&self, sup: &[u32], sub: &[u32]) -> Vec<u32> {
        let mut counts = Self::var_counts(sub);
        let mut out = Vec::new();
        for &v in sup {
            match counts.get_mut(&v) {
                Some(n) if *n > 0 => *n -= 1,
                _ => out.push(v),
            }
        }
        out
    }

    fn multiset_lcm(&self, a: &[u32], b: &[u32]) -> Vec<u32> {
        let ca = Self::var_counts(a);
        let cb = Self::var_counts(b);
        let mut vars: Vec<u32> = ca.keys().chain(cb.keys()).copied().collect();
        vars.sort_by(|&x, &y| self.var2level[y as usize].cmp(&self.var2level[x as usize]));
        vars.dedup();
        let mut out = Vec::new();
        for v in vars {
            let n = ca.get(&v).copied().unwrap_or(0).max(cb.get(&v).copied().unwrap_or(0));
            out.extend(std::iter::repeat(v).take(n as usize));
        }
        out
    }

    /// Inverse of an odd residue modulo 2^N, by Newton iteration.
    fn inv_odd(&self, a: &BigInt) -> BigInt {
        let m = self.modulus.as_ref().expect("Modular semantics required");
        debug_assert!(a.is_odd());
        let two = BigInt::from(2);
        let mut x = BigInt::one();
        while (a * &x).mod_floor(m) != BigInt::one() {
            x = (&x * (&two - a * &x)).mod_floor(m);
        }
        x
    }

    /// Solve `q * d == c` for `q` in the coefficient domain.
    fn try_div_coeff(&self, c: &BigInt, d: &BigInt) -> Option<BigInt> {
        match &self.modulus {
            None => {
                let (q, r) = c.div_rem(d);
                r.is_zero().then(|| q)
            }
            Some(m) => {
                let k = d.trailing_zeros().expect("Zero leading coefficient");
                if c.trailing_zeros().unwrap_or(u64::MAX) < k {
                    return None;
                }
                let d_odd = d >> (k as usize);
                let inv = self.inv_odd(&d_odd);
                let q = ((c >> (k as usize)) * inv).mod_floor(m);
                Some(q)
            }
        }
    }

    /// Eliminate from `e` every monomial divisible by the leading monomial
    /// of `f` whose coefficient admits an exact quotient. Terminates by the
    /// well-ordering of the term order.
    fn reduce(&mut self, e: PddId, f: PddId) -> PddId {
        if f == ZERO {
            return e;
        }
        let lm = self.leading_monomial(f).expect("Nonzero polynomial");

        let mut e = e;
        'outer: loop {
            for m in self.monomials(e) {
                if !Self::multiset_contains(&m.vars, &lm.vars) {
                    continue;
                }
                let Some(q) = self.try_div_coeff(&m.coeff, &lm.coeff) else {
                    continue;
                };
                let mut t = self.mk_val(q);
                for v in self.multiset_diff(&m.vars, &lm.vars) {
                    let xv = self.mk_var(v);
                    t = self.mul(t, xv);
                }
                t = self.mul(t, f);
                e = self.sub(e, t);
                continue 'outer;
            }
            return e;
        }
    }

    /// S-polynomial of `p` and `q`, unless their leading monomials are
    /// coprime (in which case the critical pair is trivial).
    fn try_spoly(&mut self, p: PddId, q: PddId) -> Option<PddId> {
        if p == ZERO || q == ZERO {
            return None;
        }
        let mp = self.leading_monomial(p).expect("Nonzero polynomial");
        let mq = self.leading_monomial(q).expect("Nonzero polynomial");
        if !mp.vars.iter().any(|v| mq.vars.contains(v)) {
            return None;
        }

        let g = mp.coeff.gcd(&mq.coeff);
        let l = self.multiset_lcm(&mp.vars, &mq.vars);

        let mut left = self.mk_val(&mq.coeff / &g);
        for v in self.multiset_diff(&l, &mp.vars) {
            let xv = self.mk_var(v);
            left = self.mul(left, xv);
        }
        left = self.mul(left, p);

        let mut right = self.mk_val(&mp.coeff / &g);
        for v in self.multiset_diff(&l, &mq.vars) {
            let xv = self.mk_var(v);
            right = self.mul(right, xv);
        }
        right = self.mul(right, q);

        Some(self.sub(left, right))
    }

    /// Resolvent of `p` and `q` on `v`: with `p = A*v^dp + p'` and
    /// `q = B*v^dq + q'`, requires `dp >= dq >= 1` and yields
    /// `(B/g)*p - (A/g)*v^(dp-dq)*q` where `g = gcd(content A, content B)`,
    /// cancelling the `v^dp` terms.
    fn resolve(&mut self, v: u32, p: PddId, q: PddId) -> Option<PddId> {
        let dp = self.degree_in(p, v, &mut HashMap::new());
        let dq = self.degree_in(q, v, &mut HashMap::new());
        if dq == 0 || dp < dq {
            return None;
        }

        let (a, _) = self.factor(p, v, dp);
        let (b, _) = self.factor(q, v, dq);
        let ca = self.content(a, &mut HashMap::new());
        let cb = self.content(b, &mut HashMap::new());
        let g = ca.gcd(&cb);

        let bg = self.div_scalar(b, &g, &mut HashMap::new());
        let ag = self.div_scalar(a, &g, &mut HashMap::new());

        let left = self.mul(bg, p);
        let xv = self.mk_var(v);
        let shift = self.pow(xv, dp - dq);
        let right_lc = self.mul(ag, shift);
        let right = self.mul(right_lc, q);
        Some(self.sub(left, right))
    }

    fn descendants(&self, nodes: impl IntoIterator<Item = PddId>) -> HashSet<PddId> {
        let mut visited = HashSet::new();
        visited.insert(ZERO);
        visited.insert(ONE);
        let mut queue = VecDeque::from_iter(nodes);

        while let Some(p) = queue.pop_front() {
            if visited.insert(p) {
                if let PddEntry::Node { hi, lo, .. } = self.storage.value(p as usize) {
                    queue.push_back(*hi);
                    queue.push_back(*lo);
                }
            }
        }

        visited
    }

    fn live_roots(&self) -> impl Iterator<Item = PddId> + '_ {
        self.roots
            .iter()
            .filter(|slot| slot.refs > 0)
            .map(|slot| slot.node)
    }

    /// Number of non-terminal entries reachable from any live root.
    fn live_size(&self) -> usize {
        self.descendants(self.live_roots())
            .into_iter()
            .filter(|&p| p != ZERO && p != ONE)
            .count()
    }

    fn alloc_slot(&mut self, node: PddId) -> usize {
        if let Some(slot) = self.free_slots.pop() {
            self.roots[slot] = RootSlot { node, refs: 1 };
            slot
        } else {
            self.roots.push(RootSlot { node, refs: 1 });
            self.roots.len() - 1
        }
    }

    fn slot_node(&self, slot: usize) -> PddId {
        debug_assert!(self.roots[slot].refs > 0);
        self.roots[slot].node
    }

    fn retain_slot(&mut self, slot: usize) {
        self.roots[slot].refs += 1;
    }

    fn release_slot(&mut self, slot: usize) {
        let refs = &mut self.roots[slot].refs;
        debug_assert!(*refs > 0);
        *refs -= 1;
        if *refs == 0 {
            self.roots[slot].node = ZERO;
            self.free_slots.push(slot);
        }
    }

    /// Mark-and-sweep over the unique table, keeping everything reachable
    /// from a live root slot.
    fn collect_garbage(&mut self) {
        debug!("Collecting garbage...");

        self.cache.clear();

        let alive = self.descendants(self.live_roots().collect::<Vec<_>>());
        debug!("{} alive nodes", alive.len());

        let n = self.storage.num_buckets();
        for i in 0..n {
            let mut index = self.storage.bucket(i);
            if index == 0 {
                continue;
            }

            // Drop dead nodes from the head of the chain.
            while index != 0 && !alive.contains(&(index as PddId)) {
                let next = self.storage.next(index);
                self.storage.drop(index);
                index = next;
            }
            self.storage.set_bucket(i, index);

            // Then unlink dead nodes from the middle.
            let mut prev = index;
            while prev != 0 {
                let mut cur = self.storage.next(prev);
                while cur != 0 && !alive.contains(&(cur as PddId)) {
                    let next = self.storage.next(cur);
                    self.storage.drop(cur);
                    cur = next;
                }
                if self.storage.next(prev) != cur {
                    self.storage.set_next(prev, cur);
                }
                prev = cur;
            }
        }
    }

    /// Install a new variable order and rebuild every live root under it.
    /// Handles keep denoting the same polynomial.
    fn reset(&mut self, level2var: &[u32]) {
        assert_eq!(level2var.len(), self.num_vars as usize, "Order size mismatch");
        let mut var2level = vec![u32::MAX; self.num_vars as usize];
        for (level, &var) in level2var.iter().enumerate() {
            assert!(var < self.num_vars, "Unknown variable id {}", var);
            assert!(var2level[var as usize] == u32::MAX, "Duplicate variable {}", var);
            var2level[var as usize] = level as u32;
        }

        // Monomials are an order-independent representation of each root.
        let captured: Vec<(usize, Vec<Monomial>)> = self
            .roots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.refs > 0)
            .map(|(i, slot)| (i, self.monomials(slot.node)))
            .collect();

        self.level2var = level2var.to_vec();
        self.var2level = var2level;
        self.cache.clear();

        let mut storage = Table::new(16);
        let zero = storage.add(PddEntry::Val(BigInt::zero()));
        let one = storage.add(PddEntry::Val(BigInt::one()));
        assert_eq!(zero as PddId, ZERO);
        assert_eq!(one as PddId, ONE);
        self.storage = storage;

        for (slot, monomials) in captured {
            let mut acc = ZERO;
            for m in monomials {
                let mut t = self.mk_val(m.coeff);
                for &v in &m.vars {
                    let xv = self.mk_var(v);
                    t = self.mul(t, xv);
                }
                acc = self.add(acc, t);
            }
            self.roots[slot].node = acc;
        }
    }
}

/// Shared engine for canonical polynomials.
///
/// All [`Pdd`] handles of one manager index into its root table and remain
/// valid across [`PddManager::collect_garbage`] and [`PddManager::reset`].
pub struct PddManager {
    store: Rc<RefCell<PddStore>>,
}

impl PddManager {
    /// An engine over the integers, for variables `0..num_vars`.
    pub fn new(num_vars: u32) -> Self {
        Self::with_semantics(num_vars, Semantics::Integer)
    }

    /// An engine over ℤ/2^width, for variables `0..num_vars`.
    pub fn new_mod2n(num_vars: u32, width: u32) -> Self {
        Self::with_semantics(num_vars, Semantics::Mod2N(width))
    }

    pub fn with_semantics(num_vars: u32, semantics: Semantics) -> Self {
        Self {
            store: Rc::new(RefCell::new(PddStore::new(num_vars, semantics))),
        }
    }

    fn wrap(&self, node: PddId) -> Pdd {
        let slot = self.store.borrow_mut().alloc_slot(node);
        Pdd {
            store: Rc::clone(&self.store),
            slot,
        }
    }

    fn check_engine(&self, p: &Pdd) -> PddId {
        assert!(
            Rc::ptr_eq(&self.store, &p.store),
            "Handle belongs to a different engine instance"
        );
        p.node()
    }

    pub fn num_vars(&self) -> u32 {
        self.store.borrow().num_vars
    }

    pub fn semantics(&self) -> Semantics {
        self.store.borrow().semantics.clone()
    }

    /// The zero polynomial.
    pub fn zero(&self) -> Pdd {
        self.wrap(ZERO)
    }
    /// The unit polynomial.
    pub fn one(&self) -> Pdd {
        self.wrap(ONE)
    }

    /// A constant polynomial.
    pub fn mk_val(&self, value: impl Into<BigInt>) -> Pdd {
        let node = self.store.borrow_mut().mk_val(value.into());
        self.wrap(node)
    }

    /// The polynomial of a single variable.
    pub fn mk_var(&self, var: u32) -> Pdd {
        let node = self.store.borrow_mut().mk_var(var);
        self.wrap(node)
    }

    pub fn add(&self, p: &Pdd, q: &Pdd) -> Pdd {
        let (p, q) = (self.check_engine(p), self.check_engine(q));
        let node = self.store.borrow_mut().add(p, q);
        self.wrap(node)
    }

    pub fn sub(&self, p: &Pdd, q: &Pdd) -> Pdd {
        let (p, q) = (self.check_engine(p), self.check_engine(q));
        let node = self.store.borrow_mut().sub(p, q);
        self.wrap(node)
    }

    pub fn mul(&self, p: &Pdd, q: &Pdd) -> Pdd {
        let (p, q) = (self.check_engine(p), self.check_engine(q));
        let node = self.store.borrow_mut().mul(p, q);
        self.wrap(node)
    }

    pub fn neg(&self, p: &Pdd) -> Pdd {
        let p = self.check_engine(p);
        let node = self.store.borrow_mut().neg(p);
        self.wrap(node)
    }

    /// Reduce `e` by `f`: repeatedly cancel monomials of `e` divisible by
    /// the leading monomial of `f`. Reducing by zero is the identity.
    pub fn reduce(&self, e: &Pdd, f: &Pdd) -> Pdd {
        let (e, f) = (self.check_engine(e), self.check_engine(f));
        debug!("reduce({}, {})", e, f);
        let node = self.store.borrow_mut().reduce(e, f);
        self.wrap(node)
    }

    /// S-polynomial of `p` and `q`, or `None` when the critical pair is
    /// trivial (zero operand or coprime leading monomials).
    pub fn try_spoly(&self, p: &Pdd, q: &Pdd) -> Option<Pdd> {
        let (p, q) = (self.check_engine(p), self.check_engine(q));
        let node = self.store.borrow_mut().try_spoly(p, q)?;
        Some(self.wrap(node))
    }

    /// Resolvent of `p` and `q` on `v`, cancelling the highest power of
    /// `v`. Requires `deg_v(p) >= deg_v(q) >= 1`, otherwise `None`.
    pub fn resolve(&self, v: u32, p: &Pdd, q: &Pdd) -> Option<Pdd> {
        let (p, q) = (self.check_engine(p), self.check_engine(q));
        let node = self.store.borrow_mut().resolve(v, p, q)?;
        Some(self.wrap(node))
    }

    /// Split `p = lc * v^d + rest` with `deg_v(rest) < d` for `d > 0`; for
    /// `d == 0` the split is `(0, p)`.
    pub fn factor(&self, p: &Pdd, v: u32, d: u32) -> (Pdd, Pdd) {
        let p = self.check_engine(p);
        let (lc, rest) = self.store.borrow_mut().factor(p, v, d);
        (self.wrap(lc), self.wrap(rest))
    }

    /// Strict comparison of `p` and `q` by their monomial sequences.
    pub fn lm_lt(&self, p: &Pdd, q: &Pdd) -> bool {
        let (p, q) = (self.check_engine(p), self.check_engine(q));
        self.store.borrow().lm_lt(p, q)
    }

    /// Number of non-terminal entries reachable from live handles.
    pub fn num_nodes(&self) -> usize {
        self.store.borrow().live_size()
    }

    /// Reclaim entries unreachable from any live handle.
    pub fn collect_garbage(&self) {
        self.store.borrow_mut().collect_garbage();
    }

    /// Install the variable order given as a level-to-variable map (level 0
    /// is the deepest) and rebuild all live polynomials under it. Handles
    /// stay valid and keep denoting the same polynomial.
    pub fn reset(&self, level2var: &[u32]) {
        self.store.borrow_mut().reset(level2var);
    }
}

impl Clone for PddManager {
    /// Cloning a manager yields another handle to the same engine.
    fn clone(&self) -> Self {
        Self {
            store: Rc::clone(&self.store),
        }
    }
}

impl fmt::Debug for PddManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let store = self.store.borrow();
        f.debug_struct("PddManager")
            .field("num_vars", &store.num_vars)
            .field("semantics", &store.semantics)
            .field("live_nodes", &store.live_size())
            .finish()
    }
}

/// A reference-counted handle to a polynomial.
///
/// Two handles from the same engine are equal iff they denote the same
/// polynomial.
pub struct Pdd {
    store: Rc<RefCell<PddStore>>,
    slot: usize,
}

impl Pdd {
    fn node(&self) -> PddId {
        self.store.borrow().slot_node(self.slot)
    }

    pub fn is_zero(&self) -> bool {
        self.node() == ZERO
    }

    pub fn is_one(&self) -> bool {
        self.node() == ONE
    }

    pub fn is_val(&self) -> bool {
        let node = self.node();
        self.store.borrow().is_val(node)
    }

    /// The value of a constant polynomial.
    pub fn val(&self) -> BigInt {
        let node = self.node();
        self.store.borrow().val(node).clone()
    }

    /// Top variable of a non-constant polynomial.
    pub fn var(&self) -> u32 {
        let node = self.node();
        self.store.borrow().var_of(node)
    }

    /// Degree in the variable `v`.
    pub fn degree(&self, v: u32) -> u32 {
        let node = self.node();
        self.store.borrow().degree_in(node, v, &mut HashMap::new())
    }

    /// Total degree.
    pub fn total_degree(&self) -> u32 {
        let node = self.node();
        self.store.borrow().total_degree(node, &mut HashMap::new())
    }

    /// Whether no monomial multiplies two variables.
    pub fn is_linear(&self) -> bool {
        self.total_degree() <= 1
    }

    pub fn pow(&self, n: u32) -> Pdd {
        let node = self.node();
        let res = self.store.borrow_mut().pow(node, n);
        manager_of(self).wrap(res)
    }

    /// Substitute a value for one variable.
    pub fn subst_val(&self, v: u32, value: impl Into<BigInt>) -> Pdd {
        self.subst_vals(&[(v, value.into())])
    }

    /// Substitute values for several variables at once.
    pub fn subst_vals(&self, values: &[(u32, BigInt)]) -> Pdd {
        let node = self.node();
        let res = {
            let mut store = self.store.borrow_mut();
            let values: HashMap<u32, BigInt> = values
                .iter()
                .map(|(v, c)| (*v, store.normalize(c.clone())))
                .collect();
            store.subst(node, &values, &mut HashMap::new())
        };
        manager_of(self).wrap(res)
    }

    /// Largest `k` such that `2^k` divides every coefficient; `u32::MAX`
    /// for the zero polynomial.
    pub fn max_pow2_divisor(&self) -> u32 {
        let node = self.node();
        self.store.borrow().max_pow2_divisor(node, &mut HashMap::new())
    }

    /// Exact division of every coefficient by `2^k`.
    pub fn div_by_pow2(&self, k: u32) -> Pdd {
        let node = self.node();
        let res = self.store.borrow_mut().div_by_pow2(node, k, &mut HashMap::new());
        manager_of(self).wrap(res)
    }

    /// Whether the polynomial is nonzero under every assignment.
    pub fn is_never_zero(&self) -> bool {
        let node = self.node();
        self.store.borrow().is_never_zero(node)
    }

    /// The coefficient of the empty monomial.
    pub fn const_term(&self) -> BigInt {
        let node = self.node();
        self.store.borrow().const_term(node)
    }

    /// All monomials, sorted descending in the term order. Derived afresh
    /// on every call, so it stays correct across [`PddManager::reset`].
    pub fn monomials(&self) -> Vec<Monomial> {
        let node = self.node();
        self.store.borrow().monomials(node)
    }

    /// The greatest monomial, `None` for the zero polynomial.
    pub fn leading_monomial(&self) -> Option<Monomial> {
        let node = self.node();
        self.store.borrow().leading_monomial(node)
    }

    /// Reduce this polynomial by `f`.
    pub fn reduce(&self, f: &Pdd) -> Pdd {
        manager_of(self).reduce(self, f)
    }
}

fn manager_of(p: &Pdd) -> PddManager {
    PddManager {
        store: Rc::clone(&p.store),
    }
}

impl Clone for Pdd {
    fn clone(&self) -> Self {
        self.store.borrow_mut().retain_slot(self.slot);
        Self {
            store: Rc::clone(&self.store),
            slot: self.slot,
        }
    }
}

impl Drop for Pdd {
    fn drop(&mut self) {
        self.store.borrow_mut().release_slot(self.slot);
    }
}

impl PartialEq for Pdd {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.store, &other.store) && self.node() == other.node()
    }
}

impl Eq for Pdd {}

impl fmt::Display for Pdd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let monomials = self.monomials();
        if monomials.is_empty() {
            return write!(f, "0");
        }
        for (i, m) in monomials.iter().enumerate() {
            let negative = m.coeff.is_negative();
            if i == 0 {
                if negative {
                    write!(f, "-")?;
                }
            } else if negative {
                write!(f, " - ")?;
            } else {
                write!(f, " + ")?;
            }
            let magnitude = m.coeff.abs();
            if m.vars.is_empty() {
                write!(f, "{}", magnitude)?;
            } else {
                if !magnitude.is_one() {
                    write!(f, "{}*", magnitude)?;
                }
                for (j, v) in m.vars.iter().enumerate() {
                    if j > 0 {
                        write!(f, "*")?;
                    }
                    write!(f, "v{}", v)?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Pdd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Owned and borrowed operands combine freely, so chained expressions like
/// `2 * &a * &b + 1` read the way the mathematics does.
macro_rules! forward_binop {
    ($trait:ident, $method:ident) => {
        impl std::ops::$trait for &Pdd {
            type Output = Pdd;
            fn $method(self, rhs: &Pdd) -> Pdd {
                manager_of(self).$method(self, rhs)
            }
        }
        impl std::ops::$trait<&Pdd> for Pdd {
            type Output = Pdd;
            fn $method(self, rhs: &Pdd) -> Pdd {
                std::ops::$trait::$method(&self, rhs)
            }
        }
        impl std::ops::$trait<Pdd> for &Pdd {
            type Output = Pdd;
            fn $method(self, rhs: Pdd) -> Pdd {
                std::ops::$trait::$method(self, &rhs)
            }
        }
        impl std::ops::$trait for Pdd {
            type Output = Pdd;
            fn $method(self, rhs: Pdd) -> Pdd {
                std::ops::$trait::$method(&self, &rhs)
            }
        }
        impl std::ops::$trait<u64> for &Pdd {
            type Output = Pdd;
            fn $method(self, rhs: u64) -> Pdd {
                let c = manager_of(self).mk_val(rhs);
                std::ops::$trait::$method(self, &c)
            }
        }
        impl std::ops::$trait<u64> for Pdd {
            type Output = Pdd;
            fn $method(self, rhs: u64) -> Pdd {
                std::ops::$trait::$method(&self, rhs)
            }
        }
    };
}

forward_binop!(Add, add);
forward_binop!(Sub, sub);
forward_binop!(Mul, mul);

impl std::ops::Mul<&Pdd> for u64 {
    type Output = Pdd;
    fn mul(self, rhs: &Pdd) -> Pdd {
        let m = manager_of(rhs);
        let c = m.mk_val(self);
        m.mul(&c, rhs)
    }
}

impl std::ops::Mul<Pdd> for u64 {
    type Output = Pdd;
    fn mul(self, rhs: Pdd) -> Pdd {
        self * &rhs
    }
}

impl std::ops::Neg for &Pdd {
    type Output = Pdd;
    fn neg(self) -> Pdd {
        manager_of(self).neg(self)
    }
}

impl std::ops::Neg for Pdd {
    type Output = Pdd;
    fn neg(self) -> Pdd {
        -&self
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn mono(coeff: u64, vars: &[u32]) -> Monomial {
        Monomial {
            coeff: BigInt::from(coeff),
            vars: vars.to_vec(),
        }
    }

    #[test]
    fn test_canonize() {
        let m = PddManager::new(2);
        let a = m.mk_var(0);
        let b = m.mk_var(1);

        assert_eq!((&a - &b) * (&a + &b), &a * &a - &b * &b);
        assert_eq!((&a - &b) * (&a - &b), &a * &a - 2 * &a * &b + &b * &b);

        let e = &a - 3;
        assert_eq!(&e * &e, &a * &a - 6 * &a + 9);
        let e = 2 * &a - 3;
        assert_eq!(&e * &e, 4 * &a * &a - 12 * &a + 9);
    }

    #[test]
    fn test_ring_laws() {
        let m = PddManager::new(3);
        let v0 = m.mk_var(0);
        let v1 = m.mk_var(1);
        let v2 = m.mk_var(2);

        assert_eq!(&v0 * &v1 * &v2, &v2 * &v0 * &v1);
        assert_eq!(&v0 + &v1 + &v2, &v2 + &v1 + &v0);
        assert_eq!((&v0 + &v1) * &v2, &v0 * &v2 + &v1 * &v2);
        assert_eq!((&v0 + &v1) * &v2 + 3 + 1, (&v0 * &v2 + &v1 * &v2 + 1) + 3);
        assert_eq!(&v0 - &v1, -(&v1 - &v0));
    }

    #[test]
    fn test_spoly() {
        let m = PddManager::new(3);
        let v0 = m.mk_var(0);
        let v1 = m.mk_var(1);
        let v2 = m.mk_var(2);

        // Leading monomials v1*v2 and v2*v2 share v2.
        let c1 = &v1 * &v2;
        let c2 = &v0 * &v2 + &v2 * &v2;
        let s = m.try_spoly(&c1, &c2).unwrap();
        assert_eq!(s, -(&v0 * &v1 * &v2));

        let c2 = &v0 * &v2 + &v1 * &v1;
        let s = m.try_spoly(&c1, &c2).unwrap();
        assert_eq!(s, -(&v1 * &v1 * &v1));

        // Coprime leading monomials make the critical pair trivial.
        assert!(m.try_spoly(&v0, &v1).is_none());
        assert!(m.try_spoly(&m.zero(), &c1).is_none());

        // Reduction is idempotent.
        let c1 = &v0 * &v1 - &v0 * &v0;
        let c2 = &v0 * &v1 * (&v2 + &v0) + &v2;
        let c3 = c2.reduce(&c1);
        assert_eq!(c3, c3.reduce(&c1));
    }

    #[test]
    fn test_reduce() {
        let m = PddManager::new(4);
        let a = m.mk_var(0);
        let b = m.mk_var(1);
        let c = m.mk_var(2);
        let d = m.mk_var(3);

        let e = &a * &b * &b * &c * &d + 2 * &a * &b * &c + &b * &c * &d + &b * &c + &c * &d + 3;
        let f = &b * &c;
        assert_eq!(m.reduce(&e, &f), &c * &d + 3);
        assert_eq!(m.reduce(&f, &e), f);

        // b*c*d outweighs d*d in the term order.
        let f = &b * &c * &d - &d * &d;
        assert_eq!(
            m.reduce(&e, &f),
            &a * &b * &d * &d + 2 * &a * &b * &c + &d * &d + &b * &c + &c * &d + 3
        );

        let k = &d * &d + 3 * &b;
        assert_eq!(m.reduce(&f, &k), &b * &c * &d + 3 * &b);
    }

    #[test]
    fn test_large_product() {
        let m = PddManager::new(4);
        let a = m.mk_var(0);
        let b = m.mk_var(1);
        let c = m.mk_var(2);

        let mut e = &a + &c;
        for _ in 0..5 {
            e = &e * &e;
        }
        e = &e * &b;

        assert_eq!(e.total_degree(), 33);
        let lm = e.leading_monomial().unwrap();
        assert_eq!(lm.vars.len(), 33);
        assert_eq!(lm.vars[0], 2);
        assert!(lm.coeff.is_one());
    }

    #[test]
    fn test_reset() {
        let m = PddManager::new(4);
        let a = m.mk_var(0);
        let b = m.mk_var(1);
        let c = m.mk_var(2);
        let d = m.mk_var(3);
        let p = (&a + &b) * (&c + &d);

        // Default order: the highest-numbered variable leads.
        assert_eq!(p.leading_monomial().unwrap().vars, vec![3, 1]);

        m.reset(&[3, 2, 1, 0]);

        // The handle survives the rebuild and still denotes the same
        // polynomial under the reversed order.
        let a = m.mk_var(0);
        let b = m.mk_var(1);
        let c = m.mk_var(2);
        let d = m.mk_var(3);
        assert_eq!(p, (&a + &b) * (&c + &d));
        assert_eq!(p.leading_monomial().unwrap().vars, vec![0, 2]);
    }

    #[test]
    fn test_iterator() {
        let m = PddManager::new(4);
        let a = m.mk_var(0);
        let b = m.mk_var(1);
        let c = m.mk_var(2);
        let d = m.mk_var(3);
        let p = (&a + &b) * (&c + 3 * &d) + 2;

        let expected = vec![
            mono(3, &[3, 1]),
            mono(3, &[3, 0]),
            mono(1, &[2, 1]),
            mono(1, &[2, 0]),
            mono(2, &[]),
        ];
        assert_eq!(p.monomials(), expected);
        // Derived afresh on each call.
        assert_eq!(p.monomials(), expected);

        assert_eq!(m.zero().monomials(), Vec::<Monomial>::new());
        assert_eq!(m.one().monomials(), vec![mono(1, &[])]);
    }

    #[test]
    fn test_order() {
        let m = PddManager::new(4);
        let a = m.mk_var(0);
        let b = m.mk_var(1);
        let c = m.mk_var(2);
        let d = m.mk_var(3);

        let p = &a + &b;
        let ms = p.monomials();
        assert_eq!(ms[0].vars, vec![1]);
        assert_eq!(ms[1].vars, vec![0]);

        // Equal total degree: c*c*b*b*b*a beats c*c*b*b*a*a.
        let ccbbaa = &c * &c * &b * &b * &a * &a;
        let ccbbba = &c * &c * &b * &b * &b * &a;
        let ms = (&ccbbaa + &ccbbba).monomials();
        assert_eq!(ms[0].vars, vec![2, 2, 1, 1, 1, 0]);
        assert_eq!(ms[1].vars, vec![2, 2, 1, 1, 0, 0]);

        // Total degree outweighs any lexicographic advantage.
        let dcbba = &d * &c * &b * &b * &a;
        let dd = &d * &d;
        let p = &dcbba + &ccbbba + &dd;
        let lm = p.leading_monomial().unwrap();
        assert_eq!(lm.vars.len(), 6);
        assert_eq!(lm.vars[0], 2);

        let p = &d * &c * &c * &d + &b * &c * &c * &b + &d * &d * &d;
        let lm = p.leading_monomial().unwrap();
        assert_eq!(lm.vars.len(), 4);
        assert_eq!(lm.vars, vec![3, 3, 2, 2]);
    }

    #[test]
    fn test_order_lm() {
        let m = PddManager::new(4);
        let a = m.mk_var(0);
        let b = m.mk_var(1);
        let c = m.mk_var(2);
        let d = m.mk_var(3);

        let ccbbaa = &c * &c * &b * &b * &a * &a;
        let ccbbba = &c * &c * &b * &b * &b * &a;
        let p = &ccbbaa + &ccbbba;
        let p0 = &p + &d * &d;

        // A proper prefix of monomials compares below its extension.
        assert!(m.lm_lt(&p, &p0));
        assert!(m.lm_lt(&(&p0 + &a * &b), &(&p0 + &b * &b)));
        assert!(!m.lm_lt(&p0, &p0));
    }

    #[test]
    fn test_mod4_operations() {
        let m = PddManager::new_mod2n(4, 2);
        let a = m.mk_var(0);
        let b = m.mk_var(1);

        // a^2*(a^2 - 1) vanishes at every point of Z/4.
        let p = &a * &a * (&a * &a - 1);
        for k in 0u64..4 {
            assert!(p.subst_val(0, k).is_zero());
        }

        assert!((2 * &a + 1).is_never_zero());
        assert!((2 * &a + 2 * &b + 1).is_never_zero());
        assert!((2 * &a * &b + 2 * &b + 1).is_never_zero());
        assert!(!(2 * &a + 2).is_never_zero());
        assert!(!(2 * &a * &b + 3 * &b + 2).is_never_zero());
    }

    #[test]
    fn test_degree_of_variables() {
        let m = PddManager::new_mod2n(4, 3);
        let va = 0;
        let vb = 1;
        let vc = 2;
        let a = m.mk_var(va);
        let b = m.mk_var(vb);
        let c = m.mk_var(vc);

        assert_eq!(a.var(), va);
        assert_eq!(b.var(), vb);

        assert_eq!(a.degree(va), 1);
        assert_eq!(a.degree(vb), 0);
        assert_eq!(a.degree(vc), 0);
        assert_eq!(c.degree(vc), 1);
        assert_eq!(c.degree(vb), 0);
        assert_eq!(c.degree(va), 0);

        let p = &a * &a * &a;
        assert_eq!(p.degree(va), 3);
        assert_eq!(p.degree(vb), 0);

        let p = &b * &a;
        assert_eq!(p.degree(va), 1);
        assert_eq!(p.degree(vb), 1);
        assert_eq!(p.degree(vc), 0);
        assert!(!p.is_linear());
        assert!((&a + 2 * &b + 3).is_linear());
        assert!(m.zero().is_linear());

        let p = (&a * &a * &b + &b * &a * &b + &b + &a * &c) * &a + &b * &b * &c;
        assert_eq!(p.degree(va), 3);
        assert_eq!(p.degree(vb), 2);
        assert_eq!(p.degree(vc), 1);

        // Shared subgraphs must not hide the deepest power.
        let p = &b * &a + &c * &a * &a * &a;
        assert_eq!(p.degree(va), 3);
        let p = (&b + &c) * (&a * &a * &a);
        assert_eq!(p.degree(va), 3);
        let p = &a * &a * &a * &b * &b * &b * &c + &a * &a * &a * &b * &b * &b;
        assert_eq!(p.degree(va), 3);
    }

    #[test]
    fn test_factor() {
        let m = PddManager::new_mod2n(4, 3);
        let a = m.mk_var(0);
        let b = m.mk_var(1);
        let c = m.mk_var(2);
        let d = m.mk_var(3);

        let check_one = |p: &Pdd, v: u32, deg: u32| {
            let (lc, rest) = m.factor(p, v, deg);
            let x_pow_d = m.mk_var(v).pow(deg);
            assert_eq!(*p, &lc * &x_pow_d + &rest);
            assert!(deg == 0 || rest.degree(v) < deg);
            assert!(deg != 0 || lc.is_zero());
        };
        let check_all = |p: &Pdd| {
            for v in 0..4 {
                for deg in 0..=5 {
                    check_one(p, v, deg);
                }
            }
        };

        check_all(&b);
        check_all(&(&b * &b * &b));
        check_all(&(&b + &c));
        check_all(&(&a * &a * &a * &a * &a + &a * &a * &a * &b + &a * &a * &b * &b + &c));
        check_all(&(&c * &c * &c * &c * &c + &b * &b * &b * &c + 3 * &b * &c * &c + &a));
        check_all(&((&a + &b) * (&b + &c) * (&c + &d) * (&d + &a)));
    }

    #[test]
    fn test_max_pow2_divisor() {
        let m = PddManager::new_mod2n(4, 256);
        let a = m.mk_var(0);
        let b = m.mk_var(1);

        assert_eq!(m.zero().max_pow2_divisor(), u32::MAX);
        assert_eq!(m.one().max_pow2_divisor(), 0);

        let p = (1u64 << 20) * &a * &b + 1024 * &b * &b * &b;
        assert_eq!(p.max_pow2_divisor(), 10);
        assert_eq!(p.div_by_pow2(10), 1024 * &a * &b + &b * &b * &b);
        assert_eq!((&p + &p).max_pow2_divisor(), 11);
        assert_eq!((&p * &p).max_pow2_divisor(), 20);
        assert_eq!((&p + 2 * &b).max_pow2_divisor(), 1);
        assert_eq!((&p + &b * &b * &b).max_pow2_divisor(), 0);
    }

    #[test]
    fn test_binary_resolve() {
        let m = PddManager::new_mod2n(4, 4);
        let va = 0;
        let vb = 1;
        let vc = 2;
        let a = m.mk_var(va);
        let b = m.mk_var(vb);
        let c = m.mk_var(vc);

        let p = &a * &a * &b - &a * &a;
        let q = &a * &b * &b - &b * &b;
        let r = m.resolve(va, &p, &q).unwrap();
        assert_eq!(r, &a * &b * &b * &b - &a * &b * &b);
        assert!(m.resolve(va, &q, &p).is_none());
        assert!(m.resolve(vb, &p, &q).is_none());
        let r = m.resolve(vb, &q, &p).unwrap();
        assert_eq!(r, &a * &a * &a * &b - &a * &a * &b);
        assert!(m.resolve(vc, &p, &q).is_none());

        let p = 2 * &a * &a * &b + 13 * &a * &a;
        let q = 6 * &a * &b * &b * &b + 14 * &b * &b * &b;
        let r = m.resolve(va, &p, &q).unwrap();
        assert_eq!(r, (2 * &b + 13) * 2 * &b * &b * &b * &a);
        assert!(m.resolve(va, &q, &p).is_none());
        assert!(m.resolve(vb, &p, &q).is_none());
        let r = m.resolve(vb, &q, &p).unwrap();
        assert_eq!(r, 9 * &a * &a * &a * &b * &b + 5 * &a * &a * &b * &b);

        let p = &a * &a * &b - &a * &a + 4 * &a * &c + 2;
        let q = 3 * &b * &b - &b * &b * &b + 8 * &b * &c;
        assert!(m.resolve(va, &p, &q).is_none());
        assert!(m.resolve(va, &q, &p).is_none());
        assert!(m.resolve(vb, &p, &q).is_none());
        let r = m.resolve(vb, &q, &p).unwrap();
        assert_eq!(
            r,
            2 * &a * &a * &b * &b + 8 * &a * &a * &b * &c + 4 * &a * &b * &b * &c + 2 * &b * &b
        );
        let expected =
            2 * &a * &a * &b * &b - 2 * &a * &a * &b - 3 * &a * &b * &b + &a * &b * &b * &b
                + 4 * &b;
        let r = m.resolve(vc, &p, &q).unwrap();
        assert_eq!(r, expected);
        let r = m.resolve(vc, &q, &p).unwrap();
        assert_eq!(r, -&expected);
    }

    #[test]
    fn test_pow() {
        let m = PddManager::new_mod2n(4, 5);
        let a = m.mk_var(0);
        let b = m.mk_var(1);

        assert_eq!(a.pow(0), m.one());
        assert_eq!(a.pow(1), a);
        assert_eq!(a.pow(2), &a * &a);
        assert_eq!(a.pow(7), &a * &a * &a * &a * &a * &a * &a);
        assert_eq!((3 * &a * &b).pow(3), 27 * &a * &a * &a * &b * &b * &b);
    }

    #[test]
    fn test_subst_val() {
        let m = PddManager::new_mod2n(4, 2);
        let va = 0;
        let vb = 1;
        let vc = 2;
        let vd = 3;
        let a = m.mk_var(va);
        let b = m.mk_var(vb);
        let c = m.mk_var(vc);
        let d = m.mk_var(vd);

        let p = 2 * &a + &b + 1;
        assert_eq!(p.subst_val(va, 0u64), &b + 1);

        let p = &a + 2 * &b;
        assert_eq!(p.subst_val(va, 0u64), 2 * &b);
        assert_eq!(p.subst_val(va, 2u64), 2 * &b + 2);
        assert_eq!(p.subst_val(vb, 0u64), a);
        assert_eq!(p.subst_val(vb, 1u64), &a + 2);
        assert_eq!(p.subst_val(vb, 2u64), a);
        assert_eq!(p.subst_val(vb, 3u64), &a + 2);
        assert_eq!(p.subst_val(va, 0u64).subst_val(vb, 3u64), m.mk_val(2));

        let p = &a + &b + &c + &d;
        let sub = vec![(vb, BigInt::from(2)), (vc, BigInt::from(3))];
        assert_eq!(p.subst_vals(&sub), &a + &d + 1);

        let p = (&a + &b) * (&b + &c) * (&c + &d);
        let mut sub = vec![(vb, BigInt::from(2)), (vc, BigInt::from(3))];
        assert_eq!(p.subst_vals(&sub), (&a + 2) * (&d + 3));
        sub.push((va, BigInt::from(3)));
        sub.push((vd, BigInt::from(2)));
        assert_eq!(p.subst_vals(&sub), m.one());
    }

    #[test]
    fn test_display() {
        let m = PddManager::new(2);
        let a = m.mk_var(0);
        let b = m.mk_var(1);

        assert_eq!(format!("{}", m.zero()), "0");
        assert_eq!(format!("{}", 2 * &a + 1), "2*v0 + 1");
        assert_eq!(format!("{}", &a * &b - 3), "v0*v1 - 3");
        assert_eq!(format!("{}", -&a), "-v0");
    }

    #[test]
    fn test_garbage_collection() {
        let m = PddManager::new(3);
        let a = m.mk_var(0);
        let b = m.mk_var(1);

        let p = {
            let t = &a * &a * &b + 3 * &b;
            &t * &t
        };
        let before = m.num_nodes();
        m.collect_garbage();

        // Only the dropped intermediate is reclaimed; p survives.
        assert_eq!(m.num_nodes(), before);
        assert_eq!(p, (&a * &a * &b + 3 * &b) * (&a * &a * &b + 3 * &b));
    }

    #[test]
    fn test_engine_mismatch_panics() {
        let m1 = PddManager::new(2);
        let m2 = PddManager::new(2);
        let p = m1.mk_var(0);
        let q = m2.mk_var(0);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| m1.add(&p, &q)));
        assert!(result.is_err());
    }
}
