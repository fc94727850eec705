//! Bit-vectors over BDDs: an LSB-first sequence of Boolean functions
//! denoting an integer in `[0, 2^k)`. All arithmetic wraps modulo `2^k`
//! and is built bit by bit from [`BddManager`] combinators (ripple-carry
//! addition, shift-and-add multiplication, restoring long division).

use std::rc::Rc;

use log::debug;
use num_bigint::BigUint;
use num_traits::{One, Zero};

use crate::bdd::{Bdd, BddManager, BddStore, NodeId, FALSE, TRUE};

/// An ordered (LSB-first) vector of Boolean functions over distinct
/// variables of one engine.
#[derive(Clone, PartialEq, Eq)]
pub struct Bddv {
    bits: Vec<Bdd>,
}

impl Bddv {
    /// Bit width of the vector.
    pub fn num_bits(&self) -> usize {
        self.bits.len()
    }

    /// The per-bit functions, LSB first.
    pub fn bits(&self) -> &[Bdd] {
        &self.bits
    }

    /// True iff every bit is a constant function.
    pub fn is_const(&self) -> bool {
        self.bits.iter().all(|b| b.is_const())
    }

    /// The integer value of a constant vector.
    ///
    /// Precondition: `is_const()` — calling this on a non-constant vector
    /// is a contract violation.
    pub fn to_val(&self) -> BigUint {
        let mut value = BigUint::zero();
        for (i, bit) in self.bits.iter().enumerate() {
            assert!(bit.is_const(), "to_val on a non-constant vector");
            if bit.is_true() {
                value |= BigUint::one() << i;
            }
        }
        value
    }
}

impl std::fmt::Debug for Bddv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bddv[{}]", self.bits.len())
    }
}

impl BddStore {
    fn vec_add(&mut self, a: &[NodeId], b: &[NodeId]) -> Vec<NodeId> {
        assert_eq!(a.len(), b.len(), "Bit widths differ");
        let mut carry = FALSE;
        let mut out = Vec::with_capacity(a.len());
        for i in 0..a.len() {
            let axb = self.xor(a[i], b[i]);
            let sum = self.xor(axb, carry);
            // carry' = (a ∧ b) ∨ (carry ∧ (a ⊕ b))
            let ab = self.and(a[i], b[i]);
            let ca = self.and(carry, axb);
            carry = self.or(ab, ca);
            out.push(sum);
        }
        out
    }

    fn vec_sub(&mut self, a: &[NodeId], b: &[NodeId]) -> Vec<NodeId> {
        assert_eq!(a.len(), b.len(), "Bit widths differ");
        let mut borrow = FALSE;
        let mut out = Vec::with_capacity(a.len());
        for i in 0..a.len() {
            let axb = self.xor(a[i], b[i]);
            let diff = self.xor(axb, borrow);
            // borrow' = (¬a ∧ b) ∨ (¬(a ⊕ b) ∧ borrow)
            let na = self.not(a[i]);
            let nab = self.and(na, b[i]);
            let keep = self.not(axb);
            let kb = self.and(keep, borrow);
            borrow = self.or(nab, kb);
            out.push(diff);
        }
        out
    }

    /// Conditionally add `b << shift` to `a` under guard `cond`.
    fn vec_add_shifted(
        &mut self,
        a: &[NodeId],
        b: &[NodeId],
        shift: usize,
        cond: NodeId,
    ) -> Vec<NodeId> {
        let k = a.len();
        let mut addend = vec![FALSE; k];
        for i in shift..k {
            addend[i] = self.and(b[i - shift], cond);
        }
        self.vec_add(a, &addend)
    }

    fn vec_mul(&mut self, a: &[NodeId], b: &[NodeId]) -> Vec<NodeId> {
        assert_eq!(a.len(), b.len(), "Bit widths differ");
        let mut acc = vec![FALSE; a.len()];
        for (j, &bj) in b.iter().enumerate() {
            acc = self.vec_add_shifted(&acc, a, j, bj);
        }
        acc
    }

    fn vec_mul_const(&mut self, a: &[NodeId], c: &BigUint) -> Vec<NodeId> {
        let mut acc = vec![FALSE; a.len()];
        for j in 0..a.len() {
            if c.bit(j as u64) {
                acc = self.vec_add_shifted(&acc, a, j, TRUE);
            }
        }
        acc
    }

    fn vec_eq(&mut self, a: &[NodeId], b: &[NodeId]) -> NodeId {
        assert_eq!(a.len(), b.len(), "Bit widths differ");
        let mut eq = TRUE;
        for i in 0..a.len() {
            let bit_eq = self.iff(a[i], b[i]);
            eq = self.and(eq, bit_eq);
        }
        eq
    }

    /// Unsigned comparison, folded LSB to MSB:
    /// `lt' = (¬a ∧ b) ∨ ((a ≡ b) ∧ lt)`.
    fn vec_ult(&mut self, a: &[NodeId], b: &[NodeId], or_equal: bool) -> NodeId {
        assert_eq!(a.len(), b.len(), "Bit widths differ");
        let mut lt = if or_equal { TRUE } else { FALSE };
        for i in 0..a.len() {
            let na = self.not(a[i]);
            let strict = self.and(na, b[i]);
            let same = self.iff(a[i], b[i]);
            let keep = self.and(same, lt);
            lt = self.or(strict, keep);
        }
        lt
    }

    /// Flip the sign bit, translating by `2^(k-1)`; signed comparisons are
    /// unsigned comparisons of the translated operands.
    fn vec_flip_sign(&mut self, a: &[NodeId]) -> Vec<NodeId> {
        assert!(!a.is_empty(), "Zero-width vector has no sign bit");
        let mut out = a.to_vec();
        let msb = out.len() - 1;
        out[msb] = self.not(out[msb]);
        out
    }

    /// Restoring binary long division, MSB first. The construction is
    /// total: an identically-zero divisor yields quotient = all-ones and
    /// remainder = dividend (the SMT-LIB `bvudiv`/`bvurem` convention).
    fn vec_quot_rem(&mut self, a: &[NodeId], b: &[NodeId]) -> (Vec<NodeId>, Vec<NodeId>) {
        assert_eq!(a.len(), b.len(), "Bit widths differ");
        let k = a.len();

        // One extra working bit so the shifted remainder never overflows.
        let mut bext = b.to_vec();
        bext.push(FALSE);
        let mut rem = vec![FALSE; k + 1];
        let mut quot = vec![FALSE; k];

        for i in (0..k).rev() {
            // rem = (rem << 1) | a_i
            rem.pop();
            rem.insert(0, a[i]);

            let geq = self.vec_ult(&bext, &rem, true);
            let diff = self.vec_sub(&rem, &bext);
            for j in 0..=k {
                rem[j] = self.ite(geq, diff[j], rem[j]);
            }
            quot[i] = geq;
        }

        rem.truncate(k);
        (quot, rem)
    }
}

impl BddManager {
    fn nodes_of(&self, v: &Bddv) -> Vec<NodeId> {
        v.bits
            .iter()
            .map(|b| {
                assert!(
                    Rc::ptr_eq(&self.store, &b.store),
                    "Vector belongs to a different engine instance"
                );
                b.node()
            })
            .collect()
    }

    fn wrap_vec(&self, nodes: Vec<NodeId>) -> Bddv {
        Bddv {
            bits: nodes.into_iter().map(|n| self.wrap(n)).collect(),
        }
    }

    /// The all-zero vector of the given width.
    pub fn mk_zero(&self, num_bits: usize) -> Bddv {
        self.wrap_vec(vec![FALSE; num_bits])
    }

    /// The all-ones vector (`2^k - 1`) of the given width.
    pub fn mk_ones(&self, num_bits: usize) -> Bddv {
        self.wrap_vec(vec![TRUE; num_bits])
    }

    /// A constant vector. Precondition: `value < 2^num_bits`.
    pub fn mk_num(&self, value: &BigUint, num_bits: usize) -> Bddv {
        assert!(
            value.bits() <= num_bits as u64,
            "Constant {} does not fit in {} bits",
            value,
            num_bits
        );
        let nodes = (0..num_bits)
            .map(|i| if value.bit(i as u64) { TRUE } else { FALSE })
            .collect();
        self.wrap_vec(nodes)
    }

    /// A vector of single-variable functions, LSB first.
    pub fn mk_var_vec(&self, vars: &[u32]) -> Bddv {
        let nodes = {
            let mut store = self.store.borrow_mut();
            vars.iter().map(|&v| store.mk_var(v)).collect()
        };
        self.wrap_vec(nodes)
    }

    /// A vector over `count` sequential (or strided) variable ids.
    pub fn mk_var_range(&self, count: usize, start: u32, step: u32) -> Bddv {
        let vars: Vec<u32> = (0..count as u32).map(|i| start + i * step).collect();
        self.mk_var_vec(&vars)
    }

    pub fn mk_add(&self, a: &Bddv, b: &Bddv) -> Bddv {
        debug!("mk_add(width = {})", a.num_bits());
        let (an, bn) = (self.nodes_of(a), self.nodes_of(b));
        let out = self.store.borrow_mut().vec_add(&an, &bn);
        self.wrap_vec(out)
    }

    pub fn mk_sub(&self, a: &Bddv, b: &Bddv) -> Bddv {
        debug!("mk_sub(width = {})", a.num_bits());
        let (an, bn) = (self.nodes_of(a), self.nodes_of(b));
        let out = self.store.borrow_mut().vec_sub(&an, &bn);
        self.wrap_vec(out)
    }

    pub fn mk_mul(&self, a: &Bddv, b: &Bddv) -> Bddv {
        debug!("mk_mul(width = {})", a.num_bits());
        let (an, bn) = (self.nodes_of(a), self.nodes_of(b));
        let out = self.store.borrow_mut().vec_mul(&an, &bn);
        self.wrap_vec(out)
    }

    pub fn mk_mul_num(&self, a: &Bddv, c: &BigUint) -> Bddv {
        debug!("mk_mul_num(width = {}, c = {})", a.num_bits(), c);
        let an = self.nodes_of(a);
        let c = c % (BigUint::one() << a.num_bits());
        let out = self.store.borrow_mut().vec_mul_const(&an, &c);
        self.wrap_vec(out)
    }

    /// Bitwise equality of two vectors, as a single predicate.
    pub fn mk_eq(&self, a: &Bddv, b: &Bddv) -> Bdd {
        let (an, bn) = (self.nodes_of(a), self.nodes_of(b));
        let node = self.store.borrow_mut().vec_eq(&an, &bn);
        self.wrap(node)
    }

    /// `a == value`, with the constant expanded to `a`'s width.
    pub fn mk_eq_num(&self, a: &Bddv, value: &BigUint) -> Bdd {
        let b = self.mk_num(value, a.num_bits());
        self.mk_eq(a, &b)
    }

    /// `vars == value`: equality over raw variable ids, LSB first.
    pub fn mk_eq_vars(&self, vars: &[u32], value: &BigUint) -> Bdd {
        let v = self.mk_var_vec(vars);
        self.mk_eq_num(&v, value)
    }

    pub fn mk_ult(&self, a: &Bddv, b: &Bddv) -> Bdd {
        let (an, bn) = (self.nodes_of(a), self.nodes_of(b));
        let node = self.store.borrow_mut().vec_ult(&an, &bn, false);
        self.wrap(node)
    }

    pub fn mk_ule(&self, a: &Bddv, b: &Bddv) -> Bdd {
        let (an, bn) = (self.nodes_of(a), self.nodes_of(b));
        let node = self.store.borrow_mut().vec_ult(&an, &bn, true);
        self.wrap(node)
    }

    pub fn mk_ugt(&self, a: &Bddv, b: &Bddv) -> Bdd {
        self.mk_ult(b, a)
    }

    pub fn mk_uge(&self, a: &Bddv, b: &Bddv) -> Bdd {
        self.mk_ule(b, a)
    }

    pub fn mk_slt(&self, a: &Bddv, b: &Bddv) -> Bdd {
        let (an, bn) = (self.nodes_of(a), self.nodes_of(b));
        let node = {
            let mut store = self.store.borrow_mut();
            let af = store.vec_flip_sign(&an);
            let bf = store.vec_flip_sign(&bn);
            store.vec_ult(&af, &bf, false)
        };
        self.wrap(node)
    }

    pub fn mk_sle(&self, a: &Bddv, b: &Bddv) -> Bdd {
        let (an, bn) = (self.nodes_of(a), self.nodes_of(b));
        let node = {
            let mut store = self.store.borrow_mut();
            let af = store.vec_flip_sign(&an);
            let bf = store.vec_flip_sign(&bn);
            store.vec_ult(&af, &bf, true)
        };
        self.wrap(node)
    }

    pub fn mk_sgt(&self, a: &Bddv, b: &Bddv) -> Bdd {
        self.mk_slt(b, a)
    }

    pub fn mk_sge(&self, a: &Bddv, b: &Bddv) -> Bdd {
        self.mk_sle(b, a)
    }

    /// Quotient and remainder of unsigned division.
    ///
    /// An identically-zero divisor yields quotient = all-ones and
    /// remainder = dividend.
    pub fn quot_rem(&self, a: &Bddv, b: &Bddv) -> (Bddv, Bddv) {
        debug!("quot_rem(width = {})", a.num_bits());
        let (an, bn) = (self.nodes_of(a), self.nodes_of(b));
        let (q, r) = self.store.borrow_mut().vec_quot_rem(&an, &bn);
        (self.wrap_vec(q), self.wrap_vec(r))
    }
}

fn manager_of(v: &Bddv) -> BddManager {
    assert!(!v.bits.is_empty(), "Zero-width vector has no engine");
    BddManager {
        store: Rc::clone(&v.bits[0].store),
    }
}

impl std::ops::Add for &Bddv {
    type Output = Bddv;
    fn add(self, rhs: &Bddv) -> Bddv {
        manager_of(self).mk_add(self, rhs)
    }
}

impl std::ops::Sub for &Bddv {
    type Output = Bddv;
    fn sub(self, rhs: &Bddv) -> Bddv {
        manager_of(self).mk_sub(self, rhs)
    }
}

impl std::ops::Mul for &Bddv {
    type Output = Bddv;
    fn mul(self, rhs: &Bddv) -> Bddv {
        manager_of(self).mk_mul(self, rhs)
    }
}

impl std::ops::Mul<&BigUint> for &Bddv {
    type Output = Bddv;
    fn mul(self, rhs: &BigUint) -> Bddv {
        manager_of(self).mk_mul_num(self, rhs)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn num(n: u64) -> BigUint {
        BigUint::from(n)
    }

    #[test]
    fn test_constants() {
        let m = BddManager::new(3);
        let modulus = 8u64;

        assert_eq!(m.mk_zero(3).to_val(), num(0));
        assert_eq!(m.mk_ones(3).to_val(), num(modulus - 1));
        for n in 0..modulus {
            assert_eq!(m.mk_num(&num(n), 3).to_val(), num(n));
        }
    }

    #[test]
    fn test_arith_on_all_constant_pairs() {
        let m = BddManager::new(3);
        let modulus = 8u64;

        for n in 0..modulus {
            for k in 0..modulus {
                let nv = m.mk_num(&num(n), 3);
                let kv = m.mk_num(&num(k), 3);
                assert_eq!((&nv + &kv).to_val(), num((n + k) % modulus));
                assert_eq!((&nv - &kv).to_val(), num((n + modulus - k) % modulus));
                assert_eq!((&nv * &num(k)).to_val(), num((n * k) % modulus));
                assert_eq!((&nv * &kv).to_val(), num((n * k) % modulus));

                let eq = m.mk_eq(&nv, &kv);
                assert!(eq.is_const());
                assert_eq!(eq.is_true(), n == k);
            }
        }
    }

    #[test]
    fn test_compare_on_all_constant_pairs() {
        let m = BddManager::new(3);
        let modulus = 8i64;

        for n in 0..modulus {
            for k in 0..modulus {
                let nv = m.mk_num(&num(n as u64), 3);
                let kv = m.mk_num(&num(k as u64), 3);

                let cmp = m.mk_ule(&nv, &kv);
                assert!(cmp.is_const() && cmp.is_true() == (n <= k));
                let cmp = m.mk_uge(&nv, &kv);
                assert!(cmp.is_const() && cmp.is_true() == (n >= k));
                let cmp = m.mk_ult(&nv, &kv);
                assert!(cmp.is_const() && cmp.is_true() == (n < k));
                let cmp = m.mk_ugt(&nv, &kv);
                assert!(cmp.is_const() && cmp.is_true() == (n > k));

                // Two's-complement reading of the same bit patterns.
                let ns = if n < modulus / 2 { n } else { n - modulus };
                let ks = if k < modulus / 2 { k } else { k - modulus };
                let cmp = m.mk_sle(&nv, &kv);
                assert!(cmp.is_const() && cmp.is_true() == (ns <= ks));
                let cmp = m.mk_sge(&nv, &kv);
                assert!(cmp.is_const() && cmp.is_true() == (ns >= ks));
                let cmp = m.mk_slt(&nv, &kv);
                assert!(cmp.is_const() && cmp.is_true() == (ns < ks));
                let cmp = m.mk_sgt(&nv, &kv);
                assert!(cmp.is_const() && cmp.is_true() == (ns > ks));
            }
        }
    }

    #[test]
    fn test_quot_rem_on_all_constant_pairs() {
        let m = BddManager::new(3);
        let modulus = 8u64;

        for n in 0..modulus {
            for k in 0..modulus {
                let nv = m.mk_num(&num(n), 3);
                let kv = m.mk_num(&num(k), 3);
                let (q, r) = m.quot_rem(&nv, &kv);
                if k != 0 {
                    assert_eq!(q.to_val(), num(n / k));
                    assert_eq!(r.to_val(), num(n % k));
                } else {
                    // Division by zero: all-ones quotient, dividend remainder.
                    assert_eq!(q.to_val(), num(modulus - 1));
                    assert_eq!(r.to_val(), num(n));
                }
            }
        }
    }

    #[test]
    fn test_addsub_on_variables() {
        let m = BddManager::new(3);
        let x = m.mk_var_vec(&[0, 1, 2]);

        let lhs = m.mk_eq_num(&(&x - &m.mk_num(&num(3), 3)), &num(2));
        assert_eq!(lhs, m.mk_eq_num(&x, &num(5)));
        let lhs = m.mk_eq_num(&(&x + &m.mk_num(&num(3), 3)), &num(5));
        assert_eq!(lhs, m.mk_eq_num(&x, &num(2)));
        let lhs = m.mk_eq_num(&(&x - &m.mk_num(&num(3), 3)), &num(6));
        assert_eq!(lhs, m.mk_eq_num(&x, &num(1)));
        let lhs = m.mk_eq_num(&(&x + &m.mk_num(&num(3), 3)), &num(2));
        assert_eq!(lhs, m.mk_eq_num(&x, &num(7)));
    }

    #[test]
    fn test_mul_inverse_mod_16() {
        let m = BddManager::new(4);
        let x = m.mk_var_vec(&[0, 1, 2, 3]);
        let one = m.mk_num(&num(1), 4);
        let zero = m.mk_zero(4);
        let five = m.mk_num(&num(5), 4);
        let six = m.mk_num(&num(6), 4);

        // 5*x == 1 (mod 16)  =>  x == 13 (5 is invertible mod 16)
        let five_inv = m.mk_eq(&(&x * &five), &one);
        assert_eq!(five_inv, m.mk_eq_num(&x, &num(13)));

        // 6*x == 1 (mod 16)  =>  no solution (6 is not invertible)
        let six_inv = m.mk_eq(&(&x * &six), &one);
        assert!(six_inv.is_false());

        // 6*x == 0 (mod 16)  =>  x ∈ {0, 8}
        let b = m.mk_eq(&(&six * &x), &zero);
        let expected = &m.mk_eq_num(&x, &num(0)) | &m.mk_eq_num(&x, &num(8));
        assert_eq!(b, expected);

        // Constant and vector multiplication agree bit for bit.
        for c in [0u64, 1, 5, 6] {
            let cv = m.mk_num(&num(c), 4);
            assert_eq!(&x * &cv, &x * &num(c));
        }
    }

    #[test]
    fn test_ule_ranges() {
        let m = BddManager::new(4);
        let x = m.mk_var_vec(&[0, 1, 2, 3]);
        let three = m.mk_num(&num(3), 4);
        let four = m.mk_num(&num(4), 4);
        let five = m.mk_num(&num(5), 4);

        let x_is_four = m.mk_eq(&x, &four);
        assert_eq!(&m.mk_uge(&x, &four) & &m.mk_ult(&x, &five), x_is_four);
        assert_eq!(&m.mk_ule(&four, &x) & &m.mk_ult(&x, &five), x_is_four);
        assert_eq!(&m.mk_ugt(&x, &three) & &m.mk_ult(&x, &five), x_is_four);
        assert_eq!(&m.mk_ugt(&x, &three) & &m.mk_ule(&x, &four), x_is_four);
        let x_is_three = m.mk_eq(&x, &three);
        assert_eq!(
            &m.mk_ule(&three, &x) & &m.mk_ult(&x, &five),
            &x_is_four | &x_is_three
        );
    }
}
