//! The Boolean-function engine: a manager-centric, hash-consed BDD with
//! reference-counted external handles.
//!
//! All semantics live in [`BddManager`]; a [`Bdd`] handle is an opaque
//! reference into the manager's root table, never a raw node id. Garbage
//! collection and reordering rewrite root-table slots in place, so the
//! function denoted by a live handle survives any internal reorganization.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::rc::Rc;

use log::debug;

use crate::cache::Cache;
use crate::table::Table;
use crate::utils::{pairing3, MyHash};

pub(crate) type NodeId = u32;

/// The false terminal.
pub(crate) const FALSE: NodeId = 1;
/// The true terminal.
pub(crate) const TRUE: NodeId = 2;

/// Variable marker for terminal nodes.
const NO_VAR: u32 = u32::MAX;

/// Level of terminal nodes, deeper than any variable.
pub(crate) const BOTTOM_LEVEL: u32 = u32::MAX;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct Node {
    var: u32,
    low: NodeId,
    high: NodeId,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            var: NO_VAR,
            low: 0,
            high: 0,
        }
    }
}

impl MyHash for Node {
    fn hash(&self) -> u64 {
        pairing3(self.var as u64, self.low as u64, self.high as u64)
    }
}

struct RootSlot {
    node: NodeId,
    refs: u32,
}

/// Internal engine state. All algorithms work on raw node ids; only the
/// public wrappers in [`BddManager`] and [`Bdd`] touch root slots.
pub(crate) struct BddStore {
    storage: Table<Node>,
    cache: Cache<(u64, u64, u64), NodeId>,
    num_vars: u32,
    pub(crate) var2level: Vec<u32>,
    pub(crate) level2var: Vec<u32>,
    roots: Vec<RootSlot>,
    free_slots: Vec<usize>,
    order_version: u64,
}

impl BddStore {
    fn new(num_vars: u32) -> Self {
        let mut storage = Table::new(16);

        // The two terminals live outside the unique table's buckets.
        let f = storage.add(Node::default());
        let t = storage.add(Node::default());
        assert_eq!(f as NodeId, FALSE);
        assert_eq!(t as NodeId, TRUE);

        Self {
            storage,
            cache: Cache::new(16),
            num_vars,
            var2level: (0..num_vars).collect(),
            level2var: (0..num_vars).collect(),
            roots: Vec::new(),
            free_slots: Vec::new(),
            order_version: 0,
        }
    }

    pub(crate) fn num_vars(&self) -> u32 {
        self.num_vars
    }

    pub(crate) fn is_false(&self, node: NodeId) -> bool {
        node == FALSE
    }
    pub(crate) fn is_true(&self, node: NodeId) -> bool {
        node == TRUE
    }
    pub(crate) fn is_terminal(&self, node: NodeId) -> bool {
        node == FALSE || node == TRUE
    }

    pub(crate) fn var_of(&self, node: NodeId) -> u32 {
        self.storage.value(node as usize).var
    }
    pub(crate) fn low(&self, node: NodeId) -> NodeId {
        self.storage.value(node as usize).low
    }
    pub(crate) fn high(&self, node: NodeId) -> NodeId {
        self.storage.value(node as usize).high
    }

    /// Level of the node's top variable; terminals sit below everything.
    pub(crate) fn level(&self, node: NodeId) -> u32 {
        if self.is_terminal(node) {
            BOTTOM_LEVEL
        } else {
            self.var2level[self.var_of(node) as usize]
        }
    }

    pub(crate) fn mk_node(&mut self, var: u32, low: NodeId, high: NodeId) -> NodeId {
        assert!(var < self.num_vars, "Unknown variable id {}", var);

        // Reduced: both children equal means the variable is irrelevant.
        if low == high {
            return low;
        }

        debug_assert!(self.var2level[var as usize] < self.level(low));
        debug_assert!(self.var2level[var as usize] < self.level(high));

        self.storage.put(Node { var, low, high }) as NodeId
    }

    pub(crate) fn mk_var(&mut self, var: u32) -> NodeId {
        self.mk_node(var, FALSE, TRUE)
    }

    /// Cofactors of `node` with respect to the variable at the given level.
    fn top_cofactors(&self, node: NodeId, level: u32) -> (NodeId, NodeId) {
        if self.is_terminal(node) || self.level(node) != level {
            (node, node)
        } else {
            (self.low(node), self.high(node))
        }
    }

    /// The canonical primitive. Every Boolean combinator is a special case
    /// of `ite(f, g, h) = (f ∧ g) ∨ (¬f ∧ h)`.
    pub(crate) fn ite(&mut self, f: NodeId, g: NodeId, h: NodeId) -> NodeId {
        // Base cases.
        if self.is_true(f) {
            return g;
        }
        if self.is_false(f) {
            return h;
        }
        if g == h {
            return g;
        }
        if self.is_true(g) && self.is_false(h) {
            return f;
        }

        // Standard triples: collapse repeated arguments.
        if f == g {
            return self.ite(f, TRUE, h);
        }
        if f == h {
            return self.ite(f, g, FALSE);
        }

        let key = (f as u64, g as u64, h as u64);
        if let Some(&res) = self.cache.get(&key) {
            debug!("cache: ite({}, {}, {}) -> {}", f, g, h, res);
            return res;
        }

        let m = self.level(f).min(self.level(g)).min(self.level(h));
        debug_assert_ne!(m, BOTTOM_LEVEL);

        let (f0, f1) = self.top_cofactors(f, m);
        let (g0, g1) = self.top_cofactors(g, m);
        let (h0, h1) = self.top_cofactors(h, m);

        let e = self.ite(f0, g0, h0);
        let t = self.ite(f1, g1, h1);

        let var = self.level2var[m as usize];
        let res = self.mk_node(var, e, t);
        debug!("computed: ite({}, {}, {}) -> {}", f, g, h, res);
        self.cache.insert(&key, res);
        res
    }

    pub(crate) fn not(&mut self, f: NodeId) -> NodeId {
        self.ite(f, FALSE, TRUE)
    }
    pub(crate) fn and(&mut self, f: NodeId, g: NodeId) -> NodeId {
        self.ite(f, g, FALSE)
    }
    pub(crate) fn or(&mut self, f: NodeId, g: NodeId) -> NodeId {
        self.ite(f, TRUE, g)
    }
    pub(crate) fn xor(&mut self, f: NodeId, g: NodeId) -> NodeId {
        let ng = self.not(g);
        self.ite(f, ng, g)
    }
    pub(crate) fn iff(&mut self, f: NodeId, g: NodeId) -> NodeId {
        let ng = self.not(g);
        self.ite(f, g, ng)
    }

    /// Existential quantification: `∃v. f = f[v:=0] ∨ f[v:=1]`.
    ///
    /// Returns `f` unchanged when `v` does not occur in `f`.
    pub(crate) fn exists(&mut self, var: u32, f: NodeId) -> NodeId {
        assert!(var < self.num_vars, "Unknown variable id {}", var);
        let mut memo = HashMap::new();
        self.exists_rec(var, f, &mut memo)
    }

    fn exists_rec(&mut self, var: u32, f: NodeId, memo: &mut HashMap<NodeId, NodeId>) -> NodeId {
        if self.is_terminal(f) {
            return f;
        }
        let var_level = self.var2level[var as usize];
        let f_level = self.level(f);
        if var_level < f_level {
            // `var` sits above the whole of `f`, so it does not occur.
            return f;
        }
        if let Some(&res) = memo.get(&f) {
            return res;
        }
        let res = if self.var_of(f) == var {
            let (low, high) = (self.low(f), self.high(f));
            self.or(low, high)
        } else {
            let v = self.var_of(f);
            let low = self.exists_rec(var, self.low(f), memo);
            let high = self.exists_rec(var, self.high(f), memo);
            self.mk_node(v, low, high)
        };
        memo.insert(f, res);
        res
    }

    /// Restrict `f` by the given (variable -> value) assignment.
    pub(crate) fn restrict(&mut self, f: NodeId, values: &HashMap<u32, bool>) -> NodeId {
        let mut memo = HashMap::new();
        self.restrict_rec(f, values, &mut memo)
    }

    fn restrict_rec(
        &mut self,
        f: NodeId,
        values: &HashMap<u32, bool>,
        memo: &mut HashMap<NodeId, NodeId>,
    ) -> NodeId {
        if self.is_terminal(f) || values.is_empty() {
            return f;
        }
        if let Some(&res) = memo.get(&f) {
            return res;
        }
        let v = self.var_of(f);
        let res = if let Some(&b) = values.get(&v) {
            let child = if b { self.high(f) } else { self.low(f) };
            self.restrict_rec(child, values, memo)
        } else {
            let low = self.restrict_rec(self.low(f), values, memo);
            let high = self.restrict_rec(self.high(f), values, memo);
            self.mk_node(v, low, high)
        };
        memo.insert(f, res);
        res
    }

    /// All nodes reachable from the given roots, terminals included.
    fn descendants(&self, nodes: impl IntoIterator<Item = NodeId>) -> HashSet<NodeId> {
        let mut visited = HashSet::new();
        visited.insert(FALSE);
        visited.insert(TRUE);
        let mut queue = VecDeque::from_iter(nodes);

        while let Some(node) = queue.pop_front() {
            if visited.insert(node) {
                queue.push_back(self.low(node));
                queue.push_back(self.high(node));
            }
        }

        visited
    }

    /// Number of non-terminal nodes in the DAG rooted at `f`.
    pub(crate) fn bdd_size(&self, f: NodeId) -> usize {
        self.descendants([f])
            .into_iter()
            .filter(|&n| !self.is_terminal(n))
            .count()
    }

    /// Number of non-terminal nodes reachable from any live root.
    pub(crate) fn live_size(&self) -> usize {
        self.descendants(self.live_roots())
            .into_iter()
            .filter(|&n| !self.is_terminal(n))
            .count()
    }

    /// Number of clauses in the naive CNF of `f`: one clause per path to
    /// the false terminal.
    pub(crate) fn cnf_size(&self, f: NodeId) -> u64 {
        let mut memo = HashMap::new();
        self.cnf_size_rec(f, &mut memo)
    }

    fn cnf_size_rec(&self, f: NodeId, memo: &mut HashMap<NodeId, u64>) -> u64 {
        if self.is_false(f) {
            return 1;
        }
        if self.is_true(f) {
            return 0;
        }
        if let Some(&n) = memo.get(&f) {
            return n;
        }
        let n = self.cnf_size_rec(self.low(f), memo) + self.cnf_size_rec(self.high(f), memo);
        memo.insert(f, n);
        n
    }

    fn live_roots(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.roots
            .iter()
            .filter(|slot| slot.refs > 0)
            .map(|slot| slot.node)
    }

    fn alloc_slot(&mut self, node: NodeId) -> usize {
        if let Some(slot) = self.free_slots.pop() {
            self.roots[slot] = RootSlot { node, refs: 1 };
            slot
        } else {
            self.roots.push(RootSlot { node, refs: 1 });
            self.roots.len() - 1
        }
    }

    fn slot_node(&self, slot: usize) -> NodeId {
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
            self.roots[slot].node = FALSE;
            self.free_slots.push(slot);
        }
    }

    /// Mark-and-sweep over the unique table, keeping everything reachable
    /// from a live root slot. Live handles are unaffected: only their
    /// unreachable siblings are reclaimed.
    pub(crate) fn collect_garbage(&mut self) {
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
            while index != 0 && !alive.contains(&(index as NodeId)) {
                let next = self.storage.next(index);
                self.storage.drop(index);
                index = next;
            }
            self.storage.set_bucket(i, index);

            // Then unlink dead nodes from the middle.
            let mut prev = index;
            while prev != 0 {
                let mut cur = self.storage.next(prev);
                while cur != 0 && !alive.contains(&(cur as NodeId)) {
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

    /// Rebuild every live root under the current level assignment into a
    /// fresh unique table, rewriting root slots in place.
    ///
    /// Used by reordering: after `var2level` changes, the old nodes are no
    /// longer canonical, but re-inserting bottom-up through [`Self::ite`]
    /// restores canonical form without changing any denoted function.
    pub(crate) fn rebuild(&mut self) {
        let old = std::mem::replace(&mut self.storage, Table::new(16));
        let f = self.storage.add(Node::default());
        let t = self.storage.add(Node::default());
        debug_assert_eq!(f as NodeId, FALSE);
        debug_assert_eq!(t as NodeId, TRUE);

        self.cache.clear();

        let mut memo: HashMap<NodeId, NodeId> = HashMap::new();
        let slots: Vec<usize> = (0..self.roots.len())
            .filter(|&s| self.roots[s].refs > 0)
            .collect();
        for slot in slots {
            let node = self.roots[slot].node;
            let rebuilt = self.rebuild_node(&old, node, &mut memo);
            self.roots[slot].node = rebuilt;
        }

        self.cache.clear();
        self.order_version += 1;
    }

    fn rebuild_node(
        &mut self,
        old: &Table<Node>,
        node: NodeId,
        memo: &mut HashMap<NodeId, NodeId>,
    ) -> NodeId {
        if node == FALSE || node == TRUE {
            return node;
        }
        if let Some(&res) = memo.get(&node) {
            return res;
        }
        let entry = *old.value(node as usize);
        let low = self.rebuild_node(old, entry.low, memo);
        let high = self.rebuild_node(old, entry.high, memo);
        let v = self.mk_var(entry.var);
        let res = self.ite(v, high, low);
        memo.insert(node, res);
        res
    }

    pub(crate) fn order_version(&self) -> u64 {
        self.order_version
    }
}

/// The BDD engine. All operations go through the manager; handles are
/// created by it and remain valid across [`BddManager::collect_garbage`]
/// and [`BddManager::try_reorder`].
pub struct BddManager {
    pub(crate) store: Rc<RefCell<BddStore>>,
}

impl BddManager {
    /// Create an engine instance for variables `0..num_vars`.
    pub fn new(num_vars: u32) -> Self {
        Self {
            store: Rc::new(RefCell::new(BddStore::new(num_vars))),
        }
    }

    pub(crate) fn wrap(&self, node: NodeId) -> Bdd {
        let slot = self.store.borrow_mut().alloc_slot(node);
        Bdd {
            store: Rc::clone(&self.store),
            slot,
        }
    }

    pub fn num_vars(&self) -> u32 {
        self.store.borrow().num_vars()
    }

    /// The constant true function.
    pub fn mk_true(&self) -> Bdd {
        self.wrap(TRUE)
    }
    /// The constant false function.
    pub fn mk_false(&self) -> Bdd {
        self.wrap(FALSE)
    }

    /// The function of a single variable.
    pub fn mk_var(&self, var: u32) -> Bdd {
        let node = self.store.borrow_mut().mk_var(var);
        self.wrap(node)
    }

    fn check_engine(&self, f: &Bdd) -> NodeId {
        assert!(
            Rc::ptr_eq(&self.store, &f.store),
            "Handle belongs to a different engine instance"
        );
        f.node()
    }

    pub fn apply_ite(&self, c: &Bdd, t: &Bdd, e: &Bdd) -> Bdd {
        let (c, t, e) = (self.check_engine(c), self.check_engine(t), self.check_engine(e));
        let node = self.store.borrow_mut().ite(c, t, e);
        self.wrap(node)
    }

    pub fn apply_and(&self, f: &Bdd, g: &Bdd) -> Bdd {
        let (f, g) = (self.check_engine(f), self.check_engine(g));
        let node = self.store.borrow_mut().and(f, g);
        self.wrap(node)
    }

    pub fn apply_or(&self, f: &Bdd, g: &Bdd) -> Bdd {
        let (f, g) = (self.check_engine(f), self.check_engine(g));
        let node = self.store.borrow_mut().or(f, g);
        self.wrap(node)
    }

    pub fn apply_xor(&self, f: &Bdd, g: &Bdd) -> Bdd {
        let (f, g) = (self.check_engine(f), self.check_engine(g));
        let node = self.store.borrow_mut().xor(f, g);
        self.wrap(node)
    }

    /// XNOR: true where `f` and `g` agree.
    pub fn apply_eq(&self, f: &Bdd, g: &Bdd) -> Bdd {
        let (f, g) = (self.check_engine(f), self.check_engine(g));
        let node = self.store.borrow_mut().iff(f, g);
        self.wrap(node)
    }

    pub fn apply_not(&self, f: &Bdd) -> Bdd {
        let f = self.check_engine(f);
        let node = self.store.borrow_mut().not(f);
        self.wrap(node)
    }

    /// Cofactor `f` by a partial truth assignment to variables.
    pub fn restrict(&self, f: &Bdd, values: &HashMap<u32, bool>) -> Bdd {
        let f = self.check_engine(f);
        let node = self.store.borrow_mut().restrict(f, values);
        self.wrap(node)
    }

    /// Branching variable of a non-constant function.
    pub fn var_of(&self, f: &Bdd) -> u32 {
        let f = self.check_engine(f);
        assert!(!self.store.borrow().is_terminal(f), "Constant has no variable");
        self.store.borrow().var_of(f)
    }

    /// Cofactor of `f` where its branching variable is false.
    pub fn low(&self, f: &Bdd) -> Bdd {
        let f = self.check_engine(f);
        let node = self.store.borrow().low(f);
        self.wrap(node)
    }

    /// Cofactor of `f` where its branching variable is true.
    pub fn high(&self, f: &Bdd) -> Bdd {
        let f = self.check_engine(f);
        let node = self.store.borrow().high(f);
        self.wrap(node)
    }

    /// `∃var. f`; a no-op when `var` does not occur in `f`.
    pub fn mk_exists(&self, var: u32, f: &Bdd) -> Bdd {
        let f = self.check_engine(f);
        let node = self.store.borrow_mut().exists(var, f);
        self.wrap(node)
    }

    /// Number of nodes in the DAG of `f`.
    pub fn bdd_size(&self, f: &Bdd) -> usize {
        let f = self.check_engine(f);
        self.store.borrow().bdd_size(f)
    }

    /// Number of clauses in the naive CNF of `f`.
    pub fn cnf_size(&self, f: &Bdd) -> u64 {
        let f = self.check_engine(f);
        self.store.borrow().cnf_size(f)
    }

    /// Total number of nodes reachable from live handles.
    pub fn num_nodes(&self) -> usize {
        self.store.borrow().live_size()
    }

    /// Reclaim nodes unreachable from any live handle. Every live handle
    /// keeps denoting the same function.
    pub fn collect_garbage(&self) {
        self.store.borrow_mut().collect_garbage();
    }

    /// Current variable-to-level assignment.
    pub fn var2level(&self) -> Vec<u32> {
        self.store.borrow().var2level.clone()
    }

    /// Current level-to-variable assignment.
    pub fn level2var(&self) -> Vec<u32> {
        self.store.borrow().level2var.clone()
    }

    /// Bumped on every reordering; memoized combinator results are only
    /// valid within a single order version.
    pub fn order_version(&self) -> u64 {
        self.store.borrow().order_version()
    }
}

impl Clone for BddManager {
    /// Cloning a manager yields another handle to the same engine.
    fn clone(&self) -> Self {
        Self {
            store: Rc::clone(&self.store),
        }
    }
}

impl Debug for BddManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let store = self.store.borrow();
        f.debug_struct("BddManager")
            .field("num_vars", &store.num_vars())
            .field("live_nodes", &store.live_size())
            .finish()
    }
}

/// A reference-counted handle to a Boolean function.
///
/// Two handles from the same engine are equal iff they denote the same
/// function; this is a consequence of canonical form, not a semantic
/// comparison.
pub struct Bdd {
    pub(crate) store: Rc<RefCell<BddStore>>,
    slot: usize,
}

impl Bdd {
    pub(crate) fn node(&self) -> NodeId {
        self.store.borrow().slot_node(self.slot)
    }

    pub fn is_true(&self) -> bool {
        self.node() == TRUE
    }
    pub fn is_false(&self) -> bool {
        self.node() == FALSE
    }
    pub fn is_const(&self) -> bool {
        self.is_true() || self.is_false()
    }
}

impl Clone for Bdd {
    fn clone(&self) -> Self {
        self.store.borrow_mut().retain_slot(self.slot);
        Self {
            store: Rc::clone(&self.store),
            slot: self.slot,
        }
    }
}

impl Drop for Bdd {
    fn drop(&mut self) {
        self.store.borrow_mut().release_slot(self.slot);
    }
}

impl PartialEq for Bdd {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.store, &other.store) && self.node() == other.node()
    }
}

impl Eq for Bdd {}

impl Debug for Bdd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bdd@{}", self.node())
    }
}

fn binary_sugar(f: &Bdd, g: &Bdd, op: impl FnOnce(&mut BddStore, NodeId, NodeId) -> NodeId) -> Bdd {
    assert!(
        Rc::ptr_eq(&f.store, &g.store),
        "Operands belong to different engine instances"
    );
    let (a, b) = (f.node(), g.node());
    let node = op(&mut f.store.borrow_mut(), a, b);
    let slot = f.store.borrow_mut().alloc_slot(node);
    Bdd {
        store: Rc::clone(&f.store),
        slot,
    }
}

impl std::ops::BitAnd for &Bdd {
    type Output = Bdd;
    fn bitand(self, rhs: &Bdd) -> Bdd {
        binary_sugar(self, rhs, |s, a, b| s.and(a, b))
    }
}

impl std::ops::BitOr for &Bdd {
    type Output = Bdd;
    fn bitor(self, rhs: &Bdd) -> Bdd {
        binary_sugar(self, rhs, |s, a, b| s.or(a, b))
    }
}

impl std::ops::BitXor for &Bdd {
    type Output = Bdd;
    fn bitxor(self, rhs: &Bdd) -> Bdd {
        binary_sugar(self, rhs, |s, a, b| s.xor(a, b))
    }
}

impl std::ops::Not for &Bdd {
    type Output = Bdd;
    fn not(self) -> Bdd {
        let node = {
            let a = self.node();
            self.store.borrow_mut().not(a)
        };
        let slot = self.store.borrow_mut().alloc_slot(node);
        Bdd {
            store: Rc::clone(&self.store),
            slot,
        }
    }
}
