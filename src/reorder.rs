//! Dynamic variable reordering for the BDD engine.
//!
//! Finding an optimal variable order is NP-complete, so [`BddManager::try_reorder`]
//! runs a local sifting heuristic in the style of Rudell: adjacent levels
//! are tentatively swapped and a swap is kept iff it strictly reduces the
//! total number of live nodes. The level assignment and the node layout
//! change; the function denoted by every live handle does not.

use log::debug;

use crate::bdd::{BddManager, BddStore};

impl BddStore {
    /// Swap the variables at `level` and `level + 1` and restore canonical
    /// form by rebuilding all live roots.
    fn swap_levels(&mut self, level: usize) {
        let u = self.level2var[level];
        let v = self.level2var[level + 1];
        self.level2var[level] = v;
        self.level2var[level + 1] = u;
        self.var2level[u as usize] = level as u32 + 1;
        self.var2level[v as usize] = level as u32;
        self.rebuild();
    }
}

impl BddManager {
    /// Try to improve the variable order by greedy adjacent-level swaps.
    ///
    /// Returns `true` if the order changed. Safe to call at any time and
    /// idempotent with respect to semantics: satisfiability and witness
    /// queries on retained handles give identical answers before and
    /// after. A reorder bumps the order version, so stale memoized
    /// combinator results are never reused.
    pub fn try_reorder(&self) -> bool {
        let mut store = self.store.borrow_mut();
        let num_levels = store.num_vars() as usize;
        if num_levels < 2 {
            return false;
        }

        let mut current = store.live_size();
        debug!("try_reorder: {} live nodes before", current);

        let mut changed = false;
        // One pass per variable is enough for the local heuristic to
        // settle; bail out early once a whole pass finds nothing.
        for _pass in 0..num_levels {
            let mut improved = false;
            for level in 0..num_levels - 1 {
                store.swap_levels(level);
                let candidate = store.live_size();
                if candidate < current {
                    debug!(
                        "keeping swap at level {}: {} -> {} nodes",
                        level, current, candidate
                    );
                    current = candidate;
                    improved = true;
                    changed = true;
                } else {
                    store.swap_levels(level);
                }
            }
            if !improved {
                break;
            }
        }

        debug!("try_reorder: {} live nodes after", current);
        changed
    }
}
