use std::cell::Cell;
use std::marker::PhantomData;

use crate::utils::MyHash;

struct Entry<V> {
    key: u64,
    value: V,
}

/// Direct-mapped memoization table for combinator results.
///
/// Keys are reduced to a `u64` through [`MyHash`]; the pairing-based
/// hashes used by the engines are injective on node ids, so comparing the
/// hashed key is an exact match. Colliding entries simply overwrite each
/// other (losing a cached result is always safe).
pub struct Cache<K, V> {
    data: Vec<Option<Entry<V>>>,
    bitmask: u64,
    hits: Cell<usize>,
    misses: Cell<usize>,
    _phantom: PhantomData<K>,
}

impl<K, V> Cache<K, V> {
    /// Create a new cache of size `2^bits`.
    pub fn new(bits: usize) -> Self {
        assert!(bits <= 31, "Bits should be in the range 0..=31");

        let size = 1 << bits;
        let bitmask = (size - 1) as u64;

        Self {
            data: std::iter::repeat_with(|| None).take(size).collect(),
            bitmask,
            hits: Cell::new(0),
            misses: Cell::new(0),
            _phantom: PhantomData,
        }
    }

    /// Number of cache hits.
    pub fn hits(&self) -> usize {
        self.hits.get()
    }
    /// Number of cache misses.
    pub fn misses(&self) -> usize {
        self.misses.get()
    }

    /// Forget all cached results.
    pub fn clear(&mut self) {
        self.data.fill_with(|| None);
    }

    fn index(&self, key: u64) -> usize {
        (key & self.bitmask) as usize
    }

    /// Look up the cached result for a key.
    pub fn get(&self, key: &K) -> Option<&V>
    where
        K: MyHash,
    {
        let key = key.hash();
        let index = self.index(key);
        match &self.data[index] {
            Some(entry) if entry.key == key => {
                self.hits.set(self.hits.get() + 1);
                Some(&entry.value)
            }
            _ => {
                self.misses.set(self.misses.get() + 1);
                None
            }
        }
    }

    /// Store a result for a key.
    pub fn insert(&mut self, key: &K, value: V)
    where
        K: MyHash,
    {
        let k = key.hash();
        let index = self.index(k);
        self.data[index] = Some(Entry { key: k, value });
    }
}
