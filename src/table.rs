use std::cmp::min;

use crate::utils::MyHash;

#[derive(Clone)]
struct Cell<T> {
    value: T,
    next: usize,
    occupied: bool,
}

impl<T> Cell<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            next: 0,
            occupied: false,
        }
    }
}

impl<T: Default> Default for Cell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Bucket-chained hash-consing store.
///
/// Structurally equal values inserted with [`Table::put`] are assigned the
/// same stable index, which is what makes node identity equality coincide
/// with structural (and hence semantic) equality in the diagram engines.
/// Index 0 is reserved as a sentry and is never handed out.
///
/// Cells can be released with [`Table::drop`] (used by mark-and-sweep GC);
/// released cells are reused by later insertions.
pub struct Table<T> {
    data: Vec<Cell<T>>,
    buckets: Vec<usize>,
    bitmask: u64,
    /// Index of the first *possibly* free (non-occupied) cell.
    min_free: usize,
    /// Index of the last cell ever handed out.
    last_index: usize,
    /// Number of occupied cells.
    real_size: usize,
}

impl<T: Default> Table<T> {
    /// Create a new table with `2^bits` buckets.
    pub fn new(bits: usize) -> Self {
        assert!(bits <= 31, "Bucket bits should be in the range 0..=31");

        let buckets_bits = min(bits, 16);
        let buckets_size = 1 << buckets_bits;
        let buckets = vec![0; buckets_size];
        let bitmask = (buckets_size - 1) as u64;

        let mut data: Vec<Cell<T>> = Vec::with_capacity(1 << min(bits, 10));
        data.push(Cell::default());
        data[0].occupied = true; // sentry

        Self {
            data,
            buckets,
            bitmask,
            min_free: 1,
            last_index: 0,
            real_size: 0,
        }
    }
}

impl<T> Table<T> {
    /// Number of cells handed out so far (including released ones).
    pub fn size(&self) -> usize {
        self.last_index
    }
    /// Number of occupied cells.
    pub fn real_size(&self) -> usize {
        self.real_size
    }
    /// Number of buckets.
    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }
    /// Head of the chain for the given bucket.
    pub fn bucket(&self, bucket_index: usize) -> usize {
        self.buckets[bucket_index]
    }
    /// Re-link the head of the chain for the given bucket.
    pub fn set_bucket(&mut self, bucket_index: usize, index: usize) {
        self.buckets[bucket_index] = index;
    }

    pub fn value(&self, index: usize) -> &T {
        assert_ne!(index, 0, "Index is 0");
        &self.data[index].value
    }

    pub fn is_occupied(&self, index: usize) -> bool {
        assert_ne!(index, 0, "Index is 0");
        self.data[index].occupied
    }

    pub fn next(&self, index: usize) -> usize {
        assert_ne!(index, 0, "Index is 0");
        self.data[index].next
    }
    pub fn set_next(&mut self, index: usize, next: usize) {
        assert_ne!(index, 0, "Index is 0");
        self.data[index].next = next;
    }

    /// Release the cell at the given index so it can be reused.
    pub fn drop(&mut self, index: usize) {
        assert_ne!(index, 0, "Index is 0");
        self.data[index].occupied = false;
        self.min_free = min(self.min_free, index);
        self.real_size -= 1;
    }
}

impl<T: Default> Table<T> {
    fn alloc(&mut self) -> usize {
        let index = (self.min_free..=self.last_index)
            .find(|&i| !self.data[i].occupied)
            .unwrap_or_else(|| {
                self.last_index += 1;
                self.last_index
            });

        if index >= self.data.len() {
            self.data.resize_with(index + 1, Cell::default);
        }

        self.data[index].occupied = true;
        self.min_free = index + 1;
        self.real_size += 1;

        index
    }

    /// Append a new value without hash-consing and return its index.
    pub fn add(&mut self, value: T) -> usize {
        let index = self.alloc();
        self.data[index].value = value;
        self.data[index].next = 0;
        index
    }
}

impl<T: Default + MyHash + Eq> Table<T> {
    fn bucket_index(&self, value: &T) -> usize {
        (value.hash() & self.bitmask) as usize
    }

    /// Insert a value, returning the index of the existing structurally
    /// equal entry if there is one.
    pub fn put(&mut self, value: T) -> usize {
        let bucket_index = self.bucket_index(&value);
        let mut index = self.buckets[bucket_index];

        if index == 0 {
            let i = self.add(value);
            self.buckets[bucket_index] = i;
            return i;
        }

        loop {
            assert!(index > 0);

            if &value == self.value(index) {
                return index;
            }

            let next = self.next(index);
            if next == 0 {
                let i = self.add(value);
                self.set_next(index, i);
                return i;
            }
            index = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add() {
        let mut table = Table::new(2);
        let index = table.add(42);
        assert_eq!(*table.value(index), 42);
        assert_eq!(table.next(index), 0);
    }

    #[test]
    fn test_add_grows() {
        let mut table = Table::new(2);
        for i in 0..100 {
            let index = table.add(i);
            assert_eq!(*table.value(index), i);
        }
        assert_eq!(table.real_size(), 100);
    }

    #[test]
    fn test_drop_and_reuse() {
        let mut table = Table::new(2);
        let index = table.add(42);
        assert!(table.is_occupied(index));
        table.drop(index);
        assert!(!table.is_occupied(index));
        let again = table.add(7);
        assert_eq!(again, index);
    }

    #[test]
    fn test_put_dedup() {
        #[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
        struct Item(i32);

        impl MyHash for Item {
            fn hash(&self) -> u64 {
                self.0.unsigned_abs() as u64
            }
        }

        let mut table = Table::new(2);
        let index1 = table.put(Item(5));
        let index2 = table.put(Item(-5));
        let index3 = table.put(Item(5));
        assert_ne!(index1, index2);
        assert_eq!(index1, index3);
        assert_eq!(table.next(index1), index2);
    }
}
