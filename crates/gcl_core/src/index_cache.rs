//! Fixed-capacity ring buffer mapping record numbers to file offsets.

use crate::error::{GclError, GclResult};

/// Default number of entries kept per log.
pub const DEFAULT_INDEX_CAPACITY: usize = 1024;

/// One cached `(recno, offset)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Record number.
    pub key: u64,
    /// Byte offset of the record in the log file.
    pub value: u64,
}

/// A ring buffer of [`IndexEntry`] values with strictly increasing keys.
///
/// Once full, each append overwrites the oldest entry. The physical array
/// is then two sorted runs, `[next, len)` followed by `[0, next)`, and
/// lookups binary-search each run in turn.
#[derive(Debug, Clone)]
pub struct IndexCache {
    entries: Vec<IndexEntry>,
    capacity: usize,
    next: usize,
}

impl IndexCache {
    /// Creates an empty cache.
    ///
    /// # Errors
    ///
    /// Returns [`GclError::InvalidArgument`] if `capacity` is zero.
    pub fn new(capacity: usize) -> GclResult<Self> {
        if capacity == 0 {
            return Err(GclError::invalid_argument("index cache capacity must be > 0"));
        }
        Ok(Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            next: 0,
        })
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true once every slot is in use.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entries.len() == self.capacity
    }

    /// Adds an entry, evicting the oldest one if the cache is full.
    ///
    /// # Errors
    ///
    /// Returns [`GclError::InvalidArgument`] if `key` is not greater than
    /// the newest key already cached.
    pub fn append(&mut self, key: u64, value: u64) -> GclResult<()> {
        if let Some(newest) = self.newest() {
            if key <= newest.key {
                return Err(GclError::invalid_argument(format!(
                    "index key {key} not above newest key {}",
                    newest.key
                )));
            }
        }
        let entry = IndexEntry { key, value };
        if self.is_full() {
            self.entries[self.next] = entry;
        } else {
            self.entries.push(entry);
        }
        self.next = (self.next + 1) % self.capacity;
        Ok(())
    }

    /// Returns the cached offset for `key`, if present.
    #[must_use]
    pub fn search(&self, key: u64) -> Option<u64> {
        let (older, newer) = self.runs();
        for run in [older, newer] {
            if let Ok(i) = run.binary_search_by_key(&key, |e| e.key) {
                return Some(run[i].value);
            }
        }
        None
    }

    /// Returns the entry with the largest key not above `key`.
    #[must_use]
    pub fn floor(&self, key: u64) -> Option<IndexEntry> {
        let (older, newer) = self.runs();
        for run in [newer, older] {
            let i = run.partition_point(|e| e.key <= key);
            if i > 0 {
                return Some(run[i - 1]);
            }
        }
        None
    }

    /// Oldest cached entry.
    #[must_use]
    pub fn oldest(&self) -> Option<IndexEntry> {
        let (older, newer) = self.runs();
        older.first().or_else(|| newer.first()).copied()
    }

    /// Newest cached entry.
    #[must_use]
    pub fn newest(&self) -> Option<IndexEntry> {
        let (older, newer) = self.runs();
        newer.last().or_else(|| older.last()).copied()
    }

    /// Visits every slot in physical array order, which is not key order
    /// after wraparound.
    pub fn foreach<F: FnMut(&IndexEntry)>(&self, mut visit: F) {
        for entry in &self.entries {
            visit(entry);
        }
    }

    /// Drops all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.next = 0;
    }

    /// Splits the buffer into its older and newer sorted runs.
    fn runs(&self) -> (&[IndexEntry], &[IndexEntry]) {
        if self.is_full() {
            let (newer, older) = self.entries.split_at(self.next);
            (older, newer)
        } else {
            (&self.entries[..], &[])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_rejected() {
        assert!(IndexCache::new(0).is_err());
    }

    #[test]
    fn search_before_wrap() {
        let mut cache = IndexCache::new(4).unwrap();
        cache.append(1, 100).unwrap();
        cache.append(2, 200).unwrap();
        assert_eq!(cache.search(1), Some(100));
        assert_eq!(cache.search(2), Some(200));
        assert_eq!(cache.search(3), None);
        assert!(!cache.is_full());
    }

    #[test]
    fn wraparound_evicts_oldest() {
        let mut cache = IndexCache::new(3).unwrap();
        for k in 1..=5u64 {
            cache.append(k, k * 10).unwrap();
        }
        assert!(cache.is_full());
        assert_eq!(cache.search(1), None);
        assert_eq!(cache.search(2), None);
        assert_eq!(cache.search(3), Some(30));
        assert_eq!(cache.search(4), Some(40));
        assert_eq!(cache.search(5), Some(50));
        assert_eq!(cache.oldest().unwrap().key, 3);
        assert_eq!(cache.newest().unwrap().key, 5);
    }

    #[test]
    fn exact_wrap_boundary() {
        let mut cache = IndexCache::new(3).unwrap();
        for k in 1..=3u64 {
            cache.append(k, k).unwrap();
        }
        // next is back at slot 0: one sorted run
        for k in 1..=3u64 {
            assert_eq!(cache.search(k), Some(k));
        }
    }

    #[test]
    fn floor_finds_nearest_lower() {
        let mut cache = IndexCache::new(3).unwrap();
        for k in [10u64, 20, 30, 40] {
            cache.append(k, k * 2).unwrap();
        }
        assert_eq!(cache.floor(35), Some(IndexEntry { key: 30, value: 60 }));
        assert_eq!(cache.floor(40), Some(IndexEntry { key: 40, value: 80 }));
        assert_eq!(cache.floor(25), Some(IndexEntry { key: 20, value: 40 }));
        assert_eq!(cache.floor(15), None);
        assert_eq!(cache.floor(1_000).unwrap().key, 40);
    }

    #[test]
    fn non_increasing_key_rejected() {
        let mut cache = IndexCache::new(2).unwrap();
        cache.append(5, 0).unwrap();
        assert!(cache.append(5, 1).is_err());
        assert!(cache.append(4, 1).is_err());
    }

    #[test]
    fn foreach_visits_physical_order() {
        let mut cache = IndexCache::new(3).unwrap();
        for k in 1..=4u64 {
            cache.append(k, 0).unwrap();
        }
        let mut keys = Vec::new();
        cache.foreach(|e| keys.push(e.key));
        assert_eq!(keys, vec![4, 2, 3]);
    }

    #[test]
    fn clear_resets() {
        let mut cache = IndexCache::new(2).unwrap();
        cache.append(1, 1).unwrap();
        cache.append(2, 2).unwrap();
        cache.clear();
        assert!(cache.is_empty());
        cache.append(1, 5).unwrap();
        assert_eq!(cache.search(1), Some(5));
    }
}
