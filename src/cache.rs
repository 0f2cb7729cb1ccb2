//! Memo table for automaton operations.
//!
//! Product construction and reachability queries revisit the same state pairs many
//! times. This table wraps a [HashMap] and keeps hit/miss counters so that callers
//! can log how much work was shared.
//!
//! # Example
//!
//! ```
//! use conupsyn::cache::MemoTable;
//!
//! let mut table = MemoTable::<(i32, i32), usize>::new();
//! table.insert((1, 2), 42);
//! assert_eq!(table.get(&(1, 2)), Some(&42));
//! assert_eq!(table.get(&(3, 4)), None);
//! assert_eq!(table.hits(), 1);
//! assert_eq!(table.misses(), 1);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// A memo table backed by [HashMap].
pub struct MemoTable<K, V> {
    map: HashMap<K, V>,
    hits: usize,
    misses: usize,
}

impl<K, V> Default for MemoTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> MemoTable<K, V> {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Returns the number of entries in the table.
    pub fn size(&self) -> usize {
        self.map.len()
    }

    /// Returns the number of lookups that found an entry.
    pub fn hits(&self) -> usize {
        self.hits
    }

    /// Returns the number of lookups that found nothing.
    pub fn misses(&self) -> usize {
        self.misses
    }

    /// Fraction of lookups that found an entry, or 0 before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl<K, V> MemoTable<K, V>
where
    K: Hash + Eq,
{
    /// Looks up a key in the table.
    #[inline]
    pub fn get(&mut self, key: &K) -> Option<&V> {
        match self.map.get(key) {
            Some(v) => {
                self.hits += 1;
                Some(v)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Inserts a key-value pair, replacing any previous value.
    #[inline]
    pub fn insert(&mut self, key: K, value: V) {
        self.map.insert(key, value);
    }
}

impl<K, V> fmt::Debug for MemoTable<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoTable")
            .field("size", &self.map.len())
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memo_basic() {
        let mut table = MemoTable::<(u64, u64), i32>::new();

        table.insert((1, 2), 42);
        table.insert((3, 4), 99);

        assert_eq!(table.get(&(1, 2)), Some(&42));
        assert_eq!(table.get(&(3, 4)), Some(&99));
        assert_eq!(table.get(&(5, 6)), None);

        assert_eq!(table.hits(), 2);
        assert_eq!(table.misses(), 1);
    }

    #[test]
    fn test_memo_hit_rate() {
        let mut table = MemoTable::<u64, u64>::new();
        assert_eq!(table.hit_rate(), 0.0);

        table.insert(1, 10);
        assert_eq!(table.get(&1), Some(&10));
        assert_eq!(table.get(&2), None);
        assert_eq!(table.get(&1), Some(&10));
        assert_eq!(table.get(&3), None);
        assert_eq!(table.hit_rate(), 0.5);
        assert_eq!(table.size(), 1);
    }

    #[test]
    fn test_memo_many_entries() {
        let mut table = MemoTable::<(u64, u64), i32>::new();

        for i in 0..1000 {
            table.insert((i, 0), i as i32);
        }
        for i in 0..1000 {
            assert_eq!(table.get(&(i, 0)), Some(&(i as i32)));
        }
        assert_eq!(table.size(), 1000);
    }
}
