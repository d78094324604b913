use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::debug;

use latchless_core::{LatchlessError, Result, VersionedState};

/// Copy-on-write map behind an atomically swapped snapshot reference.
///
/// Readers observe one fully formed snapshot at any instant and never
/// block. Every mutation reads the current snapshot, builds a new map
/// reflecting the change, and CAS-swaps the reference, retrying from the
/// read when another writer wins. Writers serialize only at the swap,
/// not for the duration of snapshot construction.
pub struct CowCache<K, V> {
    map: ArcSwap<HashMap<K, V>>,
    state: VersionedState,
}

impl<K, V> Default for CowCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + PartialEq,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> CowCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + PartialEq,
{
    pub fn new() -> Self {
        Self {
            map: ArcSwap::from_pointee(HashMap::new()),
            state: VersionedState::new(),
        }
    }

    /// Lock-free read of the current snapshot. Pure read: no version
    /// bump, no retry.
    pub fn try_get(&self, key: &K) -> Result<Option<V>> {
        self.state.ensure_live()?;
        Ok(self.map.load().get(key).cloned())
    }

    /// Return the existing value for `key`, or insert `value` and return
    /// it. Concurrent callers with the same key all observe the single
    /// winning value; the count rises by exactly one.
    pub fn get_or_add(&self, key: K, value: V) -> Result<V> {
        self.state.ensure_live()?;
        if let Some(existing) = self.map.load().get(&key) {
            return Ok(existing.clone());
        }
        let mut winner = value.clone();
        let mut inserted = false;
        self.map.rcu(|current| {
            if let Some(existing) = current.get(&key) {
                winner = existing.clone();
                inserted = false;
                Arc::clone(current)
            } else {
                winner = value.clone();
                inserted = true;
                let mut next = (**current).clone();
                next.insert(key.clone(), value.clone());
                Arc::new(next)
            }
        });
        if inserted {
            self.state.increment_count();
            self.state.bump_version();
        }
        Ok(winner)
    }

    /// Insert when absent, replace when present with a different value,
    /// and leave the map untouched when the stored value already equals
    /// `value`. Only an insert changes the count; a replace bumps the
    /// version alone.
    pub fn get_or_add_or_update(&self, key: K, value: V) -> Result<V> {
        self.state.ensure_live()?;

        #[derive(Clone, Copy, PartialEq)]
        enum Outcome {
            Added,
            Updated,
            Unchanged,
        }

        let mut outcome = Outcome::Unchanged;
        self.map.rcu(|current| match current.get(&key) {
            Some(existing) if *existing == value => {
                outcome = Outcome::Unchanged;
                Arc::clone(current)
            }
            Some(_) => {
                outcome = Outcome::Updated;
                let mut next = (**current).clone();
                next.insert(key.clone(), value.clone());
                Arc::new(next)
            }
            None => {
                outcome = Outcome::Added;
                let mut next = (**current).clone();
                next.insert(key.clone(), value.clone());
                Arc::new(next)
            }
        });
        match outcome {
            Outcome::Added => {
                self.state.increment_count();
                self.state.bump_version();
            }
            Outcome::Updated => self.state.bump_version(),
            Outcome::Unchanged => {}
        }
        Ok(value)
    }

    /// Replace the value of an existing key. Fails with `KeyNotFound`
    /// and mutates nothing when the key is absent.
    pub fn get_or_update(&self, key: K, value: V) -> Result<V> {
        self.state.ensure_live()?;
        let mut found = false;
        self.map.rcu(|current| {
            if current.contains_key(&key) {
                found = true;
                let mut next = (**current).clone();
                next.insert(key.clone(), value.clone());
                Arc::new(next)
            } else {
                found = false;
                Arc::clone(current)
            }
        });
        if found {
            self.state.bump_version();
            Ok(value)
        } else {
            Err(LatchlessError::KeyNotFound)
        }
    }

    /// Remove a key, returning its value when it was present.
    pub fn remove(&self, key: &K) -> Result<Option<V>> {
        self.state.ensure_live()?;
        let mut removed = None;
        self.map.rcu(|current| {
            if current.contains_key(key) {
                let mut next = (**current).clone();
                removed = next.remove(key);
                Arc::new(next)
            } else {
                removed = None;
                Arc::clone(current)
            }
        });
        if removed.is_some() {
            self.state.decrement_count();
            self.state.bump_version();
        }
        Ok(removed)
    }

    /// Remove a batch of keys in one swap; returns how many were
    /// actually present.
    pub fn remove_range<'a, I>(&self, keys: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        self.state.ensure_live()?;
        let keys: Vec<&K> = keys.into_iter().collect();
        if keys.is_empty() {
            return Ok(0);
        }
        let mut removed = 0usize;
        self.map.rcu(|current| {
            removed = 0;
            let mut next = (**current).clone();
            for key in &keys {
                if next.remove(*key).is_some() {
                    removed += 1;
                }
            }
            if removed == 0 {
                Arc::clone(current)
            } else {
                Arc::new(next)
            }
        });
        if removed > 0 {
            self.state.update_count(-(removed as isize));
            self.state.bump_version();
        }
        Ok(removed)
    }

    /// Bulk insert in one swap; returns the number of keys that were new.
    /// The version rises once per successful swap, not per element.
    pub fn append<I>(&self, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        self.state.ensure_live()?;
        let batch: Vec<(K, V)> = entries.into_iter().collect();
        if batch.is_empty() {
            return Ok(0);
        }
        let mut added = 0usize;
        self.map.rcu(|current| {
            added = 0;
            let mut next = (**current).clone();
            for (key, value) in &batch {
                if next.insert(key.clone(), value.clone()).is_none() {
                    added += 1;
                }
            }
            Arc::new(next)
        });
        self.state.update_count(added as isize);
        self.state.bump_version();
        debug!(batch = batch.len(), added, "cache batch appended");
        Ok(added)
    }

    /// A consistent, independent view of the current state. Never
    /// mutates the cache; the snapshot is immutable and survives any
    /// later swaps untouched.
    pub fn snapshot(&self) -> Result<Arc<HashMap<K, V>>> {
        self.state.ensure_live()?;
        Ok(self.map.load_full())
    }

    /// Drop every entry in one swap; returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        self.state.ensure_live()?;
        let previous = self.map.swap(Arc::new(HashMap::new()));
        let removed = previous.len();
        self.state.update_count(-(removed as isize));
        self.state.bump_version();
        debug!(removed, "cache cleared");
        Ok(removed)
    }

    /// Tear the cache down. Every later operation fails with `Disposed`.
    pub fn dispose(&self) {
        if !self.state.mark_disposed() {
            return;
        }
        let previous = self.map.swap(Arc::new(HashMap::new()));
        self.state.update_count(-(previous.len() as isize));
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.state.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.state.version()
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.state.is_disposed()
    }

    /// Enumerate the entries of the snapshot current at call time. The
    /// iterator fails fast with `ConcurrentModification` the moment a
    /// writer lands, rather than yielding from a superseded snapshot.
    pub fn iter(&self) -> Result<CacheIter<'_, K, V>> {
        self.state.ensure_live()?;
        let entries: Vec<(K, V)> = self
            .map
            .load()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(CacheIter {
            cache: self,
            expected: self.state.version(),
            entries: entries.into_iter(),
            done: false,
        })
    }
}

/// Versioned enumerator over a [`CowCache`] snapshot.
pub struct CacheIter<'a, K, V> {
    cache: &'a CowCache<K, V>,
    entries: std::vec::IntoIter<(K, V)>,
    expected: u64,
    done: bool,
}

impl<K, V> Iterator for CacheIter<'_, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + PartialEq,
{
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.cache.state.is_disposed() {
            self.done = true;
            return Some(Err(LatchlessError::Disposed));
        }
        if self.cache.state.version() != self.expected {
            self.done = true;
            return Some(Err(LatchlessError::ConcurrentModification));
        }
        match self.entries.next() {
            Some(entry) => Some(Ok(entry)),
            None => {
                self.done = true;
                None
            }
        }
    }
}
