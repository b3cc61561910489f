//! Densely numbered entity references as mapping keys, with a default
//! value for any key that was never explicitly written.

use crate::keys::Keys;
use crate::EntityRef;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// A mapping `K -> V` for densely indexed entity references.
///
/// Unlike [`PrimaryMap`](crate::PrimaryMap), a `SecondaryMap` cannot be used
/// to allocate keys; it associates extra, optional information with keys
/// that live in some other primary map (e.g. "is this `Varnode` marked
/// cover-dirty?", "what `HighVariable` does this `Varnode` belong to?").
///
/// The map does not track whether an entry was ever inserted: every key
/// behaves as if it has a default entry from the start, which is exactly
/// the semantics §4 relies on for flags like `mark` / `cover-dirty` that
/// must read as "unset" for any `Varnode` nobody has touched yet.
#[derive(Debug, Clone)]
pub struct SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone,
{
    elems: Vec<V>,
    default: V,
    unused: PhantomData<K>,
}

impl<K, V> SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone + Default,
{
    /// Create a new, empty map whose default value is `V::default()`.
    pub fn new() -> Self {
        Self {
            elems: Vec::new(),
            default: V::default(),
            unused: PhantomData,
        }
    }
}

impl<K, V> Default for SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone,
{
    /// Create a new, empty map with an explicit default value, for `V`
    /// that don't implement `Default` (or whose default isn't `V::default()`).
    pub fn with_default(default: V) -> Self {
        Self {
            elems: Vec::new(),
            default,
            unused: PhantomData,
        }
    }

    /// Get the element at `k`, or the default value if `k` was never set.
    pub fn get(&self, k: K) -> V {
        self.elems.get(k.index()).cloned().unwrap_or_else(|| self.default.clone())
    }

    /// Is the map completely empty?
    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Number of elements explicitly stored (not the key space size).
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    /// Resize the map to hold `n` explicit keys, filling with the default.
    pub fn resize(&mut self, n: usize) {
        self.elems.resize(n, self.default.clone());
    }

    /// Remove all entries, keeping the allocated capacity.
    pub fn clear(&mut self) {
        self.elems.clear();
    }

    /// Iterate over the keys that have been given explicit storage.
    pub fn keys(&self) -> Keys<K> {
        Keys::with_len(self.elems.len())
    }
}

impl<K, V> Index<K> for SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone,
{
    type Output = V;

    fn index(&self, k: K) -> &V {
        self.elems.get(k.index()).unwrap_or(&self.default)
    }
}

impl<K, V> IndexMut<K> for SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone,
{
    /// Mutable indexing grows the backing storage on demand, filling any
    /// gap with the default value, matching the "every key already has a
    /// default entry" contract.
    fn index_mut(&mut self, k: K) -> &mut V {
        let i = k.index();
        if i >= self.elems.len() {
            self.elems.resize(i + 1, self.default.clone());
        }
        &mut self.elems[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
    struct E(u32);
    crate::entity_impl!(E, "e");

    #[test]
    fn default_reads() {
        let m: SecondaryMap<E, u32> = SecondaryMap::new();
        assert_eq!(m.get(E::new(9)), 0);
    }

    #[test]
    fn grows_on_write() {
        let mut m: SecondaryMap<E, bool> = SecondaryMap::new();
        m[E::new(3)] = true;
        assert_eq!(m.len(), 4);
        assert!(m[E::new(3)]);
        assert!(!m[E::new(0)]);
    }
}
