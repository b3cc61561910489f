//! A set of entity references, implemented as a `SecondaryMap<K, bool>`.

use crate::map::SecondaryMap;
use crate::EntityRef;

/// A set of `K` built on a dense bitmap rather than a hash table.
///
/// Used for the short-lived `mark` decorations on `Varnode`/`PcodeOp` that
/// §9 calls out ("Marking flags ... treat as short-lived decorators,
/// asserted-clean on entry to each public analysis phase"): `clear` resets
/// the whole set in one `Vec::clear` rather than iterating inserted keys.
#[derive(Debug, Clone, Default)]
pub struct EntitySet<K: EntityRef> {
    map: SecondaryMap<K, bool>,
}

impl<K: EntityRef> EntitySet<K> {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            map: SecondaryMap::new(),
        }
    }

    /// Is `k` a member of the set?
    pub fn contains(&self, k: K) -> bool {
        self.map.get(k)
    }

    /// Insert `k`, returning whether it was already present.
    pub fn insert(&mut self, k: K) -> bool {
        let was = self.map.get(k);
        self.map[k] = true;
        !was
    }

    /// Remove `k`, returning whether it was present.
    pub fn remove(&mut self, k: K) -> bool {
        let was = self.map.get(k);
        self.map[k] = false;
        was
    }

    /// Clear every member in one shot.
    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Is the set empty?
    pub fn is_empty(&self) -> bool {
        !self.map.keys().any(|k| self.map.get(k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
    struct E(u32);
    crate::entity_impl!(E, "e");

    #[test]
    fn insert_contains_remove() {
        let mut s: EntitySet<E> = EntitySet::new();
        let e = E::new(5);
        assert!(!s.contains(e));
        assert!(s.insert(e));
        assert!(s.contains(e));
        assert!(!s.insert(e));
        assert!(s.remove(e));
        assert!(!s.contains(e));
    }
}
