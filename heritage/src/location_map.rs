//! §4.2.1: `LocationMap` and `TaskList`, the range bookkeeping Heritage
//! uses to decide which addresses are "interesting" on a given pass.

use pcode_ir::Address;
use std::collections::BTreeMap;

/// The result of `LocationMap::add` merging a new range into an existing
/// one.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum IntersectCode {
    /// The new range falls in the same pass as the existing entry.
    SamePass,
    /// The new range partially overlaps an older-pass entry.
    PartialWithOlder,
    /// The new range is wholly contained in an older-pass entry.
    ContainedInOlder,
}

/// An address → `(size, pass)` disjoint map. `add` merges any overlap with
/// an existing entry, always keeping the *minimum* pass number recorded for
/// the merged range (the range became interesting as early as the earliest
/// pass that touched any part of it).
#[derive(Clone, Default)]
pub struct LocationMap {
    entries: BTreeMap<Address, (u64, u32)>,
}

impl LocationMap {
    pub fn new() -> Self {
        LocationMap::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Address, u64, u32)> + '_ {
        self.entries.iter().map(|(&addr, &(size, pass))| (addr, size, pass))
    }

    /// Merge `[addr, addr+size)` at `pass` into the map.
    pub fn add(&mut self, addr: Address, size: u64, pass: u32) -> IntersectCode {
        // Find every existing entry overlapping the new range.
        let mut overlap_lo = addr;
        let mut overlap_hi_off = addr.offset() + size;
        let mut min_pass = pass;
        let mut code = IntersectCode::SamePass;
        let mut contained = false;

        let candidates: Vec<Address> = self
            .entries
            .range(..)
            .filter(|(&a, &(s, _))| {
                a.space() == addr.space() && a.offset() < overlap_hi_off && a.offset() + s > addr.offset()
            })
            .map(|(&a, _)| a)
            .collect();

        for a in &candidates {
            let (s, p) = self.entries.remove(a).unwrap();
            if a.offset() <= addr.offset() && a.offset() + s >= addr.offset() + size {
                contained = true;
            }
            if p < min_pass {
                min_pass = p;
            }
            overlap_lo = if a.offset() < overlap_lo.offset() { *a } else { overlap_lo };
            overlap_hi_off = overlap_hi_off.max(a.offset() + s);
        }

        if !candidates.is_empty() {
            code = if contained {
                IntersectCode::ContainedInOlder
            } else if min_pass < pass {
                IntersectCode::PartialWithOlder
            } else {
                IntersectCode::SamePass
            };
        }

        let merged_size = overlap_hi_off - overlap_lo.offset();
        self.entries.insert(overlap_lo, (merged_size, min_pass));
        code
    }
}

/// One disjoint memory range built for a single pass, tagged new-vs-old.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RangeAge {
    New,
    Old,
}

#[derive(Clone, Debug)]
pub struct MemRange {
    pub addr: Address,
    pub size: u64,
    pub age: RangeAge,
}

/// A disjoint, address-sorted list of `MemRange`s built for one pass.
#[derive(Clone, Default)]
pub struct TaskList {
    ranges: Vec<MemRange>,
}

impl TaskList {
    pub fn new() -> Self {
        TaskList::default()
    }

    /// Insert a range, keeping the list sorted by address. Callers are
    /// expected to insert disjoint ranges (Heritage computes them that way
    /// by construction via `VarnodeBank::in_range` walks).
    pub fn insert(&mut self, range: MemRange) {
        let pos = self.ranges.partition_point(|r| r.addr < range.addr);
        self.ranges.insert(pos, range);
    }

    pub fn iter(&self) -> std::slice::Iter<MemRange> {
        self.ranges.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcode_entity::EntityRef;
    use pcode_ir::SpaceId;

    fn addr(off: u64) -> Address {
        Address::new(SpaceId::new(0), off)
    }

    #[test]
    fn add_disjoint_ranges_stay_separate() {
        let mut m = LocationMap::new();
        m.add(addr(0), 4, 0);
        m.add(addr(100), 4, 0);
        assert_eq!(m.iter().count(), 2);
    }

    #[test]
    fn add_overlap_keeps_minimum_pass() {
        let mut m = LocationMap::new();
        m.add(addr(0), 8, 2);
        let code = m.add(addr(4), 4, 0);
        assert_eq!(code, IntersectCode::ContainedInOlder);
        let (_, _, pass) = m.iter().next().unwrap();
        assert_eq!(pass, 0);
    }

    #[test]
    fn add_partial_overlap_extends_range() {
        let mut m = LocationMap::new();
        m.add(addr(0), 4, 0);
        m.add(addr(2), 4, 1);
        let (_, size, _) = m.iter().next().unwrap();
        assert_eq!(size, 6);
    }
}
