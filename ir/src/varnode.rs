//! `Varnode`: a single-static-assignment storage node, and the
//! `VarnodeBank` that owns every one of them for a function.

use crate::address::Address;
use crate::pcodeop::PcodeOp;
use pcode_entity::{entity_impl, EntityRef, PrimaryMap};
use std::collections::BTreeMap;
use std::fmt;

/// A reference to a `Varnode` in some function's `VarnodeBank`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Varnode(u32);
entity_impl!(Varnode, "vn");

crate::bitflags_like! {
    /// Per-`Varnode` flags, per §3.
    pub struct VarnodeFlags: u32 {
        const INPUT = 1 << 0;
        const WRITTEN = 1 << 1;
        const CONSTANT = 1 << 2;
        const ANNOTATION = 1 << 3;
        const IMPLIED = 1 << 4;
        const EXPLICIT = 1 << 5;
        const TYPELOCK = 1 << 6;
        const NAMELOCK = 1 << 7;
        const PERSIST = 1 << 8;
        const ADDR_TIED = 1 << 9;
        const ADDR_FORCED = 1 << 10;
        const UNAFFECTED = 1 << 11;
        const SPACEBASE = 1 << 12;
        const INDIRECT_ONLY = 1 << 13;
        const INDIRECT_CREATION = 1 << 14;
        const PROTO_PARTIAL = 1 << 15;
        const ACTIVE_HERITAGE = 1 << 16;
        const WRITE_MASK = 1 << 17;
        const MARK = 1 << 18;
        const COVER_DIRTY = 1 << 19;
    }
}

/// The data carried by a `Varnode`: its storage location, size, flags, the
/// op that defines it (if any) and the reverse list of every op that reads
/// it.
#[derive(Clone, Debug)]
pub struct VarnodeData {
    address: Address,
    size: u32,
    flags: VarnodeFlags,
    def: Option<PcodeOp>,
    descend: Vec<PcodeOp>,
    /// Total order across the function, assigned once at creation and
    /// never reused, even if the Varnode is later freed (§3).
    create_index: u32,
}

impl VarnodeData {
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn end_offset(&self) -> u64 {
        self.address.offset() + u64::from(self.size)
    }

    pub fn flags(&self) -> VarnodeFlags {
        self.flags
    }

    pub fn set_flags(&mut self, f: VarnodeFlags) {
        self.flags.insert(f);
    }

    pub fn clear_flags(&mut self, f: VarnodeFlags) {
        self.flags.remove(f);
    }

    pub fn is_input(&self) -> bool {
        self.flags.contains(VarnodeFlags::INPUT)
    }

    pub fn is_written(&self) -> bool {
        self.flags.contains(VarnodeFlags::WRITTEN)
    }

    pub fn is_free(&self) -> bool {
        !self.is_input() && !self.is_written()
    }

    pub fn is_constant(&self) -> bool {
        self.flags.contains(VarnodeFlags::CONSTANT)
    }

    pub fn def(&self) -> Option<PcodeOp> {
        self.def
    }

    pub fn set_def(&mut self, op: PcodeOp) {
        debug_assert!(
            self.def.is_none() && !self.is_input(),
            "a non-free Varnode has a single defining op OR is an input"
        );
        self.def = Some(op);
        self.flags.insert(VarnodeFlags::WRITTEN);
    }

    pub fn descend(&self) -> &[PcodeOp] {
        &self.descend
    }

    /// Record that `op` reads this Varnode. Kept in lockstep with
    /// `PcodeOpData::inputs` to preserve invariant 2 of §8
    /// ("descend consistency").
    pub(crate) fn add_descend(&mut self, op: PcodeOp) {
        self.descend.push(op);
    }

    pub(crate) fn remove_descend(&mut self, op: PcodeOp) {
        if let Some(pos) = self.descend.iter().position(|&d| d == op) {
            self.descend.swap_remove(pos);
        }
    }

    pub fn create_index(&self) -> u32 {
        self.create_index
    }

    /// Does this Varnode's storage overlap `addr`'s `size`-byte range?
    pub fn overlaps(&self, addr: &Address, size: u32) -> bool {
        self.address.overlap(u64::from(self.size), addr, u64::from(size))
    }
}

impl fmt::Display for VarnodeData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}:{}", self.address, self.size)
    }
}

/// Owns every `Varnode` for one function, plus a location index (ordered by
/// `(space, offset)`) used by Heritage's location-order walks and by the
/// overlap queries Merge and jump-table recovery both need.
#[derive(Clone, Default)]
pub struct VarnodeBank {
    arena: PrimaryMap<Varnode, VarnodeData>,
    by_location: BTreeMap<Address, Vec<Varnode>>,
    next_create_index: u32,
}

impl VarnodeBank {
    pub fn new() -> Self {
        VarnodeBank::default()
    }

    /// Create a new, free Varnode at `address` with the given `size`.
    pub fn create(&mut self, address: Address, size: u32) -> Varnode {
        let create_index = self.next_create_index;
        self.next_create_index += 1;
        let vn = self.arena.push(VarnodeData {
            address,
            size,
            flags: VarnodeFlags::empty(),
            def: None,
            descend: Vec::new(),
            create_index,
        });
        self.by_location.entry(address).or_default().push(vn);
        vn
    }

    pub fn get(&self, vn: Varnode) -> &VarnodeData {
        self.arena.get(vn).expect("dangling Varnode reference")
    }

    pub fn get_mut(&mut self, vn: Varnode) -> &mut VarnodeData {
        self.arena.get_mut(vn).expect("dangling Varnode reference")
    }

    pub fn iter(&self) -> impl Iterator<Item = (Varnode, &VarnodeData)> {
        self.arena.iter()
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Iterate every Varnode whose address falls within `[addr, addr+size)`,
    /// in location order — the walk Heritage's `placeMultiequals` and
    /// `refinement` both need.
    pub fn in_range(&self, addr: Address, size: u64) -> impl Iterator<Item = Varnode> + '_ {
        self.by_location
            .range(addr..)
            .take_while(move |(a, _)| a.offset() < addr.offset() + size && a.space() == addr.space())
            .flat_map(|(_, vns)| vns.iter().copied())
    }

    /// Invariant 2 of §8: does `op` appear in `vn`'s descend list iff `vn`
    /// appears in `op`'s inputs? This only checks the `Varnode` side; the
    /// `PcodeOp` side is checked by `PcodeOpData` bookkeeping, and the two
    /// are only ever mutated together through `Funcdata`'s helpers.
    pub fn descend_consistent(&self, vn: Varnode, op: PcodeOp) -> bool {
        self.get(vn).descend().contains(&op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::SpaceId;
    use pcode_entity::EntityRef;

    fn addr(off: u64) -> Address {
        Address::new(SpaceId::new(0), off)
    }

    #[test]
    fn create_assigns_monotonic_index() {
        let mut bank = VarnodeBank::new();
        let a = bank.create(addr(0), 4);
        let b = bank.create(addr(4), 4);
        assert!(bank.get(a).create_index() < bank.get(b).create_index());
    }

    #[test]
    fn free_varnode_has_no_def_and_is_not_input() {
        let mut bank = VarnodeBank::new();
        let vn = bank.create(addr(0), 4);
        assert!(bank.get(vn).is_free());
    }

    #[test]
    fn in_range_only_returns_overlapping_varnodes() {
        let mut bank = VarnodeBank::new();
        let a = bank.create(addr(0), 4);
        let b = bank.create(addr(4), 4);
        let _c = bank.create(addr(100), 4);
        let found: Vec<_> = bank.in_range(addr(0), 8).collect();
        assert!(found.contains(&a));
        assert!(found.contains(&b));
        assert_eq!(found.len(), 2);
    }
}
