//! Address spaces and the `(space, offset)` addresses within them.
//!
//! An `AddrSpace` is a namespace of byte-addressable storage: the register
//! file, the stack, a pool of constants, p-code's own internal temporaries,
//! the synthetic `join` space that stitches non-contiguous pieces into one
//! virtual range, and the synthetic `ioref` space that lets a Varnode refer
//! to another p-code op. `Address` is just `(space, offset)`, ordered by
//! `(space.index, offset)` per §3.

use pcode_entity::{entity_impl, EntityRef};
use std::cmp::Ordering;
use std::fmt;

/// A reference to one of a function's `AddrSpace`s.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpaceId(u32);
entity_impl!(SpaceId, "space");

/// Byte order of values stored in an address space.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Endianness {
    /// Least-significant byte first.
    Little,
    /// Most-significant byte first.
    Big,
}

/// The kind of storage an `AddrSpace` represents, per §3.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SpaceType {
    /// The processor's register file.
    Processor,
    /// The call stack / local-variable frame.
    Stack,
    /// Constant values, addressed by their own value.
    Constant,
    /// Heritage-internal temporaries (`unique` space), never address-tied.
    InternalUnique,
    /// The synthetic space stitching non-contiguous pieces into one range.
    Join,
    /// The synthetic space whose offsets are references to other `PcodeOp`s.
    IoRef,
    /// Anything else (overlay spaces, memory-mapped regions, ...).
    Other,
}

crate::bitflags_like! {
    /// Per-`AddrSpace` flags from §3.
    pub struct SpaceFlags: u8 {
        /// This space has been raised to SSA form by at least one pass.
        const HERITAGED = 1 << 0;
        /// Varnodes in this space may be addressed indirectly through a
        /// pointer (enables the indexed-stack analysis of §4.2.5).
        const HIGHPTR_POSSIBLE = 1 << 1;
    }
}

/// A single address space in the target's memory model.
#[derive(Clone, Debug)]
pub struct AddrSpace {
    index: SpaceId,
    name: String,
    word_size: u32,
    endian: Endianness,
    /// Minimum heritage pass number before this space is raised to SSA.
    delay: u32,
    /// Minimum pass before a dead-code removal pass may run over it.
    dead_code_delay: u32,
    space_type: SpaceType,
    flags: SpaceFlags,
    /// Highest representable byte offset; address arithmetic wraps modulo
    /// `highest + 1`.
    highest: u64,
}

impl AddrSpace {
    /// Construct a new address space. `highest` is the largest
    /// representable offset (e.g. `u32::MAX as u64` for a 32-bit space).
    pub fn new(
        index: SpaceId,
        name: impl Into<String>,
        word_size: u32,
        endian: Endianness,
        space_type: SpaceType,
        delay: u32,
        dead_code_delay: u32,
        highest: u64,
    ) -> Self {
        AddrSpace {
            index,
            name: name.into(),
            word_size,
            endian,
            delay,
            dead_code_delay,
            space_type,
            flags: SpaceFlags::empty(),
            highest,
        }
    }

    /// This space's index, used to order `Address`es.
    pub fn index(&self) -> SpaceId {
        self.index
    }

    /// The space's name (`"ram"`, `"register"`, `"stack"`, ...).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of bytes per addressable word.
    pub fn word_size(&self) -> u32 {
        self.word_size
    }

    pub fn endian(&self) -> Endianness {
        self.endian
    }

    pub fn space_type(&self) -> SpaceType {
        self.space_type
    }

    pub fn delay(&self) -> u32 {
        self.delay
    }

    pub fn dead_code_delay(&self) -> u32 {
        self.dead_code_delay
    }

    pub fn bump_dead_code_delay(&mut self) {
        self.dead_code_delay += 1;
    }

    pub fn flags(&self) -> SpaceFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: SpaceFlags) {
        self.flags.insert(flags);
    }

    pub fn is_heritaged(&self) -> bool {
        self.flags.contains(SpaceFlags::HERITAGED)
    }

    pub fn highptr_possible(&self) -> bool {
        self.flags.contains(SpaceFlags::HIGHPTR_POSSIBLE)
    }

    /// Convert a byte offset to a word-aligned index (truncating).
    pub fn byte_to_word(&self, byte_offset: u64) -> u64 {
        byte_offset / u64::from(self.word_size.max(1))
    }

    /// Convert a word index back to a byte offset.
    pub fn word_to_byte(&self, word: u64) -> u64 {
        word * u64::from(self.word_size.max(1))
    }

    /// Add `delta` to `offset`, wrapping at the space's addressable range.
    pub fn wrap_offset(&self, offset: u64, delta: i64) -> u64 {
        let range = self.highest as u128 + 1;
        let wrapped = if delta >= 0 {
            (offset as u128 + delta as u128) % range
        } else {
            let neg = (-delta) as u128;
            let off = offset as u128;
            (off + range - (neg % range)) % range
        };
        wrapped as u64
    }

    /// Largest representable offset in this space.
    pub fn highest(&self) -> u64 {
        self.highest
    }
}

/// A `(space, offset)` location, the unit of addressing throughout the IR.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    space: SpaceId,
    offset: u64,
}

impl Address {
    pub fn new(space: SpaceId, offset: u64) -> Self {
        Address { space, offset }
    }

    pub fn space(&self) -> SpaceId {
        self.space
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Add `delta` bytes, wrapping within `space`.
    pub fn add_wrapping(&self, space_info: &AddrSpace, delta: i64) -> Address {
        Address {
            space: self.space,
            offset: space_info.wrap_offset(self.offset, delta),
        }
    }

    /// Does the `size`-byte range starting at `self` overlap the `size2`-byte
    /// range starting at `base`?
    pub fn overlap(&self, size: u64, base: &Address, size2: u64) -> bool {
        if self.space != base.space {
            return false;
        }
        let (a0, a1) = (self.offset, self.offset + size);
        let (b0, b1) = (base.offset, base.offset + size2);
        a0 < b1 && b0 < a1
    }

    /// Is the `size`-byte range starting at `self` fully contained within,
    /// and aligned to end at the same high end as, the `size2`-byte range
    /// starting at `base` (a "justified" containment: the piece occupies
    /// the most-significant, i.e. last-written-matters, end on a big-endian
    /// target and the least-significant end on little-endian)?
    pub fn justified_contain(&self, size: u64, base: &Address, size2: u64, big_endian: bool) -> bool {
        if self.space != base.space || size > size2 {
            return false;
        }
        if self.offset < base.offset || self.offset + size > base.offset + size2 {
            return false;
        }
        if big_endian {
            self.offset + size == base.offset + size2
        } else {
            self.offset == base.offset
        }
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.space.index(), self.offset).cmp(&(other.space.index(), other.offset))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{:#x}", self.space, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space(idx: u32) -> SpaceId {
        SpaceId::new(idx as usize)
    }

    #[test]
    fn ordering_is_space_then_offset() {
        let a = Address::new(space(0), 100);
        let b = Address::new(space(1), 0);
        assert!(a < b);
        let c = Address::new(space(0), 50);
        assert!(c < a);
    }

    #[test]
    fn overlap_detects_interior_overlap_only() {
        let a = Address::new(space(0), 0);
        let b = Address::new(space(0), 4);
        assert!(a.overlap(8, &b, 4)); // [0,8) vs [4,8)
        let c = Address::new(space(0), 8);
        assert!(!a.overlap(8, &c, 4)); // [0,8) vs [8,12) touch only
    }

    #[test]
    fn wrap_offset_wraps_at_space_highest() {
        let info = AddrSpace::new(space(0), "ram", 1, Endianness::Little, SpaceType::Other, 0, 0, 0xff);
        assert_eq!(info.wrap_offset(0xfe, 3), 0x01);
        assert_eq!(info.wrap_offset(0x02, -5), 0xfd);
    }
}
