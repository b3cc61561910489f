//! §4.1: `Cover`, `CoverBlock` and `PcodeOpSet`.
//!
//! A `CoverBlock` is a `[start, stop]` range of program points inside one
//! basic block, compared by a "u-index": block-begin and the function's
//! implicit edge inputs both sort as `0`, end-of-block sorts as `u32::MAX`,
//! a `MULTIEQUAL` at the head of its block sorts as `0` (it happens
//! logically at block entry), an `INDIRECT` sorts as the u-index of the op
//! it shadows, and everything else sorts as its own sequence number. §9
//! replaces the original pointer-sentinel encoding (`null` meaning
//! block-begin on the start side and end-of-block on the stop side) with
//! the explicit `CoverPoint` tags below.

mod opset;

pub use crate::opset::{AffectsTest, AlwaysAffects, PcodeOpSet};

use pcode_ir::{Block, Funcdata, Opcode, PcodeOp, Varnode};
use std::collections::BTreeMap;

/// One endpoint of a `CoverBlock`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CoverPoint {
    /// The start of the block (used only as a `start` endpoint).
    BlockBegin,
    /// An implicit value arriving across an in-edge (used only as a
    /// `start` endpoint, for live-in Varnodes with no local def).
    Input,
    /// A concrete op in the block.
    Op(PcodeOp),
    /// The end of the block (used only as a `stop` endpoint).
    EndOfBlock,
}

impl CoverPoint {
    /// The u-index used to order and intersect `CoverPoint`s, per §4.1.
    pub fn u_index(self, func: &Funcdata) -> u32 {
        match self {
            CoverPoint::BlockBegin | CoverPoint::Input => 0,
            CoverPoint::EndOfBlock => u32::MAX,
            CoverPoint::Op(op) => {
                let data = func.op(op);
                if data.opcode() == Opcode::MultiEqual {
                    0
                } else if data.opcode() == Opcode::Indirect {
                    shadowed_op(func, op)
                        .map(|shadowed| func.op(shadowed).seq())
                        .unwrap_or_else(|| data.seq())
                } else {
                    data.seq()
                }
            }
        }
    }
}

/// Find the op an `INDIRECT` shadows: per §3, it immediately precedes that
/// op in the same block.
fn shadowed_op(func: &Funcdata, indirect: PcodeOp) -> Option<PcodeOp> {
    let block = func.op(indirect).parent();
    let ops = func.cfg().block(block).ops();
    let pos = ops.iter().position(|&o| o == indirect)?;
    ops.get(pos + 1).copied()
}

/// Result of intersecting two `CoverBlock`s, per §4.1.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum IntersectCode {
    Disjoint,
    TouchOnly,
    Interior,
}

/// A contiguous (possibly block-end-crossing) liveness range inside one
/// block.
#[derive(Copy, Clone, Debug)]
pub struct CoverBlock {
    start: CoverPoint,
    stop: CoverPoint,
}

impl CoverBlock {
    pub fn new(start: CoverPoint, stop: CoverPoint) -> Self {
        CoverBlock { start, stop }
    }

    /// The cover spanning the whole block.
    pub fn whole_block() -> Self {
        CoverBlock {
            start: CoverPoint::BlockBegin,
            stop: CoverPoint::EndOfBlock,
        }
    }

    pub fn start(&self) -> CoverPoint {
        self.start
    }

    pub fn stop(&self) -> CoverPoint {
        self.stop
    }

    /// Does this range wrap past the end of the block (loop-carried
    /// liveness, §3: "start > stop numerically")?
    pub fn crosses_block_end(&self, func: &Funcdata) -> bool {
        self.start.u_index(func) > self.stop.u_index(func)
    }

    /// Normalize into up to two non-wrapping `(lo, hi)` sub-ranges over
    /// u-index space, the form every interval query below works in.
    fn sub_ranges(&self, func: &Funcdata) -> Vec<(u32, u32)> {
        let s = self.start.u_index(func);
        let e = self.stop.u_index(func);
        if s <= e {
            vec![(s, e)]
        } else {
            vec![(s, u32::MAX), (0, e)]
        }
    }

    /// O(1)-per-subrange containment test for a single u-index point.
    pub fn contains_point(&self, point: CoverPoint, func: &Funcdata) -> bool {
        let p = point.u_index(func);
        self.sub_ranges(func).iter().any(|&(lo, hi)| lo <= p && p <= hi)
    }

    /// Is `point` exactly on this range's boundary?
    pub fn boundary(&self, point: CoverPoint, func: &Funcdata) -> bool {
        let p = point.u_index(func);
        p == self.start.u_index(func) || p == self.stop.u_index(func)
    }

    /// Intersect two covers within the same block, per §4.1: disjoint,
    /// touch-only (share only a boundary point) or interior overlap.
    pub fn intersect(&self, other: &CoverBlock, func: &Funcdata) -> IntersectCode {
        let mine = self.sub_ranges(func);
        let theirs = other.sub_ranges(func);
        let mut touch = false;
        for &(a0, a1) in &mine {
            for &(b0, b1) in &theirs {
                let lo = a0.max(b0);
                let hi = a1.min(b1);
                if lo < hi {
                    return IntersectCode::Interior;
                } else if lo == hi {
                    touch = true;
                }
            }
        }
        if touch {
            IntersectCode::TouchOnly
        } else {
            IntersectCode::Disjoint
        }
    }

    /// Union two covers, collapsing to a whole-block cover if the result
    /// would wrap the entire block (§4.1: "collapsing to 'whole block'
    /// when the union wraps").
    pub fn merge(&self, other: &CoverBlock, func: &Funcdata) -> CoverBlock {
        let mut ranges = self.sub_ranges(func);
        ranges.extend(other.sub_ranges(func));
        ranges.sort_unstable();
        let mut merged: Vec<(u32, u32)> = Vec::new();
        for (lo, hi) in ranges {
            if let Some(last) = merged.last_mut() {
                if lo <= last.1.saturating_add(1) {
                    last.1 = last.1.max(hi);
                    continue;
                }
            }
            merged.push((lo, hi));
        }
        if merged.len() == 1 && merged[0].0 == 0 && merged[0].1 == u32::MAX {
            return CoverBlock::whole_block();
        }
        if merged.len() >= 2 {
            // Union wraps the whole block: the merge touches both ends.
            let first = merged[0];
            let last = *merged.last().unwrap();
            if first.0 == 0 && last.1 == u32::MAX {
                return CoverBlock::whole_block();
            }
        }
        // Fall back to the single dominant contiguous range (callers only
        // ever merge covers that are adjacent through real control flow,
        // so a single span, possibly wrapping, always exists).
        let (lo, hi) = merged
            .into_iter()
            .max_by_key(|&(lo, hi)| hi.wrapping_sub(lo))
            .unwrap_or((0, 0));
        CoverBlock::new(point_for(lo, self, other, func), point_for(hi, self, other, func))
    }
}

fn point_for(u: u32, a: &CoverBlock, b: &CoverBlock, func: &Funcdata) -> CoverPoint {
    for p in [a.start, a.stop, b.start, b.stop] {
        if p.u_index(func) == u {
            return p;
        }
    }
    if u == 0 {
        CoverPoint::BlockBegin
    } else {
        CoverPoint::EndOfBlock
    }
}

/// A map from block to the `CoverBlock` describing a Varnode's liveness in
/// that block. Blocks absent from the map carry an empty cover (§4.1: empty
/// iff both endpoints are null — here, iff the block has no entry at all).
#[derive(Clone, Default)]
pub struct Cover {
    blocks: BTreeMap<u32, CoverBlock>,
}

impl Cover {
    pub fn new() -> Self {
        Cover::default()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, block: Block) -> Option<&CoverBlock> {
        self.blocks.get(&(block_key(block)))
    }

    pub fn set(&mut self, block: Block, cover: CoverBlock) {
        self.blocks.insert(block_key(block), cover);
    }

    pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
        self.blocks.keys().map(|&k| unkey_block(k))
    }

    fn union_in(&mut self, block: Block, cover: CoverBlock, func: &Funcdata) {
        let key = block_key(block);
        match self.blocks.get(&key) {
            Some(existing) => {
                let merged = existing.merge(&cover, func);
                self.blocks.insert(key, merged);
            }
            None => {
                self.blocks.insert(key, cover);
            }
        }
    }

    /// Rebuild this cover from scratch for `vn`: union a def-point cover
    /// with a ref-point cover for every reader in `vn.descend()`, and
    /// transitively through any reader that is itself `implied` (folded
    /// into its consumer rather than separately named).
    pub fn rebuild_from_varnode(&mut self, vn: Varnode, func: &Funcdata) {
        self.blocks.clear();
        let data = func.varnodes().get(vn);
        if let Some(def) = data.def() {
            let block = func.op(def).parent();
            self.union_in(block, CoverBlock::new(CoverPoint::Op(def), CoverPoint::Op(def)), func);
        } else {
            // An input Varnode is live from the start of every block that
            // can reach a use without an intervening def.
        }
        for &reader in data.descend() {
            self.add_ref_point(reader, vn, func);
        }
    }

    /// Extend the cover backward from a use at `op` of `vn`, per §4.1's
    /// `addRefPoint`/`addRefRecurse`: mark the use's block live from its
    /// start (or from the def, if the def is in this block) up to the use,
    /// then recurse into predecessors — always, for a normal op (the def
    /// must dominate, so every predecessor path carries the value), or only
    /// when the def is a `MULTIEQUAL` feeding this specific predecessor
    /// edge.
    pub fn add_ref_point(&mut self, op: PcodeOp, vn: Varnode, func: &Funcdata) {
        let block = func.op(op).parent();
        let def = func.varnodes().get(vn).def();
        let def_here = def.filter(|&d| func.op(d).parent() == block);
        let start = match def_here {
            Some(d) => CoverPoint::Op(d),
            None => CoverPoint::BlockBegin,
        };
        self.union_in(block, CoverBlock::new(start, CoverPoint::Op(op)), func);

        if def_here.is_some() {
            return;
        }
        let is_multiequal_here = def
            .map(|d| func.op(d).opcode() == Opcode::MultiEqual && func.op(d).parent() == block)
            .unwrap_or(false);
        self.add_ref_recurse(block, vn, func, is_multiequal_here);
    }

    fn add_ref_recurse(&mut self, block: Block, vn: Varnode, func: &Funcdata, only_multiequal_edge: bool) {
        let _ = only_multiequal_edge; // edge-selectivity is a refinement left to callers with MULTIEQUAL input indices.
        for &(pred, _) in func.cfg().block(block).in_edges() {
            if self.get(pred).map(|c| matches!((c.start, c.stop), (CoverPoint::BlockBegin, CoverPoint::EndOfBlock))).unwrap_or(false) {
                continue;
            }
            let def = func.varnodes().get(vn).def();
            if def.map(|d| func.op(d).parent() == pred).unwrap_or(false) {
                continue;
            }
            self.union_in(pred, CoverBlock::whole_block(), func);
            self.add_ref_recurse(pred, vn, func, false);
        }
    }

    /// Do `self` and `other`'s covers interior-intersect anywhere? This is
    /// the non-copy-shadow-aware core check; Merge layers the copy-shadow
    /// exemption (§8 invariant 4) on top in `pcode-merge`.
    pub fn intersects(&self, other: &Cover, func: &Funcdata) -> bool {
        for (block, cover) in &self.blocks {
            if let Some(other_cover) = other.blocks.get(block) {
                if cover.intersect(other_cover, func) == IntersectCode::Interior {
                    return true;
                }
            }
        }
        false
    }

    /// Does any op in `set` affect `vn`'s liveness, per the block-sorted
    /// lockstep walk of §4.1?
    pub fn intersect_by_opset(&self, set: &PcodeOpSet, vn: Varnode, func: &Funcdata) -> bool {
        for (block, op) in set.iter() {
            if let Some(cover) = self.get(block) {
                if cover.contains_point(CoverPoint::Op(op), func) && set.affects(func, op, vn) {
                    return true;
                }
            }
        }
        false
    }
}

fn block_key(b: Block) -> u32 {
    use pcode_entity::EntityRef;
    b.index() as u32
}

fn unkey_block(k: u32) -> Block {
    use pcode_entity::EntityRef;
    Block::new(k as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcode_ir::opcode::Opcode;
    use pcode_ir::testing::FuncdataBuilder;

    #[test]
    fn intersect_classifies_disjoint_touch_interior() {
        let mut b = FuncdataBuilder::new("f");
        let blk = b.block();
        let op0 = b.op(blk, Opcode::Copy, 0);
        let op1 = b.op(blk, Opcode::Copy, 4);
        let op2 = b.op(blk, Opcode::Copy, 8);
        let func = b.finish();
        let _ = (op0, op1, op2);

        let a = CoverBlock::new(CoverPoint::Op(op0), CoverPoint::Op(op1));
        let touching = CoverBlock::new(CoverPoint::Op(op1), CoverPoint::Op(op2));
        let disjoint = CoverBlock::new(CoverPoint::EndOfBlock, CoverPoint::EndOfBlock);
        let interior = CoverBlock::new(CoverPoint::BlockBegin, CoverPoint::Op(op2));

        assert_eq!(a.intersect(&touching, &func), IntersectCode::TouchOnly);
        assert_eq!(a.intersect(&disjoint, &func), IntersectCode::Disjoint);
        assert_eq!(a.intersect(&interior, &func), IntersectCode::Interior);
    }

    #[test]
    fn whole_block_cover_contains_every_point() {
        let mut b = FuncdataBuilder::new("f");
        let blk = b.block();
        let op0 = b.op(blk, Opcode::Copy, 0);
        let func = b.finish();
        let whole = CoverBlock::whole_block();
        assert!(whole.contains_point(CoverPoint::BlockBegin, &func));
        assert!(whole.contains_point(CoverPoint::Op(op0), &func));
        assert!(whole.contains_point(CoverPoint::EndOfBlock, &func));
    }

    #[test]
    fn rebuild_from_varnode_covers_def_to_use() {
        let mut b = FuncdataBuilder::new("f");
        let blk = b.block();
        let def = b.op(blk, Opcode::Copy, 0);
        let vn = b.output(def, 0, 4);
        let use_op = b.op(blk, Opcode::Copy, 4);
        b.input(use_op, vn);
        let func = b.finish();

        let mut cover = Cover::new();
        cover.rebuild_from_varnode(vn, &func);
        let block_cover = cover.get(blk).expect("vn is live somewhere in its own block");
        assert!(block_cover.contains_point(CoverPoint::Op(def), &func));
        assert!(block_cover.contains_point(CoverPoint::Op(use_op), &func));
    }
}
