//! `HighVariable`: the set of SSA Varnode instances Merge has decided
//! represent one source-level variable, plus the `VariableGroup` that ties
//! several `HighVariable`s together as pieces of one larger aggregate
//! (§4.4's `groupPartials`/`mergeGroups`).

use pcode_cover::Cover;
use pcode_entity::{entity_impl, EntityRef, PrimaryMap, SecondaryMap};
use pcode_ir::{Funcdata, Varnode};

/// A reference to a `HighVariable`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HighId(u32);
entity_impl!(HighId, "high");

/// A reference to a `VariableGroup`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(u32);
entity_impl!(GroupId, "grp");

/// One `HighVariable`'s membership in a `VariableGroup`: its byte offset
/// within the group's own address frame.
#[derive(Copy, Clone, Debug)]
pub struct VariablePiece {
    pub high: HighId,
    pub group_offset: u64,
}

/// A CONCAT-tree root's pieces, tied together as one logical aggregate
/// once `groupPartials` confirms each piece is a single-instance
/// proto-partial (§4.4 step 3).
#[derive(Clone, Default)]
pub struct VariableGroup {
    pieces: Vec<VariablePiece>,
}

impl VariableGroup {
    pub fn pieces(&self) -> &[VariablePiece] {
        &self.pieces
    }

    fn add(&mut self, high: HighId, group_offset: u64) {
        self.pieces.push(VariablePiece { high, group_offset });
    }

    /// Does any existing piece overlap `[offset, offset+size)`? Used by
    /// `mergeTestAdjacent`'s overlapping-group rejection.
    pub fn overlaps(&self, offset: u64, size: u64, sizes: &dyn Fn(HighId) -> u64) -> bool {
        self.pieces.iter().any(|p| {
            let psize = sizes(p.high);
            p.group_offset < offset + size && offset < p.group_offset + psize
        })
    }
}

/// One source-level variable: a set of Varnode instances that Merge
/// considers the same value over its lifetime, plus their combined
/// liveness.
#[derive(Clone)]
pub struct HighVariable {
    instances: Vec<Varnode>,
    cover: Cover,
    group: Option<(GroupId, u64)>,
}

impl HighVariable {
    fn singleton(vn: Varnode, func: &Funcdata) -> Self {
        let mut cover = Cover::new();
        cover.rebuild_from_varnode(vn, func);
        HighVariable { instances: vec![vn], cover, group: None }
    }

    pub fn instances(&self) -> &[Varnode] {
        &self.instances
    }

    pub fn cover(&self) -> &Cover {
        &self.cover
    }

    pub fn group(&self) -> Option<(GroupId, u64)> {
        self.group
    }

    /// §3's "representative instance": the first-created Varnode, used
    /// wherever a single canonical address/size is needed (the group
    /// offset base, the `<high>` encoder's `repname`).
    pub fn representative(&self) -> Varnode {
        self.instances[0]
    }

    pub fn size(&self, func: &Funcdata) -> u32 {
        func.varnodes().get(self.representative()).size()
    }

    /// Is every instance a "proto-partial" (a CONCAT-tree leaf, never
    /// itself read as the whole aggregate)? `groupPartials` requires this
    /// before admitting a `HighVariable` into a `VariableGroup`.
    pub fn is_single_instance_proto_partial(&self, func: &Funcdata) -> bool {
        self.instances.len() == 1
            && func
                .varnodes()
                .get(self.representative())
                .flags()
                .contains(pcode_ir::VarnodeFlags::PROTO_PARTIAL)
    }
}

/// Owns every `HighVariable` and `VariableGroup` for one function, plus
/// the reverse Varnode→HighVariable index Merge's tests all key off.
pub struct HighSet {
    highs: PrimaryMap<HighId, HighVariable>,
    groups: PrimaryMap<GroupId, VariableGroup>,
    owner: SecondaryMap<Varnode, Option<HighId>>,
}

impl HighSet {
    pub fn new() -> Self {
        HighSet { highs: PrimaryMap::new(), groups: PrimaryMap::new(), owner: SecondaryMap::new() }
    }

    /// Seed one singleton `HighVariable` per written or input Varnode in
    /// the function, each covering exactly its own def-to-use range. Every
    /// later merge step only ever coarsens this partition.
    pub fn seed_singletons(&mut self, func: &Funcdata) {
        let vns: Vec<Varnode> = func
            .varnodes()
            .iter()
            .filter(|(_, data)| !data.is_free())
            .map(|(vn, _)| vn)
            .collect();
        for vn in vns {
            let high = self.highs.push(HighVariable::singleton(vn, func));
            self.owner[vn] = Some(high);
        }
    }

    /// Seed a singleton `HighVariable` for one Varnode created after the
    /// initial `seed_singletons` sweep (e.g. a trim `COPY` `mergeMarker`
    /// inserts mid-pass), without disturbing any existing owner.
    pub fn seed_one(&mut self, vn: Varnode, func: &Funcdata) -> HighId {
        let high = self.highs.push(HighVariable::singleton(vn, func));
        self.owner[vn] = Some(high);
        high
    }

    pub fn high_of(&self, vn: Varnode) -> Option<HighId> {
        self.owner[vn]
    }

    pub fn get(&self, id: HighId) -> &HighVariable {
        &self.highs[id]
    }

    pub fn group(&self, id: GroupId) -> &VariableGroup {
        &self.groups[id]
    }

    pub fn len(&self) -> usize {
        self.highs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (HighId, &HighVariable)> {
        self.highs.iter()
    }

    /// Absorb `absorb` into `keep`: union their covers and instance lists,
    /// retarget every absorbed Varnode's owner, and drop `absorb`'s slot to
    /// an unreachable singleton (its `HighId` becomes a dangling alias —
    /// callers must stop using it, matching `pcode-ir`'s own
    /// dead-but-not-yet-removed-op convention for `remove_op`).
    pub fn merge_into(&mut self, keep: HighId, absorb: HighId, func: &Funcdata) {
        if keep == absorb {
            return;
        }
        let absorbed_instances = self.highs[absorb].instances.clone();
        for &vn in &absorbed_instances {
            self.owner[vn] = Some(keep);
            let mut single = Cover::new();
            single.rebuild_from_varnode(vn, func);
            for block in single.blocks().collect::<Vec<_>>() {
                if let Some(cb) = single.get(block) {
                    let merged = merge_cover_block(&self.highs[keep].cover, block, *cb, func);
                    self.highs[keep].cover.set(block, merged);
                }
            }
        }
        self.highs[keep].instances.extend(absorbed_instances);
        self.highs[absorb].instances.clear();
    }

    /// Form (or extend) a `VariableGroup` containing `a` at offset 0 and
    /// `b` at `offset` (§4.4 step 3's `HighVariable.groupWith`).
    pub fn group_with(&mut self, a: HighId, b: HighId, offset: u64) -> GroupId {
        if let Some((g, _)) = self.highs[a].group {
            self.groups[g].add(b, offset);
            self.highs[b].group = Some((g, offset));
            return g;
        }
        let mut group = VariableGroup::default();
        group.add(a, 0);
        group.add(b, offset);
        let g = self.groups.push(group);
        self.highs[a].group = Some((g, 0));
        self.highs[b].group = Some((g, offset));
        g
    }
}

impl Default for HighSet {
    fn default() -> Self {
        HighSet::new()
    }
}

fn merge_cover_block(cover: &Cover, block: pcode_ir::Block, addition: pcode_cover::CoverBlock, func: &Funcdata) -> pcode_cover::CoverBlock {
    match cover.get(block) {
        Some(existing) => existing.merge(&addition, func),
        None => addition,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcode_ir::testing::FuncdataBuilder;
    use pcode_ir::Opcode;

    #[test]
    fn seed_singletons_creates_one_high_per_written_varnode() {
        let mut b = FuncdataBuilder::new("f");
        let blk = b.block();
        let op0 = b.op(blk, Opcode::Copy, 0);
        let vn = b.output(op0, 0, 4);
        let func = b.finish();

        let mut set = HighSet::new();
        set.seed_singletons(&func);
        assert_eq!(set.len(), 1);
        assert_eq!(set.high_of(vn).map(|h| set.get(h).instances().to_vec()), Some(vec![vn]));
    }

    #[test]
    fn merge_into_combines_instances() {
        let mut b = FuncdataBuilder::new("f");
        let blk = b.block();
        let op0 = b.op(blk, Opcode::Copy, 0);
        let vn0 = b.output(op0, 0, 4);
        let op1 = b.op(blk, Opcode::Copy, 4);
        let vn1 = b.output(op1, 100, 4);
        let func = b.finish();

        let mut set = HighSet::new();
        set.seed_singletons(&func);
        let h0 = set.high_of(vn0).unwrap();
        let h1 = set.high_of(vn1).unwrap();
        set.merge_into(h0, h1, &func);
        assert_eq!(set.get(h0).instances().len(), 2);
        assert_eq!(set.high_of(vn1), Some(h0));
    }
}
