//! §4.2.3 / §4.2.5: call/return/store/load guarding and the `LoadGuard` /
//! `StoreGuard` records the indexed-stack-pointer analysis installs.

use pcode_ir::{Address, Funcdata, Opcode, PcodeOp, PcodeOpFlags, SpaceId, Varnode, VarnodeFlags};
use std::collections::HashSet;

/// How far along the value-set solver a guard's `[min, max]` range is.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum GuardState {
    Unfinished,
    Partial,
    Final,
}

/// A record bounding the stack addresses a dynamically-indexed LOAD may
/// alias, installed by the indexed-stack-pointer DFS of §4.2.5.
#[derive(Clone, Debug)]
pub struct LoadGuard {
    pub op: PcodeOp,
    pub space: SpaceId,
    pub pointer_base: Address,
    pub min: u64,
    pub max: u64,
    pub step: u64,
    pub state: GuardState,
}

/// The STORE-side counterpart of `LoadGuard`.
#[derive(Clone, Debug)]
pub struct StoreGuard {
    pub op: PcodeOp,
    pub space: SpaceId,
    pub pointer_base: Address,
    pub min: u64,
    pub max: u64,
    pub step: u64,
    pub state: GuardState,
}

impl LoadGuard {
    pub fn new(op: PcodeOp, space: SpaceId, pointer_base: Address) -> Self {
        LoadGuard {
            op,
            space,
            pointer_base,
            min: pointer_base.offset(),
            max: pointer_base.offset(),
            step: 1,
            state: GuardState::Unfinished,
        }
    }

    /// A fast, partial range refinement pass (the "null widener" of
    /// §4.2.5): tightens `[min, max]` using only the op's immediate
    /// constant operands, without iterating to a fixpoint.
    pub fn establish_range(&mut self, observed_min: u64, observed_max: u64) {
        self.min = self.min.min(observed_min);
        self.max = self.max.max(observed_max);
        self.state = GuardState::Partial;
    }

    /// The full-widener fallback of §4.2.5: if the range is small and
    /// right-stable, it's returned as-is; otherwise cap at a 0x1000 window
    /// above the pointer base.
    pub fn finalize_range(&mut self) {
        const STABLE_WINDOW: u64 = 0x1000;
        if self.max - self.min > STABLE_WINDOW {
            self.max = self.pointer_base.offset() + STABLE_WINDOW;
        }
        self.state = GuardState::Final;
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.min && offset <= self.max
    }
}

impl StoreGuard {
    pub fn new(op: PcodeOp, space: SpaceId, pointer_base: Address) -> Self {
        StoreGuard {
            op,
            space,
            pointer_base,
            min: pointer_base.offset(),
            max: pointer_base.offset(),
            step: 1,
            state: GuardState::Unfinished,
        }
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.min && offset <= self.max
    }
}

fn generate_load_guard(op: PcodeOp, space: SpaceId, pointer_base: Address) -> LoadGuard {
    LoadGuard::new(op, space, pointer_base)
}

fn generate_store_guard(op: PcodeOp, space: SpaceId, pointer_base: Address) -> StoreGuard {
    StoreGuard::new(op, space, pointer_base)
}

/// §4.2.5's "traversal bitmask": what the DFS has seen on the way to the
/// current node. A LOAD/STORE reached with either bit set needs a guard; a
/// pure constant-offset access (neither bit set) doesn't.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
struct Traversal(u8);

impl Traversal {
    const NON_CONSTANT_INDEX: u8 = 1 << 0;
    const MULTIEQUAL: u8 = 1 << 1;

    fn is_indexed(self) -> bool {
        self.0 != 0
    }

    fn with(self, bit: u8) -> Self {
        Traversal(self.0 | bit)
    }
}

/// §4.2.5: DFS forward from the function's stack-pointer input (the Varnode
/// flagged both `INPUT` and `SPACEBASE`) through `COPY`, `INDIRECT`,
/// `INT_ADD`, `SEGMENTOP`, `MULTIEQUAL`. A `LOAD`/`STORE` reached with a
/// non-trivial traversal gets a guard installed and its op marked
/// `SPACEBASE_PTR`; as in `emulate.rs`'s `LOAD` handling, the pointer
/// operand is taken to be the op's last input. `INT_ADD`'s non-pointer
/// operand advances the per-node offset when it's a compile-time constant,
/// and sets `NON_CONSTANT_INDEX` otherwise.
pub fn discover_indexed_stack_pointers(func: &mut Funcdata, stack_space: SpaceId) -> (Vec<LoadGuard>, Vec<StoreGuard>) {
    let mut loads = Vec::new();
    let mut stores = Vec::new();
    let mut visited: HashSet<Varnode> = HashSet::new();

    let seeds: Vec<Varnode> = func
        .varnodes()
        .iter()
        .filter(|(_, data)| data.flags().contains(VarnodeFlags::INPUT | VarnodeFlags::SPACEBASE))
        .map(|(vn, _)| vn)
        .collect();

    let mut stack: Vec<(Varnode, u64, Traversal)> = seeds.into_iter().map(|vn| (vn, 0, Traversal::default())).collect();
    while let Some((vn, offset, traversal)) = stack.pop() {
        if !visited.insert(vn) {
            continue;
        }
        let descend: Vec<PcodeOp> = func.varnodes().get(vn).descend().to_vec();
        for op in descend {
            let opcode = func.op(op).opcode();
            let inputs = func.op(op).inputs().to_vec();
            match opcode {
                Opcode::Copy | Opcode::Indirect => {
                    if let Some(out) = func.op(op).output() {
                        stack.push((out, offset, traversal));
                    }
                }
                Opcode::SegmentOp => {
                    if let Some(out) = func.op(op).output() {
                        stack.push((out, offset, traversal.with(Traversal::NON_CONSTANT_INDEX)));
                    }
                }
                Opcode::IntAdd => {
                    let Some(out) = func.op(op).output() else { continue };
                    let other = inputs.iter().find(|&&i| i != vn).copied();
                    match other {
                        Some(o) if func.varnodes().get(o).is_constant() => {
                            let delta = func.varnodes().get(o).address().offset();
                            stack.push((out, offset.wrapping_add(delta), traversal));
                        }
                        _ => stack.push((out, offset, traversal.with(Traversal::NON_CONSTANT_INDEX))),
                    }
                }
                Opcode::MultiEqual => {
                    if let Some(out) = func.op(op).output() {
                        stack.push((out, offset, traversal.with(Traversal::MULTIEQUAL)));
                    }
                }
                Opcode::Load if traversal.is_indexed() && inputs.last() == Some(&vn) => {
                    func.op_mut(op).set_flags(PcodeOpFlags::SPACEBASE_PTR);
                    let mut guard = generate_load_guard(op, stack_space, Address::new(stack_space, offset));
                    guard.establish_range(offset, offset);
                    guard.finalize_range();
                    loads.push(guard);
                }
                Opcode::Store if traversal.is_indexed() && inputs.last() == Some(&vn) => {
                    func.op_mut(op).set_flags(PcodeOpFlags::SPACEBASE_PTR);
                    let guard = generate_store_guard(op, stack_space, Address::new(stack_space, offset));
                    stores.push(guard);
                }
                _ => {}
            }
        }
    }
    (loads, stores)
}

/// The effect an unresolved CALL has on one address range, per §4.2.3.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CallEffect {
    Unaffected,
    KilledByCall,
    UnknownEffect,
    ReturnAddress,
}

/// The minimal callee-side information Heritage needs to compute
/// `CallEffect` for a range, queried from the out-of-scope prototype/symbol
/// subsystem via this trait (§6: "only the query interface they expose is
/// specified").
pub trait FuncProtoLookup {
    /// The effect the callee has on `[addr, addr+size)`, if known.
    fn effect(&self, addr: Address, size: u64) -> CallEffect;

    /// Does the callee return a value occupying `[addr, addr+size)`
    /// (wholly, partially, or as a superset)?
    fn return_storage(&self) -> Option<(Address, u64)>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcode_entity::EntityRef;
    use pcode_ir::testing::FuncdataBuilder;

    #[test]
    fn discover_indexed_stack_pointers_guards_a_non_constant_indexed_load() {
        let mut b = FuncdataBuilder::new("f");
        let blk = b.block();
        let space = b.default_space();
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

        let (loads, stores) = discover_indexed_stack_pointers(&mut func, space);
        assert!(stores.is_empty());
        assert_eq!(loads.len(), 1);
        assert_eq!(loads[0].op, load_op);
        assert_eq!(loads[0].state, GuardState::Final);
        assert!(func.op(load_op).flags().contains(PcodeOpFlags::SPACEBASE_PTR));
    }

    #[test]
    fn discover_indexed_stack_pointers_skips_a_constant_offset_load() {
        let mut b = FuncdataBuilder::new("f");
        let blk = b.block();
        let space = b.default_space();
        let sp = b.varnode(0, 4);
        let eight = b.varnode(8, 4);
        let add_op = b.op(blk, Opcode::IntAdd, 0);
        b.input(add_op, sp);
        b.input(add_op, eight);
        let ptr = b.output(add_op, 0x10, 4);
        let load_op = b.op(blk, Opcode::Load, 0x20);
        b.input(load_op, ptr);
        let mut func = b.finish();
        func.varnodes_mut().get_mut(sp).set_flags(VarnodeFlags::INPUT | VarnodeFlags::SPACEBASE);
        func.varnodes_mut().get_mut(eight).set_flags(VarnodeFlags::CONSTANT);

        let (loads, stores) = discover_indexed_stack_pointers(&mut func, space);
        assert!(loads.is_empty());
        assert!(stores.is_empty());
        assert!(!func.op(load_op).flags().contains(PcodeOpFlags::SPACEBASE_PTR));
    }

    #[test]
    fn load_guard_finalize_caps_unstable_ranges() {
        let op = PcodeOp::new(0);
        let base = Address::new(SpaceId::new(0), 0x1000);
        let mut guard = LoadGuard::new(op, SpaceId::new(0), base);
        guard.establish_range(0x1000, 0x20000);
        guard.finalize_range();
        assert_eq!(guard.max, 0x1000 + 0x1000);
        assert_eq!(guard.state, GuardState::Final);
    }
}
