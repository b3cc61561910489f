//! `PcodeOp`: one low-level IR instruction.

use crate::address::Address;
use crate::block::Block;
use crate::opcode::Opcode;
use crate::varnode::Varnode;
use pcode_entity::{entity_impl, EntityRef};
use smallvec::SmallVec;

/// A reference to a `PcodeOp`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PcodeOp(u32);
entity_impl!(PcodeOp, "op");

crate::bitflags_like! {
    /// Per-`PcodeOp` flags, per §3.
    pub struct PcodeOpFlags: u32 {
        const DEAD = 1 << 0;
        const MARK = 1 << 1;
        const CALL = 1 << 2;
        /// Set on `MULTIEQUAL`/`INDIRECT` (the two §3 "marker" ops).
        const MARKER = 1 << 3;
        const BOOLEAN_FLIP = 1 << 4;
        const INDIRECT_STORE = 1 << 5;
        const INDIRECT_CREATION = 1 << 6;
        const SPACEBASE_PTR = 1 << 7;
        const NO_COLLAPSE = 1 << 8;
        const NON_PRINTING = 1 << 9;
        const RETURN_COPY = 1 << 10;
        const PARTIAL_ROOT = 1 << 11;
    }
}

/// Most p-code ops have 0-3 inputs; `SmallVec` avoids a heap allocation for
/// the common case the way `cranelift-codegen`'s instruction data does for
/// its argument lists.
pub type Inputs = SmallVec<[Varnode; 3]>;

/// The data carried by one `PcodeOp`.
#[derive(Clone, Debug)]
pub struct PcodeOpData {
    opcode: Opcode,
    address: Address,
    /// Monotonic order within `parent`; §3's "seq-order is monotonic".
    seq: u32,
    parent: Block,
    inputs: Inputs,
    output: Option<Varnode>,
    flags: PcodeOpFlags,
}

impl PcodeOpData {
    pub(crate) fn new(opcode: Opcode, address: Address, seq: u32, parent: Block) -> Self {
        let mut flags = PcodeOpFlags::empty();
        if opcode.is_marker() {
            flags.insert(PcodeOpFlags::MARKER);
        }
        if opcode.is_call() {
            flags.insert(PcodeOpFlags::CALL);
        }
        PcodeOpData {
            opcode,
            address,
            seq,
            parent,
            inputs: SmallVec::new(),
            output: None,
            flags,
        }
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Rewrite this op's opcode in place, keeping its inputs/output/address
    /// intact. Used by §7's thunk-demotion ("a `JumptableThunkError`
    /// converts the `BRANCHIND` to a tail call") rather than removing and
    /// re-creating the op.
    pub fn set_opcode(&mut self, opcode: Opcode) {
        self.opcode = opcode;
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub(crate) fn set_seq(&mut self, seq: u32) {
        self.seq = seq;
    }

    pub fn parent(&self) -> Block {
        self.parent
    }

    pub(crate) fn set_parent(&mut self, block: Block) {
        self.parent = block;
    }

    pub fn inputs(&self) -> &[Varnode] {
        &self.inputs
    }

    pub(crate) fn push_input(&mut self, vn: Varnode) {
        self.inputs.push(vn);
    }

    pub(crate) fn set_input(&mut self, i: usize, vn: Varnode) {
        self.inputs[i] = vn;
    }

    pub(crate) fn remove_input(&mut self, i: usize) -> Varnode {
        self.inputs.remove(i)
    }

    pub fn output(&self) -> Option<Varnode> {
        self.output
    }

    pub(crate) fn set_output(&mut self, vn: Option<Varnode>) {
        self.output = vn;
    }

    pub fn flags(&self) -> PcodeOpFlags {
        self.flags
    }

    pub fn set_flags(&mut self, f: PcodeOpFlags) {
        self.flags.insert(f);
    }

    pub fn clear_flags(&mut self, f: PcodeOpFlags) {
        self.flags.remove(f);
    }

    pub fn is_dead(&self) -> bool {
        self.flags.contains(PcodeOpFlags::DEAD)
    }

    pub fn is_marker(&self) -> bool {
        self.flags.contains(PcodeOpFlags::MARKER)
    }

    pub fn is_call(&self) -> bool {
        self.flags.contains(PcodeOpFlags::CALL)
    }

    /// Evaluate this op's output given concrete input values, used by
    /// `CircleRange::pull_back`/`push_forward` (§4.3) and by
    /// `EmulateFunction`. Delegates to `Opcode::eval_binary` so callers that
    /// only have an opcode in hand (no live `PcodeOpData`, e.g. `CircleRange`
    /// operating on a detached op description) can fold the same way.
    pub fn eval_binary(&self, a: u64, b: u64, mask: u64) -> Option<u64> {
        self.opcode.eval_binary(a, b, mask)
    }

    pub fn eval_unary(&self, a: u64, in_mask: u64, out_mask: u64) -> Option<u64> {
        self.opcode.eval_unary(a, in_mask, out_mask)
    }

    /// Reverse of `eval_binary` for the "other" constant operand: given the
    /// op, the known constant operand and its position, and the desired
    /// output value, recover the input that would produce it. Used by
    /// §4.3.1 step 9's `PcodeOp.recoverInputBinary`.
    pub fn recover_input_binary(&self, const_is_second: bool, constant: u64, output: u64, mask: u64) -> Option<u64> {
        self.opcode.recover_input_binary(const_is_second, constant, output, mask)
    }

    /// Reverse of `eval_unary`, for `PcodeOp.recoverInputUnary`.
    pub fn recover_input_unary(&self, output: u64, in_mask: u64) -> Option<u64> {
        self.opcode.recover_input_unary(output, in_mask)
    }
}
