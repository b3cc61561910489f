//! `Funcdata`: the per-function IR container that Heritage, jump-table
//! recovery and Merge all mutate in place, plus `Architecture`, the
//! caller-supplied configuration §6 says replaces a CLI/config file.

use crate::address::{AddrSpace, Address, SpaceId};
use crate::block::{Block, Cfg};
use crate::error::Warning;
use crate::opcode::Opcode;
use crate::pcodeop::{PcodeOp, PcodeOpData, PcodeOpFlags};
use crate::varnode::{Varnode, VarnodeBank, VarnodeFlags};
use pcode_entity::{EntityRef, PrimaryMap};
use std::fmt;

/// Target-level knobs that have no per-space home: the maximum jump-table
/// size §4.3.1 step 5 checks, and the function-pointer alignment mask
/// §4.3.1 step 6 applies to every recovered destination.
#[derive(Clone, Debug)]
pub struct Architecture {
    pub max_jumptable_size: u64,
    pub funcptr_align: u64,
}

impl Default for Architecture {
    fn default() -> Self {
        Architecture {
            max_jumptable_size: 1024,
            funcptr_align: 1,
        }
    }
}

/// The function-level IR: address spaces, the Varnode/PcodeOp arenas, the
/// control-flow graph, and the bookkeeping Heritage needs to know when to
/// re-enter (§5's "restart-pending flag").
pub struct Funcdata {
    name: String,
    spaces: PrimaryMap<SpaceId, AddrSpace>,
    varnodes: VarnodeBank,
    ops: PrimaryMap<PcodeOp, PcodeOpData>,
    cfg: Cfg,
    arch: Architecture,
    warnings: Vec<Warning>,
    /// §4.2.6 / §5: set by Heritage when a dead-code pass collided with a
    /// still-partial range; the driver must re-enter analysis from scratch.
    restart_pending: bool,
}

impl Funcdata {
    pub fn new(name: impl Into<String>, arch: Architecture) -> Self {
        Funcdata {
            name: name.into(),
            spaces: PrimaryMap::new(),
            varnodes: VarnodeBank::new(),
            ops: PrimaryMap::new(),
            cfg: Cfg::new(),
            arch,
            warnings: Vec::new(),
            restart_pending: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arch(&self) -> &Architecture {
        &self.arch
    }

    // -- address spaces --------------------------------------------------

    pub fn add_space(&mut self, space: AddrSpace) -> SpaceId {
        self.spaces.push(space)
    }

    pub fn space(&self, id: SpaceId) -> &AddrSpace {
        &self.spaces[id]
    }

    pub fn space_mut(&mut self, id: SpaceId) -> &mut AddrSpace {
        &mut self.spaces[id]
    }

    pub fn spaces(&self) -> impl Iterator<Item = SpaceId> + '_ {
        self.spaces.keys()
    }

    // -- varnodes ---------------------------------------------------------

    pub fn varnodes(&self) -> &VarnodeBank {
        &self.varnodes
    }

    pub fn varnodes_mut(&mut self) -> &mut VarnodeBank {
        &mut self.varnodes
    }

    pub fn new_varnode(&mut self, address: Address, size: u32) -> Varnode {
        self.varnodes.create(address, size)
    }

    /// Create a function-input Varnode: free of any defining op, flagged
    /// `INPUT`.
    pub fn new_input(&mut self, address: Address, size: u32) -> Varnode {
        let vn = self.varnodes.create(address, size);
        self.varnodes.get_mut(vn).set_flags(VarnodeFlags::INPUT);
        vn
    }

    /// Create a constant Varnode, flagged `CONSTANT`, whose value is `value`
    /// carried as `space`'s address offset — the usual p-code convention for
    /// literal operands. Used by `foldInGuards` (§4.3.1 step 10) to rewrite a
    /// now-provably-always-taken `CBRANCH`'s condition to a literal.
    pub fn new_constant(&mut self, space: SpaceId, value: u64, size: u32) -> Varnode {
        let vn = self.varnodes.create(Address::new(space, value), size);
        self.varnodes.get_mut(vn).set_flags(VarnodeFlags::CONSTANT);
        vn
    }

    // -- control flow -------------------------------------------------------

    pub fn cfg(&self) -> &Cfg {
        &self.cfg
    }

    pub fn cfg_mut(&mut self) -> &mut Cfg {
        &mut self.cfg
    }

    pub fn new_block(&mut self) -> Block {
        self.cfg.add_block()
    }

    // -- pcode ops ----------------------------------------------------------

    pub fn op(&self, op: PcodeOp) -> &PcodeOpData {
        &self.ops[op]
    }

    pub fn op_mut(&mut self, op: PcodeOp) -> &mut PcodeOpData {
        &mut self.ops[op]
    }

    /// Append a new op to the end of `block`, with a freshly assigned
    /// input list and no output.
    pub fn append_op(&mut self, block: Block, opcode: Opcode, address: Address) -> PcodeOp {
        let seq = self.cfg.block(block).ops().len() as u32;
        let data = PcodeOpData::new(opcode, address, seq, block);
        let op = self.ops.push(data);
        self.cfg.block_mut(block).push_op(op);
        op
    }

    /// Insert `op` immediately before `before` in `before`'s block. Used
    /// for `INDIRECT` insertion (§3's "INDIRECT ops immediately precede the
    /// op they shadow") and for guard/refinement SUBPIECE/PIECE insertion.
    pub fn insert_op_before(&mut self, before: PcodeOp, opcode: Opcode, address: Address) -> PcodeOp {
        let block = self.ops[before].parent();
        let pos = self
            .cfg
            .block(block)
            .position_of(before)
            .expect("before must already be laid out in its block");
        let data = PcodeOpData::new(opcode, address, 0, block);
        let op = self.ops.push(data);
        self.cfg.block_mut(block).insert_op_at(pos, op);
        self.renumber_block(block);
        op
    }

    /// Insert a `MULTIEQUAL` at the front of `block`'s op list, per §3's
    /// "MULTIEQUAL ops are the first ops of the block".
    pub fn prepend_multiequal(&mut self, block: Block, address: Address) -> PcodeOp {
        let data = PcodeOpData::new(Opcode::MultiEqual, address, 0, block);
        let op = self.ops.push(data);
        self.cfg.block_mut(block).insert_op_at(0, op);
        self.renumber_block(block);
        op
    }

    fn renumber_block(&mut self, block: Block) {
        let ops: Vec<PcodeOp> = self.cfg.block(block).ops().to_vec();
        for (i, op) in ops.into_iter().enumerate() {
            self.ops[op].set_seq(i as u32);
        }
    }

    /// Append `vn` to `op`'s input list, keeping `vn`'s descend list in
    /// lockstep (§8 invariant 2).
    pub fn append_input(&mut self, op: PcodeOp, vn: Varnode) {
        self.ops[op].push_input(vn);
        self.varnodes.get_mut(vn).add_descend(op);
    }

    /// Replace the `i`-th input of `op` with `vn`, updating both Varnodes'
    /// descend lists.
    pub fn set_input(&mut self, op: PcodeOp, i: usize, vn: Varnode) {
        let old = self.ops[op].inputs()[i];
        if old != vn {
            self.varnodes.get_mut(old).remove_descend(op);
            self.varnodes.get_mut(vn).add_descend(op);
        }
        self.ops[op].set_input(i, vn);
    }

    /// Set `op`'s output to a newly created Varnode at `address` / `size`,
    /// returning it.
    pub fn set_output_new(&mut self, op: PcodeOp, address: Address, size: u32) -> Varnode {
        let vn = self.varnodes.create(address, size);
        self.varnodes.get_mut(vn).set_def(op);
        self.ops[op].set_output(Some(vn));
        vn
    }

    /// Mark `op` dead and sever every input/output link, per §5's
    /// ownership rule ("moving or deleting a PcodeOp must first sever all
    /// input/output Varnode links").
    pub fn remove_op(&mut self, op: PcodeOp) {
        let inputs: Vec<Varnode> = self.ops[op].inputs().to_vec();
        for vn in inputs {
            self.varnodes.get_mut(vn).remove_descend(op);
        }
        if let Some(out) = self.ops[op].output() {
            // The output Varnode becomes free; callers that want to keep it
            // alive must have already redirected its readers.
            self.varnodes.get_mut(out).clear_flags(VarnodeFlags::WRITTEN);
        }
        self.ops[op].set_flags(PcodeOpFlags::DEAD);
        let block = self.ops[op].parent();
        self.cfg.block_mut(block).remove_op(op);
    }

    // -- warnings / restart --------------------------------------------------

    pub fn add_warning(&mut self, w: Warning) {
        log::warn!("{}: {}", self.name, w.message());
        self.warnings.push(w);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn request_restart(&mut self) {
        self.restart_pending = true;
    }

    pub fn take_restart_pending(&mut self) -> bool {
        std::mem::replace(&mut self.restart_pending, false)
    }
}

impl fmt::Display for Funcdata {
    /// A `.clif`-adjacent textual dump, used by tests and `log::trace!`
    /// during heritage passes. Not the out-of-scope structured-source
    /// pretty-printer — purely a debugging aid.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "function {} {{", self.name)?;
        for block in self.cfg.blocks() {
            writeln!(f, "{}:", block)?;
            for &op in self.cfg.block(block).ops() {
                let data = &self.ops[op];
                if let Some(out) = data.output() {
                    write!(f, "    {} = {}", out, data.opcode())?;
                } else {
                    write!(f, "    {}", data.opcode())?;
                }
                for (i, input) in data.inputs().iter().enumerate() {
                    write!(f, "{}{}", if i == 0 { " " } else { ", " }, input)?;
                }
                writeln!(f)?;
            }
        }
        writeln!(f, "}}")
    }
}

#[cfg(feature = "testing_hooks")]
pub mod testing {
    //! A small `FuncdataBuilder`, modeled on `cranelift_frontend::FunctionBuilder`,
    //! so tests can construct fixtures without hand-writing arena bookkeeping.

    use super::*;
    use crate::address::{Endianness, SpaceType};

    pub struct FuncdataBuilder {
        func: Funcdata,
        default_space: SpaceId,
    }

    impl FuncdataBuilder {
        pub fn new(name: impl Into<String>) -> Self {
            let mut func = Funcdata::new(name, Architecture::default());
            let default_space = func.add_space(AddrSpace::new(
                SpaceId::new(0),
                "ram",
                1,
                Endianness::Little,
                SpaceType::Other,
                0,
                0,
                u32::MAX as u64,
            ));
            FuncdataBuilder { func, default_space }
        }

        pub fn default_space(&self) -> SpaceId {
            self.default_space
        }

        pub fn addr(&self, offset: u64) -> Address {
            Address::new(self.default_space, offset)
        }

        pub fn block(&mut self) -> Block {
            self.func.new_block()
        }

        pub fn edge(&mut self, from: Block, to: Block) {
            self.func.cfg_mut().add_edge(from, to);
        }

        pub fn op(&mut self, block: Block, opcode: Opcode, addr: u64) -> PcodeOp {
            self.func.append_op(block, opcode, self.addr(addr))
        }

        pub fn input(&mut self, op: PcodeOp, vn: Varnode) {
            self.func.append_input(op, vn);
        }

        pub fn output(&mut self, op: PcodeOp, addr: u64, size: u32) -> Varnode {
            self.func.set_output_new(op, self.addr(addr), size)
        }

        pub fn varnode(&mut self, addr: u64, size: u32) -> Varnode {
            let a = self.addr(addr);
            self.func.new_varnode(a, size)
        }

        pub fn finish(self) -> Funcdata {
            self.func
        }
    }
}
