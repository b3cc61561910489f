//! `FunctionAnalysis`: the §2 data-flow pipeline in one driver — Heritage
//! settles the function's SSA form, JumpTable recovery fires on every
//! indirect branch it finds (possibly rewriting control flow), Heritage
//! re-settles the result, and Merge forms the final `HighVariable`
//! partition.

use pcode_heritage::{FuncProtoLookup, Heritage};
use pcode_ir::{Block, Funcdata, Opcode, PcodeOp};
use pcode_jumptable::{Basic2Model, BasicModel, JumpModel, JumpTable, LoadImage, TrivialModel};
use pcode_merge::{HighSet, Merge, SymbolLookup};

/// §4.3.6's model order minus Assisted/Override, which only apply when a
/// caller recognizes a particular BRANCHIND's shape in advance: Basic,
/// Basic2 (wrapping a fresh Basic), then the Trivial labelling fallback.
pub fn default_jump_models(parent: Block) -> Vec<Box<dyn JumpModel>> {
    vec![Box::new(BasicModel::new()), Box::new(Basic2Model::new(BasicModel::new(), None)), Box::new(TrivialModel::new(parent))]
}

/// Drives Heritage, JumpTable recovery, and Merge over one function.
pub struct FunctionAnalysis {
    heritage: Heritage,
    merge: Merge,
    tables: Vec<JumpTable>,
}

impl FunctionAnalysis {
    pub fn new() -> Self {
        FunctionAnalysis { heritage: Heritage::new(), merge: Merge::new(), tables: Vec::new() }
    }

    pub fn jumptables(&self) -> &[JumpTable] {
        &self.tables
    }

    pub fn highs(&self) -> &HighSet {
        self.merge.highs()
    }

    /// Run the pipeline to a fixed point: Heritage loops on its own
    /// restart-pending flag (§5), jump tables recover and may rewrite
    /// control flow, Heritage loops again over the rewritten function, and
    /// Merge runs once over the settled result.
    pub fn run(&mut self, func: &mut Funcdata, protos: &dyn FuncProtoLookup, image: Option<&dyn LoadImage>, symbols: &dyn SymbolLookup) {
        self.run_heritage_to_fixpoint(func, protos);
        self.recover_all_jumptables(func, image);
        self.run_heritage_to_fixpoint(func, protos);
        self.merge.run(func, symbols);
    }

    fn run_heritage_to_fixpoint(&mut self, func: &mut Funcdata, protos: &dyn FuncProtoLookup) {
        loop {
            self.heritage.heritage(func, protos);
            if !func.take_restart_pending() {
                break;
            }
        }
    }

    /// Recover every `BRANCHIND` in the function with the default model
    /// candidates, in whatever block order the CFG iterates them. A caller
    /// that recognizes a jump-assist or has user-supplied addresses for a
    /// particular indirect branch should build its own `JumpTable` with
    /// `Assisted`/`OverrideModel` candidates instead of relying on this pass.
    fn recover_all_jumptables(&mut self, func: &mut Funcdata, image: Option<&dyn LoadImage>) {
        let indops: Vec<PcodeOp> = func.cfg().blocks().flat_map(|b| func.cfg().block(b).ops().to_vec()).filter(|&op| func.op(op).opcode() == Opcode::BranchInd).collect();
        for indop in indops {
            let parent = func.op(indop).parent();
            let mut table = JumpTable::new(indop);
            let candidates = default_jump_models(parent);
            if let Err(e) = table.recover_addresses(func, image, candidates) {
                if e.is_thunk() {
                    // §7: a one-entry table that looks like a thunk is fatal
                    // to recovery but not to the function — demote the
                    // BRANCHIND to an indirect tail call instead of leaving
                    // it as an un-recovered indirect branch.
                    log::debug!("jumptable at {:?} looks like a thunk ({}); demoting BRANCHIND to a tail call", func.op(indop).address(), e);
                    func.op_mut(indop).set_opcode(Opcode::CallInd);
                } else {
                    log::debug!("jumptable recovery abandoned at {:?}: {}", func.op(indop).address(), e);
                }
                continue;
            }
            if table.recover_labels(func).is_err() {
                continue;
            }
            table.fold_in_normalization(func);
            self.tables.push(table);
        }
    }
}

impl Default for FunctionAnalysis {
    fn default() -> Self {
        FunctionAnalysis::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcode_heritage::CallEffect;
    use pcode_ir::testing::FuncdataBuilder;
    use pcode_ir::{Address, VarnodeFlags};
    use pcode_merge::NoSymbols;

    struct NoEffect;
    impl FuncProtoLookup for NoEffect {
        fn effect(&self, _addr: Address, _size: u64) -> CallEffect {
            CallEffect::Unaffected
        }
        fn return_storage(&self) -> Option<(Address, u64)> {
            None
        }
    }

    /// A diamond write/read settles through Heritage, then both
    /// definitions' outputs land in the same `HighVariable` after Merge,
    /// matching the shared stack slot they both write.
    #[test]
    fn full_pipeline_settles_diamond_write_into_one_high() {
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
        let vl = b.output(def_l, 0x100, 4);
        let def_r = b.op(right, Opcode::Copy, 0);
        let vr = b.output(def_r, 0x100, 4);
        let read_vn = b.varnode(0x100, 4);
        let use_op = b.op(join, Opcode::Copy, 0);
        b.input(use_op, read_vn);

        let mut func = b.finish();
        func.varnodes_mut().get_mut(vl).set_flags(VarnodeFlags::ADDR_TIED);
        func.varnodes_mut().get_mut(vr).set_flags(VarnodeFlags::ADDR_TIED);
        func.cfg_mut().build_dominator_tree();

        let mut analysis = FunctionAnalysis::new();
        analysis.run(&mut func, &NoEffect, None, &NoSymbols);

        let h_l = analysis.highs().high_of(vl);
        let h_r = analysis.highs().high_of(vr);
        assert!(h_l.is_some());
        assert_eq!(h_l, h_r);
    }

    #[test]
    fn branchind_with_no_successors_produces_no_jumptable() {
        let mut b = FuncdataBuilder::new("f");
        let blk = b.block();
        b.op(blk, Opcode::BranchInd, 0);
        let mut func = b.finish();
        func.cfg_mut().build_dominator_tree();

        let mut analysis = FunctionAnalysis::new();
        analysis.run(&mut func, &NoEffect, None, &NoSymbols);
        assert!(analysis.jumptables().is_empty());
    }
}
