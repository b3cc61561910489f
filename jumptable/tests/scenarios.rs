//! End-to-end coverage of `JumpTable::recover_addresses` driving each
//! model through to a finished table, the same altitude
//! `cranelift_codegen`'s `filetests` exercise a full compile pipeline at
//! rather than one isolated pass.

use pcode_ir::testing::FuncdataBuilder;
use pcode_ir::{Address, LowLevelError, Opcode, SpaceId, VarnodeFlags};
use pcode_jumptable::{AssistedModel, BasicModel, JumpModel, JumpTable, LoadImage};
use std::collections::HashMap;

/// Backs a contiguous run of 8-byte table entries; any other address reads
/// as unmapped.
struct TableImage {
    space: SpaceId,
    entries: HashMap<u64, u64>,
}

impl LoadImage for TableImage {
    fn read(&self, addr: Address, size: u32) -> Option<u64> {
        if addr.space() != self.space || size != 8 {
            return None;
        }
        self.entries.get(&addr.offset()).copied()
    }

    fn is_loadable(&self, addr: Address) -> bool {
        addr.space() == self.space && self.entries.contains_key(&addr.offset())
    }
}

#[test]
fn basic_model_recovers_a_masked_switch_guarded_by_a_bounds_check() {
    let mut b = FuncdataBuilder::new("f");
    let entry = b.block();
    let switchblk = b.block();
    let defaultblk = b.block();
    b.edge(entry, switchblk);
    b.edge(entry, defaultblk);

    let x = b.varnode(0, 4);
    let bound = b.varnode(8, 4);
    let cmp = b.op(entry, Opcode::IntLess, 0);
    b.input(cmp, x);
    b.input(cmp, bound);
    let cond = b.output(cmp, 4, 1);
    let cbranch = b.op(entry, Opcode::CBranch, 8);
    b.input(cbranch, cond);

    let mask = b.varnode(7, 4);
    let and_op = b.op(switchblk, Opcode::IntAnd, 0x10);
    b.input(and_op, x);
    b.input(and_op, mask);
    let masked = b.output(and_op, 0x14, 4);

    let scale = b.varnode(8, 4);
    let mult_op = b.op(switchblk, Opcode::IntMult, 0x18);
    b.input(mult_op, masked);
    b.input(mult_op, scale);
    let offset_vn = b.output(mult_op, 0x1c, 4);

    let base = b.varnode(0x2000, 4);
    let add_op = b.op(switchblk, Opcode::IntAdd, 0x20);
    b.input(add_op, offset_vn);
    b.input(add_op, base);
    let addr_vn = b.output(add_op, 0x24, 4);

    let load_op = b.op(switchblk, Opcode::Load, 0x28);
    b.input(load_op, addr_vn);
    let dest_vn = b.output(load_op, 0x2c, 8);

    let indop = b.op(switchblk, Opcode::BranchInd, 0x30);
    b.input(indop, dest_vn);

    let mut func = b.finish();
    let space = func.varnodes().get(x).address().space();
    for &c in &[bound, mask, scale, base] {
        func.varnodes_mut().get_mut(c).set_flags(VarnodeFlags::CONSTANT);
    }
    func.cfg_mut().build_dominator_tree();

    let image = TableImage { space, entries: (0..8u64).map(|i| (0x2000 + i * 8, 0x1000 + i * 0x10)).collect() };

    let mut table = JumpTable::new(indop);
    let candidates: Vec<Box<dyn JumpModel>> = vec![Box::new(BasicModel::new())];
    table.recover_addresses(&func, Some(&image), candidates).unwrap();

    assert_eq!(table.match_model(), Some("basic"));
    let expect: Vec<Address> = (0..8u64).map(|i| Address::new(space, 0x1000 + i * 0x10)).collect();
    assert_eq!(table.addresses(), expect.as_slice());
    assert_eq!(table.loadtable().len(), 1);
    assert_eq!(table.loadtable()[0].addr, Address::new(space, 0x2000));
    assert_eq!(table.loadtable()[0].size, 8);
    assert_eq!(table.loadtable()[0].num, 8);

    table.recover_labels(&func).unwrap();
    assert_eq!(table.labels(), &[0, 1, 2, 3, 4, 5, 6, 7]);

    table.fold_in_normalization(&mut func);
    assert_eq!(func.op(indop).inputs().first(), Some(&x));
    let rewritten_cond = *func.op(cbranch).inputs().first().unwrap();
    assert_ne!(rewritten_cond, cond);
    assert!(func.varnodes().get(rewritten_cond).is_constant());
    assert_eq!(func.varnodes().get(rewritten_cond).address().offset(), 1);
}

#[test]
fn assisted_model_recovers_an_injected_table_and_folds_away_the_jump_assist_callother() {
    let mut b = FuncdataBuilder::new("f");
    let blk = b.block();
    let sub_id = b.varnode(0, 4);
    let idx = b.varnode(4, 4);
    let userop = b.op(blk, Opcode::CallOther, 0);
    b.input(userop, sub_id);
    b.input(userop, idx);
    let dest_before_fold = b.output(userop, 8, 4);
    let indop = b.op(blk, Opcode::BranchInd, 0xc);
    b.input(indop, dest_before_fold);
    let mut func = b.finish();
    let space = func.varnodes().get(idx).address().space();

    let model = AssistedModel::new(4, Box::new(|i| Some(0x4000 + i)), None, Some(0x5000), space).with_userop(userop);

    let mut table = JumpTable::new(indop);
    let candidates: Vec<Box<dyn JumpModel>> = vec![Box::new(model)];
    table.recover_addresses(&func, None, candidates).unwrap();

    assert_eq!(table.match_model(), Some("assisted"));
    assert_eq!(
        table.addresses(),
        &[
            Address::new(space, 0x4000),
            Address::new(space, 0x4001),
            Address::new(space, 0x4002),
            Address::new(space, 0x4003),
            Address::new(space, 0x5000),
        ]
    );
    assert!(table.loadtable().is_empty());

    table.recover_labels(&func).unwrap();
    assert_eq!(table.labels(), &[0, 1, 2, 3, -1]);

    table.fold_in_normalization(&mut func);
    assert_eq!(func.op(indop).inputs().first(), Some(&idx), "the BRANCHIND must read straight off the jump-assist's raw index");
    assert!(func.op(userop).flags().contains(pcode_ir::PcodeOpFlags::DEAD), "the jump-assist CALLOTHER must be retired once folded");
}

#[test]
fn basic_model_rejects_a_lone_zero_address_as_a_thunk_candidate() {
    let mut b = FuncdataBuilder::new("f");
    let entry = b.block();
    let switchblk = b.block();
    let defaultblk = b.block();
    b.edge(entry, switchblk);
    b.edge(entry, defaultblk);

    let x = b.varnode(0, 4);
    let bound = b.varnode(1, 4);
    let cmp = b.op(entry, Opcode::IntLess, 0);
    b.input(cmp, x);
    b.input(cmp, bound);
    let cond = b.output(cmp, 4, 1);
    let cbranch = b.op(entry, Opcode::CBranch, 8);
    b.input(cbranch, cond);

    let indop = b.op(switchblk, Opcode::BranchInd, 0x10);
    b.input(indop, x);

    let mut func = b.finish();
    func.varnodes_mut().get_mut(bound).set_flags(VarnodeFlags::CONSTANT);
    func.cfg_mut().build_dominator_tree();

    let mut table = JumpTable::new(indop);
    let candidates: Vec<Box<dyn JumpModel>> = vec![Box::new(BasicModel::new())];
    let err = table.recover_addresses(&func, None, candidates).unwrap_err();
    assert!(err.is_thunk(), "a single entry at address 0 must be rejected as a thunk, got {:?}", err);
    match err {
        LowLevelError::JumptableThunk { .. } => {}
        other => panic!("expected JumptableThunk, got {:?}", other),
    }
}
