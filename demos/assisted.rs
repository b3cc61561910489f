//! `AssistedModel`: the `BRANCHIND`'s input is produced by a jump-assist
//! `CALLOTHER` pseudo-op (§4.3.4) rather than ordinary arithmetic — the
//! index-to-address mapping is supplied as a callback standing in for the
//! compiled-down assist script. Once recovered, `fold_in_normalization`
//! rewires the `BRANCHIND` straight to the assist's raw index and retires
//! the now-redundant `CALLOTHER`.

use pcode_ir::testing::FuncdataBuilder;
use pcode_ir::{Opcode, PcodeOpFlags};
use pcode_jumptable::{AssistedModel, JumpModel, JumpTable};

fn main() {
    env_logger::init();

    let mut b = FuncdataBuilder::new("assisted_demo");
    let blk = b.block();
    let sub_id = b.varnode(0, 4);
    let idx = b.varnode(4, 4);
    let userop = b.op(blk, Opcode::CallOther, 0);
    b.input(userop, sub_id);
    b.input(userop, idx);
    let dest = b.output(userop, 8, 4);
    let indop = b.op(blk, Opcode::BranchInd, 0xc);
    b.input(indop, dest);

    let mut func = b.finish();
    let space = func.varnodes().get(idx).address().space();

    let model = AssistedModel::new(4, Box::new(|i| Some(0x7000 + i * 4)), None, Some(0x8000), space).with_userop(userop);

    let mut table = JumpTable::new(indop);
    let candidates: Vec<Box<dyn JumpModel>> = vec![Box::new(model)];
    table.recover_addresses(&func, None, candidates).expect("an AssistedModel supplied with its own script always succeeds");

    println!("model: {:?}", table.match_model());
    println!("addresses: {:?}", table.addresses());

    table.fold_in_normalization(&mut func);
    println!("BRANCHIND now reads: {:?}", func.op(indop).inputs());
    println!("jump-assist retired: {}", func.op(userop).flags().contains(PcodeOpFlags::DEAD));
}
