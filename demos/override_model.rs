//! `OverrideModel`: user-supplied destinations (§4.3.3), for the case
//! where analysis can't recover the switch at all but a caller already
//! knows the answer from some other source (debug info, a prior manual
//! fixup). `fold_in_normalization` still guesses a likely switch varnode
//! from the `BRANCHIND`'s direct input, the heuristic §4.3.3 falls back to
//! in place of a real `PathMeld` search.

use pcode_ir::testing::FuncdataBuilder;
use pcode_ir::{Address, Opcode};
use pcode_jumptable::{JumpModel, JumpTable, OverrideModel};

fn main() {
    env_logger::init();

    let mut b = FuncdataBuilder::new("override_demo");
    let blk = b.block();
    let idx = b.varnode(0, 4);
    let indop = b.op(blk, Opcode::BranchInd, 0);
    b.input(indop, idx);

    let mut func = b.finish();
    let space = func.varnodes().get(idx).address().space();
    func.cfg_mut().build_dominator_tree();

    let addresses = vec![Address::new(space, 0x6000), Address::new(space, 0x6010), Address::new(space, 0x6020)];

    let mut table = JumpTable::new(indop);
    let candidates: Vec<Box<dyn JumpModel>> = vec![Box::new(OverrideModel::new(addresses))];
    table.recover_addresses(&func, None, candidates).expect("Override always succeeds once the caller supplies any destinations");

    println!("model: {:?}", table.match_model());
    println!("addresses: {:?}", table.addresses());

    table.fold_in_normalization(&mut func);
    println!("BRANCHIND input after folding: {:?}", func.op(indop).inputs());
}
