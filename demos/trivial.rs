//! Recovers a jump table the way `TrivialModel` does: when no data-flow
//! analysis resolves the `BRANCHIND`'s destinations, fall back to the
//! block's own control-flow successors (§4.3.5).

use pcode_ir::testing::FuncdataBuilder;
use pcode_ir::Opcode;
use pcode_jumptable::{JumpModel, JumpTable, TrivialModel};

fn main() {
    env_logger::init();

    let mut b = FuncdataBuilder::new("trivial_demo");
    let switchblk = b.block();
    let case0 = b.block();
    let case1 = b.block();
    b.edge(switchblk, case0);
    b.edge(switchblk, case1);

    let idx = b.varnode(0, 4);
    let indop = b.op(switchblk, Opcode::BranchInd, 0);
    b.input(indop, idx);
    b.op(case0, Opcode::Copy, 0x100);
    b.op(case1, Opcode::Copy, 0x200);

    let mut func = b.finish();
    func.cfg_mut().build_dominator_tree();

    let mut table = JumpTable::new(indop);
    let candidates: Vec<Box<dyn JumpModel>> = vec![Box::new(TrivialModel::new(switchblk))];
    table.recover_addresses(&func, None, candidates).expect("the trivial model only needs the CFG, which this function always has");

    println!("model: {:?}", table.match_model());
    println!("addresses: {:?}", table.addresses());
}
