//! Same masked switch as `basic.rs`, but the caller also knows about a
//! `MULTIEQUAL`-fed default edge (§4.3.2) that Basic alone can't see,
//! wrapped on via `Basic2Model`.

use pcode_ir::testing::FuncdataBuilder;
use pcode_ir::{Opcode, VarnodeFlags};
use pcode_jumptable::{Basic2Model, BasicModel, JumpModel, JumpTable};

fn main() {
    env_logger::init();

    let mut b = FuncdataBuilder::new("basic2_demo");
    let entry = b.block();
    let switchblk = b.block();
    let defaultblk = b.block();
    b.edge(entry, switchblk);
    b.edge(entry, defaultblk);

    let x = b.varnode(0, 4);
    let bound = b.varnode(4, 4);
    let cmp = b.op(entry, Opcode::IntLess, 0);
    b.input(cmp, x);
    b.input(cmp, bound);
    let cond = b.output(cmp, 4, 1);
    let cbranch = b.op(entry, Opcode::CBranch, 8);
    b.input(cbranch, cond);

    let scale = b.varnode(8, 4);
    let mult_op = b.op(switchblk, Opcode::IntMult, 0x10);
    b.input(mult_op, x);
    b.input(mult_op, scale);
    let offset_vn = b.output(mult_op, 0x14, 4);

    let base = b.varnode(0x3000, 4);
    let add_op = b.op(switchblk, Opcode::IntAdd, 0x18);
    b.input(add_op, offset_vn);
    b.input(add_op, base);
    let addr_vn = b.output(add_op, 0x1c, 4);

    let indop = b.op(switchblk, Opcode::BranchInd, 0x20);
    b.input(indop, addr_vn);

    let mut func = b.finish();
    for &c in &[bound, scale, base] {
        func.varnodes_mut().get_mut(c).set_flags(VarnodeFlags::CONSTANT);
    }
    func.cfg_mut().build_dominator_tree();

    let mut table = JumpTable::new(indop);
    let model = Basic2Model::new(BasicModel::new(), Some(0x9000));
    let candidates: Vec<Box<dyn JumpModel>> = vec![Box::new(model)];
    table.recover_addresses(&func, None, candidates).expect("Basic alone settles the in-range cases, Basic2 appends the known default");

    println!("model: {:?}", table.match_model());
    println!("addresses: {:?}", table.addresses());
}
