//! Recovers a masked, bounds-checked switch the way `BasicModel` does:
//! `x & 7` scaled and added to a table base, guarded by a `x < 8` compare
//! (§4.3.1). Shows the full path from raw `BRANCHIND` input to a settled
//! `<jumptable>` and a folded guard.

use pcode_ir::testing::FuncdataBuilder;
use pcode_ir::{Address, Opcode, SpaceId, VarnodeFlags};
use pcode_jumptable::{BasicModel, JumpModel, JumpTable, LoadImage};
use std::collections::HashMap;

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

fn main() {
    env_logger::init();

    let mut b = FuncdataBuilder::new("basic_demo");
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

    let image = TableImage {
        space,
        entries: (0..8u64).map(|i| (0x2000 + i * 8, 0x1000 + i * 0x10)).collect(),
    };

    let mut table = JumpTable::new(indop);
    let candidates: Vec<Box<dyn JumpModel>> = vec![Box::new(BasicModel::new())];
    table.recover_addresses(&func, Some(&image), candidates).expect("the masked-and-scaled switch is a textbook BasicModel shape");
    table.recover_labels(&func).expect("labels follow straight from the already-recovered addresses");

    println!("model: {:?}", table.match_model());
    println!("addresses: {:?}", table.addresses());
    println!("labels: {:?}", table.labels());
    println!("loadtable: {:?}", table.loadtable());

    table.fold_in_normalization(&mut func);
    println!("BRANCHIND now reads straight off: {:?}", func.op(indop).inputs());
}
