//! End-to-end coverage of `Heritage::heritage` driving call-effect guarding
//! and refinement all the way through one pass, rather than unit-testing
//! each helper in isolation.

use pcode_heritage::{CallEffect, FuncProtoLookup, Heritage};
use pcode_ir::testing::FuncdataBuilder;
use pcode_ir::{Address, Opcode, VarnodeFlags};

struct UnknownEffect;
impl FuncProtoLookup for UnknownEffect {
    fn effect(&self, _addr: Address, _size: u64) -> CallEffect {
        CallEffect::UnknownEffect
    }
    fn return_storage(&self) -> Option<(Address, u64)> {
        None
    }
}

struct NoEffect;
impl FuncProtoLookup for NoEffect {
    fn effect(&self, _addr: Address, _size: u64) -> CallEffect {
        CallEffect::Unaffected
    }
    fn return_storage(&self) -> Option<(Address, u64)> {
        None
    }
}

/// An unknown-effect call across a register range ties the INDIRECT it
/// guards with exactly when that range already carries the flag.
#[test]
fn unknown_effect_call_ties_its_indirect_when_the_range_was_already_tied() {
    let mut b = FuncdataBuilder::new("f");
    let blk = b.block();
    let r0 = b.varnode(0, 4);
    let call = b.op(blk, Opcode::Call, 4);
    let mut func = b.finish();
    func.varnodes_mut().get_mut(r0).set_flags(VarnodeFlags::ADDR_TIED);
    func.cfg_mut().build_dominator_tree();

    let mut heritage = Heritage::new();
    heritage.heritage(&mut func, &UnknownEffect);

    let ops = func.cfg().block(blk).ops().to_vec();
    let call_pos = ops.iter().position(|&op| op == call).unwrap();
    assert!(call_pos > 0, "an unknown-effect call must get an INDIRECT inserted before it");
    let indirect = ops[call_pos - 1];
    assert_eq!(func.op(indirect).opcode(), Opcode::Indirect);
    let out = func.op(indirect).output().unwrap();
    assert!(func.varnodes().get(out).flags().contains(VarnodeFlags::ADDR_TIED));
}

#[test]
fn unknown_effect_call_leaves_its_indirect_untied_when_the_range_was_not_tied() {
    let mut b = FuncdataBuilder::new("f");
    let blk = b.block();
    let _r0 = b.varnode(0, 4);
    let call = b.op(blk, Opcode::Call, 4);
    let mut func = b.finish();
    func.cfg_mut().build_dominator_tree();

    let mut heritage = Heritage::new();
    heritage.heritage(&mut func, &UnknownEffect);

    let ops = func.cfg().block(blk).ops().to_vec();
    let call_pos = ops.iter().position(|&op| op == call).unwrap();
    let indirect = ops[call_pos - 1];
    let out = func.op(indirect).output().unwrap();
    assert!(!func.varnodes().get(out).flags().contains(VarnodeFlags::ADDR_TIED));
}

/// The same double-precision-write-into-two-halves shape
/// `materialize_refinement`'s own unit test drives directly, this time
/// exercised through the full `heritage()` pass so `split_by_refinement`'s
/// witness-driven boundary detection and the rewrite are seen wired
/// together rather than called by hand.
#[test]
fn a_full_heritage_pass_splits_a_doubleword_write_witnessed_by_a_narrower_neighbor() {
    let mut b = FuncdataBuilder::new("f");
    let blk = b.block();
    let def = b.op(blk, Opcode::Copy, 0);
    let whole = b.output(def, 0, 8);
    let _witness = b.varnode(4, 4);
    let reader = b.op(blk, Opcode::Copy, 8);
    b.input(reader, whole);

    let mut func = b.finish();
    func.cfg_mut().build_dominator_tree();

    let mut heritage = Heritage::new();
    heritage.heritage(&mut func, &NoEffect);

    let ops = func.cfg().block(blk).ops().to_vec();
    let subpieces: Vec<_> = ops.iter().copied().filter(|&op| func.op(op).opcode() == Opcode::SubPiece).collect();
    assert_eq!(subpieces.len(), 2, "the 8-byte write must be split into two SUBPIECEs");

    let piece = ops.iter().copied().find(|&op| func.op(op).opcode() == Opcode::Piece).expect("the whole-range reader needs a PIECE reconstructing it");
    let piece_out = func.op(piece).output().unwrap();
    assert!(func.op(reader).inputs().contains(&piece_out), "the reader must be rerouted to the PIECE's output");
}
