//! §4.4's COPY-trim follow-up, run once after every merge step has settled:
//! `buildDominantCopy` collapses parallel COPYs of the same source into one
//! at their common dominator, `markRedundantCopies` silences the duplicates
//! it replaces, and `markInternalCopies` silences intra-`HighVariable`
//! byte-shuffling that the merge already made redundant to print.

use crate::high_variable::HighSet;
use pcode_ir::{Funcdata, Opcode, PcodeOp, PcodeOpFlags, Varnode};
use std::collections::HashMap;

/// Run the full COPY-trim pass over `func` given the settled `HighVariable`
/// partition in `highs`.
pub fn process_copy_trims(func: &mut Funcdata, highs: &HighSet) {
    mark_internal_copies(func, highs);
    build_dominant_copy(func, highs);
}

/// §4.4's `markInternalCopies`: a `COPY`/`PIECE`/`SUBPIECE` whose input and
/// output already share a `HighVariable` moves no information a reader needs
/// to see — it only exists because Heritage's SSA form inserts one at every
/// join. Mark it `NON_PRINTING` rather than removing it, since other ops may
/// still reference its output Varnode.
fn mark_internal_copies(func: &mut Funcdata, highs: &HighSet) {
    let candidates: Vec<PcodeOp> = func
        .cfg()
        .blocks()
        .flat_map(|b| func.cfg().block(b).ops().to_vec())
        .filter(|&op| matches!(func.op(op).opcode(), Opcode::Copy | Opcode::Piece | Opcode::SubPiece))
        .collect();
    for op in candidates {
        let Some(out) = func.op(op).output() else { continue };
        let Some(out_high) = highs.high_of(out) else { continue };
        let same_high = !func.op(op).inputs().is_empty() && func.op(op).inputs().iter().all(|&input| highs.high_of(input) == Some(out_high));
        if same_high {
            func.op_mut(op).set_flags(PcodeOpFlags::NON_PRINTING);
        }
    }
}

/// §4.4's `buildDominantCopy`: group `COPY`s by source Varnode; where two or
/// more copy the same source into outputs that Merge already placed in one
/// `HighVariable`, collapse them into a single instance at their common
/// dominator (reusing one of the duplicates if it already sits there,
/// otherwise inserting a fresh `COPY`), redirect every downstream use, and
/// mark the rest `NON_PRINTING` (`markRedundantCopies`).
fn build_dominant_copy(func: &mut Funcdata, highs: &HighSet) {
    let mut groups: HashMap<Varnode, Vec<PcodeOp>> = HashMap::new();
    for block in func.cfg().blocks().collect::<Vec<_>>() {
        for &op in func.cfg().block(block).ops().to_vec().iter() {
            if func.op(op).opcode() != Opcode::Copy {
                continue;
            }
            let Some(&src) = func.op(op).inputs().first() else { continue };
            groups.entry(src).or_default().push(op);
        }
    }
    for (src, copies) in groups {
        if copies.len() < 2 {
            continue;
        }
        let Some(first_out) = func.op(copies[0]).output() else { continue };
        let Some(target_high) = highs.high_of(first_out) else { continue };
        let same_high = copies.iter().all(|&op| func.op(op).output().and_then(|o| highs.high_of(o)) == Some(target_high));
        if !same_high {
            continue;
        }
        let Some(dom_block) = common_dominator(func, &copies) else { continue };
        let dominant = match copies.iter().find(|&&op| func.op(op).parent() == dom_block) {
            Some(&op) => op,
            None => {
                let addr = func.op(copies[0]).address();
                let size = func.varnodes().get(first_out).size();
                let new_op = func.append_op(dom_block, Opcode::Copy, addr);
                func.append_input(new_op, src);
                func.set_output_new(new_op, addr, size);
                new_op
            }
        };
        let Some(dominant_out) = func.op(dominant).output() else { continue };
        for &op in &copies {
            if op == dominant {
                continue;
            }
            let Some(out) = func.op(op).output() else { continue };
            redirect_uses(func, out, dominant_out);
            func.op_mut(op).set_flags(PcodeOpFlags::NON_PRINTING);
        }
    }
}

/// Point every consumer of `from` at `to` instead, without disturbing
/// anything else about the consuming op.
fn redirect_uses(func: &mut Funcdata, from: Varnode, to: Varnode) {
    let consumers = func.varnodes().get(from).descend().to_vec();
    for consumer in consumers {
        let inputs = func.op(consumer).inputs().to_vec();
        for (i, &input) in inputs.iter().enumerate() {
            if input == from {
                func.set_input(consumer, i, to);
            }
        }
    }
}

/// The nearest block dominating every op's parent, found by walking `ops[0]`'s
/// parent up its dominator chain until it dominates the rest too.
fn common_dominator(func: &Funcdata, ops: &[PcodeOp]) -> Option<pcode_ir::Block> {
    let mut candidate = func.op(*ops.first()?).parent();
    loop {
        if ops.iter().all(|&op| func.cfg().dominates(candidate, func.op(op).parent())) {
            return Some(candidate);
        }
        candidate = func.cfg().block(candidate).idom()?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::high_variable::HighSet;
    use pcode_ir::testing::FuncdataBuilder;
    use pcode_ir::PcodeOpFlags;

    #[test]
    fn internal_copy_within_one_high_is_marked_non_printing() {
        let mut b = FuncdataBuilder::new("f");
        let blk = b.block();
        let op0 = b.op(blk, Opcode::Copy, 0);
        let src = b.output(op0, 0, 4);
        let op1 = b.op(blk, Opcode::Copy, 4);
        b.input(op1, src);
        let out = b.output(op1, 4, 4);
        let mut func = b.finish();

        let mut set = HighSet::new();
        set.seed_singletons(&func);
        let h_src = set.high_of(src).unwrap();
        let h_out = set.high_of(out).unwrap();
        set.merge_into(h_src, h_out, &func);

        mark_internal_copies(&mut func, &set);
        assert!(func.op(op1).flags().contains(PcodeOpFlags::NON_PRINTING));
    }

    #[test]
    fn dominant_copy_collapses_duplicate_copies_of_same_source() {
        let mut b = FuncdataBuilder::new("f");
        let entry = b.block();
        let op0 = b.op(entry, Opcode::Copy, 0);
        let src = b.output(op0, 0, 4);
        let left = b.block();
        let right = b.block();
        b.edge(entry, left);
        b.edge(entry, right);
        let op_l = b.op(left, Opcode::Copy, 4);
        b.input(op_l, src);
        let out_l = b.output(op_l, 100, 4);
        let op_r = b.op(right, Opcode::Copy, 8);
        b.input(op_r, src);
        let out_r = b.output(op_r, 100, 4);
        let mut func = b.finish();
        func.cfg_mut().build_dominator_tree();

        let mut set = HighSet::new();
        set.seed_singletons(&func);
        let h_l = set.high_of(out_l).unwrap();
        let h_r = set.high_of(out_r).unwrap();
        set.merge_into(h_l, h_r, &func);

        build_dominant_copy(&mut func, &set);
        assert!(func.op(op_l).flags().contains(PcodeOpFlags::NON_PRINTING));
        assert!(func.op(op_r).flags().contains(PcodeOpFlags::NON_PRINTING));
    }
}
