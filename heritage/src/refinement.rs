//! §4.2.4: refinement — splitting one interesting address range into the
//! disjoint sub-pieces Heritage actually raises to SSA form, driven by the
//! sizes of Varnodes already witnessed at that location.

use pcode_ir::{Address, Funcdata, Opcode, PcodeOp};

/// A byte-granularity witness bitmap over one address range: `marks[i]` is
/// set if some existing Varnode starts its storage at `base + i`.
struct WitnessMap {
    base: Address,
    marks: Vec<bool>,
}

impl WitnessMap {
    fn new(base: Address, size: u64) -> Self {
        WitnessMap {
            base,
            marks: vec![false; size as usize],
        }
    }

    fn witness(&mut self, start_offset: u64) {
        let rel = start_offset.wrapping_sub(self.base.offset());
        if (rel as usize) < self.marks.len() {
            self.marks[rel as usize] = true;
        }
    }

    /// Boundaries, in ascending offset order, including both ends of the
    /// range.
    fn boundaries(&self) -> Vec<u64> {
        let mut bounds = vec![0u64];
        for (i, &m) in self.marks.iter().enumerate() {
            if m && i != 0 {
                bounds.push(i as u64);
            }
        }
        bounds.push(self.marks.len() as u64);
        bounds.dedup();
        bounds
    }
}

/// Collect every Varnode size-boundary witnessed in `[addr, addr+size)`.
fn collect_witnesses(func: &Funcdata, addr: Address, size: u64) -> WitnessMap {
    let mut map = WitnessMap::new(addr, size);
    for vn in func.varnodes().in_range(addr, size) {
        let data = func.varnodes().get(vn);
        map.witness(data.address().offset());
        let end = data.end_offset();
        if end < addr.offset() + size {
            map.witness(end);
        }
    }
    map
}

/// Drop boundary artifacts produced by a lone 1-byte or 3-byte piece that
/// sits adjacent to a naturally-aligned 2/4/8-byte piece: such boundaries
/// come from partial writes (a byte store into a word-sized stack slot) and
/// splitting on them produces more SSA pieces than the source program
/// actually has distinct variables. A boundary survives unless removing it
/// would still leave every surviving sub-range at most 8 bytes.
fn remove13_refinement(bounds: &mut Vec<u64>) {
    if bounds.len() < 3 {
        return;
    }
    let mut i = 1;
    while i + 1 < bounds.len() {
        let lo_width = bounds[i] - bounds[i - 1];
        let hi_width = bounds[i + 1] - bounds[i];
        let is_odd_runt = lo_width == 1 || lo_width == 3 || hi_width == 1 || hi_width == 3;
        let combined = bounds[i + 1] - bounds[i - 1];
        if is_odd_runt && combined <= 8 {
            bounds.remove(i);
        } else {
            i += 1;
        }
    }
}

/// Split `[addr, addr+size)` into the disjoint `(offset, size)` sub-ranges
/// Heritage should place separate phi nodes / separate SSA webs for,
/// combining the raw witness boundaries with the `remove13Refinement`
/// cleanup pass.
pub fn split_by_refinement(func: &Funcdata, addr: Address, size: u64) -> Vec<(u64, u64)> {
    let witnesses = collect_witnesses(func, addr, size);
    let mut bounds = witnesses.boundaries();
    remove13_refinement(&mut bounds);

    bounds
        .windows(2)
        .map(|w| (addr.offset() + w[0], w[1] - w[0]))
        .filter(|&(_, len)| len > 0)
        .collect()
}

fn insert_after(func: &mut Funcdata, after: PcodeOp, opcode: Opcode, address: Address) -> PcodeOp {
    let block = func.op(after).parent();
    let ops = func.cfg().block(block).ops().to_vec();
    let pos = ops.iter().position(|&o| o == after).expect("after must be laid out in its block");
    match ops.get(pos + 1) {
        Some(&next) => func.insert_op_before(next, opcode, address),
        None => func.append_op(block, opcode, address),
    }
}

fn insert_at_entry(func: &mut Funcdata, address: Address, opcode: Opcode) -> PcodeOp {
    let entry = func.cfg().entry().expect("a function being heritaged has an entry block");
    match func.cfg().block(entry).ops().first().copied() {
        Some(first) => func.insert_op_before(first, opcode, address),
        None => func.append_op(entry, opcode, address),
    }
}

/// §4.2.4's second half, grounded in Scenario F ("a double-precision write
/// ... yields two SUBPIECEs after the defining op, each defining the half,
/// and a PIECE reconstructing the 8-byte view only where read"): once
/// `split_by_refinement` has decided the partition, rewrite the IR to
/// match it. A write gets a SUBPIECE per piece inserted right after its
/// defining op; an input Varnode is split the same way, chained instead
/// since it has no defining op to anchor on, with the input itself as each
/// SUBPIECE's source. Whatever still reads the original, unsplit Varnode
/// gets redirected to a PIECE chain reassembling the pieces. A partition of
/// one piece is already exact — nothing to rewrite.
pub fn materialize_refinement(func: &mut Funcdata, addr: Address, size: u64, pieces: &[(u64, u64)]) {
    if pieces.len() <= 1 {
        return;
    }
    let whole = func.varnodes().in_range(addr, size).find(|&vn| {
        let data = func.varnodes().get(vn);
        data.address() == addr && u64::from(data.size()) == size
    });
    let Some(vn) = whole else { return };

    let readers = func.varnodes().get(vn).descend().to_vec();
    let is_input = func.varnodes().get(vn).is_input();
    let def = func.varnodes().get(vn).def();

    let mut piece_vns = Vec::with_capacity(pieces.len());
    let mut anchor = def;
    for &(offset, psize) in pieces {
        let piece_addr = Address::new(addr.space(), offset);
        let shift = offset - addr.offset();
        let op_addr = anchor.map(|o| func.op(o).address()).unwrap_or(piece_addr);
        let sub = match anchor {
            Some(after) => insert_after(func, after, Opcode::SubPiece, op_addr),
            None => insert_at_entry(func, op_addr, Opcode::SubPiece),
        };
        func.append_input(sub, vn);
        let shift_vn = func.new_constant(addr.space(), shift, 4);
        func.append_input(sub, shift_vn);
        let piece_vn = func.set_output_new(sub, piece_addr, psize as u32);
        piece_vns.push(piece_vn);
        if is_input {
            // Inputs have no defining op to hang the next SUBPIECE off of;
            // chain off the one just inserted so order is still preserved.
            anchor = Some(sub);
        }
    }

    if readers.is_empty() {
        return;
    }

    let mut acc = piece_vns[0];
    let mut acc_size = pieces[0].1;
    for (&(_, psize), &piece_vn) in pieces.iter().zip(piece_vns.iter()).skip(1) {
        let piece_op = func.varnodes().get(piece_vn).def().expect("just created above");
        let combine_addr = func.op(piece_op).address();
        let combine = insert_after(func, piece_op, Opcode::Piece, combine_addr);
        func.append_input(combine, piece_vn);
        func.append_input(combine, acc);
        acc_size += psize;
        acc = func.set_output_new(combine, addr, acc_size as u32);
    }

    for reader in readers {
        let inputs_len = func.op(reader).inputs().len();
        for i in 0..inputs_len {
            if func.op(reader).inputs()[i] == vn {
                func.set_input(reader, i, acc);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcode_entity::EntityRef;
    use pcode_ir::testing::FuncdataBuilder;
    use pcode_ir::Opcode;

    #[test]
    fn unwitnessed_range_is_a_single_piece() {
        let mut b = FuncdataBuilder::new("f");
        let func = b.finish();
        let addr = Address::new(func.spaces().next().unwrap(), 0);
        let pieces = split_by_refinement(&func, addr, 8);
        assert_eq!(pieces, vec![(0, 8)]);
    }

    #[test]
    fn witnessed_boundary_splits_range() {
        let mut b = FuncdataBuilder::new("f");
        let blk = b.block();
        let _a = b.varnode(0, 4);
        let _b2 = b.varnode(4, 4);
        let _op = b.op(blk, Opcode::Copy, 0);
        let func = b.finish();
        let addr = Address::new(func.spaces().next().unwrap(), 0);
        let pieces = split_by_refinement(&func, addr, 8);
        assert_eq!(pieces, vec![(0, 4), (4, 4)]);
    }

    #[test]
    fn remove13_merges_lone_byte_runt_into_neighbor() {
        let mut bounds = vec![0u64, 1, 8];
        remove13_refinement(&mut bounds);
        assert_eq!(bounds, vec![0, 8]);
    }

    /// Scenario F: an 8-byte write refined into two 4-byte halves gets a
    /// SUBPIECE per half after the defining op, and the reader that still
    /// wants the whole 8 bytes is rerouted to a PIECE reconstructing them.
    #[test]
    fn materialize_refinement_splits_a_write_and_reroutes_its_reader() {
        let mut b = FuncdataBuilder::new("f");
        let blk = b.block();
        let def = b.op(blk, Opcode::Copy, 0);
        let whole = b.output(def, 0, 8);
        let reader = b.op(blk, Opcode::Copy, 4);
        b.input(reader, whole);
        let mut func = b.finish();

        let addr = Address::new(func.spaces().next().unwrap(), 0);
        materialize_refinement(&mut func, addr, 8, &[(0, 4), (4, 4)]);

        let ops = func.cfg().block(blk).ops().to_vec();
        let subpieces: Vec<_> = ops.iter().copied().filter(|&op| func.op(op).opcode() == Opcode::SubPiece).collect();
        assert_eq!(subpieces.len(), 2);

        let piece = ops.iter().copied().find(|&op| func.op(op).opcode() == Opcode::Piece).expect("reader needs the full range back");
        let piece_out = func.op(piece).output().unwrap();
        assert_eq!(func.op(reader).inputs(), &[piece_out]);
    }

    #[test]
    fn materialize_refinement_is_a_no_op_for_a_single_piece() {
        let mut b = FuncdataBuilder::new("f");
        let blk = b.block();
        let def = b.op(blk, Opcode::Copy, 0);
        b.output(def, 0, 8);
        let mut func = b.finish();
        let addr = Address::new(func.spaces().next().unwrap(), 0);
        materialize_refinement(&mut func, addr, 8, &[(0, 8)]);
        assert_eq!(func.cfg().block(blk).ops().len(), 1);
    }
}
