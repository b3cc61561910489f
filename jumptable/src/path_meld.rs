//! `PathMeld`: accumulates every back-slice path from a `BRANCHIND` input
//! to a candidate switch variable (§4.3.1 steps 1-2).

use pcode_entity::EntityRef;
use pcode_ir::{Block, Funcdata, Opcode, PcodeOp, Varnode, VarnodeFlags};

/// One op seen on some melded path, tagged with the index into `common_vn`
/// of the deepest commonly-reachable Varnode it branches from.
#[derive(Clone, Copy, Debug)]
struct MeldedOp {
    op: PcodeOp,
    common_index: usize,
}

/// Accumulated back-paths from a `BRANCHIND`'s input down to one or more
/// candidate switch variables.
#[derive(Clone, Default)]
pub struct PathMeld {
    /// The intersection of Varnodes present on every melded path, in the
    /// order the first path introduced them.
    common_vn: Vec<Varnode>,
    op_meld: Vec<MeldedOp>,
}

impl PathMeld {
    pub fn new() -> Self {
        PathMeld::default()
    }

    pub fn is_empty(&self) -> bool {
        self.common_vn.is_empty() && self.op_meld.is_empty()
    }

    pub fn common_vn(&self) -> &[Varnode] {
        &self.common_vn
    }

    /// Merge one DFS back-slice path into the accumulator: intersect its
    /// Varnodes against `common_vn` (or seed `common_vn` on the first
    /// call), and merge-sort its ops into `op_meld` by `(block, seq)`,
    /// deduplicating ops already present.
    pub fn meld(&mut self, func: &Funcdata, path_vns: &[Varnode], path_ops: &[PcodeOp]) {
        if self.common_vn.is_empty() && self.op_meld.is_empty() {
            self.common_vn = path_vns.to_vec();
        } else {
            self.common_vn.retain(|vn| path_vns.contains(vn));
        }

        for &op in path_ops {
            if self.op_meld.iter().any(|m| m.op == op) {
                continue;
            }
            let common_index = path_vns
                .iter()
                .position(|&vn| self.common_vn.contains(&vn))
                .unwrap_or(0);
            self.op_meld.push(MeldedOp { op, common_index });
        }
        self.op_meld.sort_by_key(|m| seq_key(func, m.op));
    }

    pub fn len(&self) -> usize {
        self.op_meld.len()
    }

    pub fn get_op(&self, i: usize) -> PcodeOp {
        self.op_meld[i].op
    }

    pub fn get_op_parent(&self, func: &Funcdata, i: usize) -> Block {
        func.op(self.op_meld[i].op).parent()
    }

    pub fn is_load_in_path(&self, func: &Funcdata, i: usize) -> bool {
        func.op(self.op_meld[i].op).opcode() == Opcode::Load
    }

    /// Mark every Varnode reachable from `common_vn[start_idx..]` with
    /// `VarnodeFlags::MARK`, the bookkeeping `analyzeGuards` (§4.3.1 step 3)
    /// uses to tell "on this candidate's path" from "elsewhere".
    pub fn mark_paths(&self, func: &mut Funcdata, start_vn_idx: usize) {
        for &vn in self.common_vn.iter().skip(start_vn_idx) {
            func.varnodes_mut().get_mut(vn).set_flags(VarnodeFlags::MARK);
        }
    }

    /// The earliest op in program order across every melded path — the
    /// natural starting point for `EmulateFunction::emulate_path`.
    pub fn earliest_op(&self, func: &Funcdata) -> Option<PcodeOp> {
        self.op_meld.iter().map(|m| m.op).min_by_key(|&op| seq_key(func, op))
    }

    pub fn ops(&self) -> impl Iterator<Item = PcodeOp> + '_ {
        self.op_meld.iter().map(|m| m.op)
    }
}

fn seq_key(func: &Funcdata, op: PcodeOp) -> (usize, u32) {
    let data = func.op(op);
    (data.parent().index(), data.seq())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcode_ir::testing::FuncdataBuilder;

    #[test]
    fn meld_intersects_common_varnodes_across_paths() {
        let mut b = FuncdataBuilder::new("f");
        let blk = b.block();
        let shared = b.varnode(0, 4);
        let only_first = b.varnode(4, 4);
        let op0 = b.op(blk, Opcode::Copy, 0);
        let op1 = b.op(blk, Opcode::Copy, 4);
        let func = b.finish();

        let mut meld = PathMeld::new();
        meld.meld(&func, &[shared, only_first], &[op0]);
        meld.meld(&func, &[shared], &[op1]);

        assert_eq!(meld.common_vn(), &[shared]);
        assert_eq!(meld.len(), 2);
    }

    #[test]
    fn earliest_op_is_lowest_seq_in_block() {
        let mut b = FuncdataBuilder::new("f");
        let blk = b.block();
        let op0 = b.op(blk, Opcode::Copy, 0);
        let op1 = b.op(blk, Opcode::Copy, 4);
        let vn = b.varnode(0, 4);
        let func = b.finish();

        let mut meld = PathMeld::new();
        meld.meld(&func, &[vn], &[op1, op0]);
        assert_eq!(meld.earliest_op(&func), Some(op0));
    }
}
