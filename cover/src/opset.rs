//! `PcodeOpSet`: a lazily-populated, block-sorted op collection.

use pcode_ir::{Block, Funcdata, PcodeOp, Varnode};

/// Secondary filter a `PcodeOpSet` applies once `Cover::intersect_by_opset`
/// has already found a candidate op whose position falls inside the
/// Varnode's live range. For example: does a `STORE`'s address range
/// actually alias `vn`'s address (rather than merely executing while `vn`
/// is live)?
pub trait AffectsTest {
    fn affects(&self, func: &Funcdata, op: PcodeOp, vn: Varnode) -> bool;
}

/// The trivial filter: every op in the set is considered to affect every
/// Varnode whose liveness it overlaps. Used when the set was built from a
/// source that already guarantees relevance (e.g. "every CALL in the
/// function").
pub struct AlwaysAffects;

impl AffectsTest for AlwaysAffects {
    fn affects(&self, _func: &Funcdata, _op: PcodeOp, _vn: Varnode) -> bool {
        true
    }
}

/// A set of ops, sorted by `(block, seq)` once `finalize` is called, used
/// to answer "does any op in this set affect a Varnode's live range?"
/// queries in `Cover::intersect_by_opset`.
pub struct PcodeOpSet {
    ops: Vec<(Block, PcodeOp)>,
    populated: bool,
    finalized: bool,
    affects_test: Box<dyn AffectsTest>,
}

impl PcodeOpSet {
    pub fn new(affects_test: Box<dyn AffectsTest>) -> Self {
        PcodeOpSet {
            ops: Vec::new(),
            populated: false,
            finalized: false,
            affects_test,
        }
    }

    pub fn is_populated(&self) -> bool {
        self.populated
    }

    pub fn add_op(&mut self, block: Block, op: PcodeOp) {
        self.ops.push((block, op));
        self.populated = true;
        self.finalized = false;
    }

    /// Sort by `(block, seq)`, the lockstep order `Cover::intersect_by_opset`
    /// walks in alongside the cover's own per-block run.
    pub fn finalize(&mut self, func: &Funcdata) {
        self.ops.sort_by_key(|&(block, op)| (block_index(block), func.op(op).seq()));
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn affects(&self, func: &Funcdata, op: PcodeOp, vn: Varnode) -> bool {
        self.affects_test.affects(func, op, vn)
    }

    /// Iterate `(block, op)` pairs in the finalized order.
    pub fn iter(&self) -> impl Iterator<Item = (Block, PcodeOp)> + '_ {
        self.ops.iter().copied()
    }
}

fn block_index(b: Block) -> usize {
    use pcode_entity::EntityRef;
    b.index()
}
