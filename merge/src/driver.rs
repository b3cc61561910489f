//! `Merge`: the §4.4 driver. Runs the six entry points in a fixed order
//! over a function whose Heritage pass has already settled, turning its
//! flat Varnode set into a partition of `HighVariable`s.

use crate::high_variable::{HighId, HighSet};
use crate::intersect_test::HighIntersectTest;
use crate::merge_test::{is_merge_basic, merge_test_basic, merge_test_required, merge_test_speculative};
use pcode_cover::{AlwaysAffects, PcodeOpSet};
use pcode_ir::{Address, Funcdata, Opcode, PcodeOp, Varnode, VarnodeFlags};
use std::collections::HashMap;

/// Out-of-scope symbol-table collaborator: which Varnodes are different
/// `SymbolEntry`s of the same `Symbol` (e.g. a global split across
/// overlay-mapped address ranges), needed by `mergeMultiEntry`.
pub trait SymbolLookup {
    fn multi_entry_groups(&self, func: &Funcdata) -> Vec<Vec<Varnode>>;
}

/// A `SymbolLookup` with no symbols, for functions analyzed without a
/// linked symbol table.
pub struct NoSymbols;

impl SymbolLookup for NoSymbols {
    fn multi_entry_groups(&self, _func: &Funcdata) -> Vec<Vec<Varnode>> {
        Vec::new()
    }
}

/// Drives `HighVariable` formation over one function.
pub struct Merge {
    set: HighSet,
    cache: HighIntersectTest,
    stack_ops: PcodeOpSet,
}

impl Merge {
    pub fn new() -> Self {
        Merge {
            set: HighSet::new(),
            cache: HighIntersectTest::new(),
            stack_ops: PcodeOpSet::new(Box::new(AlwaysAffects)),
        }
    }

    pub fn highs(&self) -> &HighSet {
        &self.set
    }

    /// Run every entry point in §4.4's fixed order.
    pub fn run(&mut self, func: &mut Funcdata, symbols: &dyn SymbolLookup) {
        self.set.seed_singletons(func);
        self.populate_stack_ops(func);
        self.merge_addr_tied(func);
        self.merge_marker(func);
        self.group_partials(func);
        self.merge_adjacent(func);
        self.merge_by_datatype(func);
        self.merge_multi_entry(func, symbols);
        crate::copy_trim::process_copy_trims(func, &self.set);
    }

    fn populate_stack_ops(&mut self, func: &Funcdata) {
        for block in func.cfg().blocks() {
            for &op in func.cfg().block(block).ops() {
                let opcode = func.op(op).opcode();
                if opcode == Opcode::Store || func.op(op).opcode().is_call() {
                    self.stack_ops.add_op(block, op);
                }
            }
        }
        self.stack_ops.finalize(func);
    }

    /// Try to force-merge `b` into `a`; if their covers interior-intersect
    /// and aren't copy-shadow-exempt, `eliminate_intersect` splits the
    /// conflict with an inserted COPY instead of merging.
    fn force_merge_or_split(&mut self, a: HighId, b: HighId, func: &mut Funcdata) {
        if a == b {
            return;
        }
        if self.cache.intersects(a, b, &self.set, func) {
            self.eliminate_intersect(b, func);
            return;
        }
        self.set.merge_into(a, b, func);
        self.cache.invalidate(a);
        self.cache.invalidate(b);
    }

    /// §4.4 step 1's `eliminateIntersect`: cut the data-flow at the
    /// offending `HighVariable`'s representative instance with an inserted
    /// COPY, so the conflicting range is read through a fresh value instead
    /// of forced to share storage.
    fn eliminate_intersect(&mut self, offender: HighId, func: &mut Funcdata) {
        let vn = self.set.get(offender).representative();
        let Some(def) = func.varnodes().get(vn).def() else { return };
        let addr = func.op(def).address();
        let size = func.varnodes().get(vn).size();
        let copy = func.insert_op_before(def, Opcode::Copy, addr);
        func.append_input(copy, vn);
        func.set_output_new(copy, addr, size);
    }

    /// §4.4 step 1: for each contiguous run of same-address, same-size
    /// address-tied Varnodes, force-merge them into one `HighVariable`.
    fn merge_addr_tied(&mut self, func: &mut Funcdata) {
        let mut groups: HashMap<(Address, u32), Vec<Varnode>> = HashMap::new();
        for (vn, data) in func.varnodes().iter() {
            if data.flags().contains(VarnodeFlags::ADDR_TIED) && !data.is_free() {
                groups.entry((data.address(), data.size())).or_default().push(vn);
            }
        }
        for (_, members) in groups {
            let mut members = members;
            members.sort_by_key(|&vn| func.varnodes().get(vn).create_index());
            let Some(&first) = members.first() else { continue };
            let keep = self.set.high_of(first).expect("seeded singleton");
            for &vn in &members[1..] {
                let other = self.set.high_of(vn).expect("seeded singleton");
                self.force_merge_or_split(keep, other, func);
            }
        }
    }

    /// §4.4 step 2: force-merge every `MULTIEQUAL`/`INDIRECT`'s inputs
    /// with its output. Where the merge test fails, a trim COPY is
    /// inserted ahead of the conflicting input rather than forcing the
    /// merge outright.
    fn merge_marker(&mut self, func: &mut Funcdata) {
        let marker_ops: Vec<PcodeOp> = func
            .cfg()
            .blocks()
            .flat_map(|b| func.cfg().block(b).ops().to_vec())
            .filter(|&op| func.op(op).opcode().is_marker())
            .collect();
        for op in marker_ops {
            let Some(output) = func.op(op).output() else { continue };
            let out_high = self.set.high_of(output).expect("seeded singleton");
            let inputs = func.op(op).inputs().to_vec();
            for (i, input) in inputs.into_iter().enumerate() {
                if func.varnodes().get(input).is_constant() {
                    continue;
                }
                let Some(in_high) = self.set.high_of(input) else { continue };
                if !merge_test_required(self.set.get(out_high), self.set.get(in_high), &self.set, func) {
                    self.snip_output_interference(op, i, input, func);
                    continue;
                }
                self.force_merge_or_split(out_high, in_high, func);
            }
        }
    }

    /// §4.4 step 2's closing clause: a marker-op input that fails the
    /// required merge test can't share storage with the output, but it
    /// can't be left feeding the marker raw either — insert a trim COPY
    /// ahead of the op and redirect that input through it, so the
    /// conflicting value is read through its own fresh Varnode instead of
    /// one forced into the output's `HighVariable`.
    fn snip_output_interference(&mut self, op: PcodeOp, input_index: usize, input: Varnode, func: &mut Funcdata) {
        let addr = func.op(op).address();
        let size = func.varnodes().get(input).size();
        let copy = func.insert_op_before(op, Opcode::Copy, addr);
        func.append_input(copy, input);
        let trimmed = func.set_output_new(copy, addr, size);
        func.set_input(op, input_index, trimmed);
        self.set.seed_one(trimmed, func);
    }

    /// §4.4 step 3: for each `PIECE` root, gather its two operands and, if
    /// each is a single-instance proto-partial, group them.
    fn group_partials(&mut self, func: &Funcdata) {
        for block in func.cfg().blocks() {
            for &op in func.cfg().block(block).ops() {
                if func.op(op).opcode() != Opcode::Piece {
                    continue;
                }
                let inputs = func.op(op).inputs();
                if inputs.len() != 2 {
                    continue;
                }
                let (hi_piece, lo_piece) = (inputs[0], inputs[1]);
                let Some(hi_high) = self.set.high_of(hi_piece) else { continue };
                let Some(lo_high) = self.set.high_of(lo_piece) else { continue };
                if self.set.get(hi_high).is_single_instance_proto_partial(func) && self.set.get(lo_high).is_single_instance_proto_partial(func) {
                    let lo_size = func.varnodes().get(lo_piece).size();
                    self.set.group_with(lo_high, hi_high, u64::from(lo_size));
                }
            }
        }
    }

    /// §4.4 step 4: for each non-call op whose output and some input share
    /// a size, attempt a speculative merge.
    fn merge_adjacent(&mut self, func: &mut Funcdata) {
        let candidates: Vec<(Varnode, Varnode)> = func
            .cfg()
            .blocks()
            .flat_map(|b| func.cfg().block(b).ops().to_vec())
            .filter(|&op| !func.op(op).opcode().is_call())
            .filter_map(|op| {
                let out = func.op(op).output()?;
                let out_size = func.varnodes().get(out).size();
                let input = func.op(op).inputs().iter().copied().find(|&i| !func.varnodes().get(i).is_constant() && func.varnodes().get(i).size() == out_size)?;
                Some((out, input))
            })
            .collect();
        for (out, input) in candidates {
            let (Some(ha), Some(hb)) = (self.set.high_of(out), self.set.high_of(input)) else { continue };
            if ha == hb {
                continue;
            }
            if merge_test_speculative(self.set.get(ha), self.set.get(hb), &self.set, func) && !self.cache.intersects(ha, hb, &self.set, func) {
                self.set.merge_into(ha, hb, func);
                self.cache.invalidate(ha);
                self.cache.invalidate(hb);
            }
        }
    }

    /// §4.4 step 5: bucket non-free, merge-basic `HighVariable`s by size
    /// (this IR's datatype surrogate, see `merge_test`) over a location
    /// range, and merge-linear each bucket.
    fn merge_by_datatype(&mut self, func: &mut Funcdata) {
        let mut buckets: HashMap<u32, Vec<HighId>> = HashMap::new();
        let mut seen = std::collections::HashSet::new();
        for (vn, data) in func.varnodes().iter() {
            if data.is_free() {
                continue;
            }
            let Some(high) = self.set.high_of(vn) else { continue };
            if !seen.insert(high) {
                continue;
            }
            if is_merge_basic(self.set.get(high), func) {
                buckets.entry(data.size()).or_default().push(high);
            }
        }
        for (_, mut bucket) in buckets {
            bucket.sort_by_key(|&h| self.set.get(h).representative().as_u32());
            self.merge_linear(&bucket, func);
        }
    }

    /// `mergeLinear`: scan a stack of already-placed highs; each new high
    /// merges into the first stack entry it doesn't intersect, else opens
    /// a new run.
    fn merge_linear(&mut self, highs: &[HighId], func: &mut Funcdata) {
        let mut stack: Vec<HighId> = Vec::new();
        for &h in highs {
            // Earlier iterations may already have folded `h`'s original
            // bucket entry into another high; resolve to the current owner
            // through its still-valid representative instance.
            let h = self.set.high_of(self.set.get(h).representative()).unwrap_or(h);
            let mut placed = false;
            for &s in &stack {
                let s = self.set.high_of(self.set.get(s).representative()).unwrap_or(s);
                if s == h {
                    placed = true;
                    break;
                }
                if merge_test_basic(self.set.get(s), self.set.get(h), &self.set, func) && !self.cache.intersects(s, h, &self.set, func) {
                    self.set.merge_into(s, h, func);
                    self.cache.invalidate(s);
                    self.cache.invalidate(h);
                    placed = true;
                    break;
                }
            }
            if !placed {
                stack.push(h);
            }
        }
    }

    /// §4.4 step 6: force-merge every `Symbol`'s multiple `SymbolEntry`
    /// Varnodes into one `HighVariable`.
    fn merge_multi_entry(&mut self, func: &mut Funcdata, symbols: &dyn SymbolLookup) {
        for group in symbols.multi_entry_groups(func) {
            let highs: Vec<_> = group.into_iter().filter_map(|vn| self.set.high_of(vn)).collect();
            let mut iter = highs.into_iter();
            let Some(first) = iter.next() else { continue };
            for other in iter {
                self.force_merge_or_split(first, other, func);
            }
        }
    }
}

impl Default for Merge {
    fn default() -> Self {
        Merge::new()
    }
}
