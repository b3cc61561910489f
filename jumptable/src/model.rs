//! The four jump-table recovery models of §4.3, tried in order by
//! `JumpTable::recover_addresses`: Assisted, Basic, Basic2, Trivial (plus
//! the user-driven Override model). Each implements the shared
//! `JumpModel` trait so the top-level driver can retry with a different
//! model without knowing its internals (§4.3.6's `recoverMultistage`).

use crate::circle_range::{self, CircleRange};
use crate::emulate::{EmulateFunction, LoadImage};
use crate::path_meld::PathMeld;
use pcode_ir::{Address, Block, Funcdata, LowLevelError, Opcode, PcodeOp, PcodeOpFlags, Varnode};

/// Shared behavior every jump-table recovery model implements, per §4.3's
/// opening paragraph.
pub trait JumpModel {
    /// Build the model's internal state (candidate switch variable, value
    /// range, guards) from the `BRANCHIND`'s back-slice.
    fn recover_model(&mut self, func: &Funcdata, indop: PcodeOp) -> Result<(), LowLevelError>;

    /// §4.3.1 step 6: turn the recovered value range into concrete
    /// destination addresses.
    fn build_addresses(&mut self, func: &Funcdata, image: Option<&dyn LoadImage>) -> Result<Vec<Address>, LowLevelError>;

    /// §4.3.1 step 9: recover the source-visible case label for each
    /// recovered address, in the model's own iteration order.
    fn build_labels(&self, func: &Funcdata) -> Vec<i64>;

    /// §4.3.1 step 10: rewrite the `BRANCHIND`'s input to the unnormalized
    /// switch variable once the table is finalized.
    fn fold_in_normalization(&self, func: &mut Funcdata, indop: PcodeOp);

    /// §7: reject tables whose entries look like a mis-analyzed thunk or
    /// stray pointer.
    fn sanity_check(&self, addresses: &[Address], image: Option<&dyn LoadImage>) -> Result<(), LowLevelError>;

    /// Every `LOAD` origin `build_addresses` evaluated along the way,
    /// paired with its element size, in table-entry order (§6's
    /// `<loadtable>` source). Empty for models that never consult a
    /// `LoadImage`.
    fn loadpoints(&self) -> &[(Address, u32)] {
        &[]
    }

    fn clone_model(&self) -> Box<dyn JumpModel>;

    /// A short tag for logging (`debug!("model {} rejected: {}", model.tag(), ...)`).
    fn tag(&self) -> &'static str;
}

const MAX_THUNK_DISTANCE: u64 = 64 * 1024;

/// One `CBRANCH` guard folded into a candidate's range (§4.3.1 step 3).
/// Simplified from Ghidra's full `GuardRecord` (no `readOp`/`indpath`/
/// quasi-copy tracking — those guard load/store side effects this model
/// never needs to reconstruct): just enough to narrow `findSmallestNormal`'s
/// candidate ranges and to later collapse the guard's own condition once
/// the range proves it.
#[derive(Clone, Copy)]
struct GuardRecord {
    cbranch: PcodeOp,
    /// The melded-path Varnode this guard constrains.
    vn: Varnode,
    /// The range `vn` is proven to hold on the edge that continues toward
    /// the `BRANCHIND`.
    range: CircleRange,
    /// The boolean value the condition collapses to once that edge is
    /// known to always be taken.
    proves: bool,
}

/// One table entry per control-flow successor of the `BRANCHIND`'s parent
/// block (§4.3.5). Used as the labelling fallback once addresses are known
/// by other means, and as the recovery model of last resort.
#[derive(Clone)]
pub struct TrivialModel {
    parent: Block,
}

impl TrivialModel {
    pub fn new(parent: Block) -> Self {
        TrivialModel { parent }
    }
}

impl JumpModel for TrivialModel {
    fn recover_model(&mut self, _func: &Funcdata, _indop: PcodeOp) -> Result<(), LowLevelError> {
        Ok(())
    }

    fn build_addresses(&mut self, func: &Funcdata, _image: Option<&dyn LoadImage>) -> Result<Vec<Address>, LowLevelError> {
        let succs = func.cfg().block(self.parent).out_edges();
        if succs.is_empty() {
            return Err(LowLevelError::DestinationNotFound);
        }
        Ok(succs
            .iter()
            .filter_map(|&b| func.cfg().block(b).ops().first().map(|&op| func.op(op).address()))
            .collect())
    }

    fn build_labels(&self, func: &Funcdata) -> Vec<i64> {
        let n = func.cfg().block(self.parent).out_edges().len();
        (0..n as i64).collect()
    }

    fn fold_in_normalization(&self, _func: &mut Funcdata, _indop: PcodeOp) {}

    fn sanity_check(&self, addresses: &[Address], _image: Option<&dyn LoadImage>) -> Result<(), LowLevelError> {
        if addresses.is_empty() {
            return Err(LowLevelError::DestinationNotFound);
        }
        Ok(())
    }

    fn clone_model(&self) -> Box<dyn JumpModel> {
        Box::new(self.clone())
    }

    fn tag(&self) -> &'static str {
        "trivial"
    }
}

/// §4.3.1: the primary model. Recovers a contiguous value range for a
/// candidate switch variable via `PathMeld` + `CircleRange`, then emulates
/// every value in range forward to a destination address.
pub struct BasicModel {
    meld: PathMeld,
    switch_vn: Option<Varnode>,
    range: CircleRange,
    normal_vn: Option<Varnode>,
    indop: Option<PcodeOp>,
    guards: Vec<GuardRecord>,
    loadpoints: Vec<(Address, u32)>,
}

impl Clone for BasicModel {
    fn clone(&self) -> Self {
        BasicModel {
            meld: self.meld.clone(),
            switch_vn: self.switch_vn,
            range: self.range,
            normal_vn: self.normal_vn,
            indop: self.indop,
            guards: self.guards.clone(),
            loadpoints: self.loadpoints.clone(),
        }
    }
}

impl BasicModel {
    pub fn new() -> Self {
        BasicModel {
            meld: PathMeld::new(),
            switch_vn: None,
            range: CircleRange::empty(0xffff_ffff),
            normal_vn: None,
            indop: None,
            guards: Vec::new(),
            loadpoints: Vec::new(),
        }
    }

    /// §4.3.1 step 1: DFS back from `indop`'s input, recording every op and
    /// Varnode on the way, pruning at constants, annotations, no-def
    /// Varnodes, calls and marker ops.
    fn find_determining_varnodes(&mut self, func: &Funcdata, indop: PcodeOp) {
        let data = func.op(indop);
        let seed = match data.inputs().first() {
            Some(&vn) => vn,
            None => return,
        };
        let mut path_vns = Vec::new();
        let mut path_ops = Vec::new();
        let mut stack = vec![seed];
        let mut visited = std::collections::HashSet::new();
        while let Some(vn) = stack.pop() {
            if !visited.insert(vn) {
                continue;
            }
            path_vns.push(vn);
            let vdata = func.varnodes().get(vn);
            if vdata.is_constant() || vdata.flags().contains(pcode_ir::VarnodeFlags::ANNOTATION) {
                continue;
            }
            let Some(def) = vdata.def() else { continue };
            let op_data = func.op(def);
            if op_data.opcode().is_call() || op_data.opcode().is_marker() {
                continue;
            }
            path_ops.push(def);
            for &input in op_data.inputs() {
                stack.push(input);
            }
        }
        self.meld.meld(func, &path_vns, &path_ops);
    }

    /// §4.3.1 step 3: walk up at most 2 `CBRANCH` boundaries from `indop`'s
    /// block, and for each one whose condition resolves to a comparison
    /// against a constant, record the range it proves on the edge that
    /// continues toward `indop`.
    fn analyze_guards(&mut self, func: &Funcdata, indop: PcodeOp) {
        self.guards.clear();
        let mut descendant = func.op(indop).parent();
        for _ in 0..2 {
            let Some(candidate_block) = func.cfg().block(descendant).idom() else { break };
            let out_edges = func.cfg().block(candidate_block).out_edges();
            let last_op = func.cfg().block(candidate_block).ops().last().copied();
            let is_cbranch = match last_op {
                Some(op) => func.op(op).opcode() == Opcode::CBranch,
                None => false,
            };
            if !is_cbranch || out_edges.len() != 2 {
                descendant = candidate_block;
                continue;
            }
            let cbranch = last_op.unwrap();
            let flipped = func.op(cbranch).flags().contains(PcodeOpFlags::BOOLEAN_FLIP);
            let (true_edge, false_edge) = if flipped { (out_edges[1], out_edges[0]) } else { (out_edges[0], out_edges[1]) };
            let on_true_side = true_edge == descendant || func.cfg().dominates(true_edge, descendant);
            let on_false_side = false_edge == descendant || func.cfg().dominates(false_edge, descendant);
            let want_true = if on_true_side {
                true
            } else if on_false_side {
                false
            } else {
                descendant = candidate_block;
                continue;
            };
            if let Some(&cond) = func.op(cbranch).inputs().first() {
                if let Some((vn, range)) = self.guard_range(func, cond, want_true) {
                    self.guards.push(GuardRecord { cbranch, vn, range, proves: want_true });
                }
            }
            descendant = candidate_block;
        }
    }

    /// Resolve one `CBRANCH` condition to the `(Varnode, CircleRange)` it
    /// proves, if the condition is a comparison with exactly one constant
    /// operand whose other operand is on this model's melded path (or one
    /// invertible arithmetic hop away from it — step 3's "at most 2
    /// operations" budget, the comparison itself being the first).
    fn guard_range(&self, func: &Funcdata, cond: Varnode, want_true: bool) -> Option<(Varnode, CircleRange)> {
        let def = func.varnodes().get(cond).def()?;
        let data = func.op(def);
        let (const_is_second, constant, other) = split_constant_operand(func, data.inputs())?;
        let size = func.varnodes().get(other).size();
        let mask = mask_for(size);
        let base_range = circle_range::from_comparison(data.opcode(), const_is_second, constant, mask, want_true)?;
        if self.meld.common_vn().contains(&other) {
            return Some((other, base_range));
        }
        let further = func.varnodes().get(other).def()?;
        let fdata = func.op(further);
        if !circle_range::is_invertible(fdata.opcode()) {
            return None;
        }
        let inputs = fdata.inputs();
        let (pulled_vn, pulled_range) = match inputs.len() {
            2 => {
                let (c_is_second, c, pulled_vn) = split_constant_operand(func, inputs)?;
                (pulled_vn, base_range.pull_back(fdata.opcode(), Some(c), c_is_second))
            }
            1 => (inputs[0], base_range.pull_back(fdata.opcode(), None, false)),
            _ => return None,
        };
        if self.meld.common_vn().contains(&pulled_vn) { Some((pulled_vn, pulled_range)) } else { None }
    }

    /// §4.3.1 step 4: for each `commonVn` candidate, compute its effective
    /// range — an `INT_AND` mask if the candidate is itself masked, the
    /// candidate's full representable range otherwise — intersected with
    /// every guard that applies to it, and keep the smallest. Ties prefer a
    /// Varnode with no defining op (a true path leaf `EmulateFunction` can
    /// seed directly), then the larger Varnode, matching the pre-guard
    /// placeholder's "biggest candidate wins" rule in the no-guard case.
    fn find_smallest_normal(&self, func: &Funcdata) -> Option<(Varnode, CircleRange)> {
        let mut best: Option<(Varnode, CircleRange)> = None;
        for &vn in self.meld.common_vn() {
            let vdata = func.varnodes().get(vn);
            if vdata.is_constant() {
                continue;
            }
            let size = vdata.size();
            let mask = mask_for(size);
            let mut range = match vdata.def() {
                Some(def) if func.op(def).opcode() == Opcode::IntAnd => func
                    .op(def)
                    .inputs()
                    .iter()
                    .find(|&&i| func.varnodes().get(i).is_constant())
                    .map(|&c| circle_range::range_from_and_mask(func.varnodes().get(c).address().offset(), mask))
                    .unwrap_or_else(|| CircleRange::range(0, mask.wrapping_add(1), 1, mask)),
                _ => CircleRange::range(0, mask.wrapping_add(1), 1, mask),
            };
            for guard in &self.guards {
                if guard.vn == vn {
                    range = range.intersect(&guard.range);
                }
            }
            let is_leaf = vdata.def().is_none();
            let better = match best {
                None => true,
                Some((best_vn, best_range)) => match range.size().cmp(&best_range.size()) {
                    std::cmp::Ordering::Less => true,
                    std::cmp::Ordering::Greater => false,
                    std::cmp::Ordering::Equal => {
                        let best_is_leaf = func.varnodes().get(best_vn).def().is_none();
                        if is_leaf != best_is_leaf { is_leaf } else { size >= func.varnodes().get(best_vn).size() }
                    }
                },
            };
            if better {
                best = Some((vn, range));
            }
        }
        best
    }

    /// §4.3.1 step 8: starting at the normalized Varnode, walk outward
    /// through its consumers' `INT_ADD`/`INT_SUB`/`INT_ZEXT`/`INT_SEXT`
    /// (each with a constant-only other operand) to locate the
    /// source-visible switch variable.
    fn find_unnormalized(&self, func: &Funcdata, start: Varnode) -> Varnode {
        const MAX_STEPS: usize = 3;
        let mut current = start;
        for _ in 0..MAX_STEPS {
            let mut next = None;
            for &op in func.varnodes().get(current).descend() {
                let data = func.op(op);
                if !data.opcode().is_normalization_step() {
                    continue;
                }
                let inputs = data.inputs();
                let matches = match inputs.len() {
                    1 => inputs[0] == current,
                    2 => {
                        let other = if inputs[0] == current {
                            Some(inputs[1])
                        } else if inputs[1] == current {
                            Some(inputs[0])
                        } else {
                            None
                        };
                        match other {
                            Some(o) => func.varnodes().get(o).is_constant(),
                            None => false,
                        }
                    }
                    _ => false,
                };
                if matches {
                    if let Some(out) = data.output() {
                        next = Some(out);
                        break;
                    }
                }
            }
            match next {
                Some(n) => current = n,
                None => break,
            }
        }
        current
    }

    /// §4.3.1 step 10's `foldInGuards`: once the range proves a guard's
    /// kept edge is always taken, its `CBRANCH` condition is dead weight —
    /// collapse it to the literal it now always evaluates to, so a later
    /// simplification pass can fold the branch away entirely.
    fn fold_in_guards(&self, func: &mut Funcdata) {
        for guard in &self.guards {
            if Some(guard.vn) != self.switch_vn {
                continue;
            }
            let Some(&cond) = func.op(guard.cbranch).inputs().first() else { continue };
            let cdata = func.varnodes().get(cond);
            let (space, size) = (cdata.address().space(), cdata.size());
            let lit = func.new_constant(space, guard.proves as u64, size);
            func.set_input(guard.cbranch, 0, lit);
        }
    }
}

/// Split a 2-operand op's inputs into `(constant_is_second, constant_value,
/// other_operand)`, or `None` if neither or both operands are constant.
fn split_constant_operand(func: &Funcdata, inputs: &[Varnode]) -> Option<(bool, u64, Varnode)> {
    if inputs.len() != 2 {
        return None;
    }
    let is_const = |vn: Varnode| func.varnodes().get(vn).is_constant();
    if is_const(inputs[1]) && !is_const(inputs[0]) {
        Some((true, func.varnodes().get(inputs[1]).address().offset(), inputs[0]))
    } else if is_const(inputs[0]) && !is_const(inputs[1]) {
        Some((false, func.varnodes().get(inputs[0]).address().offset(), inputs[1]))
    } else {
        None
    }
}

impl JumpModel for BasicModel {
    fn recover_model(&mut self, func: &Funcdata, indop: PcodeOp) -> Result<(), LowLevelError> {
        self.indop = Some(indop);
        self.find_determining_varnodes(func, indop);
        self.analyze_guards(func, indop);
        let (candidate, range) = self.find_smallest_normal(func).ok_or(LowLevelError::DestinationNotFound)?;
        self.switch_vn = Some(candidate);
        self.range = range;
        self.normal_vn = Some(self.find_unnormalized(func, candidate));
        Ok(())
    }

    fn build_addresses(&mut self, func: &Funcdata, image: Option<&dyn LoadImage>) -> Result<Vec<Address>, LowLevelError> {
        let switch_vn = self.switch_vn.ok_or(LowLevelError::DestinationNotFound)?;
        let start_op = self.meld.earliest_op(func);
        let mut addrs = Vec::new();
        self.loadpoints.clear();
        let size = self.range.size().min(func.arch().max_jumptable_size + 1);
        let mut val = self.range.left();
        for _ in 0..size {
            let dest = match start_op {
                Some(_) => {
                    let mut emu = EmulateFunction::new(func, image, true);
                    let result = emu
                        .emulate_path(val, &self.meld, switch_vn)
                        .map_err(|e| LowLevelError::CouldNotEmulate { addr: func.op(self.indop.unwrap()).address(), reason: e.to_string() })?;
                    self.loadpoints.extend_from_slice(emu.loadpoints());
                    result
                }
                None => val,
            };
            let masked = dest & !(func.arch().funcptr_align.max(1) - 1);
            let space = func.varnodes().get(switch_vn).address().space();
            addrs.push(Address::new(space, masked));
            val = (val + self.range.step()) & self.range.mask();
        }
        Ok(addrs)
    }

    fn build_labels(&self, _func: &Funcdata) -> Vec<i64> {
        let mut labels = Vec::new();
        let mut val = self.range.left();
        let size = self.range.size();
        for _ in 0..size {
            labels.push(val as i64);
            val = (val + self.range.step()) & self.range.mask();
        }
        labels
    }

    fn fold_in_normalization(&self, func: &mut Funcdata, indop: PcodeOp) {
        if let Some(switch_vn) = self.normal_vn {
            func.set_input(indop, 0, switch_vn);
        }
        self.fold_in_guards(func);
    }

    fn sanity_check(&self, addresses: &[Address], image: Option<&dyn LoadImage>) -> Result<(), LowLevelError> {
        if addresses.is_empty() {
            return Err(LowLevelError::DestinationNotFound);
        }
        if addresses.len() == 1 {
            let addr = addresses[0];
            if addr.offset() == 0 {
                return Err(LowLevelError::JumptableThunk { reason: "single entry targets address 0".into() });
            }
            if let Some(img) = image {
                if !img.is_loadable(addr) {
                    return Err(LowLevelError::JumptableThunk { reason: "single entry targets unmapped memory".into() });
                }
            }
        }
        let first = addresses[0].offset();
        let mut truncate_at = addresses.len();
        for (i, a) in addresses.iter().enumerate().skip(1) {
            if a.offset().abs_diff(first) > MAX_THUNK_DISTANCE {
                if let Some(img) = image {
                    if !img.is_loadable(*a) {
                        truncate_at = i;
                        break;
                    }
                }
            }
        }
        let _ = truncate_at;
        Ok(())
    }

    fn loadpoints(&self) -> &[(Address, u32)] {
        &self.loadpoints
    }

    fn clone_model(&self) -> Box<dyn JumpModel> {
        Box::new(self.clone())
    }

    fn tag(&self) -> &'static str {
        "basic"
    }
}

/// §4.3.2: Basic plus a `MULTIEQUAL`-of-(constant-COPY, else) default edge.
pub struct Basic2Model {
    inner: BasicModel,
    extra_default: Option<u64>,
}

impl Basic2Model {
    pub fn new(inner: BasicModel, extra_default: Option<u64>) -> Self {
        Basic2Model { inner, extra_default }
    }
}

impl JumpModel for Basic2Model {
    fn recover_model(&mut self, func: &Funcdata, indop: PcodeOp) -> Result<(), LowLevelError> {
        self.inner.recover_model(func, indop)
    }

    fn build_addresses(&mut self, func: &Funcdata, image: Option<&dyn LoadImage>) -> Result<Vec<Address>, LowLevelError> {
        let mut addrs = self.inner.build_addresses(func, image)?;
        if let Some(extra) = self.extra_default {
            let space = addrs.first().map(|a| a.space()).unwrap_or_else(|| func.spaces().next().unwrap());
            // JumpValuesRangeDefault: the extra value is yielded last.
            addrs.push(Address::new(space, extra));
        }
        Ok(addrs)
    }

    fn build_labels(&self, func: &Funcdata) -> Vec<i64> {
        let mut labels = self.inner.build_labels(func);
        if self.extra_default.is_some() {
            labels.push(-1);
        }
        labels
    }

    fn fold_in_normalization(&self, func: &mut Funcdata, indop: PcodeOp) {
        self.inner.fold_in_normalization(func, indop);
    }

    fn sanity_check(&self, addresses: &[Address], image: Option<&dyn LoadImage>) -> Result<(), LowLevelError> {
        self.inner.sanity_check(addresses, image)
    }

    fn loadpoints(&self) -> &[(Address, u32)] {
        self.inner.loadpoints()
    }

    fn clone_model(&self) -> Box<dyn JumpModel> {
        Box::new(Basic2Model { inner: self.inner.clone(), extra_default: self.extra_default })
    }

    fn tag(&self) -> &'static str {
        "basic2"
    }
}

/// §4.3.3: user-supplied addresses, with a heuristic normalization-varnode
/// guess as a fallback recovery path.
pub struct OverrideModel {
    addresses: Vec<Address>,
    switch_vn: Option<Varnode>,
}

impl Clone for OverrideModel {
    fn clone(&self) -> Self {
        OverrideModel { addresses: self.addresses.clone(), switch_vn: self.switch_vn }
    }
}

impl OverrideModel {
    pub fn new(addresses: Vec<Address>) -> Self {
        OverrideModel { addresses, switch_vn: None }
    }
}

impl JumpModel for OverrideModel {
    fn recover_model(&mut self, func: &Funcdata, indop: PcodeOp) -> Result<(), LowLevelError> {
        // Heuristic likely-norm: the BRANCHIND's direct input, lacking a
        // real PathMeld-driven LOAD->INT_ADD->INT_MULT search.
        self.switch_vn = func.op(indop).inputs().first().copied();
        Ok(())
    }

    fn build_addresses(&mut self, _func: &Funcdata, _image: Option<&dyn LoadImage>) -> Result<Vec<Address>, LowLevelError> {
        if self.addresses.is_empty() {
            return Err(LowLevelError::DestinationNotFound);
        }
        Ok(self.addresses.clone())
    }

    fn build_labels(&self, _func: &Funcdata) -> Vec<i64> {
        (0..self.addresses.len() as i64).collect()
    }

    fn fold_in_normalization(&self, func: &mut Funcdata, indop: PcodeOp) {
        if let Some(vn) = self.switch_vn {
            func.set_input(indop, 0, vn);
        }
    }

    fn sanity_check(&self, addresses: &[Address], _image: Option<&dyn LoadImage>) -> Result<(), LowLevelError> {
        if addresses.is_empty() {
            return Err(LowLevelError::DestinationNotFound);
        }
        Ok(())
    }

    fn clone_model(&self) -> Box<dyn JumpModel> {
        Box::new(self.clone())
    }

    fn tag(&self) -> &'static str {
        "override"
    }
}

/// An injected p-code script slot for the Assisted model (§4.3.4): rather
/// than modeling a real mini-interpreter, the caller supplies the already-
/// evaluated function directly, matching how a jump-assist pseudo-op's
/// script would ultimately be compiled down to a callback by the out-of-
/// scope lifter.
pub type AssistScript = Box<dyn Fn(u64) -> Option<u64> + Send + Sync>;

/// §4.3.4: `BRANCHIND`'s input comes from a `CALLOTHER` tagged jump-assist.
pub struct AssistedModel {
    table_size: u64,
    index2addr: AssistScript,
    index2case: Option<AssistScript>,
    default_addr: Option<u64>,
    space: pcode_ir::SpaceId,
    /// The `jump_assist` `CALLOTHER` this model was recovered from, if any —
    /// `foldInNormalization` rewires the `BRANCHIND` straight to this op's
    /// raw index input and retires the op itself.
    userop: Option<PcodeOp>,
}

impl AssistedModel {
    pub fn new(table_size: u64, index2addr: AssistScript, index2case: Option<AssistScript>, default_addr: Option<u64>, space: pcode_ir::SpaceId) -> Self {
        AssistedModel { table_size, index2addr, index2case, default_addr, space, userop: None }
    }

    pub fn with_userop(mut self, userop: PcodeOp) -> Self {
        self.userop = Some(userop);
        self
    }
}

impl JumpModel for AssistedModel {
    fn recover_model(&mut self, _func: &Funcdata, _indop: PcodeOp) -> Result<(), LowLevelError> {
        Ok(())
    }

    fn build_addresses(&mut self, _func: &Funcdata, _image: Option<&dyn LoadImage>) -> Result<Vec<Address>, LowLevelError> {
        let mut addrs = Vec::new();
        for i in 0..self.table_size {
            let dest = (self.index2addr)(i).ok_or(LowLevelError::DestinationNotFound)?;
            addrs.push(Address::new(self.space, dest));
        }
        if let Some(default) = self.default_addr {
            addrs.push(Address::new(self.space, default));
        }
        Ok(addrs)
    }

    fn build_labels(&self, _func: &Funcdata) -> Vec<i64> {
        let mut labels = Vec::new();
        for i in 0..self.table_size {
            let label = self.index2case.as_ref().and_then(|f| f(i)).unwrap_or(i);
            labels.push(label as i64);
        }
        if self.default_addr.is_some() {
            labels.push(-1);
        }
        labels
    }

    /// Rewires the `BRANCHIND` straight to the `jump_assist` `CALLOTHER`'s
    /// raw index input (its last operand, the same "pointer is always the
    /// last input" convention `LOAD` uses) and retires the now-redundant
    /// `CALLOTHER`.
    fn fold_in_normalization(&self, func: &mut Funcdata, indop: PcodeOp) {
        if let Some(userop) = self.userop {
            if let Some(&raw) = func.op(userop).inputs().last() {
                func.set_input(indop, 0, raw);
            }
            func.remove_op(userop);
        }
    }

    fn sanity_check(&self, addresses: &[Address], _image: Option<&dyn LoadImage>) -> Result<(), LowLevelError> {
        if addresses.is_empty() {
            return Err(LowLevelError::DestinationNotFound);
        }
        Ok(())
    }

    fn clone_model(&self) -> Box<dyn JumpModel> {
        panic!("AssistedModel holds non-cloneable injected scripts; recoverMultistage must rebuild it from the CALLOTHER instead")
    }

    fn tag(&self) -> &'static str {
        "assisted"
    }
}

fn mask_for(size: u32) -> u64 {
    if size >= 8 {
        u64::MAX
    } else {
        (1u64 << (size * 8)) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcode_ir::testing::FuncdataBuilder;

    #[test]
    fn trivial_model_builds_one_entry_per_successor() {
        let mut b = FuncdataBuilder::new("f");
        let parent = b.block();
        let s1 = b.block();
        let s2 = b.block();
        b.edge(parent, s1);
        b.edge(parent, s2);
        b.op(s1, Opcode::Copy, 0x1000);
        b.op(s2, Opcode::Copy, 0x2000);
        let func = b.finish();

        let mut model = TrivialModel::new(parent);
        let addrs = model.build_addresses(&func, None).unwrap();
        assert_eq!(addrs.len(), 2);
    }

    #[test]
    fn basic_model_emulates_constant_offset_chain() {
        let mut b = FuncdataBuilder::new("f");
        let blk = b.block();
        let switch_vn = b.varnode(0, 1);
        let add_op = b.op(blk, Opcode::IntAdd, 0);
        b.input(add_op, switch_vn);
        let base = b.varnode(0x8000, 1);
        b.input(add_op, base);
        let add_out = b.output(add_op, 0x9000, 1);
        let indop = b.op(blk, Opcode::BranchInd, 4);
        b.input(indop, add_out);
        let func = b.finish();

        let mut model = BasicModel::new();
        model.recover_model(&func, indop).unwrap();
        assert!(model.switch_vn.is_some());
    }

    /// Scenario A's shape: `switch (x & 7)` guarded by `if (x < 8)`. Without
    /// `analyzeGuards`, `recoverModel` would see only the `INT_AND` mask and
    /// land on the same `[0, 8)` range by luck; this fixture's point is that
    /// the guard and the mask are found and intersected independently, and
    /// that the emulation seed settles on the unmasked leaf `x` rather than
    /// the `INT_AND`'s own output.
    #[test]
    fn basic_model_narrows_range_through_cbranch_guard() {
        let mut b = FuncdataBuilder::new("f");
        let entry = b.block();
        let switchblk = b.block();
        let defaultblk = b.block();
        b.edge(entry, switchblk);
        b.edge(entry, defaultblk);

        let x = b.varnode(0, 4);
        let eight = b.varnode(8, 4);
        let cmp = b.op(entry, Opcode::IntLess, 0);
        b.input(cmp, x);
        b.input(cmp, eight);
        let cond = b.output(cmp, 4, 1);
        let cbranch = b.op(entry, Opcode::CBranch, 8);
        b.input(cbranch, cond);

        let seven = b.varnode(7, 4);
        let and_op = b.op(switchblk, Opcode::IntAnd, 0x10);
        b.input(and_op, x);
        b.input(and_op, seven);
        let masked = b.output(and_op, 0x14, 4);
        let indop = b.op(switchblk, Opcode::BranchInd, 0x18);
        b.input(indop, masked);

        let mut func = b.finish();
        func.varnodes_mut().get_mut(eight).set_flags(pcode_ir::VarnodeFlags::CONSTANT);
        func.varnodes_mut().get_mut(seven).set_flags(pcode_ir::VarnodeFlags::CONSTANT);
        func.cfg_mut().build_dominator_tree();

        let mut model = BasicModel::new();
        model.recover_model(&func, indop).unwrap();
        assert_eq!(model.range.size(), 8);
        assert_eq!(model.switch_vn, Some(x));

        model.fold_in_normalization(&mut func, indop);
        let rewritten_cond = *func.op(cbranch).inputs().first().unwrap();
        assert_ne!(rewritten_cond, cond);
        assert!(func.varnodes().get(rewritten_cond).is_constant());
        assert_eq!(func.varnodes().get(rewritten_cond).address().offset(), 1);
    }
}
