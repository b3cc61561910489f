//! pcode-core: the three-subsystem mid-level IR analysis engine of §2 —
//! Heritage (SSA construction), JumpTable recovery (indirect-branch
//! destination reconstruction), and Merge (`HighVariable` formation) —
//! wired into one per-function pipeline by `FunctionAnalysis`.
//!
//! Each subsystem lives in its own crate and can be driven independently;
//! this crate only adds the glue `FunctionAnalysis` needs to run them in
//! the order §2's data-flow description specifies, plus re-exports so a
//! caller needs only one dependency.

pub mod analysis;

pub use crate::analysis::{default_jump_models, FunctionAnalysis};

pub use pcode_cover::{Cover, CoverBlock, IntersectCode, PcodeOpSet};
pub use pcode_entity::{EntityRef, PrimaryMap, SecondaryMap};
pub use pcode_heritage::{split_by_refinement, CallEffect, FuncProtoLookup, GuardState, Heritage, LoadGuard, LocationMap, StoreGuard};
pub use pcode_ir::{Address, AddrSpace, Architecture, Block, BlockBasic, Cfg, Funcdata, LowLevelError, Opcode, PcodeOp, PcodeOpFlags, SpaceId, Varnode, VarnodeBank, VarnodeFlags, Warning};
pub use pcode_jumptable::{
    is_invertible, range_from_and_mask, AssistScript, AssistedModel, Basic2Model, BasicModel, CircleRange, EmulateError, EmulateFunction, JumpModel, JumpTable, LoadImage, OverrideModel,
    PathMeld, TrivialModel,
};
pub use pcode_merge::{
    block_intersection, inflate_test, is_merge_basic, merge_test_adjacent, merge_test_basic, merge_test_required, merge_test_speculative, process_copy_trims, test_untied_call_intersection,
    GroupId, HighId, HighIntersectTest, HighSet, HighVariable, Merge, NoSymbols, SymbolLookup, VariableGroup, VariablePiece,
};
