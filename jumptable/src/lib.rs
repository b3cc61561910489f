//! §4.3: indirect-branch jump-table recovery. A `BRANCHIND`'s determining
//! Varnodes are melded into a `PathMeld`, bounded by `CircleRange` value-set
//! analysis, and evaluated forward by `EmulateFunction` into concrete
//! destination addresses — the same three-stage shape
//! `cranelift_frontend::SSABuilder` uses for incremental renaming, applied
//! here to switch-variable recovery instead.

pub mod circle_range;
pub mod emulate;
pub mod encode;
pub mod jumptable;
pub mod model;
pub mod path_meld;

pub use crate::circle_range::{is_invertible, range_from_and_mask, CircleRange};
pub use crate::emulate::{EmulateError, EmulateFunction, LoadImage};
pub use crate::encode::encode;
pub use crate::jumptable::JumpTable;
pub use crate::model::{AssistedModel, AssistScript, Basic2Model, BasicModel, JumpModel, OverrideModel, TrivialModel};
pub use crate::path_meld::PathMeld;
