//! §4.2: incremental, multi-pass SSA construction over memory-addressed
//! Varnodes, adapted from `cranelift_frontend`'s `FunctionBuilder`/
//! `SSABuilder` incremental-renaming approach to an address-keyed rather
//! than declared-variable-keyed domain.

pub mod engine;
pub mod guard;
pub mod location_map;
pub mod refinement;

pub use crate::engine::Heritage;
pub use crate::guard::{CallEffect, FuncProtoLookup, GuardState, LoadGuard, StoreGuard};
pub use crate::location_map::{IntersectCode, LocationMap, MemRange, RangeAge, TaskList};
pub use crate::refinement::split_by_refinement;
