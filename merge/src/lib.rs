//! §4.4: groups the SSA Varnode instances Heritage produced into
//! `HighVariable`s, adapted from `cranelift_frontend`'s incremental-renaming
//! machinery applied one layer up — merging already-SSA-valid storage
//! instead of constructing SSA form in the first place.

pub mod copy_trim;
pub mod driver;
pub mod encode;
pub mod high_variable;

pub use crate::copy_trim::process_copy_trims;
pub use crate::driver::{Merge, NoSymbols, SymbolLookup};
pub use crate::encode::encode;
pub use crate::high_variable::{GroupId, HighId, HighSet, HighVariable, VariableGroup, VariablePiece};
pub use crate::intersect_test::{block_intersection, inflate_test, test_untied_call_intersection, HighIntersectTest};
pub use crate::merge_test::{is_merge_basic, merge_test_adjacent, merge_test_basic, merge_test_required, merge_test_speculative};
