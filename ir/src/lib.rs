//! The §3 p-code data model: address spaces, Varnodes, PcodeOps, basic
//! blocks, and the `Funcdata` container that owns all of them for one
//! function.

#[macro_use]
mod flags;

pub mod address;
pub mod block;
pub mod error;
pub mod funcdata;
pub mod opcode;
pub mod pcodeop;
pub mod varnode;

pub use crate::address::{AddrSpace, Address, Endianness, SpaceFlags, SpaceId, SpaceType};
pub use crate::block::{Block, BlockBasic, Cfg};
pub use crate::error::{LowLevelError, Warning};
pub use crate::funcdata::{Architecture, Funcdata};
#[cfg(feature = "testing_hooks")]
pub use crate::funcdata::testing;
pub use crate::opcode::Opcode;
pub use crate::pcodeop::{PcodeOp, PcodeOpData, PcodeOpFlags};
pub use crate::varnode::{Varnode, VarnodeBank, VarnodeData, VarnodeFlags};
