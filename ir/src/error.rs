//! The §7 error taxonomy.

use crate::address::Address;
use failure_derive::Fail;

/// Errors recoverable at the caller, per §7.
#[derive(Debug, Fail)]
pub enum LowLevelError {
    #[fail(display = "could not emulate op at {:?}: {}", addr, reason)]
    CouldNotEmulate { addr: Address, reason: String },

    #[fail(display = "jumptable destination not found")]
    DestinationNotFound,

    #[fail(display = "sanity check failed: {}", reason)]
    SanityCheckFailed { reason: String },

    #[fail(display = "bad execute address {:?}", addr)]
    BadExecuteAddress { addr: Address },

    #[fail(display = "divide by 0 in 128-bit division")]
    DivideByZero128,

    #[fail(display = "unresolved MULTIEQUAL at jumptable emulation start")]
    UnresolvedMultiequal,

    #[fail(display = "forced merge caused intersection")]
    ForcedMergeIntersection,

    /// §7's `JumptableThunkError` subtype: a one-entry table that looks
    /// like a thunk. Fatal to recovery, not to the function — the driver
    /// demotes the `BRANCHIND` to a tail call.
    #[fail(display = "jumptable looks like a thunk: {}", reason)]
    JumptableThunk { reason: String },
}

impl LowLevelError {
    /// Is this the thunk-detection subtype, which the driver must handle
    /// differently from every other `LowLevelError` (§7 propagation
    /// policy)?
    pub fn is_thunk(&self) -> bool {
        matches!(self, LowLevelError::JumptableThunk { .. })
    }
}

/// A warning attached to the function rather than thrown, per §7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    MayNotBeProperlyLabeled,
    BadSwitchCase,
    SanityCheckRequiredTruncation,
    SwitchManuallyOverridden,
    SecondStageRecoveryError,
    HeritageAfterDeadRemoval,
    /// §4.2.6: a heritage range grew past the 1024-byte abandonment
    /// threshold and was left un-SSA'd.
    RangeTooLarge { address: String, size: u64 },
}

impl Warning {
    pub fn message(&self) -> String {
        match self {
            Warning::MayNotBeProperlyLabeled => "may not be properly labeled".to_string(),
            Warning::BadSwitchCase => "bad switch case".to_string(),
            Warning::SanityCheckRequiredTruncation => "sanity check required truncation".to_string(),
            Warning::SwitchManuallyOverridden => "switch is manually overridden".to_string(),
            Warning::SecondStageRecoveryError => "second-stage recovery error".to_string(),
            Warning::HeritageAfterDeadRemoval => "heritage AFTER dead removal".to_string(),
            Warning::RangeTooLarge { address, size } => {
                format!("heritage range at {} ({} bytes) exceeds abandonment threshold", address, size)
            }
        }
    }
}
