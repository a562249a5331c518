//! Invariant validation for the exchange engines and their buffers.
//!
//! State that crosses peer boundaries (staging and receive cursors, the
//! announcement ring's head/tail distance, the endgame counter) is cheap
//! to validate right after a mutation and expensive to debug once a bad
//! value has been shipped to another rank. Structures
//! owning such state implement [`DebugInvariants`]; mutating operations
//! re-validate through [`debug_invariants!`], which folds to nothing
//! unless debug assertions or the `check-invariants` feature are on.

use crate::error::ExchangeError;

/// True when invariant validation is compiled into this build.
#[inline]
pub const fn invariants_enabled() -> bool {
    cfg!(any(
        debug_assertions,
        feature = "strict-invariants",
        feature = "check-invariants"
    ))
}

/// Validation surface for structures holding cross-peer exchange state.
pub trait DebugInvariants {
    /// Check every invariant and report the first violation: a cursor
    /// outside its tile, ring occupancy past capacity, or a done-sending
    /// count past the cohort size.
    fn validate_invariants(&self) -> Result<(), ExchangeError>;

    /// Panic on the first violation when validation is compiled in.
    fn debug_assert_invariants(&self) {
        if invariants_enabled() {
            if let Err(e) = self.validate_invariants() {
                panic!("invariant violated: {e}");
            }
        }
    }
}

/// Re-validate after a mutating operation, naming the operation in the
/// panic so the failing protocol step is visible without a backtrace.
#[macro_export]
macro_rules! debug_invariants {
    ($check:expr, $($op:tt)*) => {
        if $crate::debug_invariants::invariants_enabled() {
            if let Err(e) = $check {
                panic!(concat!($($op)*, ": invariant violated: {}"), e);
            }
        }
    };
}
