//! ExchangeError: unified error type for tile-exchange public APIs.
//!
//! Recoverable conditions (configuration rejects, collective allocation
//! mismatches, invariant validation failures) surface through this type.
//! Backpressure is not an error: `push` and `send` report it through their
//! return value. Out-of-range peers and cursor misuse are programmer errors
//! and panic, matching the engine contract.

use thiserror::Error;

/// Unified error type for tile-exchange operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// Buffer capacity of zero items is invalid.
    #[error("buffer capacity must be at least one item")]
    ZeroBufferCapacity,
    /// Item size of zero bytes is invalid.
    #[error("item size must be at least one byte")]
    ZeroItemSize,
    /// Buffer capacity does not fit the 32-bit count field of a ship message.
    #[error("buffer capacity {cap} exceeds the message count field (max {max})")]
    CapacityOverflow { cap: u64, max: u64 },
    /// Peer count does not fit the 31-bit sender field of a ship message.
    #[error("peer count {peers} exceeds the message sender field")]
    PeerCountOverflow { peers: usize },
    /// A collective symmetric allocation was called with differing lengths.
    #[error("symmetric allocation #{region}: this peer asked for {got} bytes, cohort allocated {expected}")]
    AllocationMismatch {
        region: usize,
        expected: usize,
        got: usize,
    },
    /// A staging or receive cursor left its tile.
    #[error("cursor for peer {peer} is {cnt}, tile capacity is {cap}")]
    CursorOutOfBounds { peer: usize, cnt: u64, cap: u64 },
    /// More ship messages outstanding than the ring can hold.
    #[error("message ring holds {outstanding} undrained announcements, capacity is {capacity}")]
    RingOverflow { outstanding: u64, capacity: u64 },
    /// Endgame counter exceeded the cohort size.
    #[error("done-sending counter reached {seen}, cohort has {peers} peers")]
    DoneCountOverflow { seen: usize, peers: usize },
}
