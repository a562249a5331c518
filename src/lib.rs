//! # tile-exchange
//!
//! tile-exchange is a buffered all-to-all message-exchange library for SPMD
//! programs running across a fixed cohort of peer ranks. Applications push
//! small fixed-size work items addressed to remote peers; the library
//! aggregates them into per-destination tiles, ships whole tiles in bulk
//! over a one-sided shared-address-space transport, delivers them as
//! consumable streams, and runs a termination protocol that lets the whole
//! cohort agree the computation is finished.
//!
//! ## Features
//! - Two engines behind one item-level surface: the barrier-synchronous
//!   [`BulkExchange`](engine::BulkExchange) and the barrier-free
//!   [`AsyncExchange`](engine::AsyncExchange) with credit-based flow
//!   control and a lock-free announcement ring
//! - Pluggable one-sided transports via the
//!   [`Transport`](transport::Transport) trait, with an in-process
//!   thread-per-rank backend ([`LocalCohort`](transport::LocalCohort))
//!   included
//! - Typed push/pop over the byte-oriented surface through `bytemuck::Pod`
//! - Per-source FIFO delivery, single-shipment-in-flight flow control, and
//!   cooperative termination detection
//!
//! ## Usage
//! Add `tile-exchange` as a dependency in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tile-exchange = "0.1"
//! # Optional features:
//! # features = ["check-invariants"]
//! ```
//!
//! Every rank runs the same program: push until refused, drain pops, and
//! keep calling `proceed` until it returns false everywhere.
//!
//! ```rust
//! use tile_exchange::prelude::*;
//!
//! let transport = LocalCohort::split(1, 42).pop().unwrap();
//! let mut engine = BulkExchange::try_new(transport, 8, 8).unwrap();
//!
//! let mut sent = 0u64;
//! let mut got = Vec::new();
//! while engine.proceed(sent == 100) {
//!     while sent < 100 {
//!         if !engine.push_record(&sent, 0) {
//!             break;
//!         }
//!         sent += 1;
//!     }
//!     engine.exchange();
//!     while let Some((_src, item)) = engine.pop_record::<u64>() {
//!         got.push(item);
//!     }
//! }
//! assert_eq!(got, (0..100).collect::<Vec<u64>>());
//! ```

pub mod debug_invariants;
pub mod engine;
pub mod error;
pub mod transport;

/// A convenient prelude importing the most-used traits & types.
pub mod prelude {
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::engine::{AsyncExchange, BulkExchange, ExchangeConfig, ExchangeEngine};
    pub use crate::error::ExchangeError;
    pub use crate::transport::{LocalCohort, LocalTransport, Transport};
}
