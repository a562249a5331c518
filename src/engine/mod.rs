//! The two exchange engines and their shared item-level surface.
//!
//! Applications push fixed-size items addressed to peers, drain delivered
//! items, and call `proceed` until the cohort agrees the computation is
//! over. [`BulkExchange`] synchronizes the cohort at every collective
//! [`BulkExchange::exchange`]; [`AsyncExchange`] ships tiles peer-to-peer
//! with one-sided puts, a single credit bit per destination, and a
//! message ring, and never blocks.

pub mod bulk;
pub mod message;
pub mod nonblocking;
mod tile;

pub use bulk::BulkExchange;
pub use nonblocking::AsyncExchange;

use crate::error::ExchangeError;
use crate::transport::Transport;
use bytemuck::Pod;

/// Immutable engine configuration: `buf_cnt` items of `item_size` bytes
/// per (src, dst) tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeConfig {
    pub buf_cnt: u64,
    pub item_size: usize,
}

impl ExchangeConfig {
    /// Validate against the message-word field widths and the cohort size.
    pub fn validate(self, peers: usize) -> Result<Self, ExchangeError> {
        if self.buf_cnt == 0 {
            return Err(ExchangeError::ZeroBufferCapacity);
        }
        if self.item_size == 0 {
            return Err(ExchangeError::ZeroItemSize);
        }
        if self.buf_cnt > message::MAX_COUNT {
            return Err(ExchangeError::CapacityOverflow {
                cap: self.buf_cnt,
                max: message::MAX_COUNT,
            });
        }
        if peers > message::MAX_SENDER + 1 {
            return Err(ExchangeError::PeerCountOverflow { peers });
        }
        Ok(self)
    }

    /// Bytes in one (src, dst) tile.
    #[inline]
    pub fn tile_bytes(self) -> usize {
        self.buf_cnt as usize * self.item_size
    }
}

/// The operation surface shared by both engine variants.
///
/// `push`, `pop`, and `pull` never block; backpressure and exhaustion are
/// reported through the return value. `proceed` drives the termination
/// protocol: call it with the local done condition and keep draining until
/// it returns false on every peer.
pub trait ExchangeEngine {
    /// Item size in bytes, fixed at construction.
    fn item_size(&self) -> usize;
    /// Tile capacity in items, fixed at construction.
    fn capacity(&self) -> u64;
    /// This peer's rank.
    fn self_id(&self) -> usize;
    /// Cohort size.
    fn peer_count(&self) -> usize;

    /// Stage one item for `dst`. Returns false when the engine cannot
    /// accept it right now; drain inbound items and retry.
    fn push(&mut self, item: &[u8], dst: usize) -> bool;

    /// Copy the next delivered item into `out` and return its source, or
    /// `None` when nothing is currently consumable.
    fn pop(&mut self, out: &mut [u8]) -> Option<usize>;

    /// Like [`pop`](Self::pop) but hands back a borrowed view of the item.
    fn pull(&mut self) -> Option<(usize, &[u8])>;

    /// One-level undo of the last `pop`. Panics without a preceding pop.
    fn unpop(&mut self);

    /// One-level undo of the last `pull`.
    fn unpull(&mut self) {
        self.unpop();
    }

    /// Advance the termination protocol. `done` is this peer's "I will
    /// push no more" condition; once true it must stay true. Returns true
    /// while further work is possible anywhere in the cohort.
    fn proceed(&mut self, done: bool) -> bool;

    /// Collectively return the engine to its post-construction state
    /// without reallocating.
    fn reset(&mut self);

    /// Free item slots in the tile for `dst`.
    fn headroom(&self, dst: usize) -> u64;

    /// Minimum headroom across destinations; a caller that keeps pushes
    /// below this bound will not see them refused.
    fn min_headroom(&self) -> u64;

    /// Stage a typed record; its byte size must equal the item size.
    fn push_record<R: Pod>(&mut self, record: &R, dst: usize) -> bool
    where
        Self: Sized,
    {
        self.push(bytemuck::bytes_of(record), dst)
    }

    /// Pop into a typed record.
    fn pop_record<R: Pod>(&mut self) -> Option<(usize, R)>
    where
        Self: Sized,
    {
        let mut record = R::zeroed();
        let src = self.pop(bytemuck::bytes_of_mut(&mut record))?;
        Some((src, record))
    }
}

/// Fisher-Yates permutation of `0..n` drawn from the transport's PRNG
/// stream. Peers draw independently; correlated permutations are harmless.
pub(crate) fn shuffled_peers<T: Transport>(transport: &T, n: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    for i in (1..n).rev() {
        let j = transport.rand_index(i as u64 + 1) as usize;
        order.swap(i, j);
    }
    order
}
