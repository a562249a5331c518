//! Outgoing staging row: one fixed-size tile per destination peer.
//!
//! A `TileRow` owns `peers` regions of `buf_cnt * item_size` bytes in a
//! single flat allocation plus a staged-item count per region. The engines
//! copy items in through [`TileRow::stage`] and ship whole prefixes out
//! through the transport.

use crate::debug_invariants::DebugInvariants;
use crate::error::ExchangeError;

pub(crate) struct TileRow {
    data: Vec<u8>,
    cnt: Vec<u64>,
    buf_cnt: u64,
    item_size: usize,
}

impl TileRow {
    pub fn new(peers: usize, buf_cnt: u64, item_size: usize) -> Self {
        Self {
            data: vec![0u8; peers * buf_cnt as usize * item_size],
            cnt: vec![0u64; peers],
            buf_cnt,
            item_size,
        }
    }

    #[inline]
    fn tile_bytes(&self) -> usize {
        self.buf_cnt as usize * self.item_size
    }

    /// Copy one item into the tile for `dst`. Returns false when the tile
    /// is full; the caller must ship it before retrying.
    pub fn stage(&mut self, dst: usize, item: &[u8]) -> bool {
        assert_eq!(
            item.len(),
            self.item_size,
            "item is {} bytes, engine was configured for {}",
            item.len(),
            self.item_size
        );
        if self.cnt[dst] == self.buf_cnt {
            return false;
        }
        let at = dst * self.tile_bytes() + self.cnt[dst] as usize * self.item_size;
        self.data[at..at + self.item_size].copy_from_slice(item);
        self.cnt[dst] += 1;
        crate::debug_invariants!(self.validate_invariants(), "TileRow::stage");
        true
    }

    /// Staged prefix of the tile for `dst`, ready to ship.
    pub fn staged(&self, dst: usize) -> &[u8] {
        let at = dst * self.tile_bytes();
        &self.data[at..at + self.cnt[dst] as usize * self.item_size]
    }

    #[inline]
    pub fn count(&self, dst: usize) -> u64 {
        self.cnt[dst]
    }

    #[inline]
    pub fn take_count(&mut self, dst: usize) -> u64 {
        std::mem::take(&mut self.cnt[dst])
    }

    /// Free item slots left in the tile for `dst`.
    #[inline]
    pub fn headroom(&self, dst: usize) -> u64 {
        self.buf_cnt - self.cnt[dst]
    }

    /// Minimum headroom across all destinations.
    pub fn min_headroom(&self) -> u64 {
        self.cnt
            .iter()
            .map(|&c| self.buf_cnt - c)
            .min()
            .unwrap_or(self.buf_cnt)
    }

    pub fn total_staged(&self) -> u64 {
        self.cnt.iter().sum()
    }

    pub fn clear_counts(&mut self) {
        self.cnt.fill(0);
    }
}

impl DebugInvariants for TileRow {
    fn validate_invariants(&self) -> Result<(), ExchangeError> {
        for (peer, &cnt) in self.cnt.iter().enumerate() {
            if cnt > self.buf_cnt {
                return Err(ExchangeError::CursorOutOfBounds {
                    peer,
                    cnt,
                    cap: self.buf_cnt,
                });
            }
        }
        Ok(())
    }
}
