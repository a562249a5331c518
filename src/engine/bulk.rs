//! Barrier-synchronous exchange engine.
//!
//! All peers collectively push, then collectively [`exchange`], then
//! collectively pop; [`proceed`] runs the endgame over a shared
//! `wait_done` row. Within one exchange every peer ships its entire send
//! row with one-sided puts in a randomized destination order, so no single
//! peer becomes the whole cohort's hot spot on the same step.
//!
//! [`exchange`]: BulkExchange::exchange
//! [`proceed`]: BulkExchange::proceed

use crate::debug_invariants::DebugInvariants;
use crate::engine::tile::TileRow;
use crate::engine::{shuffled_peers, ExchangeConfig, ExchangeEngine};
use crate::error::ExchangeError;
use crate::transport::Transport;

/// The barrier-synchronous engine. Construction, `exchange`, `proceed`,
/// `reset`, and `clear` are collective; `push`, `pop`, and `pull` are
/// purely local and never block.
pub struct BulkExchange<T: Transport> {
    transport: T,
    cfg: ExchangeConfig,
    peers: usize,
    me: usize,
    /// Outgoing staging row, one tile per destination.
    snd: TileRow,
    /// Symmetric receive row: tile `s` of our partition is written by peer `s`.
    rcv_data: T::Bytes,
    /// Item counts for the receive row; cell `s` is written by peer `s`.
    rcv_cnt: T::Words,
    /// Endgame row; cell `k` is written by peer `k` when it announces done.
    wait_done: T::Words,
    /// Local snapshot of `rcv_cnt`, taken once per exchange.
    rcv_avail: Vec<u64>,
    /// Items consumed so far from each receive tile.
    pop_cnt: Vec<u64>,
    /// Advisory: smallest receive tile index not known to be drained.
    first_ne_rcv: usize,
    notify_done: bool,
    last_popped: Option<usize>,
    pull_scratch: Vec<u8>,
}

impl<T: Transport> BulkExchange<T> {
    /// Collectively construct an engine with `buf_cnt` items of
    /// `item_size` bytes per (src, dst) tile. Every peer must call with
    /// identical arguments.
    pub fn try_new(transport: T, buf_cnt: u64, item_size: usize) -> Result<Self, ExchangeError> {
        let peers = transport.peer_count();
        let cfg = ExchangeConfig { buf_cnt, item_size }.validate(peers)?;
        let me = transport.self_id();
        let rcv_data = transport.alloc_bytes(peers * cfg.tile_bytes())?;
        let rcv_cnt = transport.alloc_words(peers)?;
        let wait_done = transport.alloc_words(peers)?;
        transport.barrier();
        Ok(Self {
            transport,
            cfg,
            peers,
            me,
            snd: TileRow::new(peers, buf_cnt, item_size),
            rcv_data,
            rcv_cnt,
            wait_done,
            rcv_avail: vec![0; peers],
            pop_cnt: vec![0; peers],
            first_ne_rcv: 0,
            notify_done: false,
            last_popped: None,
            pull_scratch: vec![0; item_size],
        })
    }

    /// Ship every staged tile to its destination and deliver whatever the
    /// rest of the cohort staged for us. Collective; blocks at an internal
    /// barrier. Undrained items from the previous round are discarded, so
    /// drain pops before calling this.
    pub fn exchange(&mut self) {
        // Entry barrier: nobody overwrites a receive tile a peer is still
        // draining from the previous round.
        self.transport.barrier();
        let tile_bytes = self.cfg.tile_bytes();
        for &dst in &shuffled_peers(&self.transport, self.peers) {
            let cnt = self.snd.count(dst);
            self.transport
                .word_store(dst, &self.rcv_cnt, self.me, cnt as i64);
            if cnt > 0 {
                self.transport
                    .put(dst, &self.rcv_data, self.me * tile_bytes, self.snd.staged(dst));
            }
            self.snd.take_count(dst);
        }
        self.transport.barrier();
        for src in 0..self.peers {
            self.rcv_avail[src] = self.transport.word_load(self.me, &self.rcv_cnt, src) as u64;
        }
        self.pop_cnt.fill(0);
        self.first_ne_rcv = 0;
        self.last_popped = None;
        crate::debug_invariants!(self.validate_invariants(), "BulkExchange::exchange");
    }

    /// Pop the next unread item from a specific source only.
    pub fn pop_from(&mut self, src: usize, out: &mut [u8]) -> bool {
        assert!(src < self.peers, "peer {} out of range", src);
        assert_eq!(out.len(), self.cfg.item_size);
        if self.pop_cnt[src] == self.rcv_avail[src] {
            return false;
        }
        self.read_item(src, out);
        true
    }

    /// Undo the last [`pop_from`](Self::pop_from) on `src`, exposing its
    /// newest consumed item again.
    pub fn unpop_from(&mut self, src: usize) {
        assert!(src < self.peers, "peer {} out of range", src);
        assert!(
            self.pop_cnt[src] > 0,
            "unpop from peer {} without a preceding pop",
            src
        );
        self.pop_cnt[src] -= 1;
        self.first_ne_rcv = self.first_ne_rcv.min(src);
        self.last_popped = None;
    }

    /// Collective teardown. The symmetric regions are released when every
    /// peer has dropped its handles.
    pub fn clear(self) {
        self.transport.barrier();
    }

    fn read_item(&mut self, src: usize, out: &mut [u8]) {
        let offset =
            src * self.cfg.tile_bytes() + self.pop_cnt[src] as usize * self.cfg.item_size;
        self.transport.get(self.me, &self.rcv_data, offset, out);
        self.pop_cnt[src] += 1;
        self.last_popped = Some(src);
    }

    fn inbound_drained(&self) -> bool {
        (0..self.peers).all(|s| self.pop_cnt[s] == self.rcv_avail[s])
    }
}

impl<T: Transport> ExchangeEngine for BulkExchange<T> {
    fn item_size(&self) -> usize {
        self.cfg.item_size
    }

    fn capacity(&self) -> u64 {
        self.cfg.buf_cnt
    }

    fn self_id(&self) -> usize {
        self.me
    }

    fn peer_count(&self) -> usize {
        self.peers
    }

    fn push(&mut self, item: &[u8], dst: usize) -> bool {
        assert!(dst < self.peers, "peer {} out of range", dst);
        self.snd.stage(dst, item)
    }

    fn pop(&mut self, out: &mut [u8]) -> Option<usize> {
        assert_eq!(out.len(), self.cfg.item_size);
        while self.first_ne_rcv < self.peers
            && self.pop_cnt[self.first_ne_rcv] == self.rcv_avail[self.first_ne_rcv]
        {
            self.first_ne_rcv += 1;
        }
        let src = (self.first_ne_rcv..self.peers)
            .find(|&s| self.pop_cnt[s] < self.rcv_avail[s])?;
        self.read_item(src, out);
        Some(src)
    }

    fn pull(&mut self) -> Option<(usize, &[u8])> {
        let mut scratch = std::mem::take(&mut self.pull_scratch);
        let src = self.pop(&mut scratch);
        self.pull_scratch = scratch;
        src.map(|s| (s, self.pull_scratch.as_slice()))
    }

    fn unpop(&mut self) {
        let src = self
            .last_popped
            .take()
            .expect("unpop without a preceding pop");
        self.pop_cnt[src] -= 1;
        self.first_ne_rcv = self.first_ne_rcv.min(src);
    }

    fn proceed(&mut self, done: bool) -> bool {
        if done && !self.notify_done {
            // Announce once: write our cell of the endgame row everywhere.
            for peer in 0..self.peers {
                self.transport.word_store(peer, &self.wait_done, self.me, 1);
            }
            self.notify_done = true;
        }
        let announced = (0..self.peers)
            .all(|k| self.transport.word_load(self.me, &self.wait_done, k) != 0);
        let ready = announced && self.inbound_drained() && self.snd.total_staged() == 0;
        // Decide collectively so every peer stops at the same call; a
        // locally-decided exit would strand the rest of the cohort at the
        // next exchange barrier.
        if self.transport.reduce_add(ready as i64) == self.peers as i64 {
            return false;
        }
        self.exchange();
        true
    }

    fn reset(&mut self) {
        self.transport.barrier();
        self.snd.clear_counts();
        self.rcv_avail.fill(0);
        self.pop_cnt.fill(0);
        self.first_ne_rcv = 0;
        self.notify_done = false;
        self.last_popped = None;
        for k in 0..self.peers {
            self.transport.word_store(self.me, &self.rcv_cnt, k, 0);
            self.transport.word_store(self.me, &self.wait_done, k, 0);
        }
        self.transport.barrier();
    }

    fn headroom(&self, dst: usize) -> u64 {
        assert!(dst < self.peers, "peer {} out of range", dst);
        self.snd.headroom(dst)
    }

    fn min_headroom(&self) -> u64 {
        self.snd.min_headroom()
    }
}

impl<T: Transport> DebugInvariants for BulkExchange<T> {
    fn validate_invariants(&self) -> Result<(), ExchangeError> {
        self.snd.validate_invariants()?;
        for peer in 0..self.peers {
            if self.rcv_avail[peer] > self.cfg.buf_cnt {
                return Err(ExchangeError::CursorOutOfBounds {
                    peer,
                    cnt: self.rcv_avail[peer],
                    cap: self.cfg.buf_cnt,
                });
            }
            if self.pop_cnt[peer] > self.rcv_avail[peer] {
                return Err(ExchangeError::CursorOutOfBounds {
                    peer,
                    cnt: self.pop_cnt[peer],
                    cap: self.rcv_avail[peer],
                });
            }
        }
        // The advisory hint never skips an undrained tile.
        for peer in 0..self.first_ne_rcv.min(self.peers) {
            if self.pop_cnt[peer] != self.rcv_avail[peer] {
                return Err(ExchangeError::CursorOutOfBounds {
                    peer,
                    cnt: self.pop_cnt[peer],
                    cap: self.rcv_avail[peer],
                });
            }
        }
        Ok(())
    }
}
