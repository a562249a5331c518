//! Barrier-free exchange engine.
//!
//! Each peer ships full tiles to any destination at any time with a
//! one-sided put, gated by a single credit bit per (src, dst) pair, and
//! announces every shipment through a slot of the destination's message
//! ring claimed with a remote fetch-and-add. The receiver drains announced
//! tiles in claim order and hands the credit back when a tile is empty, so
//! at most one shipment per ordered pair is ever in flight. Termination is
//! a count of final-shipment announcements: once every peer (self
//! included) has sent its last-flagged message and everything inbound is
//! drained, `proceed` reports the exchange finished.
//!
//! Nothing here blocks. Backpressure surfaces as a `false` from `push` or
//! `send`, and the caller's `while proceed { pop }` cycle is the progress
//! loop that frees the credits those calls are waiting on.

use std::collections::VecDeque;

use crate::debug_invariants::DebugInvariants;
use crate::engine::message::ShipMsg;
use crate::engine::tile::TileRow;
use crate::engine::{shuffled_peers, ExchangeConfig, ExchangeEngine};
use crate::error::ExchangeError;
use crate::transport::Transport;

/// A fully-received, not-yet-drained tile.
#[derive(Debug, Clone, Copy)]
struct QueuedTile {
    src: usize,
    cnt: u64,
}

/// The tile currently being drained.
#[derive(Debug, Clone, Copy)]
struct DrainingTile {
    src: usize,
    cnt: u64,
    pos: u64,
}

/// The barrier-free engine. Construction, `reset`, and `clear` are
/// collective; everything else is independent per peer.
pub struct AsyncExchange<T: Transport> {
    transport: T,
    cfg: ExchangeConfig,
    peers: usize,
    me: usize,
    /// Outgoing staging row, one tile per destination.
    snd: TileRow,
    /// Symmetric receive row: tile `s` of our partition is written by peer `s`.
    rcv_data: T::Bytes,
    /// Credit bits: word `d` of our partition is 1 iff we may ship to `d`.
    /// We clear it at ship time; `d` sets it back when it drains the tile.
    can_send: T::Words,
    /// Announcement ring; slots are claimed remotely via `num_msgs`.
    msg_queue: T::Words,
    /// Ring head: total announcements ever claimed on this peer.
    num_msgs: T::Words,
    ring_size: u64,
    ring_mask: u64,
    /// Ring tail: announcements consumed so far.
    num_popped: u64,
    /// Announced tiles waiting to be drained, in claim order.
    active: VecDeque<QueuedTile>,
    current: Option<DrainingTile>,
    /// Peers whose final shipment we have seen.
    num_done_sending: usize,
    all_done: bool,
    /// Destinations still owed our final shipment, once `done` was raised.
    last_pending: Option<Vec<usize>>,
    last_was_pop: bool,
    pull_scratch: Vec<u8>,
}

impl<T: Transport> AsyncExchange<T> {
    /// Collectively construct an engine with `buf_cnt` items of
    /// `item_size` bytes per (src, dst) tile. Every peer must call with
    /// identical arguments.
    pub fn try_new(transport: T, buf_cnt: u64, item_size: usize) -> Result<Self, ExchangeError> {
        let peers = transport.peer_count();
        let cfg = ExchangeConfig { buf_cnt, item_size }.validate(peers)?;
        let me = transport.self_id();
        let ring_size = (2 * peers as u64).next_power_of_two();
        let rcv_data = transport.alloc_bytes(peers * cfg.tile_bytes())?;
        let can_send = transport.alloc_words(peers)?;
        let msg_queue = transport.alloc_words(ring_size as usize)?;
        let num_msgs = transport.alloc_words(1)?;
        for dst in 0..peers {
            transport.word_store(me, &can_send, dst, 1);
        }
        transport.barrier();
        Ok(Self {
            transport,
            cfg,
            peers,
            me,
            snd: TileRow::new(peers, buf_cnt, item_size),
            rcv_data,
            can_send,
            msg_queue,
            num_msgs,
            ring_size,
            ring_mask: ring_size - 1,
            num_popped: 0,
            active: VecDeque::new(),
            current: None,
            num_done_sending: 0,
            all_done: false,
            last_pending: None,
            last_was_pop: false,
            pull_scratch: vec![0; item_size],
        })
    }

    /// Ship the staged tile for `dst` now. Returns false when the receiver
    /// has not yet drained our previous shipment; true when the tile was
    /// shipped or there was nothing to ship. Applications call this with
    /// `islast = false`; the endgame inside [`proceed`](Self::proceed)
    /// issues the final-flagged shipments itself.
    pub fn send(&mut self, dst: usize, islast: bool) -> bool {
        assert!(dst < self.peers, "peer {} out of range", dst);
        let cnt = self.snd.count(dst);
        if cnt == 0 && !islast {
            return true;
        }
        if self.transport.word_load(self.me, &self.can_send, dst) == 0 {
            return false;
        }
        if cnt > 0 {
            self.transport.put(
                dst,
                &self.rcv_data,
                self.me * self.cfg.tile_bytes(),
                self.snd.staged(dst),
            );
        }
        self.transport.word_store(self.me, &self.can_send, dst, 0);
        // The put above is fenced before this claim, so the receiver never
        // observes the announcement ahead of the data.
        let prior = self.transport.fetch_add(dst, &self.num_msgs, 0, 1) as u64;
        let slot = (prior & self.ring_mask) as usize;
        self.transport.word_store(
            dst,
            &self.msg_queue,
            slot,
            ShipMsg {
                count: cnt,
                sender: self.me,
                islast,
            }
            .pack(),
        );
        self.snd.take_count(dst);
        crate::debug_invariants!(self.validate_invariants(), "AsyncExchange::send");
        true
    }

    /// Collective teardown. The symmetric regions are released when every
    /// peer has dropped its handles.
    pub fn clear(self) {
        self.transport.barrier();
    }

    /// Consume new ring announcements in claim order, stopping at a slot
    /// whose message word has not landed yet.
    fn service_queue(&mut self) {
        let head = self.transport.word_load(self.me, &self.num_msgs, 0) as u64;
        crate::debug_invariants!(self.check_ring_occupancy(head), "AsyncExchange::service_queue");
        while self.num_popped < head {
            let slot = (self.num_popped & self.ring_mask) as usize;
            let word = self.transport.word_load(self.me, &self.msg_queue, slot);
            if word == 0 {
                break;
            }
            // Zero the slot so the ring can wrap over it.
            self.transport.word_store(self.me, &self.msg_queue, slot, 0);
            let msg = ShipMsg::unpack(word);
            if msg.islast {
                self.num_done_sending += 1;
                if self.num_done_sending == self.peers {
                    self.all_done = true;
                }
            }
            self.active.push_back(QueuedTile {
                src: msg.sender,
                cnt: msg.count,
            });
            self.num_popped += 1;
        }
    }

    /// Ensure `current` holds a tile with unread items, retiring exhausted
    /// and empty tiles along the way. Returns false when nothing inbound
    /// is consumable right now.
    fn activate(&mut self) -> bool {
        loop {
            if let Some(cur) = self.current {
                if cur.pos < cur.cnt {
                    return true;
                }
                self.current = None;
                self.retire(cur.src);
            }
            if self.active.is_empty() {
                self.service_queue();
            }
            match self.active.pop_front() {
                Some(tile) if tile.cnt > 0 => {
                    self.current = Some(DrainingTile {
                        src: tile.src,
                        cnt: tile.cnt,
                        pos: 0,
                    });
                    return true;
                }
                // Final shipments may be empty; hand the credit straight back.
                Some(tile) => self.retire(tile.src),
                None => return false,
            }
        }
    }

    /// Return the credit for a drained tile to its source.
    fn retire(&mut self, src: usize) {
        self.transport.word_store(src, &self.can_send, self.me, 1);
    }

    fn check_ring_occupancy(&self, head: u64) -> Result<(), ExchangeError> {
        let outstanding = head - self.num_popped;
        if outstanding > self.ring_size {
            return Err(ExchangeError::RingOverflow {
                outstanding,
                capacity: self.ring_size,
            });
        }
        Ok(())
    }
}

impl<T: Transport> ExchangeEngine for AsyncExchange<T> {
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
        assert!(
            self.last_pending.is_none(),
            "push after announcing done_pushing"
        );
        if self.snd.count(dst) == self.cfg.buf_cnt && !self.send(dst, false) {
            return false;
        }
        self.snd.stage(dst, item)
    }

    fn pop(&mut self, out: &mut [u8]) -> Option<usize> {
        assert_eq!(out.len(), self.cfg.item_size);
        if !self.activate() {
            return None;
        }
        let cur = self.current.expect("activate established a current tile");
        let offset =
            cur.src * self.cfg.tile_bytes() + cur.pos as usize * self.cfg.item_size;
        self.transport.get(self.me, &self.rcv_data, offset, out);
        if let Some(c) = self.current.as_mut() {
            c.pos += 1;
        }
        self.last_was_pop = true;
        Some(cur.src)
    }

    fn pull(&mut self) -> Option<(usize, &[u8])> {
        let mut scratch = std::mem::take(&mut self.pull_scratch);
        let src = self.pop(&mut scratch);
        self.pull_scratch = scratch;
        src.map(|s| (s, self.pull_scratch.as_slice()))
    }

    fn unpop(&mut self) {
        let cur = self
            .current
            .as_mut()
            .expect("unpop without a preceding pop");
        assert!(
            self.last_was_pop && cur.pos > 0,
            "unpop without a preceding pop"
        );
        cur.pos -= 1;
        self.last_was_pop = false;
    }

    fn proceed(&mut self, done: bool) -> bool {
        if done && self.last_pending.is_none() {
            // Flush in a randomized order so the cohort's endgame traffic
            // does not converge on peer 0 first.
            self.last_pending = Some(shuffled_peers(&self.transport, self.peers));
        }
        if let Some(mut pending) = self.last_pending.take() {
            pending.retain(|&dst| !self.send(dst, true));
            self.last_pending = Some(pending);
        }
        // Progress the inbound side even when the caller is only polling.
        self.activate();
        let flushed = self.last_pending.as_ref().map_or(false, |p| p.is_empty());
        let ring_idle =
            self.num_popped == self.transport.word_load(self.me, &self.num_msgs, 0) as u64;
        let drained = self.current.is_none() && self.active.is_empty() && ring_idle;
        !(flushed && self.all_done && drained)
    }

    fn reset(&mut self) {
        self.transport.barrier();
        self.snd.clear_counts();
        self.num_popped = 0;
        self.active.clear();
        self.current = None;
        self.num_done_sending = 0;
        self.all_done = false;
        self.last_pending = None;
        self.last_was_pop = false;
        self.transport.word_store(self.me, &self.num_msgs, 0, 0);
        for slot in 0..self.ring_size as usize {
            self.transport.word_store(self.me, &self.msg_queue, slot, 0);
        }
        for dst in 0..self.peers {
            self.transport.word_store(self.me, &self.can_send, dst, 1);
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

impl<T: Transport> DebugInvariants for AsyncExchange<T> {
    fn validate_invariants(&self) -> Result<(), ExchangeError> {
        self.snd.validate_invariants()?;
        if let Some(cur) = self.current {
            if cur.pos > cur.cnt || cur.cnt > self.cfg.buf_cnt {
                return Err(ExchangeError::CursorOutOfBounds {
                    peer: cur.src,
                    cnt: cur.pos.max(cur.cnt),
                    cap: self.cfg.buf_cnt,
                });
            }
        }
        if self.num_done_sending > self.peers {
            return Err(ExchangeError::DoneCountOverflow {
                seen: self.num_done_sending,
                peers: self.peers,
            });
        }
        let head = self.transport.word_load(self.me, &self.num_msgs, 0) as u64;
        self.check_ring_occupancy(head)
    }
}
