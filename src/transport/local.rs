//! In-process shared-memory cohort: one [`LocalTransport`] per rank, all
//! backed by a shared arena of atomic slabs.
//!
//! This is the thread-per-rank backend used by the test suite and by
//! applications that run their SPMD cohort as threads of one process.
//! Byte partitions are `AtomicU8` slabs and word partitions `AtomicI64`
//! slabs, so one-sided puts and remote atomics are ordinary atomic
//! operations; the put/announce ordering contract is met with a release
//! fence at the end of every `put` paired with acquire loads on the
//! observing side.

use std::cell::{Cell, RefCell};
use std::sync::atomic::{fence, AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::error::ExchangeError;
use crate::transport::Transport;

/// Steele/Vigna SplitMix64 mixer used for deterministic per-rank seeding.
#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[inline]
fn mix_seed(cohort_seed: u64, rank: usize) -> u64 {
    let x = cohort_seed
        ^ 0xD6E8_FEB8_6659_FD93u64
        ^ (rank as u64).wrapping_mul(0x9E37_79B1_85EB_CA87);
    splitmix64(x)
}

struct EpochBarrier {
    state: Mutex<BarrierState>,
    cv: Condvar,
}

struct BarrierState {
    arrived: usize,
    epoch: u64,
}

impl EpochBarrier {
    fn new() -> Self {
        Self {
            state: Mutex::new(BarrierState {
                arrived: 0,
                epoch: 0,
            }),
            cv: Condvar::new(),
        }
    }

    fn wait(&self, size: usize) {
        let mut s = self.state.lock().expect("barrier poisoned");
        let e = s.epoch;
        s.arrived += 1;
        if s.arrived == size {
            s.arrived = 0;
            s.epoch += 1;
            self.cv.notify_all();
        } else {
            while s.epoch == e {
                s = self.cv.wait(s).expect("barrier poisoned");
            }
        }
    }
}

struct ByteRegion {
    per_peer: Vec<Box<[AtomicU8]>>,
    partition_len: usize,
}

struct WordRegion {
    per_peer: Vec<Box<[AtomicI64]>>,
    partition_len: usize,
}

fn byte_slab(len: usize) -> Box<[AtomicU8]> {
    (0..len).map(|_| AtomicU8::new(0)).collect()
}

fn word_slab(len: usize) -> Box<[AtomicI64]> {
    (0..len).map(|_| AtomicI64::new(0)).collect()
}

/// Handle to a symmetric byte region of a [`LocalCohort`].
#[derive(Clone)]
pub struct SymBytes {
    region: Arc<ByteRegion>,
}

/// Handle to a symmetric word region of a [`LocalCohort`].
#[derive(Clone)]
pub struct SymWords {
    region: Arc<WordRegion>,
}

struct CohortShared {
    size: usize,
    seed: u64,
    barrier: EpochBarrier,
    /// Scratch row for the collective reductions; one slot per rank.
    reduce_scratch: Box<[AtomicI64]>,
    /// Symmetric regions in collective allocation order. Every rank issues
    /// the same allocation sequence, so index n means the same region on
    /// every rank.
    byte_table: Mutex<Vec<Arc<ByteRegion>>>,
    word_table: Mutex<Vec<Arc<WordRegion>>>,
}

/// An in-process SPMD cohort. [`LocalCohort::split`] hands out one
/// [`LocalTransport`] per rank; move each into its own thread.
pub struct LocalCohort;

impl LocalCohort {
    /// Create the transports of a `size`-rank cohort sharing one arena.
    /// `seed` drives every rank's deterministic PRNG stream.
    pub fn split(size: usize, seed: u64) -> Vec<LocalTransport> {
        assert!(size > 0, "cohort needs at least one rank");
        let shared = Arc::new(CohortShared {
            size,
            seed,
            barrier: EpochBarrier::new(),
            reduce_scratch: word_slab(size),
            byte_table: Mutex::new(Vec::new()),
            word_table: Mutex::new(Vec::new()),
        });
        (0..size)
            .map(|rank| LocalTransport {
                shared: Arc::clone(&shared),
                rank,
                rng: RefCell::new(SmallRng::seed_from_u64(mix_seed(seed, rank))),
                next_byte_region: Cell::new(0),
                next_word_region: Cell::new(0),
            })
            .collect()
    }
}

/// One rank's endpoint into a [`LocalCohort`].
pub struct LocalTransport {
    shared: Arc<CohortShared>,
    rank: usize,
    rng: RefCell<SmallRng>,
    next_byte_region: Cell<usize>,
    next_word_region: Cell<usize>,
}

impl LocalTransport {
    /// Seed this cohort was created with.
    pub fn seed(&self) -> u64 {
        self.shared.seed
    }

    fn check_peer(&self, peer: usize) {
        assert!(
            peer < self.shared.size,
            "peer {} out of range (cohort size {})",
            peer,
            self.shared.size
        );
    }
}

impl Transport for LocalTransport {
    type Bytes = SymBytes;
    type Words = SymWords;

    fn self_id(&self) -> usize {
        self.rank
    }

    fn peer_count(&self) -> usize {
        self.shared.size
    }

    fn alloc_bytes(&self, len: usize) -> Result<SymBytes, ExchangeError> {
        let idx = self.next_byte_region.get();
        self.next_byte_region.set(idx + 1);
        let mut table = self.shared.byte_table.lock().expect("region table poisoned");
        if let Some(existing) = table.get(idx) {
            if existing.partition_len != len {
                return Err(ExchangeError::AllocationMismatch {
                    region: idx,
                    expected: existing.partition_len,
                    got: len,
                });
            }
            return Ok(SymBytes {
                region: Arc::clone(existing),
            });
        }
        // Ranks issue identical allocation sequences, so the first rank to
        // arrive at index n creates it and the rest attach.
        debug_assert_eq!(idx, table.len());
        let region = Arc::new(ByteRegion {
            per_peer: (0..self.shared.size).map(|_| byte_slab(len)).collect(),
            partition_len: len,
        });
        table.push(Arc::clone(&region));
        Ok(SymBytes { region })
    }

    fn alloc_words(&self, len: usize) -> Result<SymWords, ExchangeError> {
        let idx = self.next_word_region.get();
        self.next_word_region.set(idx + 1);
        let mut table = self.shared.word_table.lock().expect("region table poisoned");
        if let Some(existing) = table.get(idx) {
            if existing.partition_len != len {
                return Err(ExchangeError::AllocationMismatch {
                    region: idx,
                    expected: existing.partition_len,
                    got: len,
                });
            }
            return Ok(SymWords {
                region: Arc::clone(existing),
            });
        }
        debug_assert_eq!(idx, table.len());
        let region = Arc::new(WordRegion {
            per_peer: (0..self.shared.size).map(|_| word_slab(len)).collect(),
            partition_len: len,
        });
        table.push(Arc::clone(&region));
        Ok(SymWords { region })
    }

    fn put(&self, dst: usize, region: &SymBytes, offset: usize, bytes: &[u8]) {
        self.check_peer(dst);
        let slab = &region.region.per_peer[dst];
        assert!(
            offset + bytes.len() <= region.region.partition_len,
            "put of {} bytes at {} leaves the {}-byte partition",
            bytes.len(),
            offset,
            region.region.partition_len
        );
        for (i, b) in bytes.iter().enumerate() {
            slab[offset + i].store(*b, Ordering::Relaxed);
        }
        // Pairs with the acquire on whichever word op announces this data.
        fence(Ordering::Release);
    }

    fn get(&self, src: usize, region: &SymBytes, offset: usize, out: &mut [u8]) {
        self.check_peer(src);
        let slab = &region.region.per_peer[src];
        assert!(
            offset + out.len() <= region.region.partition_len,
            "get of {} bytes at {} leaves the {}-byte partition",
            out.len(),
            offset,
            region.region.partition_len
        );
        fence(Ordering::Acquire);
        for (i, b) in out.iter_mut().enumerate() {
            *b = slab[offset + i].load(Ordering::Relaxed);
        }
    }

    fn word_load(&self, peer: usize, region: &SymWords, idx: usize) -> i64 {
        self.check_peer(peer);
        region.region.per_peer[peer][idx].load(Ordering::Acquire)
    }

    fn word_store(&self, peer: usize, region: &SymWords, idx: usize, val: i64) {
        self.check_peer(peer);
        region.region.per_peer[peer][idx].store(val, Ordering::Release);
    }

    fn fetch_add(&self, peer: usize, region: &SymWords, idx: usize, delta: i64) -> i64 {
        self.check_peer(peer);
        region.region.per_peer[peer][idx].fetch_add(delta, Ordering::AcqRel)
    }

    fn compare_swap(
        &self,
        peer: usize,
        region: &SymWords,
        idx: usize,
        expected: i64,
        new: i64,
    ) -> i64 {
        self.check_peer(peer);
        match region.region.per_peer[peer][idx].compare_exchange(
            expected,
            new,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(prior) => prior,
            Err(prior) => prior,
        }
    }

    fn barrier(&self) {
        self.shared.barrier.wait(self.shared.size);
    }

    fn reduce_add(&self, v: i64) -> i64 {
        self.shared.reduce_scratch[self.rank].store(v, Ordering::Release);
        self.barrier();
        let sum = self
            .shared
            .reduce_scratch
            .iter()
            .map(|a| a.load(Ordering::Acquire))
            .sum();
        // Second barrier so the scratch row can be reused by the next
        // collective without trampling a slow reader.
        self.barrier();
        sum
    }

    fn reduce_max(&self, v: i64) -> i64 {
        self.shared.reduce_scratch[self.rank].store(v, Ordering::Release);
        self.barrier();
        let max = self
            .shared
            .reduce_scratch
            .iter()
            .map(|a| a.load(Ordering::Acquire))
            .max()
            .unwrap_or(i64::MIN);
        self.barrier();
        max
    }

    fn prefix_add(&self, v: i64) -> i64 {
        self.shared.reduce_scratch[self.rank].store(v, Ordering::Release);
        self.barrier();
        let sum = self
            .shared
            .reduce_scratch
            .iter()
            .take(self.rank)
            .map(|a| a.load(Ordering::Acquire))
            .sum();
        self.barrier();
        sum
    }

    fn rand_index(&self, upper: u64) -> u64 {
        if upper == 0 {
            return 0;
        }
        self.rng.borrow_mut().gen_range(0..upper)
    }
}
