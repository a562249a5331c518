//! Transport abstraction for one-sided communication over a partitioned
//! shared address space.
//!
//! The exchange engines never talk to peers directly; they drive the
//! [`Transport`] trait, which provides symmetric allocation, one-sided
//! byte puts/gets, 64-bit remote atomics, a collective barrier, and a few
//! collective reductions. One backend ships with the crate:
//! [`LocalCohort`](local::LocalCohort), an in-process shared-memory cohort
//! for thread-per-rank SPMD runs. RDMA/PGAS backends implement the same
//! trait out of tree.
//!
//! Ordering contract (load-bearing for the barrier-free engine): a `put`
//! into peer `d` followed by a `fetch_add` or `word_store` on `d` is
//! observed by `d` in that order — data before announcement. Word stores
//! are release, word loads acquire, read-modify-writes acq-rel.

pub mod local;

pub use local::{LocalCohort, LocalTransport, SymBytes, SymWords};

use crate::error::ExchangeError;

/// One-sided communication over a partitioned shared address space.
///
/// Every peer runs the same program, so collective calls (`alloc_bytes`,
/// `alloc_words`, `barrier`, the reductions) must be issued in the same
/// order with the same arguments on every peer.
pub trait Transport {
    /// Handle to a symmetric byte region; every peer owns one partition.
    type Bytes: Clone;
    /// Handle to a symmetric region of 64-bit atomic words.
    type Words: Clone;

    /// Rank of this peer in `[0, peer_count)`.
    fn self_id(&self) -> usize;
    /// Number of peers in the cohort.
    fn peer_count(&self) -> usize;

    /// Collectively allocate a symmetric byte region; each peer owns `len`
    /// bytes. Every peer must pass the same `len`.
    fn alloc_bytes(&self, len: usize) -> Result<Self::Bytes, ExchangeError>;
    /// Collectively allocate a symmetric word region; each peer owns `len`
    /// zero-initialized 64-bit words.
    fn alloc_words(&self, len: usize) -> Result<Self::Words, ExchangeError>;

    /// One-sided write of `bytes` into peer `dst`'s partition at `offset`.
    fn put(&self, dst: usize, region: &Self::Bytes, offset: usize, bytes: &[u8]);
    /// One-sided read from peer `src`'s partition at `offset` into `out`.
    fn get(&self, src: usize, region: &Self::Bytes, offset: usize, out: &mut [u8]);

    /// Acquire-load word `idx` on peer `peer`.
    fn word_load(&self, peer: usize, region: &Self::Words, idx: usize) -> i64;
    /// Release-store `val` into word `idx` on peer `peer`.
    fn word_store(&self, peer: usize, region: &Self::Words, idx: usize, val: i64);
    /// Atomic fetch-and-add on word `idx` of peer `peer`; returns the prior value.
    fn fetch_add(&self, peer: usize, region: &Self::Words, idx: usize, delta: i64) -> i64;
    /// Atomic compare-and-swap on word `idx` of peer `peer`; returns the prior value.
    fn compare_swap(
        &self,
        peer: usize,
        region: &Self::Words,
        idx: usize,
        expected: i64,
        new: i64,
    ) -> i64;

    /// Collective fence. All puts issued before the barrier are globally
    /// visible after every peer returns from it.
    fn barrier(&self);

    /// Collective sum of one contribution per peer.
    fn reduce_add(&self, v: i64) -> i64;
    /// Collective max of one contribution per peer.
    fn reduce_max(&self, v: i64) -> i64;
    /// Exclusive prefix sum: the sum of contributions from peers with a
    /// smaller id.
    fn prefix_add(&self, v: i64) -> i64;

    /// Next value from this peer's deterministic PRNG stream, uniform in
    /// `[0, upper)`. Returns 0 when `upper` is 0.
    fn rand_index(&self, upper: u64) -> u64;
}
