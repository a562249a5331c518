#![allow(dead_code)]
use tile_exchange::prelude::*;
use tile_exchange::transport::{LocalCohort, LocalTransport};

/// Run one closure per rank on its own thread and collect the results in
/// rank order. Panics in any rank fail the test.
pub fn run_spmd<F, R>(peers: usize, seed: u64, body: F) -> Vec<R>
where
    F: Fn(LocalTransport) -> R + Sync,
    R: Send,
{
    let transports = LocalCohort::split(peers, seed);
    std::thread::scope(|scope| {
        let handles: Vec<_> = transports
            .into_iter()
            .map(|t| {
                let body = &body;
                scope.spawn(move || body(t))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank panicked"))
            .collect()
    })
}

/// Canonical bulk loop: push until refused, exchange, drain, proceed.
/// Returns the (source, item) pairs this rank received.
pub fn drive_bulk(
    engine: &mut BulkExchange<LocalTransport>,
    workload: &[(i64, usize)],
) -> Vec<(usize, i64)> {
    let mut next = 0;
    let mut received = Vec::new();
    while engine.proceed(next == workload.len()) {
        while next < workload.len() {
            let (item, dst) = workload[next];
            if !engine.push_record(&item, dst) {
                break;
            }
            next += 1;
        }
        engine.exchange();
        while let Some((src, item)) = engine.pop_record::<i64>() {
            received.push((src, item));
        }
    }
    received
}

/// Canonical barrier-free loop: push until refused, drain, proceed.
/// Returns the (source, item) pairs this rank received.
pub fn drive_async(
    engine: &mut AsyncExchange<LocalTransport>,
    workload: &[(i64, usize)],
) -> Vec<(usize, i64)> {
    let mut next = 0;
    let mut received = Vec::new();
    loop {
        while next < workload.len() {
            let (item, dst) = workload[next];
            if !engine.push_record(&item, dst) {
                break;
            }
            next += 1;
        }
        let mut progressed = false;
        while let Some((src, item)) = engine.pop_record::<i64>() {
            received.push((src, item));
            progressed = true;
        }
        if !engine.proceed(next == workload.len()) {
            break;
        }
        if !progressed {
            std::thread::yield_now();
        }
    }
    received
}

/// Assert vec is a permutation of another vec (order-agnostic).
pub fn assert_permutation<T: Ord + Copy + std::fmt::Debug>(got: &[T], want: &[T]) {
    let mut a = got.to_vec();
    a.sort_unstable();
    let mut b = want.to_vec();
    b.sort_unstable();
    assert_eq!(a, b, "not a permutation\n got={:?}\nwant={:?}", got, want);
}
