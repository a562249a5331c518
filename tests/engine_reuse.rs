mod util;
use util::*;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tile_exchange::prelude::*;

fn histogram_workload(me: usize, peers: usize) -> Vec<(i64, usize)> {
    let mut rng = SmallRng::seed_from_u64(3000 + me as u64);
    (0..200)
        .map(|_| {
            let item = rng.gen_range(0..1_000_000i64);
            (item, item as usize % peers)
        })
        .collect()
}

fn ring_workload(me: usize, peers: usize) -> Vec<(i64, usize)> {
    (0..10)
        .map(|i| (10 * me as i64 + i, (me + 1) % peers))
        .collect()
}

#[test]
fn bulk_reset_reuse_matches_fresh_engine() {
    let reused = run_spmd(3, 31, |t| {
        let me = t.self_id();
        let mut engine = BulkExchange::try_new(t, 4, 8).unwrap();
        drive_bulk(&mut engine, &histogram_workload(me, 3));
        engine.reset();
        drive_bulk(&mut engine, &ring_workload(me, 3))
    });
    let fresh = run_spmd(3, 31, |t| {
        let me = t.self_id();
        let mut engine = BulkExchange::try_new(t, 4, 8).unwrap();
        drive_bulk(&mut engine, &ring_workload(me, 3))
    });
    assert_eq!(reused, fresh);
}

#[test]
fn async_reset_reuse_matches_fresh_engine() {
    let reused = run_spmd(3, 32, |t| {
        let me = t.self_id();
        let mut engine = AsyncExchange::try_new(t, 4, 8).unwrap();
        drive_async(&mut engine, &histogram_workload(me, 3));
        engine.reset();
        drive_async(&mut engine, &ring_workload(me, 3))
    });
    let fresh = run_spmd(3, 32, |t| {
        let me = t.self_id();
        let mut engine = AsyncExchange::try_new(t, 4, 8).unwrap();
        drive_async(&mut engine, &ring_workload(me, 3))
    });
    assert_eq!(reused, fresh);
}

#[test]
fn repeated_reset_cycles_stay_clean() {
    run_spmd(2, 33, |t| {
        let me = t.self_id();
        let mut engine = AsyncExchange::try_new(t, 2, 8).unwrap();
        for round in 0..5i64 {
            let workload: Vec<(i64, usize)> =
                (0..6).map(|i| (round * 100 + i, 1 - me)).collect();
            let received = drive_async(&mut engine, &workload);
            let from = 1 - me;
            let want: Vec<(usize, i64)> =
                (0..6).map(|i| (from, round * 100 + i)).collect();
            assert_eq!(received, want, "round {round}");
            engine.reset();
        }
    });
}
