mod util;
use util::*;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tile_exchange::prelude::*;

#[test]
fn histogram_of_mod() {
    let results = run_spmd(4, 21, |t| {
        let me = t.self_id();
        let mut rng = SmallRng::seed_from_u64(2000 + me as u64);
        let workload: Vec<(i64, usize)> = (0..1000)
            .map(|_| {
                let item = rng.gen_range(0..1_000_000i64);
                (item, item as usize % 4)
            })
            .collect();
        let mut engine = AsyncExchange::try_new(t, 16, 8).unwrap();
        let received = drive_async(&mut engine, &workload);
        for &(_src, item) in &received {
            assert_eq!(item as usize % 4, me);
        }
        received.len()
    });
    assert_eq!(results.iter().sum::<usize>(), 4000);
}

#[test]
fn ring_permutation_delivers_in_order() {
    let results = run_spmd(3, 22, |t| {
        let me = t.self_id();
        let workload: Vec<(i64, usize)> = (0..10)
            .map(|i| (10 * me as i64 + i, (me + 1) % 3))
            .collect();
        let mut engine = AsyncExchange::try_new(t, 4, 8).unwrap();
        drive_async(&mut engine, &workload)
    });
    for (rank, received) in results.iter().enumerate() {
        let from = (rank + 2) % 3;
        let want: Vec<(usize, i64)> = (0..10).map(|i| (from, 10 * from as i64 + i)).collect();
        assert_eq!(*received, want, "rank {rank}");
    }
}

#[test]
fn self_loopback_single_peer() {
    let results = run_spmd(1, 23, |t| {
        let workload: Vec<(i64, usize)> = (0..100).map(|i| (i, 0)).collect();
        let mut engine = AsyncExchange::try_new(t, 8, 8).unwrap();
        drive_async(&mut engine, &workload)
    });
    let want: Vec<(usize, i64)> = (0..100).map(|i| (0, i)).collect();
    assert_eq!(results[0], want);
}

#[test]
fn single_item_tiles_ship_on_every_push() {
    let results = run_spmd(2, 24, |t| {
        let me = t.self_id();
        let workload: Vec<(i64, usize)> = (0..20).map(|i| (me as i64 * 100 + i, 1 - me)).collect();
        let mut engine = AsyncExchange::try_new(t, 1, 8).unwrap();
        drive_async(&mut engine, &workload)
    });
    for (rank, received) in results.iter().enumerate() {
        let from = 1 - rank;
        let want: Vec<(usize, i64)> = (0..20).map(|i| (from, from as i64 * 100 + i)).collect();
        assert_eq!(*received, want);
    }
}

#[test]
fn backpressure_with_a_stalled_receiver() {
    // Rank 0 pushes 10 items at rank 1 through 2-item tiles while rank 1
    // refuses to pop until backpressure has hit rank 0: one shipped tile
    // plus one staged tile is all the window holds, so pushes must get
    // refused, and every item must still arrive once rank 1 drains.
    let saw_backpressure = Arc::new(AtomicBool::new(false));
    let results = {
        let saw_backpressure = Arc::clone(&saw_backpressure);
        run_spmd(2, 25, |t| {
            let me = t.self_id();
            let mut engine = AsyncExchange::try_new(t, 2, 8).unwrap();
            let mut received = Vec::new();
            if me == 0 {
                let mut refused = 0u32;
                let mut next = 0i64;
                while next < 10 {
                    if engine.push_record(&next, 1) {
                        next += 1;
                    } else {
                        refused += 1;
                        saw_backpressure.store(true, Ordering::Release);
                        std::thread::yield_now();
                    }
                }
                assert!(refused > 0, "a 2-item credit window cannot absorb 10 pushes");
                while engine.proceed(true) {
                    let mut sink = [0u8; 8];
                    while engine.pop(&mut sink).is_some() {}
                    std::thread::yield_now();
                }
            } else {
                while !saw_backpressure.load(Ordering::Acquire) {
                    std::thread::yield_now();
                }
                loop {
                    while let Some((src, item)) = engine.pop_record::<i64>() {
                        received.push((src, item));
                    }
                    if !engine.proceed(true) {
                        break;
                    }
                    std::thread::yield_now();
                }
            }
            received
        })
    };
    let want: Vec<(usize, i64)> = (0..10).map(|i| (0, i)).collect();
    assert_eq!(results[1], want);
}

#[test]
fn termination_race_with_a_late_sender() {
    // Seven peers are done immediately; rank 0 keeps pushing 50 items to
    // rank 3. Rank 3 must not finish before it drained all 50, and nobody
    // finishes before hearing a final shipment from all 8 peers.
    let results = run_spmd(8, 26, |t| {
        let me = t.self_id();
        let workload: Vec<(i64, usize)> = if me == 0 {
            (0..50).map(|i| (i, 3)).collect()
        } else {
            Vec::new()
        };
        let mut engine = AsyncExchange::try_new(t, 4, 8).unwrap();
        drive_async(&mut engine, &workload)
    });
    let want: Vec<(usize, i64)> = (0..50).map(|i| (0, i)).collect();
    assert_eq!(results[3], want);
    for (rank, received) in results.iter().enumerate() {
        if rank != 3 {
            assert!(received.is_empty(), "rank {rank} received stray items");
        }
    }
}

#[test]
fn explicit_send_ships_a_partial_tile() {
    run_spmd(2, 27, |t| {
        let me = t.self_id();
        let mut engine = AsyncExchange::try_new(t, 8, 8).unwrap();
        if me == 0 {
            engine.push_record(&7i64, 1);
            // Nothing staged for rank 0, so this is a no-op success.
            assert!(engine.send(0, false));
            // Partial tile for rank 1 goes out on request.
            assert!(engine.send(1, false));
            // The credit is gone until rank 1 drains.
            engine.push_record(&8i64, 1);
            assert!(!engine.send(1, false));
        }
        let mut received = Vec::new();
        loop {
            while let Some((src, item)) = engine.pop_record::<i64>() {
                received.push((src, item));
            }
            if !engine.proceed(true) {
                break;
            }
            std::thread::yield_now();
        }
        if me == 1 {
            assert_eq!(received, vec![(0, 7), (0, 8)]);
        }
    });
}

#[test]
fn pop_unpop_round_trip() {
    run_spmd(2, 28, |t| {
        let me = t.self_id();
        let mut engine = AsyncExchange::try_new(t, 4, 8).unwrap();
        if me == 0 {
            engine.push_record(&41i64, 1);
            engine.push_record(&42i64, 1);
            assert!(engine.send(1, false));
        }
        let mut received = Vec::new();
        loop {
            if me == 1 && received.is_empty() {
                if let Some((src, first)) = engine.pop_record::<i64>() {
                    assert_eq!((src, first), (0, 41));
                    engine.unpop();
                    // The same item comes back after the undo.
                    assert_eq!(engine.pop_record::<i64>().unwrap(), (0, 41));
                    received.push((src, first));

                    let (src, view) = engine.pull().unwrap();
                    assert_eq!(src, 0);
                    assert_eq!(view, 42i64.to_ne_bytes());
                    engine.unpull();
                    let (_, view) = engine.pull().unwrap();
                    assert_eq!(view, 42i64.to_ne_bytes());
                    received.push((0, 42));
                }
            }
            while let Some((src, item)) = engine.pop_record::<i64>() {
                received.push((src, item));
            }
            if !engine.proceed(true) {
                break;
            }
            std::thread::yield_now();
        }
        if me == 1 {
            assert_eq!(received, vec![(0, 41), (0, 42)]);
        }
    });
}

#[test]
fn headroom_tracks_staging() {
    run_spmd(2, 29, |t| {
        let me = t.self_id();
        let mut engine = AsyncExchange::try_new(t, 4, 8).unwrap();
        if me == 0 {
            assert_eq!(engine.min_headroom(), 4);
            engine.push_record(&1i64, 1);
            engine.push_record(&2i64, 1);
            assert_eq!(engine.headroom(1), 2);
            assert_eq!(engine.min_headroom(), 2);
        }
        let mut sink = [0u8; 8];
        loop {
            while engine.pop(&mut sink).is_some() {}
            if !engine.proceed(true) {
                break;
            }
            std::thread::yield_now();
        }
    });
}
