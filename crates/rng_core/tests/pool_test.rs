use std::collections::HashSet;

use proptest::prelude::*;
use rng_core::{
    run_ranks, Communicator, PrimeTable, RandomConfig, SplitMix, StreamEngine, StreamPool,
    Xoshiro512,
};

fn seeds_and_first_draws(processes: usize, threads: usize, seed: i64) -> Vec<(u64, u64)> {
    run_ranks(processes, |comm| {
        let mut pool = StreamPool::<Xoshiro512>::new();
        pool.initialize_all(&comm, &RandomConfig::with_seed(seed), threads)
            .unwrap();
        let master = pool.master_identity().unwrap();
        let mut out = vec![(master.seed, pool.master_mut().next_u64())];
        let seeds: Vec<u64> = pool.child_identities().iter().map(|id| id.seed).collect();
        for (child, seed) in pool.children_mut().iter_mut().zip(seeds) {
            out.push((seed, child.next_u64()));
        }
        out
    })
    .into_iter()
    .flatten()
    .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn every_stream_in_a_job_is_distinct(
        processes in 1usize..5,
        threads in 1usize..5,
        seed in 0i64..1_024,
    ) {
        let streams = seeds_and_first_draws(processes, threads, seed);
        prop_assert_eq!(streams.len(), processes * (threads + 1));

        let seeds: HashSet<u64> = streams.iter().map(|(seed, _)| *seed).collect();
        prop_assert_eq!(seeds.len(), streams.len());
        let draws: HashSet<u64> = streams.iter().map(|(_, draw)| *draw).collect();
        prop_assert_eq!(draws.len(), streams.len());
    }
}

#[test]
fn two_process_layout_uses_consecutive_primes() {
    // Offset 0, two processes, two threads: masters take primes 0 and 1,
    // rank 0 children take 2 and 3, rank 1 children take 4 and 5.
    let mut primes = PrimeTable::new();
    let expected: Vec<u64> = primes.get(0, 6);
    let layout = run_ranks(2, |comm| {
        let mut pool = StreamPool::<SplitMix>::new();
        pool.initialize_all(&comm, &RandomConfig::with_seed(0), 2)
            .unwrap();
        let master = pool.master_identity().unwrap().seed;
        let children: Vec<u64> = pool.child_identities().iter().map(|id| id.seed).collect();
        (comm.rank(), master, children)
    });

    assert_eq!(layout[0], (0, expected[0], vec![expected[2], expected[3]]));
    assert_eq!(layout[1], (1, expected[1], vec![expected[4], expected[5]]));
    assert_eq!(expected, vec![3, 5, 7, 11, 13, 17]);
}

#[test]
fn same_seed_reproduces_the_job() {
    assert_eq!(
        seeds_and_first_draws(3, 2, 77),
        seeds_and_first_draws(3, 2, 77)
    );
    assert_ne!(
        seeds_and_first_draws(3, 2, 77),
        seeds_and_first_draws(3, 2, 78)
    );
}

#[test]
fn large_seeds_wrap_into_the_offset_range() {
    let offsets = run_ranks(2, |comm| {
        let mut pool = StreamPool::<SplitMix>::new();
        pool.initialize_all(&comm, &RandomConfig::with_seed(1_024 + 9), 1)
            .unwrap();
        pool.offset()
    });
    assert_eq!(offsets, vec![9, 9]);
}

#[test]
fn growing_reseeds_children_from_the_same_layout() {
    let mut pool = StreamPool::<Xoshiro512>::new();
    let comm = rng_core::Solo;
    pool.initialize_all(&comm, &RandomConfig::with_seed(12), 2)
        .unwrap();
    let before: Vec<u64> = pool.child_identities().iter().map(|id| id.seed).collect();

    pool.grow_pool_to(&comm, 4).unwrap();
    let after: Vec<u64> = pool.child_identities().iter().map(|id| id.seed).collect();
    assert_eq!(pool.threads(), 4);
    assert_eq!(after.len(), 4);
    assert_eq!(after[..2], before[..]);
    assert_eq!(comm.size(), 1);
}
