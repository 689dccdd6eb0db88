use std::io;
use std::sync::{Arc, Mutex};

use rng_core::checkpoint::{
    self, checkpoint_path, read_legacy, write_legacy, Restore, LEGACY_SUFFIX, STORE_SUFFIX,
};
use rng_core::store::Archive;
use rng_core::{
    run_ranks, ChaCha, Communicator, FileProvider, RandomConfig, SharedVolume, SplitMix,
    Solo, StoreProvider, StreamEngine, StreamPool, Xoshiro512,
};
use serde_json::json;

const DRAWS: usize = 5;

fn seeded<E: StreamEngine>(comm: &dyn Communicator, threads: usize, seed: i64) -> StreamPool<E> {
    let mut pool = StreamPool::new();
    pool.initialize_all(comm, &RandomConfig::with_seed(seed), threads)
        .expect("pool initialises");
    pool
}

fn snapshot<E: StreamEngine>(pool: &StreamPool<E>) -> Vec<u64> {
    let mut words = Vec::new();
    for child in pool.children() {
        child.save(&mut words);
    }
    pool.master().save(&mut words);
    words
}

fn advance<E: StreamEngine>(pool: &mut StreamPool<E>, steps: usize) {
    for child in pool.children_mut() {
        for _ in 0..steps {
            child.next_u64();
        }
    }
    for _ in 0..steps {
        pool.master_mut().next_u64();
    }
}

fn upcoming<E: StreamEngine>(pool: &mut StreamPool<E>) -> Vec<u64> {
    let mut draws = Vec::new();
    for child in pool.children_mut() {
        draws.extend((0..DRAWS).map(|_| child.next_u64()));
    }
    draws.extend((0..DRAWS).map(|_| pool.master_mut().next_u64()));
    draws
}

fn assert_resumes<E, P>(provider: &P, processes: usize, threads: usize)
where
    E: StreamEngine,
    P: StoreProvider + Sync,
{
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("qmc.s001");

    let outcomes = run_ranks(processes, |comm| {
        let mut pool = seeded::<E>(&comm, threads, 11);
        advance(&mut pool, 17);
        checkpoint::write(&pool, &comm, provider, &base).unwrap();
        let expected = upcoming(&mut pool);

        let mut resumed = seeded::<E>(&comm, threads, 200);
        let restore = checkpoint::read(&mut resumed, &comm, provider, &base).unwrap();
        (restore, expected, upcoming(&mut resumed))
    });

    for (restore, expected, actual) in outcomes {
        assert_eq!(restore, Restore::Restored);
        assert_eq!(actual, expected);
    }
}

#[test]
fn parallel_store_resumes_every_stream() {
    assert_resumes::<Xoshiro512, _>(&SharedVolume::new(), 2, 3);
}

#[test]
fn single_writer_store_resumes_every_stream() {
    assert_resumes::<Xoshiro512, _>(&FileProvider, 3, 2);
}

#[test]
fn chacha_streams_resume_mid_block() {
    assert_resumes::<ChaCha, _>(&FileProvider, 2, 2);
    assert_resumes::<ChaCha, _>(&SharedVolume::new(), 2, 2);
}

#[test]
fn single_process_checkpoint_layout() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("e2e");
    let comm = Solo;
    let pool = seeded::<Xoshiro512>(&comm, 4, 3);
    checkpoint::write(&pool, &comm, &FileProvider, &base).unwrap();

    let archive = Archive::load(&checkpoint_path(&base, STORE_SUFFIX)).unwrap();
    let shape = archive
        .dataset("state_0/nprocs_nthreads_statesize")
        .unwrap();
    assert_eq!(shape.data, vec![1, 4, 8]);
    let children = archive.dataset("state_0/random/xoshiro512starstar").unwrap();
    assert_eq!(children.shape, vec![4, 8]);
    assert_eq!(children.data[..32], snapshot(&pool)[..32]);
    let master = archive
        .dataset("state_0/random_master/xoshiro512starstar")
        .unwrap();
    assert_eq!(master.shape, vec![1, 8]);
}

#[test]
fn both_modes_write_identical_archives_in_rank_major_order() {
    let dir = tempfile::tempdir().unwrap();
    let parallel_base = dir.path().join("parallel");
    let single_base = dir.path().join("single");
    let volume = SharedVolume::new();

    let local_rows = run_ranks(2, |comm| {
        let pool = seeded::<SplitMix>(&comm, 2, 41);
        checkpoint::write(&pool, &comm, &volume, &parallel_base).unwrap();
        checkpoint::write(&pool, &comm, &FileProvider, &single_base).unwrap();
        snapshot(&pool)
    });

    let parallel = Archive::load(&checkpoint_path(&parallel_base, STORE_SUFFIX)).unwrap();
    let single = Archive::load(&checkpoint_path(&single_base, STORE_SUFFIX)).unwrap();
    assert_eq!(parallel, single);

    // Each snapshot is two children then the master, two words apiece.
    let mut children = Vec::new();
    let mut masters = Vec::new();
    for rows in &local_rows {
        children.extend_from_slice(&rows[..4]);
        masters.extend_from_slice(&rows[4..]);
    }
    let stored = single.dataset("state_0/random/splitmix64").unwrap();
    assert_eq!(stored.shape, vec![4, 2]);
    assert_eq!(stored.data, children);
    assert_eq!(
        single.dataset("state_0/random_master/splitmix64").unwrap().data,
        masters
    );
}

fn assert_mismatch_keeps_fresh_streams<P: StoreProvider + Sync>(provider: &P) {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("shape");

    let outcomes = run_ranks(2, |comm| {
        let pool = seeded::<Xoshiro512>(&comm, 2, 5);
        checkpoint::write(&pool, &comm, provider, &base).unwrap();

        let mut fresh = seeded::<Xoshiro512>(&comm, 3, 9);
        let before = snapshot(&fresh);
        let restore = checkpoint::read(&mut fresh, &comm, provider, &base).unwrap();
        (restore, before, snapshot(&fresh))
    });

    for (restore, before, after) in outcomes {
        match restore {
            Restore::Mismatch { stored, live } => {
                assert_eq!(stored.threads, 2);
                assert_eq!(live.threads, 3);
                assert_eq!(stored.processes, live.processes);
            }
            other => panic!("expected a mismatch, got {other:?}"),
        }
        assert_eq!(before, after);
    }
}

#[test]
fn thread_count_change_leaves_fresh_streams() {
    assert_mismatch_keeps_fresh_streams(&SharedVolume::new());
    assert_mismatch_keeps_fresh_streams(&FileProvider);
}

fn assert_missing_file_fails_everywhere<P: StoreProvider + Sync>(provider: &P) {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("absent");
    let failures = run_ranks(3, |comm| {
        let mut pool = seeded::<SplitMix>(&comm, 1, 2);
        checkpoint::read(&mut pool, &comm, provider, &base).is_err()
    });
    assert_eq!(failures, vec![true; 3]);
}

#[test]
fn missing_checkpoint_is_an_error_on_every_rank() {
    assert_missing_file_fails_everywhere(&SharedVolume::new());
    assert_missing_file_fails_everywhere(&FileProvider);
}

fn legacy_round_trip(processes: usize, threads: usize) {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("legacy");

    let outcomes = run_ranks(processes, |comm| {
        let mut pool = seeded::<Xoshiro512>(&comm, threads, 30);
        advance(&mut pool, 3);
        write_legacy(&pool, &comm, &base).unwrap();
        let expected = upcoming(&mut pool);

        let mut resumed = seeded::<Xoshiro512>(&comm, threads, 31);
        let restore = read_legacy(&mut resumed, &comm, &base).unwrap();
        (restore, expected, upcoming(&mut resumed))
    });

    // Only the streams the legacy table carries are restored.
    let carried = |draws: &[u64]| {
        if threads > 1 {
            draws[..threads * DRAWS].to_vec()
        } else {
            draws[draws.len() - DRAWS..].to_vec()
        }
    };
    for (restore, expected, actual) in outcomes {
        assert_eq!(restore, Restore::Restored);
        assert_eq!(carried(&actual), carried(&expected));
    }
}

#[test]
fn legacy_record_restores_children_or_master() {
    legacy_round_trip(2, 2);
    legacy_round_trip(2, 1);
}

#[test]
fn legacy_record_from_another_engine_is_a_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("engines");
    let comm = Solo;

    let chacha = seeded::<ChaCha>(&comm, 2, 1);
    write_legacy(&chacha, &comm, &base).unwrap();
    assert!(checkpoint_path(&base, LEGACY_SUFFIX).exists());

    let mut xoshiro = seeded::<Xoshiro512>(&comm, 2, 1);
    let before = snapshot(&xoshiro);
    let restore = read_legacy(&mut xoshiro, &comm, &base).unwrap();
    assert_eq!(
        restore,
        Restore::LegacyMismatch {
            stored: (0, 0),
            live: (2, 8),
        }
    );
    assert_eq!(snapshot(&xoshiro), before);
}

#[test]
fn missing_legacy_record_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let comm = Solo;
    let mut pool = seeded::<SplitMix>(&comm, 1, 0);
    assert!(read_legacy(&mut pool, &comm, &dir.path().join("none")).is_err());
    assert!(!dir.path().join("none.random.xml").exists());
}

#[test]
fn one_process_four_threads_round_trip() {
    for provider in [&FileProvider as &dyn StoreProvider, &SharedVolume::new()] {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("solo");

        let mut pool = seeded::<Xoshiro512>(&Solo, 4, 6);
        assert_eq!(pool.state_size(), 8);
        advance(&mut pool, 1);
        checkpoint::write(&pool, &Solo, provider, &base).unwrap();
        let expected = upcoming(&mut pool);
        drop(pool);

        let mut fresh = seeded::<Xoshiro512>(&Solo, 4, 700);
        let restore = checkpoint::read(&mut fresh, &Solo, provider, &base).unwrap();
        assert_eq!(restore, Restore::Restored);
        assert_eq!(upcoming(&mut fresh), expected);
    }
}

fn assert_process_count_mismatch<P: StoreProvider + Sync>(provider: &P) {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("ranks");

    run_ranks(2, |comm| {
        let pool = seeded::<SplitMix>(&comm, 2, 8);
        checkpoint::write(&pool, &comm, provider, &base).unwrap();
    });

    let outcomes = run_ranks(3, |comm| {
        let mut fresh = seeded::<SplitMix>(&comm, 2, 8);
        let before = snapshot(&fresh);
        let restore = checkpoint::read(&mut fresh, &comm, provider, &base).unwrap();
        (restore, before, snapshot(&fresh))
    });

    for (restore, before, after) in outcomes {
        match restore {
            Restore::Mismatch { stored, live } => {
                assert_eq!((stored.processes, live.processes), (2, 3));
                assert_eq!(stored.threads, live.threads);
                assert_eq!(stored.state_size, live.state_size);
            }
            other => panic!("expected a mismatch, got {other:?}"),
        }
        assert_eq!(before, after);
    }
}

#[test]
fn process_count_change_leaves_fresh_streams() {
    assert_process_count_mismatch(&SharedVolume::new());
    assert_process_count_mismatch(&FileProvider);
}

#[test]
fn state_size_change_leaves_fresh_streams() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("engines");

    let wide = seeded::<Xoshiro512>(&Solo, 2, 4);
    checkpoint::write(&wide, &Solo, &FileProvider, &base).unwrap();

    let mut narrow = seeded::<SplitMix>(&Solo, 2, 4);
    let before = snapshot(&narrow);
    match checkpoint::read(&mut narrow, &Solo, &FileProvider, &base).unwrap() {
        Restore::Mismatch { stored, live } => {
            assert_eq!((stored.state_size, live.state_size), (8, 2));
            assert_eq!(stored.processes, live.processes);
            assert_eq!(stored.threads, live.threads);
        }
        other => panic!("expected a mismatch, got {other:?}"),
    }
    assert_eq!(snapshot(&narrow), before);
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn mismatch_emits_a_warning_naming_both_shapes() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("logged");
    let captured = Captured::default();
    let sink = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || sink.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();

    let restore = tracing::subscriber::with_default(subscriber, || {
        let pool = seeded::<Xoshiro512>(&Solo, 2, 1);
        checkpoint::write(&pool, &Solo, &FileProvider, &base).unwrap();
        let mut fresh = seeded::<Xoshiro512>(&Solo, 3, 1);
        checkpoint::read(&mut fresh, &Solo, &FileProvider, &base).unwrap()
    });

    assert!(!restore.is_restored());
    let logged = captured.text();
    assert!(logged.contains("WARN"), "{logged}");
    assert!(logged.contains("mismatched random number generators"), "{logged}");
    assert!(logged.contains("old_threads=2"), "{logged}");
    assert!(logged.contains("new_threads=3"), "{logged}");
}

fn assert_truncated_archive_fails_everywhere(parallel: bool) {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("damaged");
    let path = checkpoint_path(&base, STORE_SUFFIX);

    run_ranks(2, |comm| {
        let pool = seeded::<Xoshiro512>(&comm, 4, 2);
        checkpoint::write(&pool, &comm, &FileProvider, &base).unwrap();
    });
    let mut image: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    image["datasets"]["state_0/random/xoshiro512starstar"]["data"] = json!([1, 2, 3]);
    std::fs::write(&path, image.to_string()).unwrap();

    let volume = SharedVolume::new();
    let failures = run_ranks(2, |comm| {
        let provider: &dyn StoreProvider = if parallel { &volume } else { &FileProvider };
        let mut pool = seeded::<Xoshiro512>(&comm, 4, 2);
        checkpoint::read(&mut pool, &comm, provider, &base).is_err()
    });
    assert_eq!(failures, vec![true, true]);
}

#[test]
fn truncated_archive_is_an_error_on_every_rank() {
    assert_truncated_archive_fails_everywhere(true);
    assert_truncated_archive_fails_everywhere(false);
}

#[test]
fn legacy_record_with_oversized_dims_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("huge");
    std::fs::write(
        checkpoint_path(&base, LEGACY_SUFFIX),
        format!(
            "<random><engine>{}</engine><dims>{} 2</dims><states>1</states></random>",
            SplitMix::NAME,
            usize::MAX
        ),
    )
    .unwrap();

    let mut pool = seeded::<SplitMix>(&Solo, 1, 0);
    let before = snapshot(&pool);
    assert!(read_legacy(&mut pool, &Solo, &base).is_err());
    assert_eq!(snapshot(&pool), before);
}
