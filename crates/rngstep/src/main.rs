use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use clap::{Parser, ValueEnum};
use rng_core::checkpoint::{self, read_legacy, write_legacy, Restore};
use rng_core::config::Toggle;
use rng_core::selftest::self_test;
use rng_core::{
    run_ranks, ChaCha, Communicator, FileProvider, RandomConfig, SharedVolume, SplitMix,
    StoreProvider, StreamEngine, StreamPool, Xoshiro512,
};
use serde_json::{json, Value};
use tracing::info;

/// Draws reported per stream in the summary.
const PREVIEW_DRAWS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum EngineKind {
    Xoshiro,
    Splitmix,
    Chacha,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum IoMode {
    /// Every rank writes its own rows of a shared archive.
    Parallel,
    /// The root gathers every rank's rows and writes alone.
    Single,
    /// Older textual stream table.
    Legacy,
}

#[derive(Parser, Debug)]
#[command(
    name = "rngstep",
    about = "Seed, advance, checkpoint and restore parallel random streams"
)]
struct Args {
    /// Number of in-process ranks.
    #[arg(long, default_value_t = 1)]
    processes: usize,

    /// Child streams per rank; defaults to the available parallelism.
    #[arg(long)]
    threads: Option<usize>,

    #[arg(long, value_enum, default_value_t = EngineKind::Xoshiro)]
    engine: EngineKind,

    /// JSON document with a `random` section.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Explicit seed offset; overrides the config file.
    #[arg(long, value_name = "NUMBER", allow_negative_numbers = true)]
    seed: Option<i64>,

    /// Seed every rank as if it were the only one.
    #[arg(long)]
    serial: bool,

    /// Draws taken from every stream before checkpointing.
    #[arg(long, default_value_t = 0)]
    advance: u64,

    /// Base name of a checkpoint to restore from.
    #[arg(long, value_name = "BASE")]
    restore: Option<PathBuf>,

    /// Base name of the checkpoint written after advancing.
    #[arg(long, value_name = "BASE")]
    checkpoint: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = IoMode::Single)]
    io: IoMode,

    /// Run the moment self-test with this many draws per stream.
    #[arg(long = "self-test", value_name = "DRAWS")]
    self_test: Option<usize>,

    /// Output NDJSON file path; stdout when absent.
    #[arg(long)]
    out: Option<PathBuf>,
}

impl Args {
    fn threads(&self) -> usize {
        self.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        })
    }

    fn random_config(&self) -> Result<RandomConfig> {
        let mut config = match &self.config {
            Some(path) => RandomConfig::load_from_path(path)
                .with_context(|| format!("failed to read config {:?}", path))?,
            None => RandomConfig::default(),
        };
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if self.serial {
            config.parallel = Toggle(false);
        }
        Ok(config)
    }
}

fn store_provider(io: IoMode, volume: &SharedVolume) -> Option<&dyn StoreProvider> {
    match io {
        IoMode::Parallel => Some(volume),
        IoMode::Single => Some(&FileProvider),
        IoMode::Legacy => None,
    }
}

fn preview<E: StreamEngine>(stream: &mut E) -> Vec<u64> {
    (0..PREVIEW_DRAWS).map(|_| stream.next_u64()).collect()
}

fn rank_main<E: StreamEngine>(
    args: &Args,
    config: &RandomConfig,
    threads: usize,
    volume: &SharedVolume,
    comm: &dyn Communicator,
) -> Result<Vec<Value>> {
    let mut pool = StreamPool::<E>::new();
    pool.initialize_all(comm, config, threads)?;

    let restore = match &args.restore {
        Some(base) => Some(match store_provider(args.io, volume) {
            Some(provider) => checkpoint::read(&mut pool, comm, provider, base)?,
            None => read_legacy(&mut pool, comm, base)?,
        }),
        None => None,
    };

    for _ in 0..args.advance {
        pool.master_mut().next_u64();
        for child in pool.children_mut() {
            child.next_u64();
        }
    }

    if let Some(base) = &args.checkpoint {
        match store_provider(args.io, volume) {
            Some(provider) => checkpoint::write(&pool, comm, provider, base)?,
            None => write_legacy(&pool, comm, base)?,
        }
        info!(rank = comm.rank(), base = %base.display(), "random checkpoint written");
    }

    let report = match args.self_test {
        Some(draws) => self_test(&mut pool, comm, draws)?,
        None => None,
    };

    let mut lines = Vec::with_capacity(pool.threads() + 2);
    if comm.is_root() {
        let self_test = report.map(serde_json::to_value).transpose()?;
        lines.push(json!({
            "engine": E::NAME,
            "processes": comm.size(),
            "threads": pool.threads(),
            "state_size": pool.state_size(),
            "offset": pool.offset(),
            "restored": restore.as_ref().map(Restore::is_restored),
            "self_test": self_test,
        }));
    }
    let rank = comm.rank();
    lines.push(json!({
        "rank": rank,
        "stream": "master",
        "next": preview(pool.master_mut()),
    }));
    for (thread, child) in pool.children_mut().iter_mut().enumerate() {
        lines.push(json!({
            "rank": rank,
            "stream": "child",
            "thread": thread,
            "next": preview(child),
        }));
    }
    Ok(lines)
}

fn run<E: StreamEngine>(args: &Args, config: &RandomConfig) -> Result<Vec<Value>> {
    let threads = args.threads();
    ensure!(args.processes > 0, "--processes must be at least 1");
    ensure!(threads > 0, "--threads must be at least 1");
    info!(
        engine = E::NAME,
        processes = args.processes,
        threads,
        "starting random stream job"
    );

    let volume = SharedVolume::new();
    let per_rank = run_ranks(args.processes, |comm| {
        rank_main::<E>(args, config, threads, &volume, &comm)
    });

    let mut lines = Vec::new();
    for rank_lines in per_rank {
        lines.extend(rank_lines?);
    }
    Ok(lines)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let config = args.random_config()?;

    let lines = match args.engine {
        EngineKind::Xoshiro => run::<Xoshiro512>(&args, &config)?,
        EngineKind::Splitmix => run::<SplitMix>(&args, &config)?,
        EngineKind::Chacha => run::<ChaCha>(&args, &config)?,
    };

    let mut writer: Box<dyn Write> = match &args.out {
        Some(path) => {
            let file =
                File::create(path).with_context(|| format!("failed to create {:?}", path))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    for line in &lines {
        let serialized = serde_json::to_string(line)?;
        writer.write_all(serialized.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    Ok(())
}
