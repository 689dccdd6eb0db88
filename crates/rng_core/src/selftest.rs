//! Statistical smoke test over every child stream of a job.

use anyhow::{ensure, Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::comm::Communicator;
use crate::engine::StreamEngine;
use crate::pool::StreamPool;

/// Sample moments of one child stream.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StreamMoments {
    pub rank: usize,
    pub thread: usize,
    pub mean: f64,
    pub variance: f64,
}

/// Job-wide result, assembled on the root rank.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SelfTestReport {
    pub streams: Vec<StreamMoments>,
    pub mean: f64,
    pub variance: f64,
}

fn moments<E: StreamEngine>(stream: &mut E, draws: usize) -> (f64, f64) {
    let mut sum = 0.0;
    let mut sum2 = 0.0;
    for _ in 0..draws {
        let r = stream.next_f64();
        sum += r;
        sum2 += r * r;
    }
    let n = draws as f64;
    (sum / n, sum2 / n)
}

/// Draw `draws` uniforms from every child stream in parallel and report
/// mean and variance per stream. Advances the streams.
///
/// Returns `Some` on the root rank only.
pub fn self_test<E: StreamEngine>(
    pool: &mut StreamPool<E>,
    comm: &dyn Communicator,
    draws: usize,
) -> Result<Option<SelfTestReport>> {
    ensure!(draws > 0, "self test needs at least one draw per stream");
    let threads = pool.threads();

    let local: Vec<(f64, f64)> = pool
        .children_mut()
        .par_iter_mut()
        .map(|stream| moments(stream, draws))
        .collect();

    let means: Vec<u64> = local.iter().map(|(avg, _)| avg.to_bits()).collect();
    let squares: Vec<u64> = local.iter().map(|(_, avg2)| avg2.to_bits()).collect();
    let means = comm.gather(&means).context("failed to gather stream means")?;
    let squares = comm
        .gather(&squares)
        .context("failed to gather stream second moments")?;

    let (Some(means), Some(squares)) = (means, squares) else {
        return Ok(None);
    };

    let mut streams = Vec::with_capacity(means.len());
    let mut avg_g = 0.0;
    let mut avg2_g = 0.0;
    for (ii, (avg, avg2)) in means.iter().zip(&squares).enumerate() {
        let avg = f64::from_bits(*avg);
        let avg2 = f64::from_bits(*avg2);
        let moments = StreamMoments {
            rank: ii / threads,
            thread: ii % threads,
            mean: avg,
            variance: avg2 - avg * avg,
        };
        info!(
            rank = moments.rank,
            thread = moments.thread,
            mean = moments.mean,
            variance = moments.variance,
            "RNGTest"
        );
        avg_g += avg;
        avg2_g += avg2;
        streams.push(moments);
    }
    let count = streams.len() as f64;
    avg_g /= count;
    avg2_g /= count;
    let report = SelfTestReport {
        streams,
        mean: avg_g,
        variance: avg2_g - avg_g * avg_g,
    };
    info!(
        processes = comm.size(),
        threads,
        mean = report.mean,
        variance = report.variance,
        "RNGTest summary"
    );
    Ok(Some(report))
}
