//! Bounded worker pool for the classification stage.
//!
//! A feeder thread pushes jobs into a bounded channel, a fixed set of named
//! workers drain it, and results flow back to the calling thread, which
//! consumes them as they arrive. The bounded queue caps memory no matter how
//! many entities a batch holds, and the caller can checkpoint between
//! results while workers keep running.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel::bounded;
use tracing::debug;

/// Worker pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Maximum queued jobs.
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
        }
    }
}

/// Runs `work` over `jobs` on a bounded pool, handing each result to
/// `collect` on the calling thread.
///
/// Once `stop` is set the feeder stops enqueuing; jobs already queued still
/// run, so `work` should check the flag itself if it must bail out early.
/// Returns the number of jobs that were enqueued.
///
/// # Errors
///
/// Returns the spawn error if a worker thread cannot be started. Workers
/// that did start are joined before returning.
pub fn run_pool<J, R, W, C>(
    name: &str,
    config: PoolConfig,
    jobs: Vec<J>,
    stop: &AtomicBool,
    work: W,
    mut collect: C,
) -> io::Result<usize>
where
    J: Send,
    R: Send,
    W: Fn(J) -> R + Sync,
    C: FnMut(R),
{
    let workers = config.workers.max(1);
    let queue_capacity = config.queue_capacity.max(1);
    let (job_tx, job_rx) = bounded::<J>(queue_capacity);
    let (result_tx, result_rx) = bounded::<R>(queue_capacity);
    let work = &work;

    thread::scope(|scope| {
        let feeder = thread::Builder::new()
            .name(format!("entity-registry-{name}-feed"))
            .spawn_scoped(scope, move || {
                let mut sent = 0usize;
                for job in jobs {
                    if stop.load(Ordering::Acquire) {
                        debug!("stop requested, feeder exiting");
                        break;
                    }
                    if job_tx.send(job).is_err() {
                        break;
                    }
                    sent += 1;
                }
                sent
            })?;

        for idx in 0..workers {
            let rx = job_rx.clone();
            let tx = result_tx.clone();
            thread::Builder::new()
                .name(format!("entity-registry-{name}-{idx}"))
                .spawn_scoped(scope, move || {
                    for job in rx {
                        if tx.send(work(job)).is_err() {
                            break;
                        }
                    }
                })?;
        }
        // Workers hold the only remaining ends; the result loop ends when
        // the last worker exits.
        drop(job_rx);
        drop(result_tx);

        for result in result_rx {
            collect(result);
        }

        feeder
            .join()
            .map_err(|_| io::Error::other("feeder thread panicked"))
    })
}
