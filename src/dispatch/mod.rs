//! Pull-based distribution of opaque jobs across a fixed worker pool.
//!
//! Jobs have no relationship to workflow nodes; the dispatcher treats them
//! as an indexed array of things exposing `execute()`. Three paths:
//!
//! - pool of 1: jobs run sequentially in index order, no threads;
//! - pool >= job count: direct assignment, rank *r* runs job *r*, with no
//!   message exchange at all; callers needing synchronized results after
//!   this path add their own barrier;
//! - otherwise: rank 0 coordinates and the remaining ranks pull jobs over
//!   the wire protocol until told to exit. The completed assignment map is
//!   handed to [`JobBatch::post_run`] once every worker has joined, which is
//!   the single synchronization barrier.
//!
//! There are no timeouts and no cancellation: a stalled worker stalls the
//! whole batch. A failing job aborts the batch with no partial-failure
//! recovery.

mod protocol;

use std::thread;

use serde::Serialize;
use thiserror::Error;

/// What a failing job reports. The dispatcher does not wrap job failures in
/// a kind of its own; whatever the job raised rides along unchanged.
pub type JobError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An opaque unit of work. Return values are the job object's own business;
/// the dispatcher only looks at success or failure.
pub trait Job: Send {
    fn execute(&mut self) -> Result<(), JobError>;
}

/// Errors raised by [`Dispatcher::execute`].
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A job failed; the batch is aborted with no partial result.
    #[error("job {index} failed: {error}")]
    Job { index: usize, error: JobError },

    /// A worker channel closed before the protocol finished.
    #[error("worker {rank} disconnected before the batch completed")]
    Disconnected { rank: usize },
}

/// A batch of jobs plus the hooks invoked once before and after
/// distribution (e.g. pulling upstream inputs first, synchronizing results
/// last). The hooks default to no-ops.
pub trait JobBatch {
    type Item: Job;

    fn jobs_mut(&mut self) -> &mut [Self::Item];

    fn pre_run(&mut self) {}

    fn post_run(&mut self, assignment: &Assignment) {
        let _ = assignment;
    }
}

/// The plainest batch: a vector of jobs with no hooks.
pub struct JobList<J: Job>(pub Vec<J>);

impl<J: Job> JobBatch for JobList<J> {
    type Item = J;

    fn jobs_mut(&mut self) -> &mut [J] {
        &mut self.0
    }
}

/// The completed `job index -> executing rank` map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    ranks: Vec<usize>,
}

impl Assignment {
    pub(crate) fn from_ranks(ranks: Vec<usize>) -> Self {
        Assignment { ranks }
    }

    pub fn job_count(&self) -> usize {
        self.ranks.len()
    }

    pub fn rank_of(&self, job: usize) -> Option<usize> {
        self.ranks.get(job).copied()
    }

    /// The job indices a rank executed, in assignment order.
    pub fn jobs_for(&self, rank: usize) -> Vec<usize> {
        self.ranks
            .iter()
            .enumerate()
            .filter(|(_, r)| **r == rank)
            .map(|(job, _)| job)
            .collect()
    }
}

/// Distributes a batch across a fixed pool of ranks.
pub struct Dispatcher {
    pool_size: usize,
}

impl Dispatcher {
    /// A dispatcher over `pool_size` ranks. A pool of zero means no
    /// distributed pool is available and collapses to one.
    pub fn new(pool_size: usize) -> Self {
        Dispatcher {
            pool_size: pool_size.max(1),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Runs every job in the batch exactly once across the pool.
    ///
    /// `pre_run` fires before any job starts; `post_run` fires with the
    /// completed assignment after every job finished. A job failure
    /// propagates immediately and `post_run` never fires.
    pub fn execute<B: JobBatch + ?Sized>(&self, batch: &mut B) -> Result<Assignment, DispatchError> {
        batch.pre_run();
        let jobs = batch.jobs_mut();
        let count = jobs.len();
        log::debug!(
            "dispatching {count} jobs across a pool of {}",
            self.pool_size
        );

        let assignment = if count == 0 {
            Assignment::from_ranks(Vec::new())
        } else if self.pool_size == 1 {
            sequential(jobs)?
        } else if self.pool_size >= count {
            direct(jobs)?
        } else {
            protocol::round_robin(jobs, self.pool_size)?
        };

        batch.post_run(&assignment);
        Ok(assignment)
    }
}

/// Single process: index order, no threads.
fn sequential<J: Job>(jobs: &mut [J]) -> Result<Assignment, DispatchError> {
    let count = jobs.len();
    for (index, job) in jobs.iter_mut().enumerate() {
        job.execute()
            .map_err(|error| DispatchError::Job { index, error })?;
    }
    Ok(Assignment::from_ranks(vec![0; count]))
}

/// Enough ranks for everyone: rank `r` runs job `r`, no protocol overhead.
fn direct<J: Job>(jobs: &mut [J]) -> Result<Assignment, DispatchError> {
    let count = jobs.len();
    let results: Vec<Result<(), JobError>> = thread::scope(|scope| {
        let handles: Vec<_> = jobs
            .iter_mut()
            .map(|job| scope.spawn(move || job.execute()))
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
            })
            .collect()
    });
    for (index, result) in results.into_iter().enumerate() {
        result.map_err(|error| DispatchError::Job { index, error })?;
    }
    Ok(Assignment::from_ranks((0..count).collect()))
}
