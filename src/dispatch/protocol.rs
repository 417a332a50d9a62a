//! The ready/assign/done/exit exchange between the coordinator and its
//! workers when the pool is smaller than the job list.
//!
//! Rank 0 owns the assignment map and blocks on "receive from any"; workers
//! block on "receive from coordinator". All sends and receives are blocking
//! with no timeout.

use std::sync::Mutex;
use std::thread;

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::dispatch::{Assignment, DispatchError, Job, JobError};

/// Worker-to-coordinator messages.
pub(crate) enum Request {
    /// The worker is idle and wants a job.
    Ready { rank: usize },
    /// The assigned job finished.
    Done { rank: usize, job: usize },
    /// The assigned job failed; the batch must abort.
    Failed {
        rank: usize,
        job: usize,
        error: JobError,
    },
    /// Exit acknowledged; the worker is gone.
    Exited { rank: usize },
}

/// Coordinator-to-worker replies.
pub(crate) enum Reply {
    Start { job: usize },
    Exit,
}

/// Runs the full protocol: rank 0 coordinates, ranks `1..pool_size` pull.
pub(crate) fn round_robin<J: Job>(
    jobs: &mut [J],
    pool_size: usize,
) -> Result<Assignment, DispatchError> {
    let worker_count = pool_size - 1;
    // Each job sits behind its own lock; the protocol hands a job to exactly
    // one worker, so the locks never contend.
    let slots: Vec<Mutex<&mut J>> = jobs.iter_mut().map(Mutex::new).collect();

    let (request_tx, request_rx) = unbounded::<Request>();
    let mut reply_txs = Vec::with_capacity(worker_count);
    let mut reply_rxs = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let (tx, rx) = unbounded::<Reply>();
        reply_txs.push(tx);
        reply_rxs.push(rx);
    }

    thread::scope(|scope| {
        for (offset, replies) in reply_rxs.into_iter().enumerate() {
            let rank = offset + 1;
            let requests = request_tx.clone();
            let slots = &slots;
            scope.spawn(move || worker_loop(rank, slots, requests, replies));
        }
        drop(request_tx);
        // When this returns, the reply senders drop with it, which unblocks
        // any worker still waiting on a reply; the scope then joins them.
        coordinate(slots.len(), reply_txs, request_rx, worker_count)
    })
}

/// The coordinator state machine: assign the next unassigned index on every
/// `Ready`, send `Exit` once the jobs run out, and stop when every worker
/// has acknowledged its exit. The completed map is re-delivered to the
/// caller (and through it to `post_run`) after the join barrier.
fn coordinate(
    job_count: usize,
    replies: Vec<Sender<Reply>>,
    requests: Receiver<Request>,
    worker_count: usize,
) -> Result<Assignment, DispatchError> {
    let mut ranks = vec![0usize; job_count];
    let mut next_unassigned = 0usize;
    let mut closed_workers = 0usize;

    while closed_workers < worker_count {
        let request = requests
            .recv()
            .map_err(|_| DispatchError::Disconnected { rank: 0 })?;
        match request {
            Request::Ready { rank } => {
                let reply = if next_unassigned < job_count {
                    ranks[next_unassigned] = rank;
                    let reply = Reply::Start {
                        job: next_unassigned,
                    };
                    next_unassigned += 1;
                    reply
                } else {
                    Reply::Exit
                };
                if replies[rank - 1].send(reply).is_err() {
                    return Err(DispatchError::Disconnected { rank });
                }
            }
            Request::Done { rank, job } => {
                log::debug!("job {job} finished on rank {rank}");
            }
            Request::Failed { rank, job, error } => {
                log::error!("job {job} failed on rank {rank}: {error}");
                return Err(DispatchError::Job { index: job, error });
            }
            Request::Exited { .. } => closed_workers += 1,
        }
    }
    Ok(Assignment::from_ranks(ranks))
}

/// One worker: announce readiness, run whatever gets assigned, repeat until
/// told to exit or the coordinator goes away.
fn worker_loop<J: Job>(
    rank: usize,
    slots: &[Mutex<&mut J>],
    requests: Sender<Request>,
    replies: Receiver<Reply>,
) {
    loop {
        if requests.send(Request::Ready { rank }).is_err() {
            return;
        }
        match replies.recv() {
            Ok(Reply::Start { job }) => {
                let result = match slots[job].lock() {
                    Ok(mut slot) => slot.execute(),
                    Err(poisoned) => poisoned.into_inner().execute(),
                };
                match result {
                    Ok(()) => {
                        if requests.send(Request::Done { rank, job }).is_err() {
                            return;
                        }
                    }
                    Err(error) => {
                        let _ = requests.send(Request::Failed { rank, job, error });
                        return;
                    }
                }
            }
            Ok(Reply::Exit) => {
                let _ = requests.send(Request::Exited { rank });
                return;
            }
            Err(_) => return,
        }
    }
}
