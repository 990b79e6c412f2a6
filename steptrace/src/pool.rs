//! Fixed-size worker pool.
//!
//! An explicitly constructed pool, passed by reference to whatever needs
//! fan-out (parallel trace-file reads, sharded searches). Jobs travel over a
//! crossbeam channel to long-lived worker threads; [`WorkerPool::run_batch`]
//! is the rendezvous primitive: it submits N jobs and blocks until all N
//! have signaled completion, returning results in submission order. No
//! partial results are ever observable.

use crossbeam_channel::{unbounded, Sender};
use log::{debug, error};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug)]
pub struct WorkerPool {
    task_tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `nthreads` workers. Lives until dropped; dropping joins them.
    #[must_use]
    pub fn new(nthreads: usize) -> Self {
        assert!(nthreads > 0, "pool needs at least one worker");
        let (task_tx, task_rx) = unbounded::<Job>();
        let workers = (0..nthreads)
            .map(|i| {
                let rx = task_rx.clone();
                thread::Builder::new()
                    .name(format!("steptrace-worker-{i}"))
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            job();
                        }
                    })
                    .unwrap_or_else(|e| panic!("failed to spawn worker thread: {e}"))
            })
            .collect();
        debug!("worker pool up with {nthreads} threads");
        Self { task_tx: Some(task_tx), workers }
    }

    /// Pool sized to the machine, minimum one worker.
    #[must_use]
    pub fn with_default_size() -> Self {
        let n = thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        Self::new(n)
    }

    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    /// Queue one fire-and-forget job.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        let Some(tx) = &self.task_tx else {
            panic!("worker pool has shut down");
        };
        if tx.send(Box::new(job)).is_err() {
            panic!("worker pool has shut down");
        }
    }

    /// Run every job on the pool and wait until all of them finish.
    /// Results come back in submission order.
    pub fn run_batch<R, F>(&self, jobs: Vec<F>) -> Vec<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let n = jobs.len();
        let (done_tx, done_rx) = unbounded::<(usize, R)>();
        for (idx, job) in jobs.into_iter().enumerate() {
            let done_tx = done_tx.clone();
            self.execute(move || {
                let result = job();
                // Receiver outlives the batch; a send can only fail if the
                // caller side panicked, in which case nobody is waiting.
                let _ = done_tx.send((idx, result));
            });
        }
        drop(done_tx);

        let mut slots: Vec<Option<R>> = (0..n).map(|_| None).collect();
        for _ in 0..n {
            let Ok((idx, result)) = done_rx.recv() else {
                panic!("worker panicked while running a batch");
            };
            slots[idx] = Some(result);
        }
        slots.into_iter().flatten().collect()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.task_tx.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }
}
