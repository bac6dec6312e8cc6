//! Worker thread pool
//!
//! A fixed number of threads take jobs from a shared queue. Connections are
//! submitted as jobs, so at most `maxThreads` exchanges run at once.

use log::{debug, error};
use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

/// A unit of work run by the pool
pub type Job = Box<dyn FnOnce() + Send>;

struct State {
    stop: bool,
    jobs: VecDeque<Job>,
    active: usize,
}

struct Shared {
    state: Mutex<State>,
    cvar: Condvar,
}

impl Shared {
    // block until a job is available, or stopped
    fn next_job(&self) -> Option<Job> {
        let mut state = self.state.lock().unwrap();

        loop {
            if state.stop {
                return None;
            }

            if let Some(job) = state.jobs.pop_front() {
                state.active += 1;
                return Some(job);
            }

            state = self.cvar.wait(state).unwrap();
        }
    }

    fn job_done(&self) {
        self.state.lock().unwrap().active -= 1;
    }
}

/// Fixed-size pool of worker threads
pub struct Executor {
    shared: Arc<Shared>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl Executor {
    /// Start `num_threads` workers
    pub fn new(num_threads: usize, name: &str) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                stop: false,
                jobs: VecDeque::new(),
                active: 0,
            }),
            cvar: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(num_threads);

        for n in 0..num_threads {
            let shared = shared.clone();

            let thread = thread::Builder::new()
                .name(format!("{}-{}", name, n))
                .spawn(move || {
                    debug!("worker {}: started", n);

                    while let Some(job) = shared.next_job() {
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            error!("worker {}: job panicked", n);
                        }

                        shared.job_done();
                    }

                    debug!("worker {}: stopped", n);
                })?;

            workers.push(thread);
        }

        Ok(Executor {
            shared,
            workers: Mutex::new(workers),
        })
    }

    /// Queue a job
    ///
    /// Returns false, dropping the job, if the pool has been stopped.
    pub fn execute(&self, job: Job) -> bool {
        let mut state = self.shared.state.lock().unwrap();

        if state.stop {
            return false;
        }

        state.jobs.push_back(job);
        self.shared.cvar.notify_one();

        true
    }

    /// Jobs waiting for a worker
    pub fn queued(&self) -> usize {
        self.shared.state.lock().unwrap().jobs.len()
    }

    /// Jobs currently running
    pub fn active(&self) -> usize {
        self.shared.state.lock().unwrap().active
    }

    /// Stop the workers, dropping queued jobs
    ///
    /// Running jobs are allowed to finish.
    pub fn stop(&self) {
        let jobs = {
            let mut state = self.shared.state.lock().unwrap();
            state.stop = true;
            self.shared.cvar.notify_all();
            std::mem::take(&mut state.jobs)
        };
        drop(jobs);

        let current = thread::current().id();
        for worker in self.workers.lock().unwrap().drain(..) {
            // a job may drop the last handle from a worker thread
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                error!("executor: worker panicked");
            }
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_runs_jobs() {
        let executor = Executor::new(4, "test").unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        for _ in 0..16 {
            let count = count.clone();
            let tx = tx.clone();
            assert!(executor.execute(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
                tx.send(()).unwrap();
            })));
        }

        for _ in 0..16 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn test_single_worker_runs_jobs_in_order() {
        let executor = Executor::new(1, "test").unwrap();
        let (tx, rx) = mpsc::channel();

        for i in 0..5 {
            let tx = tx.clone();
            executor.execute(Box::new(move || tx.send(i).unwrap()));
        }

        let got: Vec<_> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_stopped_executor_rejects_jobs() {
        let executor = Executor::new(2, "test").unwrap();
        executor.stop();
        assert!(!executor.execute(Box::new(|| {})));
        assert_eq!(executor.queued(), 0);
        assert_eq!(executor.active(), 0);
    }

    #[test]
    fn test_survives_panicking_job() {
        let executor = Executor::new(1, "test").unwrap();
        let (tx, rx) = mpsc::channel();

        executor.execute(Box::new(|| panic!("boom")));
        executor.execute(Box::new(move || tx.send(()).unwrap()));

        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }
}
