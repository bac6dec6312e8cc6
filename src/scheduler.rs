//! Delayed task scheduler
//!
//! A single thread runs boxed tasks once their deadline passes. Used for
//! async exchange timeouts.

use log::{debug, error};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// A task run by the scheduler
pub type Task = Box<dyn FnOnce() + Send>;

/// Identifies a scheduled task, for cancelling it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

// cancelled entries stay in the heap until this many outnumber live ones
const COMPACT_SLACK: usize = 64;

struct Entry {
    at: Instant,
    seq: u64,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // reversed so the heap pops the earliest deadline first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct State {
    stop: bool,
    deadlines: BinaryHeap<Entry>,
    tasks: HashMap<u64, Task>,
    next_seq: u64,
}

struct Shared {
    state: Mutex<State>,
    cvar: Condvar,
}

impl Shared {
    fn run(&self) {
        let mut state = self.state.lock().unwrap();

        loop {
            if state.stop {
                break;
            }

            let now = Instant::now();
            let wait = match state.deadlines.peek() {
                Some(entry) if entry.at <= now => None,
                Some(entry) => Some(entry.at - now),
                None => Some(Duration::from_secs(3600)),
            };

            match wait {
                None => {
                    let task = match state.deadlines.pop() {
                        Some(entry) => state.tasks.remove(&entry.seq),
                        None => None,
                    };

                    // cancelled tasks leave their deadline behind
                    if let Some(task) = task {
                        drop(state);

                        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                            error!("scheduler: task panicked");
                        }

                        state = self.state.lock().unwrap();
                    }
                }
                Some(timeout) => {
                    state = self.cvar.wait_timeout(state, timeout).unwrap().0;
                }
            }
        }
    }
}

/// Runs tasks after a delay on a dedicated thread
pub struct Scheduler {
    shared: Arc<Shared>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Scheduler {
    /// Start the scheduler thread
    pub fn new() -> io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                stop: false,
                deadlines: BinaryHeap::new(),
                tasks: HashMap::new(),
                next_seq: 0,
            }),
            cvar: Condvar::new(),
        });

        let thread = {
            let shared = shared.clone();

            thread::Builder::new()
                .name("scheduler".to_string())
                .spawn(move || shared.run())?
        };

        Ok(Scheduler {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Run `task` once `delay` has elapsed
    ///
    /// Returns `None` if the scheduler has been stopped.
    pub fn schedule(&self, delay: Duration, task: Task) -> Option<TaskId> {
        let mut state = self.shared.state.lock().unwrap();

        if state.stop {
            return None;
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.tasks.insert(seq, task);
        state.deadlines.push(Entry {
            at: Instant::now() + delay,
            seq,
        });

        self.shared.cvar.notify_one();

        Some(TaskId(seq))
    }

    /// Drop a task that has not run yet
    ///
    /// Returns false if the task already ran or was cancelled.
    pub fn cancel(&self, id: TaskId) -> bool {
        let (task, removed) = {
            let mut state = self.shared.state.lock().unwrap();
            let task = state.tasks.remove(&id.0);
            let removed = task.is_some();

            if state.deadlines.len() > 2 * state.tasks.len() + COMPACT_SLACK {
                let State { deadlines, tasks, .. } = &mut *state;
                deadlines.retain(|entry| tasks.contains_key(&entry.seq));
            }

            (task, removed)
        };
        // the task may own values whose drop takes other locks
        drop(task);

        removed
    }

    /// Number of tasks waiting for their deadline
    pub fn pending(&self) -> usize {
        self.shared.state.lock().unwrap().tasks.len()
    }

    /// Stop the thread, dropping pending tasks
    pub fn stop(&self) {
        let tasks = {
            let mut state = self.shared.state.lock().unwrap();
            state.stop = true;
            self.shared.cvar.notify_all();
            state.deadlines.clear();
            std::mem::take(&mut state.tasks)
        };
        drop(tasks);

        if let Some(thread) = self.thread.lock().unwrap().take() {
            // a task may drop the last handle from the scheduler thread itself
            if thread.thread().id() != thread::current().id() {
                if thread.join().is_err() {
                    error!("scheduler: thread panicked");
                }
            }
            debug!("scheduler: stopped");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
