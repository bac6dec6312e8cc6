//! Async exchange bridge
//!
//! When a handler starts async processing the worker returns as soon as the
//! handler does, while the connection and its processor are parked. The
//! [`AsyncContext`] handle can then be used from any thread: every write,
//! flush and the final completion is queued as an event, and the first event
//! after parking hands the parked exchange back to a worker, which applies
//! the queued events in order.
//!
//! A timer bounds the exchange. When it fires before completion, further
//! operations on the handle fail with an I/O error of kind `TimedOut`.

use super::{Error, Result};
use crate::scheduler::{Scheduler, TaskId};
use log::{debug, warn};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Closure handing a parked exchange back to a worker
pub(crate) type Resume = Box<dyn FnOnce() + Send>;

/// Queued async operation
#[derive(Debug)]
pub(crate) enum AsyncEvent {
    Write(Vec<u8>),
    Flush,
    Complete,
    Timeout,
}

struct State {
    events: VecDeque<AsyncEvent>,
    parked: Option<Resume>,
    timeout: Duration,
    timer_generation: u64,
    timer: Option<TaskId>,
    timed_out: bool,
    completed: bool,
    failed: Option<io::ErrorKind>,
    finished: bool,
}

struct Inner {
    processor_id: u64,
    state: Mutex<State>,
    scheduler: Arc<Scheduler>,
}

/// Handle to an async exchange
///
/// Cheap to clone and `Send`, so it can be moved to whichever thread
/// finishes the response.
#[derive(Clone)]
pub struct AsyncContext {
    inner: Arc<Inner>,
}

impl AsyncContext {
    pub(crate) fn new(processor_id: u64, timeout: Duration, scheduler: Arc<Scheduler>) -> Self {
        let ctx = AsyncContext {
            inner: Arc::new(Inner {
                processor_id,
                state: Mutex::new(State {
                    events: VecDeque::new(),
                    parked: None,
                    timeout,
                    timer_generation: 0,
                    timer: None,
                    timed_out: false,
                    completed: false,
                    failed: None,
                    finished: false,
                }),
                scheduler,
            }),
        };

        ctx.arm_timer(0, timeout);
        ctx
    }

    /// Schedule the timer for `generation`, replacing the previous one
    fn arm_timer(&self, generation: u64, timeout: Duration) {
        let id = if timeout.is_zero() {
            None
        } else {
            let weak: Weak<Inner> = Arc::downgrade(&self.inner);
            self.inner.scheduler.schedule(
                timeout,
                Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        AsyncContext { inner }.fire_timeout(generation);
                    }
                }),
            )
        };

        let stale = {
            let mut state = self.inner.state.lock().unwrap();
            if state.finished || generation != state.timer_generation {
                // superseded while scheduling
                id
            } else {
                std::mem::replace(&mut state.timer, id)
            }
        };
        if let Some(stale) = stale {
            self.inner.scheduler.cancel(stale);
        }
    }

    /// Change the timeout, counting from now
    ///
    /// A zero duration disables the timeout.
    pub fn set_timeout(&self, timeout: Duration) {
        let generation = {
            let mut state = self.inner.state.lock().unwrap();
            if state.finished || state.completed || state.timed_out {
                return;
            }
            state.timeout = timeout;
            state.timer_generation += 1;
            state.timer_generation
        };

        self.arm_timer(generation, timeout);
    }

    /// Current timeout
    pub fn timeout(&self) -> Duration {
        self.inner.state.lock().unwrap().timeout
    }

    /// Queue body bytes
    ///
    /// Bytes are appended after anything the handler wrote before the
    /// exchange went async.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        self.push(AsyncEvent::Write(data.to_vec()))
    }

    /// Queue a string
    pub fn write_str(&self, s: &str) -> Result<()> {
        self.write(s.as_bytes())
    }

    /// Queue a flush of the response buffer
    pub fn flush(&self) -> Result<()> {
        self.push(AsyncEvent::Flush)
    }

    /// Finish the exchange
    ///
    /// Completing twice, or after the exchange has ended, is a no-op.
    pub fn complete(&self) {
        let resume = {
            let mut state = self.inner.state.lock().unwrap();
            if state.completed || state.finished || state.timed_out {
                return;
            }
            state.completed = true;
            state.events.push_back(AsyncEvent::Complete);
            state.parked.take()
        };

        if let Some(resume) = resume {
            resume();
        }
    }

    /// Whether the timeout has fired
    pub fn is_timed_out(&self) -> bool {
        self.inner.state.lock().unwrap().timed_out
    }

    /// Whether `complete` has been called
    pub fn is_completed(&self) -> bool {
        self.inner.state.lock().unwrap().completed
    }

    fn push(&self, event: AsyncEvent) -> Result<()> {
        let resume = {
            let mut state = self.inner.state.lock().unwrap();

            if state.timed_out {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "async exchange timed out",
                )));
            }
            if let Some(kind) = state.failed {
                return Err(Error::Io(io::Error::from(kind)));
            }
            if state.completed || state.finished {
                return Err(Error::ResponseFailed);
            }

            state.events.push_back(event);
            state.parked.take()
        };

        if let Some(resume) = resume {
            resume();
        }

        Ok(())
    }

    fn fire_timeout(&self, generation: u64) {
        let resume = {
            let mut state = self.inner.state.lock().unwrap();
            if generation != state.timer_generation
                || state.completed
                || state.finished
                || state.timed_out
            {
                return;
            }

            warn!(
                "processor {}: async timeout after {:?}",
                self.inner.processor_id, state.timeout
            );
            state.timed_out = true;
            state.events.push_back(AsyncEvent::Timeout);
            state.parked.take()
        };

        if let Some(resume) = resume {
            resume();
        }
    }

    /// Park the exchange until the next event
    ///
    /// If events are already queued the closure is handed back for the
    /// caller to run.
    pub(crate) fn park(&self, resume: Resume) -> Option<Resume> {
        let mut state = self.inner.state.lock().unwrap();

        if !state.events.is_empty() || state.finished {
            return Some(resume);
        }

        state.parked = Some(resume);
        None
    }

    pub(crate) fn take_events(&self) -> VecDeque<AsyncEvent> {
        std::mem::take(&mut self.inner.state.lock().unwrap().events)
    }

    /// Record a failed socket write; later operations see `kind`
    pub(crate) fn fail(&self, kind: io::ErrorKind) {
        let mut state = self.inner.state.lock().unwrap();
        if state.failed.is_none() {
            debug!(
                "processor {}: async output failed ({:?})",
                self.inner.processor_id, kind
            );
            state.failed = Some(kind);
        }
    }

    /// Detach the handle from its processor
    pub(crate) fn finish(&self) {
        let (parked, timer) = {
            let mut state = self.inner.state.lock().unwrap();
            state.finished = true;
            state.events.clear();
            (state.parked.take(), state.timer.take())
        };
        drop(parked);
        if let Some(timer) = timer {
            self.inner.scheduler.cancel(timer);
        }
    }

    /// Whether both handles belong to the same exchange
    pub fn same_as(&self, other: &AsyncContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn context(timeout: Duration) -> AsyncContext {
        AsyncContext::new(1, timeout, Arc::new(Scheduler::new().unwrap()))
    }

    #[test]
    fn test_events_queue_in_order() {
        let ctx = context(Duration::ZERO);
        ctx.write(b"a").unwrap();
        ctx.flush().unwrap();
        ctx.write_str("b").unwrap();
        ctx.complete();
        ctx.complete();

        let events: Vec<_> = ctx.take_events().into_iter().collect();
        assert!(matches!(&events[..], [
            AsyncEvent::Write(a),
            AsyncEvent::Flush,
            AsyncEvent::Write(b),
            AsyncEvent::Complete,
        ] if a == b"a" && b == b"b"));

        assert!(matches!(ctx.write(b"late"), Err(Error::ResponseFailed)));
    }

    #[test]
    fn test_park_resumes_on_event() {
        let ctx = context(Duration::ZERO);
        let (tx, rx) = mpsc::channel();

        assert!(ctx.park(Box::new(move || tx.send(()).unwrap())).is_none());
        assert!(rx.try_recv().is_err());

        ctx.write(b"x").unwrap();
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_park_with_pending_events_returns_closure() {
        let ctx = context(Duration::ZERO);
        ctx.complete();
        assert!(ctx.park(Box::new(|| {})).is_some());
    }

    #[test]
    fn test_timeout_fails_later_operations() {
        let ctx = context(Duration::from_millis(20));
        let (tx, rx) = mpsc::channel();
        if let Some(resume) = ctx.park(Box::new(move || tx.send(()).unwrap())) {
            resume();
        }

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(ctx.is_timed_out());
        assert!(matches!(ctx.take_events().pop_front(), Some(AsyncEvent::Timeout)));

        match ctx.write(b"x") {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
            other => panic!("unexpected {:?}", other.err()),
        }
    }

    #[test]
    fn test_set_timeout_replaces_timer() {
        let ctx = context(Duration::from_millis(20));
        ctx.set_timeout(Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(100));
        assert!(!ctx.is_timed_out());
        assert_eq!(ctx.timeout(), Duration::from_secs(60));
        assert_eq!(ctx.inner.scheduler.pending(), 1);
    }

    #[test]
    fn test_finish_cancels_timer() {
        let ctx = context(Duration::from_secs(60));
        assert_eq!(ctx.inner.scheduler.pending(), 1);

        ctx.complete();
        ctx.finish();
        assert_eq!(ctx.inner.scheduler.pending(), 0);

        // a finished exchange never arms a new timer
        ctx.set_timeout(Duration::from_secs(60));
        assert_eq!(ctx.inner.scheduler.pending(), 0);
    }

    #[test]
    fn test_failed_output_is_reported() {
        let ctx = context(Duration::ZERO);
        ctx.fail(io::ErrorKind::ConnectionReset);
        match ctx.flush() {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("unexpected {:?}", other.err()),
        }

        // completion is still accepted so the exchange can end
        ctx.complete();
        assert!(ctx.is_completed());
    }
}
