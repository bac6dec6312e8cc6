//! Processor recycling
//!
//! Processors are expensive enough to keep: each owns a parser, request and
//! response buffers. A released processor is scrubbed before it is cached,
//! so the next connection that acquires it cannot observe anything from the
//! previous one.

use super::Processor;
use crate::config::Config;
use crate::scheduler::Scheduler;
use log::{debug, trace};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

struct Inner {
    idle: Mutex<Vec<Processor>>,
    capacity: usize,
    created: AtomicU64,
    config: Arc<Config>,
    scheduler: Arc<Scheduler>,
}

/// Bounded cache of idle processors
#[derive(Clone)]
pub struct ProcessorPool {
    inner: Arc<Inner>,
}

impl ProcessorPool {
    /// Create a pool caching up to `config.processor_cache` processors
    pub fn new(config: Arc<Config>, scheduler: Arc<Scheduler>) -> Self {
        ProcessorPool {
            inner: Arc::new(Inner {
                idle: Mutex::new(Vec::with_capacity(config.processor_cache)),
                capacity: config.processor_cache,
                created: AtomicU64::new(0),
                config,
                scheduler,
            }),
        }
    }

    /// Take an idle processor, or create one
    pub fn acquire(&self) -> PooledProcessor {
        let cached = self.inner.idle.lock().unwrap().pop();

        let processor = match cached {
            Some(processor) => {
                trace!("processor {}: reused", processor.id());
                processor
            }
            None => {
                let id = self.inner.created.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("processor {}: created", id);
                Processor::new(id, self.inner.config.clone(), self.inner.scheduler.clone())
            }
        };

        PooledProcessor {
            processor: Some(processor),
            pool: self.clone(),
        }
    }

    fn release(&self, mut processor: Processor) {
        processor.recycle();

        let mut idle = self.inner.idle.lock().unwrap();
        if idle.len() < self.inner.capacity {
            trace!("processor {}: released", processor.id());
            idle.push(processor);
        } else {
            debug!("processor {}: pool full, dropped", processor.id());
        }
    }

    /// Processors waiting for reuse
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().unwrap().len()
    }

    /// Processors created over the pool's lifetime
    pub fn created_count(&self) -> u64 {
        self.inner.created.load(Ordering::Relaxed)
    }

    /// Maximum number of cached processors
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

/// A processor on loan from a [`ProcessorPool`]
///
/// Dropping it scrubs the processor and returns it to the pool.
pub struct PooledProcessor {
    processor: Option<Processor>,
    pool: ProcessorPool,
}

impl Deref for PooledProcessor {
    type Target = Processor;

    fn deref(&self) -> &Processor {
        // only taken in drop
        self.processor.as_ref().unwrap()
    }
}

impl DerefMut for PooledProcessor {
    fn deref_mut(&mut self) -> &mut Processor {
        self.processor.as_mut().unwrap()
    }
}

impl Drop for PooledProcessor {
    fn drop(&mut self) {
        if let Some(processor) = self.processor.take() {
            self.pool.release(processor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::session::testing::MemorySession;
    use crate::http::{Connection, Exchange, HttpSession, Result};

    fn pool(capacity: usize) -> ProcessorPool {
        let config = Config::builder().processor_cache(capacity).build().unwrap();
        ProcessorPool::new(Arc::new(config), Arc::new(Scheduler::new().unwrap()))
    }

    #[test]
    fn test_reuses_released_processor() {
        let pool = pool(1);

        let first = pool.acquire();
        let id = first.id();
        drop(first);
        assert_eq!(pool.idle_count(), 1);

        let second = pool.acquire();
        assert_eq!(second.id(), id);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.created_count(), 1);
    }

    #[test]
    fn test_cache_is_bounded() {
        let pool = pool(1);

        let a = pool.acquire();
        let b = pool.acquire();
        assert_ne!(a.id(), b.id());
        drop(a);
        drop(b);

        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.created_count(), 2);
    }

    #[test]
    fn test_released_processor_is_scrubbed() {
        let pool = pool(1);
        let mut processor = pool.acquire();

        // simulate an exchange abandoned mid-way, as after a reset
        let handler = |ex: &mut Exchange<'_>| -> Result<()> {
            ex.request_mut().cookies();
            ex.request_mut().set_attribute("user", "alice".to_string());
            ex.response_mut().set_header("Set-Cookie", "session=1");
            ex.start_async();
            Ok(())
        };
        let (session, _) = MemorySession::new(b"GET / HTTP/1.1\r\nCookie: id=42\r\n\r\n");
        let mut conn = Connection::new(1, HttpSession::new(session), None);
        processor.process(&mut conn, &handler);
        let ctx = processor.async_context().cloned().unwrap();
        drop(processor);

        // the parked exchange is detached
        assert!(ctx.write(b"late").is_err());

        let processor = pool.acquire();
        assert!(processor.request().headers().is_empty());
        assert!(!processor.request().cookies_parsed());
        assert_eq!(processor.request().attribute_names().count(), 0);
        assert!(processor.response().headers().is_empty());
        assert!(!processor.response().is_committed());
        assert!(processor.async_context().is_none());
    }
}
