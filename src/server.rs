//! Blocking socket host for the processor
//!
//! One acceptor thread hands each connection to the worker pool. A worker
//! takes a processor from the pool and serves the connection until it
//! closes or an exchange goes async; a suspended exchange is parked on its
//! [`AsyncContext`] and handed back to the workers by its next event.
//!
//! [`AsyncContext`]: crate::http::AsyncContext

use crate::config::Config;
use crate::executor::Executor;
use crate::http::session::from_tcp_stream;
use crate::http::{AsyncContext, Connection, Handler, PooledProcessor, ProcessorPool, SocketState};
use crate::scheduler::Scheduler;
use log::{debug, error, info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const ACCEPT_POLL: Duration = Duration::from_millis(100);
const LISTEN_BACKLOG: i32 = 128;

struct Shared {
    config: Arc<Config>,
    handler: Arc<dyn Handler>,
    pool: ProcessorPool,
    executor: Executor,
    scheduler: Arc<Scheduler>,
    next_conn: AtomicU64,
    stopping: AtomicBool,
    // clones of open streams, so stop can unblock workers
    open: Mutex<HashMap<u64, TcpStream>>,
    // exchanges parked until their next async event, by connection id
    suspended: Mutex<HashMap<u64, AsyncContext>>,
}

impl Shared {
    fn accept(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let id = self.next_conn.fetch_add(1, Ordering::Relaxed) + 1;

        if let Err(e) = stream
            .set_nonblocking(false)
            .and_then(|_| stream.set_nodelay(true))
        {
            warn!("conn {}: failed to configure socket: {}", id, e);
            return;
        }

        match stream.try_clone() {
            Ok(clone) => {
                self.open.lock().unwrap().insert(id, clone);
            }
            Err(e) => {
                warn!("conn {}: failed to register socket: {}", id, e);
                return;
            }
        }

        debug!("conn {}: accepted from {}", id, peer);

        let conn = Connection::new(
            id,
            from_tcp_stream(stream),
            self.config.max_keep_alive_requests,
        );

        let shared = self.clone();
        let queued = self.executor.execute(Box::new(move || {
            let processor = shared.pool.acquire();
            shared.serve(conn, processor);
        }));

        if !queued {
            self.forget(id);
        }
    }

    fn serve(self: &Arc<Self>, mut conn: Connection, mut processor: PooledProcessor) {
        let state = processor.process(&mut conn, &*self.handler);
        self.settle(conn, processor, state);
    }

    fn resume(self: &Arc<Self>, mut conn: Connection, mut processor: PooledProcessor) {
        let state = processor.resume(&mut conn);
        self.settle(conn, processor, state);
    }

    fn settle(self: &Arc<Self>, conn: Connection, processor: PooledProcessor, state: SocketState) {
        match state {
            // an async exchange ended with the connection kept alive
            SocketState::Open => self.serve(conn, processor),
            SocketState::Closed => {
                debug!(
                    "conn {}: closed after {} requests ({})",
                    conn.id(),
                    conn.requests_served(),
                    conn.close_reason()
                        .map_or_else(|| "peer".to_string(), |r| r.to_string())
                );
                self.forget(conn.id());
            }
            SocketState::Suspended => {
                let ctx = match processor.async_context() {
                    Some(ctx) => ctx.clone(),
                    None => {
                        error!("processor {}: suspended without async context", processor.id());
                        self.forget(conn.id());
                        return;
                    }
                };

                let id = conn.id();
                self.suspended.lock().unwrap().insert(id, ctx.clone());

                let shared = self.clone();
                let resume = Box::new(move || {
                    shared.suspended.lock().unwrap().remove(&id);
                    let worker = shared.clone();
                    let queued = shared.executor.execute(Box::new(move || {
                        worker.resume(conn, processor);
                    }));
                    if !queued {
                        debug!("conn {}: dropped on shutdown", id);
                        shared.forget(id);
                    }
                });

                if let Some(resume) = ctx.park(resume) {
                    resume();
                }
            }
        }
    }

    fn forget(&self, id: u64) {
        self.open.lock().unwrap().remove(&id);
    }

    fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("server: accepting on {:?}", listener.local_addr());

        while !self.stopping.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, peer)) => self.accept(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if let Err(e) = wait_readable(&listener, ACCEPT_POLL) {
                        error!("server: poll failed: {}", e);
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    // e.g. out of file descriptors; back off and retry
                    warn!("server: accept failed: {}", e);
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }

        debug!("server: acceptor stopped");
    }
}

fn wait_readable(listener: &TcpListener, timeout: Duration) -> io::Result<()> {
    use libc::{poll, pollfd, POLLIN};

    let mut pfd = pollfd {
        fd: listener.as_raw_fd(),
        events: POLLIN,
        revents: 0,
    };

    let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout.as_millis() as i32) };
    if result < 0 {
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }

    Ok(())
}

/// HTTP/1.1 server bound to a listening socket
pub struct HttpServer {
    listener: TcpListener,
    config: Config,
    handler: Arc<dyn Handler>,
}

impl HttpServer {
    /// Bind a listener
    ///
    /// Fails with `InvalidInput` if `config` does not validate.
    pub fn bind(
        addr: impl ToSocketAddrs,
        config: Config,
        handler: impl Handler + 'static,
    ) -> io::Result<Self> {
        config
            .validate()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no address to bind"))?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;
        socket.set_nonblocking(true)?;

        Ok(HttpServer {
            listener: socket.into(),
            config,
            handler: Arc::new(handler),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Start the worker pool and the acceptor thread
    pub fn start(self) -> io::Result<ServerHandle> {
        let local_addr = self.listener.local_addr()?;
        let config = Arc::new(self.config);
        let scheduler = Arc::new(Scheduler::new()?);

        let shared = Arc::new(Shared {
            pool: ProcessorPool::new(config.clone(), scheduler.clone()),
            executor: Executor::new(config.max_threads, "h11-worker")?,
            scheduler,
            handler: self.handler,
            next_conn: AtomicU64::new(0),
            stopping: AtomicBool::new(false),
            open: Mutex::new(HashMap::new()),
            suspended: Mutex::new(HashMap::new()),
            config,
        });

        let acceptor = {
            let shared = shared.clone();
            let listener = self.listener;
            thread::Builder::new()
                .name("h11-acceptor".to_string())
                .spawn(move || shared.accept_loop(listener))?
        };

        info!(
            "server: listening on {} with {} workers",
            local_addr, shared.config.max_threads
        );

        Ok(ServerHandle {
            local_addr,
            shared,
            acceptor: Some(acceptor),
        })
    }
}

/// Running server
///
/// Dropping the handle stops the server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    acceptor: Option<thread::JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Processor pool, for observing recycling
    pub fn pool(&self) -> &ProcessorPool {
        &self.shared.pool
    }

    /// Connections accepted and not yet closed
    pub fn open_connections(&self) -> usize {
        self.shared.open.lock().unwrap().len()
    }

    /// Async exchanges waiting for their next event
    pub fn suspended_exchanges(&self) -> usize {
        self.shared.suspended.lock().unwrap().len()
    }

    /// Stop accepting, close open connections and stop the workers
    ///
    /// Suspended async exchanges are abandoned: their connections and
    /// processors are released and later operations on their handles fail.
    pub fn stop(&mut self) {
        let acceptor = match self.acceptor.take() {
            Some(acceptor) => acceptor,
            None => return,
        };

        self.shared.stopping.store(true, Ordering::SeqCst);
        if acceptor.join().is_err() {
            error!("server: acceptor panicked");
        }

        for (_, stream) in self.shared.open.lock().unwrap().drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }

        self.shared.executor.stop();

        // a parked exchange owns its processor, which holds the handle the
        // exchange is parked on; finishing the handle drops the parked closure
        let suspended: Vec<_> = self
            .shared
            .suspended
            .lock()
            .unwrap()
            .drain()
            .map(|(_, ctx)| ctx)
            .collect();
        for ctx in suspended {
            debug!("server: abandoning suspended exchange");
            ctx.finish();
        }

        self.shared.scheduler.stop();

        info!("server: stopped");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
