//! h11proc - HTTP/1.1 connection processor
//!
//! This crate provides an HTTP/1.1 request/response processor together with
//! the minimal host (listener, workers, timers) needed to run it over real
//! sockets, and a raw-wire client for exercising it.
//!
//! # Example
//!
//! ```no_run
//! use h11proc::{Config, HttpServer};
//! use h11proc::Exchange;
//!
//! let server = HttpServer::bind(
//!     "127.0.0.1:0",
//!     Config::default(),
//!     |ex: &mut Exchange<'_>| -> h11proc::http::Result<()> {
//!         ex.response_mut().set_content_type("text/plain");
//!         ex.write(b"OK")
//!     },
//! )
//! .unwrap();
//!
//! let handle = server.start().unwrap();
//! println!("listening on {}", handle.local_addr());
//! ```

pub mod config;
pub mod executor;
pub mod http;
pub mod scheduler;
pub mod server;

pub use config::{Config, ConfigBuilder, ConfigError};
pub use http::{Exchange, Handler};
pub use server::{HttpServer, ServerHandle};
