//! Non-blocking streaming runtime.
//!
//! One thread, one readiness wait per iteration:
//! - `Listener`: bound, non-blocking listening socket
//! - `ConnectionTable`: bounded slab of tracked connections
//! - `Multiplexer`: mio, poll(2), or select(2) behind one trait
//! - `EventLoop`: accepts, reads commands, writes payload chunks

mod connection;
mod event_loop;
mod listener;
mod multiplexer;
mod signal;
mod stats;

#[allow(unused_imports)]
pub(crate) use connection::{Lifecycle, StreamState};
#[allow(unused_imports)]
pub use stats::{ServerStats, StatsSnapshot};
pub use signal::install_signal_handlers;

use crate::config::Config;
use crate::payload::Payload;
use event_loop::EventLoop;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable handle that stops a running server.
///
/// The loop notices on its next iteration. A signal handler wakes the wait
/// itself; any other thread needs a bounded `poll_timeout` for a prompt stop.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A bound server, ready to run.
pub struct Server {
    event_loop: EventLoop,
    stats: Arc<ServerStats>,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Bind the listening socket. Bind and listen failures are returned here.
    pub fn bind(config: &Config, payload: Payload) -> io::Result<Self> {
        let stats = Arc::new(ServerStats::default());
        let shutdown = ShutdownHandle::default();
        let event_loop = EventLoop::new(config, payload, Arc::clone(&stats), shutdown.clone())?;
        Ok(Self {
            event_loop,
            stats,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.event_loop.local_addr()
    }

    #[cfg(test)]
    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Serve until shut down. Returns an error only if the readiness wait fails.
    pub fn run(mut self) -> io::Result<()> {
        self.event_loop.run()
    }
}
