//! Single-threaded readiness event loop.
//!
//! Each turn:
//! 1. derive interest from the listener and every tracked connection
//! 2. block in the multiplexer
//! 3. accept pending connections
//! 4. service every readable connection (one read each)
//! 5. service every writable connection (one chunk each)
//!
//! Per-connection failures tear down that connection only. A failed wait
//! ends the loop.

use crate::config::Config;
use crate::payload::Payload;
use crate::protocol::{self, Command};
use crate::runtime::connection::{Connection, ConnectionTable};
use crate::runtime::listener::{prepare_stream, Listener};
use crate::runtime::multiplexer::{
    new_multiplexer, Multiplexer, Readiness, Registration, LISTENER_TOKEN,
};
use crate::runtime::stats::ServerStats;
use crate::runtime::ShutdownHandle;
use mio::net::TcpStream;
use mio::{Interest, Token};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Result of servicing one readable connection.
enum ReadOutcome {
    Idle,
    Armed { queued: usize },
    PeerClosed,
    Fault(io::Error),
}

/// Result of servicing one writable connection.
enum WriteOutcome {
    Blocked,
    Progress,
    Drained,
    Fault(io::Error),
}

pub struct EventLoop {
    listener: Listener,
    multiplexer: Box<dyn Multiplexer>,
    connections: ConnectionTable<Connection>,
    payload: Payload,
    chunk_size: usize,
    send_buffer_size: Option<usize>,
    poll_timeout: Option<Duration>,
    /// Scratch space for client reads.
    read_buf: Vec<u8>,
    interests: Vec<Registration>,
    ready: Vec<Readiness>,
    stats: Arc<ServerStats>,
    shutdown: ShutdownHandle,
}

impl EventLoop {
    /// Bind the listener and set up the selected multiplexer.
    pub fn new(
        config: &Config,
        payload: Payload,
        stats: Arc<ServerStats>,
        shutdown: ShutdownHandle,
    ) -> io::Result<Self> {
        let addr = config
            .listen_addr()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        let listener = Listener::bind(addr, config.backlog)?;
        let multiplexer = new_multiplexer(config.multiplexer, config.max_connections)?;

        Ok(Self {
            listener,
            multiplexer,
            connections: ConnectionTable::new(config.max_connections),
            payload,
            chunk_size: config.chunk_size,
            send_buffer_size: config.send_buffer_size,
            poll_timeout: config.poll_timeout,
            read_buf: vec![0u8; config.chunk_size],
            interests: Vec::with_capacity(config.max_connections + 1),
            ready: Vec::with_capacity(config.max_connections + 1),
            stats,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Run until shut down or the multiplexer fails.
    pub fn run(&mut self) -> io::Result<()> {
        info!(
            addr = %self.local_addr(),
            multiplexer = self.multiplexer.name(),
            max_connections = self.connections.capacity(),
            chunk_size = self.chunk_size,
            payload_bytes = self.payload.len(),
            "Listening"
        );

        let result = loop {
            if self.shutdown.is_shutdown() {
                break Ok(());
            }
            if let Err(e) = self.turn() {
                error!(multiplexer = self.multiplexer.name(), error = %e, "Readiness wait failed");
                break Err(e);
            }
        };

        let snap = self.stats.snapshot();
        info!(
            active = snap.active(),
            accepted = snap.accepted,
            rejected = snap.rejected,
            setup_failed = snap.setup_failed,
            streams_completed = snap.streams_completed,
            bytes_sent = snap.bytes_sent,
            "Event loop stopping"
        );
        self.close_all();
        result
    }

    /// One iteration of the loop.
    fn turn(&mut self) -> io::Result<()> {
        self.build_interests();
        self.ready.clear();
        self.multiplexer
            .wait(&self.interests, self.poll_timeout, &mut self.ready)?;

        let ready = std::mem::take(&mut self.ready);

        if ready
            .iter()
            .any(|r| r.token == LISTENER_TOKEN && (r.readable || r.errored))
        {
            self.accept_pending();
        }

        for r in ready.iter().filter(|r| r.token != LISTENER_TOKEN) {
            if r.readable || r.errored {
                self.handle_readable(r.token.0, r.errored);
            }
        }

        for r in ready.iter().filter(|r| r.token != LISTENER_TOKEN) {
            if r.writable {
                self.handle_writable(r.token.0);
            }
        }

        self.ready = ready;
        Ok(())
    }

    /// Rebuild the interest list from current state. Never cached: a
    /// connection's write interest flips as its queue fills and drains.
    fn build_interests(&mut self) {
        self.interests.clear();
        self.interests.push(Registration {
            token: LISTENER_TOKEN,
            fd: self.listener.as_raw_fd(),
            interest: Interest::READABLE,
        });
        for (slot, conn) in self.connections.iter() {
            self.interests.push(Registration {
                token: Token(slot),
                fd: conn.stream.as_raw_fd(),
                interest: conn.state.interest(),
            });
        }
    }

    fn accept_pending(&mut self) {
        let pending: Vec<_> = self.listener.accept_pending().collect();
        for accepted in pending {
            match accepted {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(e) => warn!(error = %e, "Accept error"),
            }
        }
    }

    /// Track a freshly accepted socket, or close it if it cannot be served.
    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = prepare_stream(&stream, self.send_buffer_size) {
            self.stats.record_setup_failure();
            warn!(peer = %peer, error = %e, "Failed to configure socket, dropping");
            return;
        }

        if !self.multiplexer.can_watch(stream.as_raw_fd()) {
            self.stats.record_reject();
            warn!(
                peer = %peer,
                multiplexer = self.multiplexer.name(),
                "Descriptor cannot be watched, rejecting"
            );
            return;
        }

        match self.connections.allocate(Connection::new(stream, peer)) {
            Some(slot) => {
                self.stats.record_accept();
                debug!(slot, peer = %peer, "Accepted connection");
            }
            None => {
                self.stats.record_reject();
                warn!(
                    peer = %peer,
                    max_connections = self.connections.capacity(),
                    "Connection limit reached, rejecting"
                );
            }
        }
    }

    fn handle_readable(&mut self, slot: usize, errored: bool) {
        let outcome = {
            let Some(conn) = self.connections.get_mut(slot) else {
                return;
            };

            let pending = if errored {
                match conn.stream.take_error() {
                    Ok(Some(e)) | Err(e) => Some(e),
                    Ok(None) => None,
                }
            } else {
                None
            };

            match pending {
                Some(e) => ReadOutcome::Fault(e),
                None => match conn.stream.read(&mut self.read_buf) {
                    Ok(0) => ReadOutcome::PeerClosed,
                    Ok(n) => {
                        match protocol::interpret(
                            &self.read_buf[..n],
                            &mut conn.state,
                            self.payload.len(),
                        ) {
                            Some(Command::Run) => ReadOutcome::Armed {
                                queued: conn.state.remaining(),
                            },
                            None => ReadOutcome::Idle,
                        }
                    }
                    Err(ref e)
                        if e.kind() == io::ErrorKind::WouldBlock
                            || e.kind() == io::ErrorKind::Interrupted =>
                    {
                        ReadOutcome::Idle
                    }
                    Err(e) => ReadOutcome::Fault(e),
                },
            }
        };

        match outcome {
            ReadOutcome::Idle => {}
            ReadOutcome::Armed { queued } => {
                self.stats.record_stream_start();
                debug!(slot, queued, "Stream armed");
                if queued == 0 {
                    self.finish_stream(slot);
                }
            }
            ReadOutcome::PeerClosed => {
                debug!(slot, "Peer closed connection");
                self.teardown(slot);
            }
            ReadOutcome::Fault(e) => {
                warn!(slot, error = %e, "Read failed, dropping connection");
                self.teardown(slot);
            }
        }
    }

    fn handle_writable(&mut self, slot: usize) {
        let outcome = {
            let Some(conn) = self.connections.get_mut(slot) else {
                return;
            };
            if !conn.state.wants_write() {
                return;
            }

            let chunk = self.payload.slice(conn.state.cursor(), self.chunk_size);
            match conn.stream.write(chunk) {
                Ok(0) => WriteOutcome::Blocked,
                Ok(n) => {
                    self.stats.record_sent(n);
                    if conn.state.advance(n) {
                        WriteOutcome::Drained
                    } else {
                        WriteOutcome::Progress
                    }
                }
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::Interrupted =>
                {
                    WriteOutcome::Blocked
                }
                Err(e) => WriteOutcome::Fault(e),
            }
        };

        match outcome {
            WriteOutcome::Blocked | WriteOutcome::Progress => {}
            WriteOutcome::Drained => self.finish_stream(slot),
            WriteOutcome::Fault(e) => {
                warn!(slot, error = %e, "Write failed, dropping connection");
                self.teardown(slot);
            }
        }
    }

    /// Shut down the send side once everything queued has been written.
    /// The read side stays open for further commands or peer shutdown.
    fn finish_stream(&mut self, slot: usize) {
        let result = match self.connections.get_mut(slot) {
            Some(conn) => conn.stream.shutdown(Shutdown::Write).map(|()| {
                conn.state.finish();
                conn.peer
            }),
            None => return,
        };

        match result {
            Ok(peer) => {
                self.stats.record_stream_complete();
                debug!(slot, peer = %peer, "Stream complete");
            }
            Err(e) => {
                warn!(slot, error = %e, "Shutdown failed, dropping connection");
                self.teardown(slot);
            }
        }
    }

    /// Release the slot and close the socket.
    fn teardown(&mut self, slot: usize) {
        if let Some(conn) = self.connections.release(slot) {
            self.multiplexer
                .forget(Token(slot), conn.stream.as_raw_fd());
            self.stats.record_close();
            debug!(
                slot,
                peer = %conn.peer,
                lifecycle = ?conn.state.lifecycle(),
                active = self.connections.len(),
                "Connection closed"
            );
        }
    }

    fn close_all(&mut self) {
        for slot in self.connections.occupied() {
            self.teardown(slot);
        }
    }
}
