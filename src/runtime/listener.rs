//! Listening socket and non-blocking accept.

use mio::net::{TcpListener, TcpStream};
use socket2::SockRef;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};

/// The bound, listening, non-blocking server socket.
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind to `addr` and start listening with the given backlog.
    pub fn bind(addr: SocketAddr, backlog: i32) -> io::Result<Self> {
        let socket = socket2::Socket::new(
            match addr {
                SocketAddr::V4(_) => socket2::Domain::IPV4,
                SocketAddr::V6(_) => socket2::Domain::IPV6,
            },
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;

        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(backlog)?;

        let inner = TcpListener::from_std(socket.into());
        let local_addr = inner.local_addr()?;
        Ok(Self { inner, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept every connection currently queued by the kernel.
    ///
    /// The iterator ends at the first "would block", so it is finite per
    /// call and picks up again on the next readiness report.
    pub fn accept_pending(&self) -> AcceptPending<'_> {
        AcceptPending {
            listener: &self.inner,
            done: false,
        }
    }
}

impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

/// Iterator returned by [`Listener::accept_pending`].
pub struct AcceptPending<'a> {
    listener: &'a TcpListener,
    done: bool,
}

impl Iterator for AcceptPending<'_> {
    type Item = io::Result<(TcpStream, SocketAddr)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            // mio hands back sockets already in non-blocking mode.
            match self.listener.accept() {
                Ok(accepted) => return Some(Ok(accepted)),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.done = true;
                    return None;
                }
                Err(ref e)
                    if e.kind() == io::ErrorKind::Interrupted
                        || e.kind() == io::ErrorKind::ConnectionAborted =>
                {
                    continue
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Apply per-connection socket options to a freshly accepted stream.
pub fn prepare_stream(stream: &TcpStream, send_buffer_size: Option<usize>) -> io::Result<()> {
    if let Some(size) = send_buffer_size {
        SockRef::from(stream).set_send_buffer_size(size)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream as StdTcpStream;
    use std::thread;
    use std::time::{Duration, Instant};

    fn bind_local() -> Listener {
        Listener::bind("127.0.0.1:0".parse().unwrap(), 5).unwrap()
    }

    #[test]
    fn test_bind_ephemeral_port() {
        let listener = bind_local();
        assert_ne!(listener.local_addr().port(), 0);
    }

    #[test]
    fn test_accept_pending_empty() {
        let listener = bind_local();
        assert_eq!(listener.accept_pending().count(), 0);
    }

    #[test]
    fn test_accept_pending_drains_queue() {
        let listener = bind_local();
        let _a = StdTcpStream::connect(listener.local_addr()).unwrap();
        let _b = StdTcpStream::connect(listener.local_addr()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut accepted = Vec::new();
        while accepted.len() < 2 && Instant::now() < deadline {
            for result in listener.accept_pending() {
                accepted.push(result.unwrap());
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(accepted.len(), 2);

        for (stream, peer) in &accepted {
            assert_eq!(stream.peer_addr().unwrap(), *peer);
            prepare_stream(stream, Some(1)).unwrap();
        }
    }

    #[test]
    fn test_bind_conflict() {
        let first = bind_local();
        let second = Listener::bind(first.local_addr(), 5);
        assert!(second.is_err());
    }
}
