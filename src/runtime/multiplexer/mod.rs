//! Readiness multiplexing behind a single interface.
//!
//! The event loop hands over the full interest list on every wait, derived
//! from current connection state. Backends must honor that list as given:
//! a socket registered without `WRITABLE` is never reported writable.
//!
//! Backends:
//! - `mio`: epoll on Linux, kqueue on macOS
//! - `poll`: poll(2)
//! - `select`: select(2), limited to descriptors below `FD_SETSIZE`

mod mio_impl;
mod poll;
mod select;

pub use mio_impl::MioMultiplexer;
pub use poll::PollMultiplexer;
pub use select::SelectMultiplexer;

use crate::config::MultiplexerKind;
use mio::{Interest, Token};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Token reserved for the listening socket.
pub const LISTENER_TOKEN: Token = Token(usize::MAX);

/// One socket the caller wants watched during the next wait.
#[derive(Debug, Clone, Copy)]
pub struct Registration {
    pub token: Token,
    pub fd: RawFd,
    pub interest: Interest,
}

/// What a wait observed for one socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub token: Token,
    /// Data available, or the peer hung up.
    pub readable: bool,
    pub writable: bool,
    /// The socket has a pending error or could not be watched.
    pub errored: bool,
}

impl Readiness {
    pub fn errored(token: Token) -> Self {
        Self {
            token,
            readable: false,
            writable: false,
            errored: true,
        }
    }
}

/// Platform readiness primitive.
pub trait Multiplexer: Send {
    /// Block until a registered socket is ready or `timeout` elapses.
    ///
    /// Fills `ready` with at most one entry per token. An interrupted wait
    /// returns `Ok` with nothing ready. Any other error is fatal for the
    /// caller.
    fn wait(
        &mut self,
        interests: &[Registration],
        timeout: Option<Duration>,
        ready: &mut Vec<Readiness>,
    ) -> io::Result<()>;

    /// Drop any state held for a socket that is about to be closed.
    fn forget(&mut self, token: Token, fd: RawFd);

    /// Whether this backend can watch `fd` at all.
    fn can_watch(&self, fd: RawFd) -> bool {
        fd >= 0
    }

    fn name(&self) -> &'static str;
}

/// Build the backend selected in configuration.
pub fn new_multiplexer(
    kind: MultiplexerKind,
    capacity: usize,
) -> io::Result<Box<dyn Multiplexer>> {
    Ok(match kind {
        MultiplexerKind::Mio => Box::new(MioMultiplexer::new(capacity)?),
        MultiplexerKind::Poll => Box::new(PollMultiplexer::new(capacity)),
        MultiplexerKind::Select => Box::new(SelectMultiplexer::new()),
    })
}

/// Add `readiness` to `ready`, merging with an existing entry for the same token.
fn merge_into(ready: &mut Vec<Readiness>, readiness: Readiness) {
    match ready.iter_mut().find(|r| r.token == readiness.token) {
        Some(existing) => {
            existing.readable |= readiness.readable;
            existing.writable |= readiness.writable;
            existing.errored |= readiness.errored;
        }
        None => ready.push(readiness),
    }
}

/// Round a timeout up to whole milliseconds, -1 meaning "forever".
fn timeout_millis(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            let ms = d.as_nanos().div_ceil(1_000_000);
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}
