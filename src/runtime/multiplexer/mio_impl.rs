//! mio backend (epoll on Linux, kqueue on macOS).
//!
//! mio is edge-triggered. Every wait re-registers each socket with its
//! current interest, which re-arms readiness, so a socket that is still
//! readable or writable is reported again and the event loop sees
//! level-triggered behavior.

use super::{merge_into, Multiplexer, Readiness, Registration, LISTENER_TOKEN};
use mio::unix::SourceFd;
use mio::{Events, Poll, Token};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;
use tracing::debug;

pub struct MioMultiplexer {
    poll: Poll,
    events: Events,
    /// Descriptor currently registered under each token.
    registered: HashMap<Token, RawFd>,
}

impl MioMultiplexer {
    pub fn new(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            // Room for the listener plus every connection.
            events: Events::with_capacity(capacity + 1),
            registered: HashMap::with_capacity(capacity + 1),
        })
    }

    fn sync(&mut self, reg: &Registration) -> io::Result<()> {
        let registry = self.poll.registry();
        match self.registered.get(&reg.token).copied() {
            Some(fd) if fd == reg.fd => {
                registry.reregister(&mut SourceFd(&reg.fd), reg.token, reg.interest)
            }
            stale => {
                if let Some(old) = stale {
                    let _ = registry.deregister(&mut SourceFd(&old));
                }
                registry.register(&mut SourceFd(&reg.fd), reg.token, reg.interest)?;
                self.registered.insert(reg.token, reg.fd);
                Ok(())
            }
        }
    }
}

impl Multiplexer for MioMultiplexer {
    fn wait(
        &mut self,
        interests: &[Registration],
        timeout: Option<Duration>,
        ready: &mut Vec<Readiness>,
    ) -> io::Result<()> {
        for reg in interests {
            if let Err(e) = self.sync(reg) {
                if reg.token == LISTENER_TOKEN {
                    return Err(e);
                }
                debug!(token = reg.token.0, error = %e, "Failed to register socket");
                self.registered.remove(&reg.token);
                merge_into(ready, Readiness::errored(reg.token));
            }
        }

        // A failed registration is already something to report.
        let timeout = if ready.is_empty() {
            timeout
        } else {
            Some(Duration::ZERO)
        };

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        for event in self.events.iter() {
            merge_into(
                ready,
                Readiness {
                    token: event.token(),
                    readable: event.is_readable() || event.is_read_closed(),
                    writable: event.is_writable(),
                    errored: event.is_error(),
                },
            );
        }
        Ok(())
    }

    fn forget(&mut self, token: Token, fd: RawFd) {
        if self.registered.get(&token) == Some(&fd) {
            self.registered.remove(&token);
            let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
        }
    }

    fn name(&self) -> &'static str {
        "mio"
    }
}
