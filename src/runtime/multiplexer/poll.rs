//! poll(2) backend. Level-triggered, no descriptor ceiling.

use super::{timeout_millis, Multiplexer, Readiness, Registration};
use mio::Token;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

pub struct PollMultiplexer {
    fds: Vec<libc::pollfd>,
}

impl PollMultiplexer {
    pub fn new(capacity: usize) -> Self {
        Self {
            fds: Vec::with_capacity(capacity + 1),
        }
    }
}

impl Multiplexer for PollMultiplexer {
    fn wait(
        &mut self,
        interests: &[Registration],
        timeout: Option<Duration>,
        ready: &mut Vec<Readiness>,
    ) -> io::Result<()> {
        self.fds.clear();
        self.fds.extend(interests.iter().map(|reg| {
            let mut events = libc::POLLIN;
            if reg.interest.is_writable() {
                events |= libc::POLLOUT;
            }
            libc::pollfd {
                fd: reg.fd,
                events,
                revents: 0,
            }
        }));

        // SAFETY: `fds` is a live, correctly sized array of pollfd.
        let rc = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_millis(timeout),
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        for (pfd, reg) in self.fds.iter().zip(interests) {
            let revents = pfd.revents;
            if revents == 0 {
                continue;
            }
            ready.push(Readiness {
                token: reg.token,
                readable: revents & (libc::POLLIN | libc::POLLHUP) != 0,
                writable: revents & libc::POLLOUT != 0,
                errored: revents & (libc::POLLERR | libc::POLLNVAL) != 0,
            });
        }
        Ok(())
    }

    fn forget(&mut self, _token: Token, _fd: RawFd) {}

    fn name(&self) -> &'static str {
        "poll"
    }
}
