//! select(2) backend.
//!
//! Level-triggered, but an fd_set only holds descriptors below
//! `FD_SETSIZE`. The event loop refuses client sockets past the ceiling at
//! accept time; any that reach a wait are reported as errored. The listener
//! past the ceiling is fatal.

use super::{Multiplexer, Readiness, Registration, LISTENER_TOKEN};
use mio::Token;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;
use std::time::Duration;

const FD_CEILING: usize = libc::FD_SETSIZE as usize;

#[derive(Default)]
pub struct SelectMultiplexer;

impl SelectMultiplexer {
    pub fn new() -> Self {
        Self
    }
}

fn empty_set() -> libc::fd_set {
    // SAFETY: fd_set is plain data; FD_ZERO puts it in a defined state.
    unsafe {
        let mut set: libc::fd_set = mem::zeroed();
        libc::FD_ZERO(&mut set);
        set
    }
}

fn in_range(fd: RawFd) -> bool {
    fd >= 0 && (fd as usize) < FD_CEILING
}

impl Multiplexer for SelectMultiplexer {
    fn wait(
        &mut self,
        interests: &[Registration],
        timeout: Option<Duration>,
        ready: &mut Vec<Readiness>,
    ) -> io::Result<()> {
        let mut read_set = empty_set();
        let mut write_set = empty_set();
        let mut except_set = empty_set();
        let mut max_fd: RawFd = -1;

        for reg in interests {
            if !in_range(reg.fd) {
                if reg.token == LISTENER_TOKEN {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("listener fd {} exceeds FD_SETSIZE", reg.fd),
                    ));
                }
                ready.push(Readiness::errored(reg.token));
                continue;
            }
            // SAFETY: fd is within [0, FD_SETSIZE).
            unsafe {
                libc::FD_SET(reg.fd, &mut read_set);
                libc::FD_SET(reg.fd, &mut except_set);
                if reg.interest.is_writable() {
                    libc::FD_SET(reg.fd, &mut write_set);
                }
            }
            max_fd = max_fd.max(reg.fd);
        }

        // Out-of-range sockets are already reportable, so don't block.
        let timeout = if ready.is_empty() {
            timeout
        } else {
            Some(Duration::ZERO)
        };
        let mut tv = timeout.map(|d| libc::timeval {
            tv_sec: d.as_secs() as libc::time_t,
            tv_usec: d.subsec_micros() as libc::suseconds_t,
        });
        let tv_ptr = tv
            .as_mut()
            .map_or(ptr::null_mut(), |tv| tv as *mut libc::timeval);

        // SAFETY: all sets are initialized and max_fd + 1 bounds them.
        let rc = unsafe {
            libc::select(
                max_fd + 1,
                &mut read_set,
                &mut write_set,
                &mut except_set,
                tv_ptr,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        for reg in interests.iter().filter(|reg| in_range(reg.fd)) {
            // SAFETY: fd is within [0, FD_SETSIZE) and the sets are initialized.
            let (readable, writable, errored) = unsafe {
                (
                    libc::FD_ISSET(reg.fd, &read_set),
                    libc::FD_ISSET(reg.fd, &write_set),
                    libc::FD_ISSET(reg.fd, &except_set),
                )
            };
            if readable || writable || errored {
                ready.push(Readiness {
                    token: reg.token,
                    readable,
                    writable,
                    errored,
                });
            }
        }
        Ok(())
    }

    fn forget(&mut self, _token: Token, _fd: RawFd) {}

    fn can_watch(&self, fd: RawFd) -> bool {
        in_range(fd)
    }

    fn name(&self) -> &'static str {
        "select"
    }
}
