//! SIGINT/SIGTERM handling.
//!
//! The handler only flips the shared shutdown flag. The signal also
//! interrupts the readiness wait, which the event loop treats as an empty
//! iteration, so the flag is seen without waiting for `poll_timeout`.

use crate::runtime::ShutdownHandle;
use std::io;
use std::sync::OnceLock;

static HANDLE: OnceLock<ShutdownHandle> = OnceLock::new();

extern "C" fn on_signal(_sig: libc::c_int) {
    if let Some(handle) = HANDLE.get() {
        handle.shutdown();
    }
}

/// Route SIGINT and SIGTERM to `handle`. Once per process.
pub fn install_signal_handlers(handle: ShutdownHandle) -> io::Result<()> {
    HANDLE.set(handle).map_err(|_| {
        io::Error::new(
            io::ErrorKind::AlreadyExists,
            "signal handlers already installed",
        )
    })?;

    for sig in [libc::SIGINT, libc::SIGTERM] {
        // SAFETY: on_signal only performs an atomic store on an
        // already-initialized handle.
        let prev = unsafe { libc::signal(sig, on_signal as *const () as libc::sighandler_t) };
        if prev == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
