//! Read-readiness waiting for callback-driven event loops.
//!
//! Embedders with their own event loop watch the socket descriptor directly;
//! these helpers serve the ones that do not.

use std::io::{self, ErrorKind};
use std::os::fd::RawFd;
use std::time::Duration;

use crate::error::Result;

/// Wait until any of `fds` is readable (or hung up).
///
/// Returns one flag per descriptor, in order. `None` waits forever.
pub fn poll_readable(fds: &[RawFd], timeout: Option<Duration>) -> Result<Vec<bool>> {
    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();

    let timeout_ms = match timeout {
        Some(duration) => duration.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
        None => -1,
    };

    loop {
        // SAFETY: `pollfds` is a valid, writable array of `pollfds.len()` entries.
        let rc = unsafe {
            libc::poll(
                pollfds.as_mut_ptr(),
                pollfds.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if rc >= 0 {
            break;
        }
        let err = io::Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted {
            continue;
        }
        return Err(err.into());
    }

    Ok(pollfds
        .iter()
        .map(|p| p.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
        .collect())
}

/// Wait until `fd` is readable. Returns `false` on timeout.
pub fn wait_readable(fd: RawFd, timeout: Option<Duration>) -> Result<bool> {
    Ok(poll_readable(&[fd], timeout)?
        .first()
        .copied()
        .unwrap_or(false))
}
