use std::io::{self, ErrorKind};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, TransportError};

/// Flags applied to every send so a vanished peer surfaces as `EPIPE`
/// instead of killing the process with `SIGPIPE`.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) const SEND_FLAGS: libc::c_int = 0;

/// Whether a single socket call may park the calling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    /// Wait until the call can make progress (bounded by socket timeouts).
    Blocking,
    /// Return `WouldBlock` immediately when the call cannot make progress.
    NonBlocking,
}

impl IoMode {
    fn flags(self) -> libc::c_int {
        match self {
            IoMode::Blocking => 0,
            IoMode::NonBlocking => libc::MSG_DONTWAIT,
        }
    }
}

/// One end of a connected local stream socket.
///
/// The descriptor itself stays in blocking mode; non-blocking behavior is
/// selected per call with [`IoMode`], so the same endpoint can serve a
/// readiness-driven receive path and a blocking request/reply path.
pub struct LocalSocket {
    stream: UnixStream,
}

impl LocalSocket {
    /// Create a connected socket pair.
    ///
    /// Returns the endpoint kept by the caller and the raw descriptor of the
    /// other end, meant to be handed to the peer process.
    pub fn pair() -> Result<(Self, OwnedFd)> {
        let (local, remote) = UnixStream::pair().map_err(TransportError::SocketPair)?;
        debug!(
            local = local.as_raw_fd(),
            remote = remote.as_raw_fd(),
            "created socket pair"
        );
        Ok((Self { stream: local }, OwnedFd::from(remote)))
    }

    /// Adopt an already connected socket descriptor.
    pub fn from_fd(fd: OwnedFd) -> Self {
        Self {
            stream: UnixStream::from(fd),
        }
    }

    /// Send bytes with a single `send(2)` call.
    ///
    /// Interrupted calls are retried. Short writes are reported as-is.
    pub fn send(&self, data: &[u8], mode: IoMode) -> io::Result<usize> {
        loop {
            // SAFETY: `data` is valid for `data.len()` bytes and the descriptor
            // is owned by `self.stream` for the duration of the call.
            let rc = unsafe {
                libc::send(
                    self.as_raw_fd(),
                    data.as_ptr().cast::<libc::c_void>(),
                    data.len(),
                    SEND_FLAGS | mode.flags(),
                )
            };
            if rc >= 0 {
                return Ok(rc as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
    }

    /// Send every byte of `data`, blocking as needed.
    pub fn send_all(&self, data: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < data.len() {
            match self.send(&data[offset..], IoMode::Blocking) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => offset += n,
                Err(err) => return Err(map_blocking_error(err)),
            }
        }
        Ok(())
    }

    /// Receive up to `buf.len()` bytes with a single `recv(2)` call.
    ///
    /// Returns `Ok(0)` at end of stream. Interrupted calls are retried.
    pub fn recv(&self, buf: &mut [u8], mode: IoMode) -> io::Result<usize> {
        loop {
            // SAFETY: `buf` is valid for writes of `buf.len()` bytes and the
            // descriptor is owned by `self.stream` for the duration of the call.
            let rc = unsafe {
                libc::recv(
                    self.as_raw_fd(),
                    buf.as_mut_ptr().cast::<libc::c_void>(),
                    buf.len(),
                    mode.flags(),
                )
            };
            if rc >= 0 {
                return Ok(rc as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
    }

    /// Set the timeout applied to blocking receives.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout).map_err(Into::into)
    }

    /// Set the timeout applied to blocking sends.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_write_timeout(timeout).map_err(Into::into)
    }

    /// Duplicate the underlying descriptor.
    pub fn try_clone_fd(&self) -> Result<OwnedFd> {
        Ok(self.stream.as_fd().try_clone_to_owned()?)
    }

    /// Get the credentials of the connected peer (Linux only).
    ///
    /// Returns `(uid, gid, pid)` via `SO_PEERCRED`, or `None` if unavailable.
    #[cfg(target_os = "linux")]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        let mut cred = libc::ucred {
            pid: 0,
            uid: 0,
            gid: 0,
        };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

        // SAFETY: `cred` and `len` are valid writable pointers for the provided sizes,
        // and the descriptor is an open Unix socket owned by this process.
        let rc = unsafe {
            libc::getsockopt(
                self.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                (&mut cred as *mut libc::ucred).cast::<libc::c_void>(),
                &mut len,
            )
        };

        if rc == 0 && len as usize == std::mem::size_of::<libc::ucred>() {
            Some((cred.uid, cred.gid, cred.pid as u32))
        } else {
            None
        }
    }

    /// Get the credentials of the connected peer.
    ///
    /// Returns `None` on platforms that do not expose peer credentials.
    #[cfg(not(target_os = "linux"))]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        None
    }
}

impl AsRawFd for LocalSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl AsFd for LocalSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

impl std::fmt::Debug for LocalSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSocket")
            .field("fd", &self.as_raw_fd())
            .finish()
    }
}

/// Classify an error from a blocking call.
///
/// A blocking call that reports `WouldBlock` hit its socket timeout.
pub fn map_blocking_error(err: io::Error) -> TransportError {
    match err.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => TransportError::TimedOut,
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset => TransportError::Closed,
        _ => TransportError::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_yields_two_distinct_descriptors() {
        let (local, remote) = LocalSocket::pair().unwrap();
        assert!(local.as_raw_fd() >= 0);
        assert!(remote.as_raw_fd() >= 0);
        assert_ne!(local.as_raw_fd(), remote.as_raw_fd());
    }

    #[test]
    fn send_and_recv_across_pair() {
        let (local, remote) = LocalSocket::pair().unwrap();
        let remote = LocalSocket::from_fd(remote);

        local.send_all(b"hello").unwrap();
        let mut buf = [0u8; 16];
        let n = remote.recv(&mut buf, IoMode::Blocking).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn non_blocking_recv_on_empty_socket_would_block() {
        let (local, _remote) = LocalSocket::pair().unwrap();
        let mut buf = [0u8; 4];
        let err = local.recv(&mut buf, IoMode::NonBlocking).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
    }

    #[test]
    fn recv_reports_end_of_stream() {
        let (local, remote) = LocalSocket::pair().unwrap();
        drop(remote);
        let mut buf = [0u8; 4];
        assert_eq!(local.recv(&mut buf, IoMode::Blocking).unwrap(), 0);
    }

    #[test]
    fn blocking_recv_honours_read_timeout() {
        let (local, _remote) = LocalSocket::pair().unwrap();
        local
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let mut buf = [0u8; 4];
        let err = local.recv(&mut buf, IoMode::Blocking).unwrap_err();
        assert!(matches!(map_blocking_error(err), TransportError::TimedOut));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn send_to_closed_peer_reports_closed() {
        let (local, remote) = LocalSocket::pair().unwrap();
        drop(remote);
        let err = local.send_all(&[0u8; 64]).unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn peer_credentials_report_own_process() {
        let (local, _remote) = LocalSocket::pair().unwrap();
        let (_uid, _gid, pid) = local.peer_credentials().unwrap();
        assert_eq!(pid, std::process::id());
    }
}
