//! `SCM_RIGHTS` descriptor passing.
//!
//! Every descriptor travels in its own `sendmsg(2)` call carrying a single
//! dummy data byte, since stream sockets refuse ancillary data without at
//! least one byte of payload. The receiving side reads exactly that byte,
//! so descriptor messages never merge with the fixed-size protocol messages
//! around them.

use std::io::{self, ErrorKind};
use std::mem::size_of;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::socket::{LocalSocket, SEND_FLAGS};

#[cfg(any(target_os = "linux", target_os = "android"))]
const RECV_FLAGS: libc::c_int = libc::MSG_CMSG_CLOEXEC;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const RECV_FLAGS: libc::c_int = 0;

/// Control-message storage with `cmsghdr` alignment.
///
/// Large enough for a few descriptors so an unexpected batch is detected
/// (and closed) instead of being truncated by the kernel.
#[repr(C, align(8))]
struct ControlBuffer([u8; 64]);

impl ControlBuffer {
    fn new() -> Self {
        Self([0u8; 64])
    }

    fn as_mut_ptr(&mut self) -> *mut libc::c_void {
        self.0.as_mut_ptr().cast()
    }
}

impl LocalSocket {
    /// Send one open descriptor to the peer (blocking).
    ///
    /// The caller keeps ownership of `fd`; the peer receives a duplicate.
    pub fn send_fd(&self, fd: BorrowedFd<'_>) -> Result<()> {
        let raw = fd.as_raw_fd();
        let mut payload = [0u8; 1];
        let mut iov = libc::iovec {
            iov_base: payload.as_mut_ptr().cast(),
            iov_len: payload.len(),
        };
        let mut control = ControlBuffer::new();

        // SAFETY: an all-zero `msghdr` is a valid empty header.
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr();

        // SAFETY: `msg_control` points at an aligned buffer larger than
        // `CMSG_SPACE(size_of::<RawFd>())`, so the first header and its data
        // area are in bounds.
        unsafe {
            msg.msg_controllen = libc::CMSG_SPACE(size_of::<RawFd>() as u32) as _;
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(size_of::<RawFd>() as u32) as _;
            std::ptr::write_unaligned(libc::CMSG_DATA(cmsg).cast::<RawFd>(), raw);
        }

        loop {
            // SAFETY: `msg` references `iov`, `payload` and `control`, all of
            // which outlive the call.
            let rc = unsafe { libc::sendmsg(self.as_raw_fd(), &msg, SEND_FLAGS) };
            if rc >= 0 {
                debug!(fd = raw, socket = self.as_raw_fd(), "sent descriptor");
                return Ok(());
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                ErrorKind::Interrupted => continue,
                ErrorKind::WouldBlock | ErrorKind::TimedOut => return Err(TransportError::TimedOut),
                _ => return Err(TransportError::DescriptorTransfer(err)),
            }
        }
    }

    /// Receive exactly one descriptor from the peer (blocking).
    ///
    /// Fails with [`TransportError::MissingDescriptor`] when the next bytes on
    /// the stream are not a descriptor message, which means the two sides no
    /// longer agree on message ordering.
    pub fn recv_fd(&self) -> Result<OwnedFd> {
        let mut payload = [0u8; 1];
        let mut iov = libc::iovec {
            iov_base: payload.as_mut_ptr().cast(),
            iov_len: payload.len(),
        };
        let mut control = ControlBuffer::new();

        // SAFETY: an all-zero `msghdr` is a valid empty header.
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr();
        msg.msg_controllen = size_of::<ControlBuffer>() as _;

        let received = loop {
            // SAFETY: `msg` references buffers that outlive the call.
            let rc = unsafe { libc::recvmsg(self.as_raw_fd(), &mut msg, RECV_FLAGS) };
            if rc >= 0 {
                break rc as usize;
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                ErrorKind::Interrupted => continue,
                ErrorKind::WouldBlock | ErrorKind::TimedOut => return Err(TransportError::TimedOut),
                _ => return Err(TransportError::DescriptorTransfer(err)),
            }
        };

        // SAFETY: `recvmsg` filled `msg` and `control`; the header walk stays
        // within `msg_controllen`.
        let mut fds = unsafe { collect_rights(&msg) };

        if msg.msg_flags & libc::MSG_CTRUNC != 0 {
            warn!(received = fds.len(), "ancillary data truncated");
            return Err(TransportError::DescriptorTransfer(io::Error::new(
                ErrorKind::InvalidData,
                "ancillary data truncated",
            )));
        }

        match fds.len() {
            0 if received == 0 => Err(TransportError::Closed),
            0 => Err(TransportError::MissingDescriptor),
            1 => {
                let fd = fds.remove(0);
                debug!(fd = fd.as_raw_fd(), socket = self.as_raw_fd(), "received descriptor");
                Ok(fd)
            }
            n => Err(TransportError::TooManyDescriptors(n)),
        }
    }
}

/// Take ownership of every descriptor carried by `SCM_RIGHTS` headers.
///
/// # Safety
/// `msg` must have been filled by a successful `recvmsg(2)` call and its
/// control buffer must still be alive.
unsafe fn collect_rights(msg: &libc::msghdr) -> Vec<OwnedFd> {
    let mut fds = Vec::new();
    let header_len = libc::CMSG_LEN(0) as usize;

    let mut cmsg = libc::CMSG_FIRSTHDR(msg);
    while !cmsg.is_null() {
        let header = &*cmsg;
        if header.cmsg_level == libc::SOL_SOCKET && header.cmsg_type == libc::SCM_RIGHTS {
            let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();
            let count = (header.cmsg_len as usize).saturating_sub(header_len) / size_of::<RawFd>();
            for index in 0..count {
                let raw = std::ptr::read_unaligned(data.add(index));
                fds.push(OwnedFd::from_raw_fd(raw));
            }
        }
        cmsg = libc::CMSG_NXTHDR(msg, cmsg);
    }

    fds
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    use super::*;
    use crate::socket::IoMode;

    #[test]
    fn descriptor_survives_transfer() {
        let (sender, remote) = LocalSocket::pair().unwrap();
        let receiver = LocalSocket::from_fd(remote);

        let (mut probe_local, probe_remote) = UnixStream::pair().unwrap();
        sender.send_fd(std::os::fd::AsFd::as_fd(&probe_remote)).unwrap();
        drop(probe_remote);

        let received = receiver.recv_fd().unwrap();
        let mut received = UnixStream::from(received);

        received.write_all(b"through").unwrap();
        let mut buf = [0u8; 7];
        probe_local.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"through");
    }

    #[test]
    fn plain_bytes_are_not_a_descriptor() {
        let (sender, remote) = LocalSocket::pair().unwrap();
        let receiver = LocalSocket::from_fd(remote);

        sender.send_all(b"x").unwrap();
        let err = receiver.recv_fd().unwrap_err();
        assert!(matches!(err, TransportError::MissingDescriptor));
    }

    #[test]
    fn closed_peer_reports_closed() {
        let (sender, remote) = LocalSocket::pair().unwrap();
        drop(sender);
        let receiver = LocalSocket::from_fd(remote);
        assert!(matches!(receiver.recv_fd(), Err(TransportError::Closed)));
    }

    #[test]
    fn recv_fd_times_out_without_sender() {
        let (_sender, remote) = LocalSocket::pair().unwrap();
        let receiver = LocalSocket::from_fd(remote);
        receiver
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        assert!(matches!(receiver.recv_fd(), Err(TransportError::TimedOut)));
    }

    #[test]
    fn descriptor_message_does_not_merge_with_following_bytes() {
        let (sender, remote) = LocalSocket::pair().unwrap();
        let receiver = LocalSocket::from_fd(remote);

        let (_probe_local, probe_remote) = UnixStream::pair().unwrap();
        sender.send_fd(std::os::fd::AsFd::as_fd(&probe_remote)).unwrap();
        sender.send_all(b"next").unwrap();

        let _fd = receiver.recv_fd().unwrap();
        let mut buf = [0u8; 8];
        let n = receiver.recv(&mut buf, IoMode::Blocking).unwrap();
        assert_eq!(&buf[..n], b"next");
    }
}
