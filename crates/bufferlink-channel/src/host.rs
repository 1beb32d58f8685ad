use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::time::Duration;

use bufferlink_transport::{wait_readable, IoMode, LocalSocket, TransportError};
use bufferlink_wire::{Message, MESSAGE_SIZE};
use tracing::{debug, info, warn};

use crate::config::ChannelConfig;
use crate::error::{ChannelError, Result};
use crate::handler::{Dispatch, HostHandler};
use crate::inbound::{read_one, Inbound};

/// Host end of a channel.
///
/// Creates the socket pair itself, keeps one end and holds the other as the
/// client descriptor until it is released to the peer process.
#[derive(Debug)]
pub struct HostChannel {
    socket: Option<LocalSocket>,
    client_fd: Option<OwnedFd>,
    config: ChannelConfig,
}

impl HostChannel {
    /// Create the socket pair.
    ///
    /// Never fails: on error the channel is left without a socket and every
    /// later call reports [`ChannelError::Unavailable`] or does nothing.
    /// Check [`HostChannel::socket_fd`] before use.
    pub fn initialize(config: ChannelConfig) -> Self {
        let unusable = Self {
            socket: None,
            client_fd: None,
            config,
        };

        let (socket, client_fd) = match LocalSocket::pair() {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "host channel setup failed");
                return unusable;
            }
        };
        if let Err(err) = socket.set_read_timeout(config.descriptor_timeout) {
            warn!(error = %err, "host channel setup failed");
            return unusable;
        }

        info!(
            fd = socket.as_raw_fd(),
            client_fd = client_fd.as_raw_fd(),
            "host channel initialized"
        );
        Self {
            socket: Some(socket),
            client_fd: Some(client_fd),
            config,
        }
    }

    /// Descriptor to watch for readability, or `None` if setup failed or the
    /// channel was torn down.
    pub fn socket_fd(&self) -> Option<RawFd> {
        self.socket.as_ref().map(AsRawFd::as_raw_fd)
    }

    pub fn is_available(&self) -> bool {
        self.socket.is_some()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Hand out the client end of the pair.
    ///
    /// With `close_source` the channel gives up its own copy, so the
    /// descriptor can be handed off exactly once. Otherwise a duplicate is
    /// returned and the original stays available.
    pub fn release_client_fd(&mut self, close_source: bool) -> Result<OwnedFd> {
        if self.socket.is_none() {
            return Err(ChannelError::Unavailable);
        }
        if close_source {
            let fd = self.client_fd.take().ok_or(ChannelError::ClientFdReleased)?;
            debug!(fd = fd.as_raw_fd(), "released client descriptor");
            return Ok(fd);
        }
        let source = self.client_fd.as_ref().ok_or(ChannelError::ClientFdReleased)?;
        let duplicate = source.try_clone().map_err(TransportError::from)?;
        debug!(fd = duplicate.as_raw_fd(), "duplicated client descriptor");
        Ok(duplicate)
    }

    /// Send one message without blocking.
    ///
    /// Host-to-client traffic is fire-and-forget: failures are logged and
    /// otherwise ignored.
    pub fn send_message(&self, message: &Message) {
        let Some(socket) = &self.socket else {
            debug!(%message, "dropping message on unavailable channel");
            return;
        };
        let block = message.encode();
        match socket.send(&block, IoMode::NonBlocking) {
            Ok(MESSAGE_SIZE) => debug!(%message, "sent message"),
            Ok(sent) => warn!(%message, sent, "partial message write"),
            Err(err) => debug!(%message, error = %err, "failed to send message"),
        }
    }

    /// Block until the descriptor that follows a buffer allocation arrives.
    ///
    /// Bounded by [`ChannelConfig::descriptor_timeout`].
    pub fn receive_file_descriptor(&self) -> Result<OwnedFd> {
        let socket = self.socket.as_ref().ok_or(ChannelError::Unavailable)?;
        socket.recv_fd().map_err(|err| match err {
            TransportError::Closed => ChannelError::Closed,
            other => ChannelError::Transport(other),
        })
    }

    /// Wait until the socket is readable. Returns `false` on timeout.
    pub fn wait_readable(&self, timeout: Option<Duration>) -> Result<bool> {
        let fd = self.socket_fd().ok_or(ChannelError::Unavailable)?;
        Ok(wait_readable(fd, timeout)?)
    }

    /// Readiness callback: read one message and forward it to `handler`.
    ///
    /// Blocks of the wrong size are dropped. Returns [`Dispatch::Remove`] once
    /// the connection is gone, or when the handler asks for it.
    pub fn dispatch<H: HostHandler + ?Sized>(&self, handler: &mut H) -> Dispatch {
        let Some(socket) = &self.socket else {
            return Dispatch::Remove;
        };
        match read_one(socket) {
            Inbound::Message(message) => handler.handle_message(self, message),
            Inbound::Dropped | Inbound::Idle => Dispatch::Continue,
            Inbound::Closed => {
                debug!(fd = socket.as_raw_fd(), "client closed connection");
                Dispatch::Remove
            }
            Inbound::Failed(err) => {
                warn!(fd = socket.as_raw_fd(), error = %err, "host channel read failed");
                Dispatch::Remove
            }
        }
    }

    /// Close both descriptors. Safe to call more than once.
    pub fn deinitialize(&mut self) {
        let socket = self.socket.take();
        let client = self.client_fd.take();
        if let Some(socket) = socket {
            info!(fd = socket.as_raw_fd(), "host channel deinitialized");
        }
        drop(client);
    }
}

#[cfg(test)]
mod tests {
    use bufferlink_wire::{BufferId, PoolId};

    use super::*;

    fn host_and_peer() -> (HostChannel, LocalSocket) {
        let mut host = HostChannel::initialize(ChannelConfig::default());
        let fd = host
            .release_client_fd(true)
            .expect("client fd should be released");
        (host, LocalSocket::from_fd(fd))
    }

    #[test]
    fn initialize_yields_two_distinct_descriptors() {
        let mut host = HostChannel::initialize(ChannelConfig::default());
        let socket_fd = host.socket_fd().expect("socket should exist");
        let client = host
            .release_client_fd(false)
            .expect("client fd should duplicate");
        assert!(socket_fd >= 0);
        assert_ne!(socket_fd, client.as_raw_fd());
    }

    #[test]
    fn release_with_close_hands_off_once() {
        let mut host = HostChannel::initialize(ChannelConfig::default());
        let _first = host
            .release_client_fd(true)
            .expect("first release should succeed");
        assert!(matches!(
            host.release_client_fd(true),
            Err(ChannelError::ClientFdReleased)
        ));
        assert!(matches!(
            host.release_client_fd(false),
            Err(ChannelError::ClientFdReleased)
        ));
    }

    #[test]
    fn release_without_close_can_repeat() {
        let mut host = HostChannel::initialize(ChannelConfig::default());
        let a = host.release_client_fd(false).expect("first duplicate");
        let b = host.release_client_fd(false).expect("second duplicate");
        assert_ne!(a.as_raw_fd(), b.as_raw_fd());
    }

    #[test]
    fn sent_message_reaches_peer() {
        let (host, peer) = host_and_peer();
        let message = Message::ReleaseBuffer {
            pool_id: PoolId(1),
            buffer_id: BufferId(3),
        };
        host.send_message(&message);

        let mut block = [0u8; MESSAGE_SIZE];
        let n = peer
            .recv(&mut block, IoMode::Blocking)
            .expect("peer should receive");
        assert_eq!(n, MESSAGE_SIZE);
        assert_eq!(Message::decode(&block).expect("should decode"), message);
    }

    #[test]
    fn dispatch_forwards_whole_messages() {
        let (host, peer) = host_and_peer();
        peer.send_all(&Message::PoolConstruction.encode())
            .expect("peer should send");

        let mut seen = Vec::new();
        let outcome = host.dispatch(&mut |_: &HostChannel, message: Message| {
            seen.push(message);
            Dispatch::Continue
        });
        assert_eq!(outcome, Dispatch::Continue);
        assert_eq!(seen, vec![Message::PoolConstruction]);
    }

    #[test]
    fn dispatch_on_idle_socket_continues() {
        let (host, _peer) = host_and_peer();
        let mut calls = 0;
        let outcome = host.dispatch(&mut |_: &HostChannel, _: Message| {
            calls += 1;
            Dispatch::Continue
        });
        assert_eq!(outcome, Dispatch::Continue);
        assert_eq!(calls, 0);
    }

    #[test]
    fn short_block_is_dropped_and_stream_continues() {
        let (host, peer) = host_and_peer();
        peer.send_all(b"short").expect("peer should send");

        let mut seen = Vec::new();
        let mut handler = |_: &HostChannel, message: Message| {
            seen.push(message);
            Dispatch::Continue
        };
        assert_eq!(host.dispatch(&mut handler), Dispatch::Continue);

        let register = Message::RegisterPool { pool_id: PoolId(2) };
        peer.send_all(&register.encode()).expect("peer should send");
        assert_eq!(host.dispatch(&mut handler), Dispatch::Continue);
        assert_eq!(seen, vec![register]);
    }

    #[test]
    fn end_of_stream_removes_channel() {
        let (host, peer) = host_and_peer();
        drop(peer);
        let outcome = host.dispatch(&mut |_: &HostChannel, _: Message| Dispatch::Continue);
        assert_eq!(outcome, Dispatch::Remove);
    }

    #[test]
    fn handler_can_request_removal() {
        let (host, peer) = host_and_peer();
        peer.send_all(&Message::PoolConstruction.encode())
            .expect("peer should send");
        let outcome = host.dispatch(&mut |_: &HostChannel, _: Message| Dispatch::Remove);
        assert_eq!(outcome, Dispatch::Remove);
    }

    #[test]
    fn receives_descriptor_after_allocation() {
        let (host, peer) = host_and_peer();
        let (probe, _probe_peer) = LocalSocket::pair().expect("probe pair");
        let allocation = Message::BufferAllocation {
            pool_id: PoolId(7),
            buffer_id: BufferId(2),
        };
        peer.send_all(&allocation.encode()).expect("peer should send");
        peer.send_fd(std::os::fd::AsFd::as_fd(&probe))
            .expect("peer should send fd");

        let mut received = None;
        host.dispatch(&mut |channel: &HostChannel, message: Message| {
            assert_eq!(message, allocation);
            received = Some(channel.receive_file_descriptor());
            Dispatch::Continue
        });
        let fd = received
            .expect("handler should run")
            .expect("descriptor should arrive");
        assert!(fd.as_raw_fd() >= 0);
    }

    #[test]
    fn descriptor_wait_is_bounded() {
        let mut host = HostChannel::initialize(ChannelConfig::with_timeout(Some(
            Duration::from_millis(20),
        )));
        let _peer = host.release_client_fd(true).expect("client fd");
        assert!(matches!(
            host.receive_file_descriptor(),
            Err(ChannelError::Transport(TransportError::TimedOut))
        ));
    }

    #[test]
    fn deinitialize_is_idempotent() {
        let (mut host, _peer) = host_and_peer();
        host.deinitialize();
        host.deinitialize();
        assert_eq!(host.socket_fd(), None);
        assert!(!host.is_available());
        host.send_message(&Message::PoolConstruction);
        assert!(matches!(
            host.receive_file_descriptor(),
            Err(ChannelError::Unavailable)
        ));
        assert!(matches!(
            host.release_client_fd(false),
            Err(ChannelError::Unavailable)
        ));
    }
}
