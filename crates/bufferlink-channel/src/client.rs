use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::time::Duration;

use bufferlink_transport::{map_blocking_error, wait_readable, IoMode, LocalSocket, TransportError};
use bufferlink_wire::{Message, MESSAGE_SIZE};
use tracing::{debug, info, warn};

use crate::config::ChannelConfig;
use crate::error::{ChannelError, Result};
use crate::handler::{ClientHandler, Dispatch};
use crate::inbound::{read_one, Inbound};

/// Client end of a channel, adopted from a descriptor the host handed out.
#[derive(Debug)]
pub struct ClientChannel {
    socket: Option<LocalSocket>,
    config: ChannelConfig,
}

impl ClientChannel {
    /// Adopt `fd` as the channel socket.
    ///
    /// Like [`HostChannel::initialize`](crate::HostChannel::initialize) this
    /// never fails outright; a descriptor that cannot be configured leaves
    /// the channel without a socket.
    pub fn initialize(fd: OwnedFd, config: ChannelConfig) -> Self {
        let socket = LocalSocket::from_fd(fd);
        let configured = socket
            .set_read_timeout(config.reply_timeout)
            .and_then(|()| socket.set_write_timeout(config.write_timeout));
        if let Err(err) = configured {
            warn!(fd = socket.as_raw_fd(), error = %err, "client channel setup failed");
            return Self {
                socket: None,
                config,
            };
        }

        info!(fd = socket.as_raw_fd(), "client channel initialized");
        Self {
            socket: Some(socket),
            config,
        }
    }

    /// Descriptor to watch for readability, or `None` if the channel has no
    /// socket.
    pub fn socket_fd(&self) -> Option<RawFd> {
        self.socket.as_ref().map(AsRawFd::as_raw_fd)
    }

    pub fn is_available(&self) -> bool {
        self.socket.is_some()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    fn socket(&self) -> Result<&LocalSocket> {
        self.socket.as_ref().ok_or(ChannelError::Unavailable)
    }

    /// Send one message, blocking until it is fully written.
    pub fn send_message(&self, message: &Message) -> Result<()> {
        self.socket()?
            .send_all(&message.encode())
            .map_err(closed_or_transport)?;
        debug!(%message, "sent message");
        Ok(())
    }

    /// Send a request and block for exactly one reply message.
    ///
    /// Only correct while the protocol guarantees nothing else can arrive on
    /// this socket between the two calls; pool construction is the one
    /// request that relies on it. The wait is bounded by
    /// [`ChannelConfig::reply_timeout`].
    pub fn send_and_receive_message(&self, request: &Message) -> Result<Message> {
        let socket = self.socket()?;
        socket
            .send_all(&request.encode())
            .map_err(closed_or_transport)?;
        debug!(%request, "sent request");

        let mut block = [0u8; MESSAGE_SIZE];
        let len = socket
            .recv(&mut block, IoMode::Blocking)
            .map_err(|err| closed_or_transport(map_blocking_error(err)))?;
        match len {
            0 => Err(ChannelError::Closed),
            MESSAGE_SIZE => {
                let reply = Message::decode(&block)?;
                debug!(%reply, "received reply");
                Ok(reply)
            }
            len => Err(ChannelError::MalformedReply { len }),
        }
    }

    /// Send one open descriptor to the host.
    ///
    /// The descriptor travels with a one-byte dummy payload. The caller keeps
    /// its own copy of `fd`.
    pub fn send_file_descriptor(&self, fd: BorrowedFd<'_>) -> Result<()> {
        self.socket()?.send_fd(fd).map_err(closed_or_transport)
    }

    /// Wait until the socket is readable. Returns `false` on timeout.
    pub fn wait_readable(&self, timeout: Option<Duration>) -> Result<bool> {
        let fd = self.socket_fd().ok_or(ChannelError::Unavailable)?;
        Ok(wait_readable(fd, timeout)?)
    }

    /// Readiness callback: read one message and forward it to `handler`.
    ///
    /// A closed connection ends quietly; any other failure is logged. Both
    /// return [`Dispatch::Remove`].
    pub fn dispatch<H: ClientHandler + ?Sized>(&self, handler: &mut H) -> Dispatch {
        let Some(socket) = &self.socket else {
            return Dispatch::Remove;
        };
        match read_one(socket) {
            Inbound::Message(message) => handler.handle_message(message),
            Inbound::Dropped | Inbound::Idle => Dispatch::Continue,
            Inbound::Closed => {
                debug!(fd = socket.as_raw_fd(), "host closed connection");
                Dispatch::Remove
            }
            Inbound::Failed(err) => {
                warn!(fd = socket.as_raw_fd(), error = %err, "client channel read failed");
                Dispatch::Remove
            }
        }
    }

    /// Close the socket. Safe to call more than once.
    pub fn deinitialize(&mut self) {
        if let Some(socket) = self.socket.take() {
            info!(fd = socket.as_raw_fd(), "client channel deinitialized");
        }
    }
}

fn closed_or_transport(err: TransportError) -> ChannelError {
    match err {
        TransportError::Closed => ChannelError::Closed,
        other => ChannelError::Transport(other),
    }
}
