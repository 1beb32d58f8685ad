use bufferlink_transport::TransportError;
use bufferlink_wire::{WireError, MESSAGE_SIZE};

/// Errors that can occur in channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Setup failed earlier; the channel has no socket.
    #[error("channel has no socket")]
    Unavailable,

    /// The client descriptor was already handed off.
    #[error("client descriptor already released")]
    ClientFdReleased,

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A full-size block did not decode.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// The reply to a request was not exactly one message long.
    #[error("reply is {len} bytes (expected {MESSAGE_SIZE})")]
    MalformedReply { len: usize },

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,
}

impl ChannelError {
    /// Negative errno-style code for callers that report status as an integer.
    pub fn errno(&self) -> i32 {
        let code = match self {
            ChannelError::Unavailable | ChannelError::ClientFdReleased => libc::EBADF,
            ChannelError::Transport(err) => err.raw_os_error().unwrap_or(libc::EIO),
            ChannelError::Wire(_) | ChannelError::MalformedReply { .. } => libc::EPROTO,
            ChannelError::Closed => libc::EPIPE,
        };
        -code
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
