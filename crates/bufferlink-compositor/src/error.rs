use bufferlink_channel::ChannelError;
use bufferlink_wire::{BufferId, PoolId};

use crate::compositor::ConnectionId;

/// Errors that can occur on the host side.
#[derive(Debug, thiserror::Error)]
pub enum CompositorError {
    /// Channel-level error.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Transport-level error outside any channel (readiness polling).
    #[error("transport error: {0}")]
    Transport(#[from] bufferlink_transport::TransportError),

    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("unknown pool {0}")]
    UnknownPool(PoolId),

    /// A commit named a buffer whose descriptor never arrived.
    #[error("pool {pool_id} has no buffer {buffer_id}")]
    UnknownBuffer { pool_id: PoolId, buffer_id: BufferId },
}

pub type Result<T> = std::result::Result<T, CompositorError>;
