use bufferlink_channel::ChannelError;
use bufferlink_wire::{MessageCode, PoolId};

use crate::graphics::GraphicsError;

/// Errors that can occur on the renderer side.
#[derive(Debug, thiserror::Error)]
pub enum RendererError {
    /// Channel-level error.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Graphics device error.
    #[error("graphics error: {0}")]
    Graphics(#[from] GraphicsError),

    /// The host answered pool construction with something other than a reply.
    #[error("unexpected reply {0:?} to pool construction")]
    UnexpectedReply(MessageCode),

    /// The target has not been initialized, or was already torn down.
    #[error("render target is not initialized")]
    NotInitialized,

    #[error("render target is already initialized")]
    AlreadyInitialized,

    /// Every buffer of the pool is still held by the host.
    #[error("no free buffer in pool {pool_id}")]
    Exhausted { pool_id: PoolId },

    /// A frame ended without a matching begin.
    #[error("frame rendered without a current buffer")]
    NoCurrentBuffer,

    /// The host referenced a pool this renderer never registered.
    #[error("notification for unknown pool {0}")]
    UnknownPool(PoolId),
}

impl RendererError {
    /// Whether the renderer and host no longer agree on buffer ownership.
    ///
    /// Continuing after one of these risks writing into a buffer the host is
    /// displaying, so embedders are expected to terminate.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            RendererError::Exhausted { .. } | RendererError::UnknownPool(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RendererError>;
