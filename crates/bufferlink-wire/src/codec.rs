use std::fmt;

use bytes::{Buf, BufMut};

use crate::error::{Result, WireError};
use crate::ids::{BufferId, PoolId};

/// Size of the leading message code.
pub const CODE_SIZE: usize = 8;

/// Size of the payload region shared by every message kind.
pub const PAYLOAD_SIZE: usize = 24;

/// Total wire size of every message, in both directions.
pub const MESSAGE_SIZE: usize = CODE_SIZE + PAYLOAD_SIZE;

/// Message discriminant as carried in the first [`CODE_SIZE`] bytes.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageCode {
    PoolConstruction = 1,
    PoolConstructionReply = 2,
    RegisterPool = 3,
    PoolPurge = 4,
    UnregisterPool = 5,
    BufferAllocation = 6,
    BufferCommit = 7,
    FrameComplete = 8,
    ReleaseBuffer = 9,
}

impl MessageCode {
    /// Human-readable name for logs.
    pub fn name(self) -> &'static str {
        match self {
            MessageCode::PoolConstruction => "PoolConstruction",
            MessageCode::PoolConstructionReply => "PoolConstructionReply",
            MessageCode::RegisterPool => "RegisterPool",
            MessageCode::PoolPurge => "PoolPurge",
            MessageCode::UnregisterPool => "UnregisterPool",
            MessageCode::BufferAllocation => "BufferAllocation",
            MessageCode::BufferCommit => "BufferCommit",
            MessageCode::FrameComplete => "FrameComplete",
            MessageCode::ReleaseBuffer => "ReleaseBuffer",
        }
    }
}

impl TryFrom<u64> for MessageCode {
    type Error = WireError;

    fn try_from(raw: u64) -> Result<Self> {
        let code = match raw {
            1 => MessageCode::PoolConstruction,
            2 => MessageCode::PoolConstructionReply,
            3 => MessageCode::RegisterPool,
            4 => MessageCode::PoolPurge,
            5 => MessageCode::UnregisterPool,
            6 => MessageCode::BufferAllocation,
            7 => MessageCode::BufferCommit,
            8 => MessageCode::FrameComplete,
            9 => MessageCode::ReleaseBuffer,
            other => return Err(WireError::UnknownCode(other)),
        };
        Ok(code)
    }
}

/// One protocol message.
///
/// | Message | Direction |
/// |---|---|
/// | `PoolConstruction` | renderer → host (request) |
/// | `PoolConstructionReply` | host → renderer (reply) |
/// | `RegisterPool`, `PoolPurge`, `UnregisterPool` | renderer → host |
/// | `BufferAllocation` | renderer → host, followed by one descriptor |
/// | `BufferCommit` | renderer → host |
/// | `FrameComplete`, `ReleaseBuffer` | host → renderer |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// Ask the host to create a new buffer pool.
    PoolConstruction,
    /// The identifier assigned to the newly created pool.
    PoolConstructionReply { pool_id: PoolId },
    /// Claim a pool so later notifications target it.
    RegisterPool { pool_id: PoolId },
    /// Drop every buffer of the pool; its geometry changed.
    PoolPurge { pool_id: PoolId },
    /// The pool is being destroyed.
    UnregisterPool { pool_id: PoolId },
    /// A newly allocated buffer; its handle follows on the same socket.
    BufferAllocation { pool_id: PoolId, buffer_id: BufferId },
    /// The buffer holds a complete frame, ready to display.
    BufferCommit { pool_id: PoolId, buffer_id: BufferId },
    /// A previously committed frame of the pool was presented.
    FrameComplete { pool_id: PoolId },
    /// The buffer is no longer displayed and may be reused.
    ReleaseBuffer { pool_id: PoolId, buffer_id: BufferId },
}

impl Message {
    /// The discriminant of this message.
    pub fn code(&self) -> MessageCode {
        match self {
            Message::PoolConstruction => MessageCode::PoolConstruction,
            Message::PoolConstructionReply { .. } => MessageCode::PoolConstructionReply,
            Message::RegisterPool { .. } => MessageCode::RegisterPool,
            Message::PoolPurge { .. } => MessageCode::PoolPurge,
            Message::UnregisterPool { .. } => MessageCode::UnregisterPool,
            Message::BufferAllocation { .. } => MessageCode::BufferAllocation,
            Message::BufferCommit { .. } => MessageCode::BufferCommit,
            Message::FrameComplete { .. } => MessageCode::FrameComplete,
            Message::ReleaseBuffer { .. } => MessageCode::ReleaseBuffer,
        }
    }

    /// The pool this message refers to, if any.
    pub fn pool_id(&self) -> Option<PoolId> {
        match *self {
            Message::PoolConstruction => None,
            Message::PoolConstructionReply { pool_id }
            | Message::RegisterPool { pool_id }
            | Message::PoolPurge { pool_id }
            | Message::UnregisterPool { pool_id }
            | Message::BufferAllocation { pool_id, .. }
            | Message::BufferCommit { pool_id, .. }
            | Message::FrameComplete { pool_id }
            | Message::ReleaseBuffer { pool_id, .. } => Some(pool_id),
        }
    }

    /// Encode into a zero-filled block of exactly [`MESSAGE_SIZE`] bytes.
    ///
    /// Wire format:
    /// ```text
    /// ┌──────────────┬───────────┬────────────┬──────────────────┐
    /// │ Code (8B NE) │ Pool (4B) │ Buffer (4B)│ zero padding     │
    /// │              │ optional  │ optional   │ up to 32 bytes   │
    /// └──────────────┴───────────┴────────────┴──────────────────┘
    /// ```
    pub fn encode(&self) -> [u8; MESSAGE_SIZE] {
        let mut block = [0u8; MESSAGE_SIZE];
        let mut dst = &mut block[..];
        dst.put_u64_ne(self.code() as u64);

        match *self {
            Message::PoolConstruction => {}
            Message::PoolConstructionReply { pool_id }
            | Message::RegisterPool { pool_id }
            | Message::PoolPurge { pool_id }
            | Message::UnregisterPool { pool_id }
            | Message::FrameComplete { pool_id } => {
                dst.put_u32_ne(pool_id.0);
            }
            Message::BufferAllocation { pool_id, buffer_id }
            | Message::BufferCommit { pool_id, buffer_id }
            | Message::ReleaseBuffer { pool_id, buffer_id } => {
                dst.put_u32_ne(pool_id.0);
                dst.put_u32_ne(buffer_id.0);
            }
        }

        block
    }

    /// Decode one message block.
    ///
    /// The block must be exactly [`MESSAGE_SIZE`] bytes long.
    pub fn decode(block: &[u8]) -> Result<Self> {
        let code = peek_code(block)?;
        let mut src = &block[CODE_SIZE..];

        let message = match code {
            MessageCode::PoolConstruction => Message::PoolConstruction,
            MessageCode::PoolConstructionReply => Message::PoolConstructionReply {
                pool_id: PoolId(src.get_u32_ne()),
            },
            MessageCode::RegisterPool => Message::RegisterPool {
                pool_id: PoolId(src.get_u32_ne()),
            },
            MessageCode::PoolPurge => Message::PoolPurge {
                pool_id: PoolId(src.get_u32_ne()),
            },
            MessageCode::UnregisterPool => Message::UnregisterPool {
                pool_id: PoolId(src.get_u32_ne()),
            },
            MessageCode::FrameComplete => Message::FrameComplete {
                pool_id: PoolId(src.get_u32_ne()),
            },
            MessageCode::BufferAllocation => {
                let (pool_id, buffer_id) = pool_and_buffer(&mut src);
                Message::BufferAllocation { pool_id, buffer_id }
            }
            MessageCode::BufferCommit => {
                let (pool_id, buffer_id) = pool_and_buffer(&mut src);
                Message::BufferCommit { pool_id, buffer_id }
            }
            MessageCode::ReleaseBuffer => {
                let (pool_id, buffer_id) = pool_and_buffer(&mut src);
                Message::ReleaseBuffer { pool_id, buffer_id }
            }
        };

        Ok(message)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Message::PoolConstruction => f.write_str("PoolConstruction"),
            Message::PoolConstructionReply { pool_id }
            | Message::RegisterPool { pool_id }
            | Message::PoolPurge { pool_id }
            | Message::UnregisterPool { pool_id }
            | Message::FrameComplete { pool_id } => {
                write!(f, "{} {{ pool {pool_id} }}", self.code().name())
            }
            Message::BufferAllocation { pool_id, buffer_id }
            | Message::BufferCommit { pool_id, buffer_id }
            | Message::ReleaseBuffer { pool_id, buffer_id } => write!(
                f,
                "{} {{ pool {pool_id}, buffer {buffer_id} }}",
                self.code().name()
            ),
        }
    }
}

/// Read the message code of a block without decoding the payload.
pub fn peek_code(block: &[u8]) -> Result<MessageCode> {
    if block.len() != MESSAGE_SIZE {
        return Err(WireError::Size {
            len: block.len(),
            expected: MESSAGE_SIZE,
        });
    }
    let mut src = block;
    MessageCode::try_from(src.get_u64_ne())
}

fn pool_and_buffer(src: &mut &[u8]) -> (PoolId, BufferId) {
    let pool_id = PoolId(src.get_u32_ne());
    let buffer_id = BufferId(src.get_u32_ne());
    (pool_id, buffer_id)
}
