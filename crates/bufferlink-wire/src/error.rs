/// Errors that can occur while decoding a message block.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// The block is not exactly one message long.
    #[error("message block is {len} bytes (expected {expected})")]
    Size { len: usize, expected: usize },

    /// The block carries a message code this side does not know.
    #[error("unknown message code {0:#x}")]
    UnknownCode(u64),
}

pub type Result<T> = std::result::Result<T, WireError>;
