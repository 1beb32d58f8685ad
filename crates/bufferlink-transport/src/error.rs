/// Errors that can occur in local socket operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Creating the connected socket pair failed.
    #[error("failed to create socket pair: {0}")]
    SocketPair(std::io::Error),

    /// An I/O error occurred on the socket.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed its end of the connection.
    #[error("connection closed by peer")]
    Closed,

    /// A blocking operation exceeded its configured timeout.
    #[error("operation timed out")]
    TimedOut,

    /// Sending or receiving a descriptor failed at the system call level.
    #[error("descriptor transfer failed: {0}")]
    DescriptorTransfer(std::io::Error),

    /// A descriptor message arrived without an `SCM_RIGHTS` payload.
    #[error("expected a descriptor but none was attached")]
    MissingDescriptor,

    /// More than one descriptor arrived where exactly one was expected.
    #[error("expected one descriptor, received {0}")]
    TooManyDescriptors(usize),
}

impl TransportError {
    /// The raw OS error behind this failure, if there is one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            TransportError::SocketPair(err)
            | TransportError::Io(err)
            | TransportError::DescriptorTransfer(err) => err.raw_os_error(),
            TransportError::Closed => Some(libc::EPIPE),
            TransportError::TimedOut => Some(libc::ETIMEDOUT),
            TransportError::MissingDescriptor | TransportError::TooManyDescriptors(_) => {
                Some(libc::EPROTO)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
