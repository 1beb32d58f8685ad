use std::io::{self, ErrorKind};

use bufferlink_transport::{IoMode, LocalSocket};
use bufferlink_wire::{Message, MESSAGE_SIZE};
use tracing::{debug, trace};

/// Outcome of one non-blocking read.
pub(crate) enum Inbound {
    Message(Message),
    /// A block arrived but was not a message; the connection stays open.
    Dropped,
    /// Nothing to read right now.
    Idle,
    /// End of stream.
    Closed,
    Failed(io::Error),
}

/// Read at most one message without blocking.
pub(crate) fn read_one(socket: &LocalSocket) -> Inbound {
    let mut block = [0u8; MESSAGE_SIZE];
    let len = match socket.recv(&mut block, IoMode::NonBlocking) {
        Ok(0) => return Inbound::Closed,
        Ok(len) => len,
        Err(err) if err.kind() == ErrorKind::WouldBlock => return Inbound::Idle,
        Err(err) if err.kind() == ErrorKind::ConnectionReset => return Inbound::Closed,
        Err(err) => return Inbound::Failed(err),
    };

    if len != MESSAGE_SIZE {
        trace!(len, expected = MESSAGE_SIZE, "dropping short block");
        return Inbound::Dropped;
    }

    match Message::decode(&block) {
        Ok(message) => {
            debug!(%message, "received message");
            Inbound::Message(message)
        }
        Err(err) => {
            debug!(error = %err, "dropping undecodable block");
            Inbound::Dropped
        }
    }
}
