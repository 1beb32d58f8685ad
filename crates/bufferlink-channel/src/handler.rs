use bufferlink_wire::Message;

use crate::host::HostChannel;

/// Whether a channel should stay registered with the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Keep watching the socket.
    Continue,
    /// Stop watching; the channel is dead or no longer wanted.
    Remove,
}

/// Receives messages dispatched from a [`HostChannel`].
///
/// The channel is passed back in so the handler can reply on it or collect
/// the descriptor that follows a buffer allocation.
pub trait HostHandler {
    fn handle_message(&mut self, channel: &HostChannel, message: Message) -> Dispatch;
}

impl<F> HostHandler for F
where
    F: FnMut(&HostChannel, Message) -> Dispatch,
{
    fn handle_message(&mut self, channel: &HostChannel, message: Message) -> Dispatch {
        self(channel, message)
    }
}

/// Receives messages dispatched from a [`ClientChannel`](crate::ClientChannel).
pub trait ClientHandler {
    fn handle_message(&mut self, message: Message) -> Dispatch;
}

impl<F> ClientHandler for F
where
    F: FnMut(Message) -> Dispatch,
{
    fn handle_message(&mut self, message: Message) -> Dispatch {
        self(message)
    }
}
