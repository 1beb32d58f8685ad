//! Fixed-size messages for the buffer pool protocol.
//!
//! Every message occupies exactly [`MESSAGE_SIZE`] bytes on the wire:
//! - An 8-byte native-endian message code
//! - A payload region sized for the largest message, zero-filled past the
//!   fields the message actually uses
//!
//! Peers always share a machine, so there is no byte-order negotiation.
//! A received block of any other length is not a message.

pub mod codec;
pub mod error;
pub mod ids;

pub use codec::{peek_code, Message, MessageCode, CODE_SIZE, MESSAGE_SIZE, PAYLOAD_SIZE};
pub use error::{Result, WireError};
pub use ids::{BufferId, PoolId};
