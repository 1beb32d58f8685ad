//! Message channels for the bufferlink protocol.
//!
//! A channel owns one socket endpoint and moves whole [`Message`] blocks over
//! it. The two roles differ only in how the socket comes to exist:
//!
//! - [`HostChannel`] creates a connected pair and hands the other end away.
//! - [`ClientChannel`] adopts a descriptor it was given.
//!
//! Inbound traffic is pulled one message at a time by `dispatch`, which an
//! embedder calls whenever the socket descriptor becomes readable.
//!
//! [`Message`]: bufferlink_wire::Message

#![cfg(unix)]

pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod host;

mod inbound;

pub use client::ClientChannel;
pub use config::ChannelConfig;
pub use error::{ChannelError, Result};
pub use handler::{ClientHandler, Dispatch, HostHandler};
pub use host::HostChannel;
