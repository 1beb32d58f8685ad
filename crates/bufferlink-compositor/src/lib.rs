//! Host side of the bufferlink protocol.
//!
//! A [`Compositor`] hands out client descriptors, assigns pool IDs, collects
//! the buffer descriptors renderers send and decides when a committed frame
//! is presented. Presenting a frame releases the buffer it replaces.

#![cfg(unix)]

pub mod compositor;
pub mod error;
pub mod registry;

pub use compositor::{Compositor, CompositorStats, ConnectionId};
pub use error::{CompositorError, Result};
pub use registry::{PoolRecord, PoolRegistry, Presented};
