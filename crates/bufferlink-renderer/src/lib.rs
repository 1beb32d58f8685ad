//! Renderer side of the bufferlink protocol.
//!
//! A [`RenderTarget`] owns a pool of [`POOL_SIZE`] buffers that it renders
//! into and hands to the host one frame at a time. The host returns them
//! with release notifications, which arrive on the shared
//! [`RendererBackend`] channel and are routed to the owning pool by ID.
//!
//! Graphics work is delegated to a [`GraphicsDevice`]. [`SoftwareDevice`]
//! is a stand-in backed by shared memory files.

#![cfg(unix)]

pub mod backend;
pub mod buffer;
pub mod config;
pub mod error;
pub mod graphics;
pub mod pool;
pub mod software;
pub mod target;

mod frame;

pub use backend::RendererBackend;
pub use buffer::Buffer;
pub use config::RendererConfig;
pub use error::{RendererError, Result};
pub use graphics::{
    Attachments, BufferDescriptor, BufferUsage, GraphicsDevice, GraphicsError, PixelFormat,
};
pub use pool::{BufferPool, PoolState, POOL_SIZE};
pub use software::{DeviceStats, SoftwareDevice};
pub use target::{RenderTarget, TargetState, TargetStats};

#[cfg(test)]
mod testing;
