//! The seam between the buffer pool and the graphics stack.

use std::fmt;
use std::ops::BitOr;
use std::os::fd::AsFd;

use serde::{Deserialize, Serialize};

/// Pixel layout of every buffer in a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    #[default]
    Rgba8Unorm,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgba8Unorm => 4,
        }
    }
}

/// How a buffer's memory will be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BufferUsage(pub u32);

impl BufferUsage {
    pub const COLOR_OUTPUT: BufferUsage = BufferUsage(1 << 0);
    pub const SAMPLED: BufferUsage = BufferUsage(1 << 1);
    pub const COMPOSER_OVERLAY: BufferUsage = BufferUsage(1 << 2);

    pub fn contains(self, other: BufferUsage) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        BufferUsage::COLOR_OUTPUT | BufferUsage::SAMPLED | BufferUsage::COMPOSER_OVERLAY
    }
}

impl BitOr for BufferUsage {
    type Output = BufferUsage;

    fn bitor(self, rhs: BufferUsage) -> BufferUsage {
        BufferUsage(self.0 | rhs.0)
    }
}

/// Everything needed to allocate one buffer's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub usage: BufferUsage,
}

impl BufferDescriptor {
    /// Size of one tightly packed image in bytes.
    pub fn byte_len(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height) * u64::from(self.format.bytes_per_pixel())
    }
}

/// Color and depth/stencil storage a buffer renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attachments<R> {
    pub color: R,
    pub depth_stencil: R,
}

/// Errors reported by a [`GraphicsDevice`].
#[derive(Debug, thiserror::Error)]
pub enum GraphicsError {
    /// One-time setup (entry points, framebuffer object) failed.
    #[error("graphics setup failed: {0}")]
    Setup(String),

    /// Allocating graphics memory failed.
    #[error("buffer allocation failed: {0}")]
    Allocation(String),

    /// Wrapping graphics memory as a renderable image failed.
    #[error("image import failed: {0}")]
    Import(String),

    /// Creating or binding attachments failed.
    #[error("attachment setup failed: {0}")]
    Attachment(String),

    #[error("graphics I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Graphics operations the buffer pool needs.
///
/// Implementations own every handle they return until it is passed back to
/// the matching release call. The pool never duplicates or shares them.
pub trait GraphicsDevice {
    /// Shareable graphics memory. Its descriptor is sent to the host.
    type Memory: AsFd;
    /// Renderer-importable view of a memory object.
    type Image;
    /// Storage attached to the framebuffer.
    type Renderbuffer: Copy + fmt::Debug;
    /// Framebuffer object the current buffer is bound to.
    type Framebuffer: Copy + fmt::Debug;

    /// One-time setup on first frame. Returns the framebuffer to bind into.
    fn setup(&mut self) -> Result<Self::Framebuffer, GraphicsError>;

    fn destroy_framebuffer(&mut self, framebuffer: Self::Framebuffer);

    fn allocate(&mut self, descriptor: &BufferDescriptor) -> Result<Self::Memory, GraphicsError>;

    fn release(&mut self, memory: Self::Memory);

    fn import_image(&mut self, memory: &Self::Memory) -> Result<Self::Image, GraphicsError>;

    fn destroy_image(&mut self, image: Self::Image);

    fn create_attachments(
        &mut self,
        image: &Self::Image,
        width: u32,
        height: u32,
    ) -> Result<Attachments<Self::Renderbuffer>, GraphicsError>;

    fn destroy_attachments(&mut self, attachments: Attachments<Self::Renderbuffer>);

    /// Make `attachments` the active render destination of `framebuffer`.
    fn bind(
        &mut self,
        framebuffer: Self::Framebuffer,
        attachments: &Attachments<Self::Renderbuffer>,
    ) -> Result<(), GraphicsError>;

    /// Submit pending rendering work.
    fn flush(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_usage_covers_composition() {
        let usage = BufferUsage::default();
        assert!(usage.contains(BufferUsage::COLOR_OUTPUT));
        assert!(usage.contains(BufferUsage::SAMPLED));
        assert!(usage.contains(BufferUsage::COMPOSER_OVERLAY));
    }

    #[test]
    fn descriptor_byte_len_does_not_overflow() {
        let descriptor = BufferDescriptor {
            width: 70_000,
            height: 70_000,
            format: PixelFormat::Rgba8Unorm,
            usage: BufferUsage::default(),
        };
        assert_eq!(descriptor.byte_len(), 70_000u64 * 70_000 * 4);
    }
}
