use bufferlink_channel::ChannelConfig;

use crate::graphics::{BufferUsage, PixelFormat};

/// Renderer-wide settings shared by every target of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RendererConfig {
    pub channel: ChannelConfig,
    pub format: PixelFormat,
    pub usage: BufferUsage,
}

impl RendererConfig {
    /// Defaults with channel timeouts taken from the environment.
    pub fn from_env() -> Self {
        Self {
            channel: ChannelConfig::from_env(),
            ..Self::default()
        }
    }
}
