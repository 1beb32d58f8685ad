use std::fmt;
use std::os::fd::{OwnedFd, RawFd};
use std::rc::Rc;

use bufferlink_channel::ClientChannel;
use bufferlink_wire::{Message, PoolId};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::RendererBackend;
use crate::config::RendererConfig;
use crate::error::{RendererError, Result};
use crate::graphics::{BufferDescriptor, GraphicsDevice};
use crate::pool::BufferPool;

/// Lifecycle of a render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    Uninitialized,
    /// Waiting for the host to assign a pool ID.
    Initializing,
    Ready,
    /// Dropping the pool's buffers after a geometry change.
    Resizing,
    Deinitialized,
}

/// Per-target counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TargetStats {
    pub pool_id: Option<PoolId>,
    pub allocations: u64,
    pub commits: u64,
    pub purges: u64,
    pub releases: u64,
    pub frames_completed: u64,
}

/// One rendering surface and the buffer pool behind it.
///
/// Owns its own channel to the host for pool lifecycle messages; buffer
/// traffic goes through the shared [`RendererBackend`].
pub struct RenderTarget<G: GraphicsDevice> {
    pub(crate) device: G,
    pub(crate) channel: ClientChannel,
    pub(crate) backend: Option<RendererBackend>,
    pub(crate) pool: BufferPool<G>,
    pub(crate) framebuffer: Option<G::Framebuffer>,
    pub(crate) config: RendererConfig,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) state: TargetState,
    pub(crate) stats: TargetStats,
}

impl<G: GraphicsDevice> RenderTarget<G> {
    /// Create a target talking to the host over `fd`.
    pub fn new(device: G, fd: OwnedFd, config: &RendererConfig) -> Self {
        Self {
            device,
            channel: ClientChannel::initialize(fd, config.channel),
            backend: None,
            pool: BufferPool::new(),
            framebuffer: None,
            config: *config,
            width: 0,
            height: 0,
            state: TargetState::Uninitialized,
            stats: TargetStats::default(),
        }
    }

    pub fn state(&self) -> TargetState {
        self.state
    }

    pub fn pool(&self) -> &BufferPool<G> {
        &self.pool
    }

    pub fn pool_id(&self) -> Option<PoolId> {
        self.pool.pool_id()
    }

    pub fn device(&self) -> &G {
        &self.device
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Descriptor of this target's own channel.
    pub fn socket_fd(&self) -> Option<RawFd> {
        self.channel.socket_fd()
    }

    pub fn stats(&self) -> TargetStats {
        let state = self.pool.state();
        TargetStats {
            pool_id: state.pool_id(),
            releases: state.releases(),
            frames_completed: state.frames_completed(),
            ..self.stats
        }
    }

    /// Ask the host for a pool and register it.
    ///
    /// Blocks for one round trip on the backend channel. No buffers are
    /// allocated until the first frame.
    pub fn initialize(&mut self, backend: &RendererBackend, width: u32, height: u32) -> Result<()> {
        if self.state != TargetState::Uninitialized {
            return Err(RendererError::AlreadyInitialized);
        }
        self.state = TargetState::Initializing;

        let pool_id = match request_pool(backend) {
            Ok(pool_id) => pool_id,
            Err(err) => {
                self.state = TargetState::Uninitialized;
                return Err(err);
            }
        };

        // Nothing is routed or marked ready until the host knows the pool.
        if let Err(err) = self.channel.send_message(&Message::RegisterPool { pool_id }) {
            warn!(%pool_id, error = %err, "failed to register pool");
            self.state = TargetState::Uninitialized;
            return Err(err.into());
        }

        self.pool.state().set_pool_id(Some(pool_id));
        backend.register_pool(pool_id, self.pool.state());
        self.backend = Some(backend.clone());
        self.width = width;
        self.height = height;
        self.state = TargetState::Ready;
        info!(%pool_id, width, height, "render target initialized");
        Ok(())
    }

    /// Change the target's geometry.
    ///
    /// Unchanged dimensions are a no-op. Otherwise every buffer's graphics
    /// state is released, every lock cleared and the host told to purge;
    /// the next frame allocates afresh.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        let pool_id = self.ready_pool_id()?;
        if (width, height) == (self.width, self.height) {
            return Ok(());
        }

        self.state = TargetState::Resizing;
        let released = self.pool.purge(&mut self.device);
        self.width = width;
        self.height = height;
        self.stats.purges += 1;
        self.state = TargetState::Ready;

        self.channel.send_message(&Message::PoolPurge { pool_id })?;
        debug!(%pool_id, width, height, released, "pool purged for resize");
        Ok(())
    }

    /// Install a callback run each time the host presents one of this
    /// target's frames.
    pub fn on_frame_complete(&self, listener: impl Fn(PoolId) + 'static) {
        self.pool.state().set_frame_listener(Some(Rc::new(listener)));
    }

    /// Release all graphics state, unregister the pool and close the
    /// target channel. Later calls do nothing.
    pub fn deinitialize(&mut self) {
        if self.state == TargetState::Deinitialized {
            return;
        }

        self.pool.purge(&mut self.device);
        if let Some(framebuffer) = self.framebuffer.take() {
            self.device.destroy_framebuffer(framebuffer);
        }
        self.pool.state().set_frame_listener(None);

        if let Some(pool_id) = self.pool.pool_id() {
            if let Err(err) = self.channel.send_message(&Message::UnregisterPool { pool_id }) {
                warn!(%pool_id, error = %err, "failed to unregister pool");
            }
            if let Some(backend) = &self.backend {
                backend.unregister_pool(pool_id);
            }
            info!(%pool_id, "render target deinitialized");
        }

        self.channel.deinitialize();
        self.backend = None;
        self.state = TargetState::Deinitialized;
    }

    pub(crate) fn ready_pool_id(&self) -> Result<PoolId> {
        match (self.state, self.pool.pool_id()) {
            (TargetState::Ready, Some(pool_id)) => Ok(pool_id),
            _ => Err(RendererError::NotInitialized),
        }
    }

    pub(crate) fn descriptor(&self) -> BufferDescriptor {
        BufferDescriptor {
            width: self.width,
            height: self.height,
            format: self.config.format,
            usage: self.config.usage,
        }
    }
}

fn request_pool(backend: &RendererBackend) -> Result<PoolId> {
    let reply = backend
        .channel()
        .send_and_receive_message(&Message::PoolConstruction)?;
    match reply {
        Message::PoolConstructionReply { pool_id } => Ok(pool_id),
        other => Err(RendererError::UnexpectedReply(other.code())),
    }
}

impl<G: GraphicsDevice> Drop for RenderTarget<G> {
    fn drop(&mut self) {
        self.deinitialize();
    }
}

impl<G: GraphicsDevice> fmt::Debug for RenderTarget<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderTarget")
            .field("state", &self.state)
            .field("size", &(self.width, self.height))
            .field("pool", &self.pool)
            .finish()
    }
}
