//! Per-frame calls: pick a buffer before rendering, hand it over after.

use bufferlink_wire::{BufferId, Message};
use tracing::{debug, error, warn};

use crate::error::{RendererError, Result};
use crate::graphics::{GraphicsDevice, GraphicsError};
use crate::target::RenderTarget;

impl<G: GraphicsDevice> RenderTarget<G> {
    /// Select the buffer the next frame renders into and bind it.
    ///
    /// The first free buffer wins. A buffer without memory is allocated and
    /// announced to the host, immediately followed by its descriptor on the
    /// same channel. Fails with [`RendererError::Exhausted`] when the host
    /// holds every buffer; that is a protocol violation, not back-pressure.
    pub fn frame_will_render(&mut self) -> Result<BufferId> {
        let pool_id = self.ready_pool_id()?;

        let framebuffer = match self.framebuffer {
            Some(framebuffer) => framebuffer,
            None => *self.framebuffer.insert(self.device.setup()?),
        };

        let Some(index) = self.pool.select_free() else {
            error!(%pool_id, "every buffer is held by the host");
            return Err(RendererError::Exhausted { pool_id });
        };

        let buffer_id = self.pool.buffer_mut(index).id();
        let prepared = if self.pool.buffer_mut(index).is_allocated() {
            self.pool
                .buffer_mut(index)
                .bind(&mut self.device, framebuffer)
                .map_err(RendererError::from)
        } else {
            self.allocate_and_announce(index, framebuffer)
        };

        if let Err(err) = prepared {
            warn!(%pool_id, %buffer_id, error = %err, "failed to prepare buffer");
            self.pool.buffer_mut(index).release(&mut self.device);
            self.pool.clear_current();
            return Err(err);
        }

        debug!(%pool_id, %buffer_id, "frame will render");
        Ok(buffer_id)
    }

    /// Finish the current frame: flush, lock the buffer and commit it.
    ///
    /// Calling this without a preceding [`frame_will_render`] is a caller
    /// error reported as [`RendererError::NoCurrentBuffer`].
    ///
    /// The buffer is locked before the commit is sent. If the send fails the
    /// lock stays: the host never saw the commit, so no release will clear
    /// it. Repeated channel failures therefore run the pool into
    /// [`RendererError::Exhausted`]; a failed commit means the connection is
    /// unusable and the target should be torn down.
    ///
    /// [`frame_will_render`]: RenderTarget::frame_will_render
    pub fn frame_rendered(&mut self) -> Result<BufferId> {
        let pool_id = self.ready_pool_id()?;
        if self.pool.current().is_none() {
            return Err(RendererError::NoCurrentBuffer);
        }

        self.device.flush();
        let buffer_id = self.pool.commit().ok_or(RendererError::NoCurrentBuffer)?;
        self.stats.commits += 1;

        let backend = self.backend.as_ref().ok_or(RendererError::NotInitialized)?;
        backend
            .channel()
            .send_message(&Message::BufferCommit { pool_id, buffer_id })?;
        debug!(%pool_id, %buffer_id, "frame rendered");
        Ok(buffer_id)
    }

    fn allocate_and_announce(&mut self, index: usize, framebuffer: G::Framebuffer) -> Result<()> {
        let pool_id = self.ready_pool_id()?;
        let descriptor = self.descriptor();
        let buffer = self.pool.buffer_mut(index);
        buffer.allocate(&mut self.device, &descriptor)?;
        buffer.bind(&mut self.device, framebuffer)?;
        self.stats.allocations += 1;

        let buffer_id = buffer.id();
        let memory = buffer
            .memory_fd()
            .ok_or_else(|| GraphicsError::Allocation(format!("buffer {buffer_id} has no memory")))?;
        let backend = self.backend.as_ref().ok_or(RendererError::NotInitialized)?;
        let channel = backend.channel();
        channel.send_message(&Message::BufferAllocation { pool_id, buffer_id })?;
        channel.send_file_descriptor(memory)?;
        debug!(%pool_id, %buffer_id, "announced buffer");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bufferlink_wire::{MessageCode, PoolId};

    use super::*;
    use crate::pool::POOL_SIZE;
    use crate::testing::Harness;

    fn codes(sent: &[(Message, Option<std::os::fd::OwnedFd>)]) -> Vec<MessageCode> {
        sent.iter().map(|(message, _)| message.code()).collect()
    }

    #[test]
    fn four_frames_lock_buffers_in_order_then_exhaust() {
        let harness = Harness::new();
        let (_host, mut target) = harness.ready_target(1);

        for expected in 0..POOL_SIZE as u32 {
            assert_eq!(target.frame_will_render().expect("begin"), BufferId(expected));
            assert_eq!(target.frame_rendered().expect("end"), BufferId(expected));
        }
        assert_eq!(target.pool().state().locked_buffers().len(), POOL_SIZE);

        let err = target
            .frame_will_render()
            .expect_err("fifth frame has no buffer");
        assert!(matches!(err, RendererError::Exhausted { pool_id: PoolId(1) }));
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn release_makes_buffer_selectable_again() {
        let harness = Harness::new();
        let (_host, mut target) = harness.ready_target(1);
        for _ in 0..POOL_SIZE {
            target.frame_will_render().expect("begin");
            target.frame_rendered().expect("end");
        }

        harness.backend_host.send_message(&Message::ReleaseBuffer {
            pool_id: PoolId(1),
            buffer_id: BufferId(3),
        });
        harness.backend.dispatch().expect("release dispatch");

        assert_eq!(target.frame_will_render().expect("begin"), BufferId(3));
        assert_eq!(target.stats().releases, 1);
    }

    #[test]
    fn allocation_is_followed_by_its_descriptor() {
        let harness = Harness::new();
        let (_host, mut target) = harness.ready_target(7);
        harness.drain_backend();

        target.frame_will_render().expect("begin");
        target.frame_rendered().expect("end");

        let sent = harness.drain_backend();
        assert_eq!(
            codes(&sent),
            vec![MessageCode::BufferAllocation, MessageCode::BufferCommit]
        );
        assert_eq!(
            sent[0].0,
            Message::BufferAllocation {
                pool_id: PoolId(7),
                buffer_id: BufferId(0)
            }
        );
        assert!(sent[0].1.is_some());
    }

    #[test]
    fn reused_buffer_is_only_rebound() {
        let harness = Harness::new();
        let (_host, mut target) = harness.ready_target(2);
        target.frame_will_render().expect("begin");
        target.frame_rendered().expect("end");
        harness.backend_host.send_message(&Message::ReleaseBuffer {
            pool_id: PoolId(2),
            buffer_id: BufferId(0),
        });
        harness.backend.dispatch().expect("release dispatch");
        harness.drain_backend();

        assert_eq!(target.frame_will_render().expect("begin"), BufferId(0));
        target.frame_rendered().expect("end");

        assert_eq!(codes(&harness.drain_backend()), vec![MessageCode::BufferCommit]);
        let stats = target.device().stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.binds, 2);
        assert_eq!(stats.setups, 1);
    }

    #[test]
    fn frame_rendered_twice_is_a_contract_violation() {
        let harness = Harness::new();
        let (_host, mut target) = harness.ready_target(1);
        assert!(matches!(
            target.frame_rendered(),
            Err(RendererError::NoCurrentBuffer)
        ));

        target.frame_will_render().expect("begin");
        target.frame_rendered().expect("end");
        assert!(matches!(
            target.frame_rendered(),
            Err(RendererError::NoCurrentBuffer)
        ));
        assert_eq!(target.stats().commits, 1);
    }

    #[test]
    fn failed_allocation_leaves_nothing_behind() {
        let harness = Harness::new();
        let (_host, mut target) = harness.ready_target(1);
        target.device.fail_attachments(true);

        let err = target.frame_will_render().expect_err("attachments fail");
        assert!(matches!(err, RendererError::Graphics(_)));
        assert_eq!(target.pool().current(), None);
        assert_eq!(target.pool().allocated(), 0);
        let stats = target.device().stats();
        assert_eq!((stats.live_memory, stats.live_images), (0, 0));

        harness.drain_backend();
        target.device.fail_attachments(false);
        assert_eq!(target.frame_will_render().expect("retry"), BufferId(0));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn failed_commit_keeps_buffer_locked() {
        let mut harness = Harness::new();
        let (_host, mut target) = harness.ready_target(1);
        assert_eq!(target.frame_will_render().expect("begin"), BufferId(0));
        harness.backend_host.deinitialize();

        let err = target.frame_rendered().expect_err("host is gone");
        assert!(matches!(err, RendererError::Channel(_)));
        assert_eq!(target.pool().current(), None);
        assert_eq!(target.pool().state().locked_buffers(), vec![BufferId(0)]);
    }

    #[test]
    fn stale_release_after_purge_is_ignored() {
        let harness = Harness::new();
        let (_host, mut target) = harness.ready_target(1);
        target.frame_will_render().expect("begin");
        target.frame_rendered().expect("end");
        target.resize(1, 1).expect("resize");

        harness.backend_host.send_message(&Message::ReleaseBuffer {
            pool_id: PoolId(1),
            buffer_id: BufferId(0),
        });
        harness.backend.dispatch().expect("release dispatch");
        assert_eq!(target.stats().releases, 0);
    }
}
