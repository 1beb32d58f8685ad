use std::fmt;
use std::os::fd::{AsFd, BorrowedFd};

use bufferlink_wire::BufferId;
use tracing::trace;

use crate::graphics::{Attachments, BufferDescriptor, GraphicsDevice, GraphicsError};

/// One slot of a pool and the graphics state bound to it.
///
/// Memory, image and attachments are created together on first use and
/// released together. The lock flag lives in [`PoolState`](crate::PoolState)
/// so release notifications can reach it without borrowing the buffer.
pub struct Buffer<G: GraphicsDevice> {
    id: BufferId,
    memory: Option<G::Memory>,
    image: Option<G::Image>,
    attachments: Option<Attachments<G::Renderbuffer>>,
}

impl<G: GraphicsDevice> Buffer<G> {
    pub(crate) fn new(id: BufferId) -> Self {
        Self {
            id,
            memory: None,
            image: None,
            attachments: None,
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Whether graphics memory is bound to this slot.
    pub fn is_allocated(&self) -> bool {
        self.memory.is_some()
    }

    /// Descriptor of the graphics memory, for handing to the host.
    pub fn memory_fd(&self) -> Option<BorrowedFd<'_>> {
        self.memory.as_ref().map(AsFd::as_fd)
    }

    pub fn attachments(&self) -> Option<&Attachments<G::Renderbuffer>> {
        self.attachments.as_ref()
    }

    /// Allocate memory, import it and create attachments.
    ///
    /// On failure whatever was created so far stays in the slot; the caller
    /// is expected to [`release`](Buffer::release) it.
    pub(crate) fn allocate(
        &mut self,
        device: &mut G,
        descriptor: &BufferDescriptor,
    ) -> Result<(), GraphicsError> {
        let memory = self.memory.insert(device.allocate(descriptor)?);
        let image = self.image.insert(device.import_image(memory)?);
        self.attachments = Some(device.create_attachments(
            image,
            descriptor.width,
            descriptor.height,
        )?);
        trace!(buffer_id = %self.id, "allocated buffer");
        Ok(())
    }

    /// Bind this slot's attachments as the render destination.
    pub(crate) fn bind(
        &self,
        device: &mut G,
        framebuffer: G::Framebuffer,
    ) -> Result<(), GraphicsError> {
        let attachments = self
            .attachments
            .as_ref()
            .ok_or_else(|| GraphicsError::Attachment(format!("buffer {} has no storage", self.id)))?;
        device.bind(framebuffer, attachments)
    }

    /// Release all graphics state, in reverse order of creation.
    ///
    /// Returns whether anything was released.
    pub(crate) fn release(&mut self, device: &mut G) -> bool {
        let attachments = self.attachments.take();
        let image = self.image.take();
        let memory = self.memory.take();
        let released = attachments.is_some() || image.is_some() || memory.is_some();

        if let Some(attachments) = attachments {
            device.destroy_attachments(attachments);
        }
        if let Some(image) = image {
            device.destroy_image(image);
        }
        if let Some(memory) = memory {
            device.release(memory);
        }
        if released {
            trace!(buffer_id = %self.id, "released buffer");
        }
        released
    }
}

impl<G: GraphicsDevice> fmt::Debug for Buffer<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("allocated", &self.is_allocated())
            .field("attachments", &self.attachments)
            .finish()
    }
}
