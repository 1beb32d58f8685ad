//! [`GraphicsDevice`] backed by the embedder's C callbacks.

use std::cell::Cell;
use std::ffi::c_void;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::raw::c_int;

use bufferlink_renderer::{
    Attachments, BufferDescriptor, GraphicsDevice, GraphicsError, PixelFormat,
};
use tracing::trace;

use crate::types::{BufferlinkAttachments, BufferlinkGraphicsOps, BufferlinkMemory};

thread_local! {
    static GRAPHICS_OPS: Cell<Option<BufferlinkGraphicsOps>> = const { Cell::new(None) };
}

pub(crate) fn set_graphics_ops(ops: Option<BufferlinkGraphicsOps>) {
    GRAPHICS_OPS.with(|slot| slot.set(ops));
}

pub(crate) fn graphics_ops() -> Option<BufferlinkGraphicsOps> {
    GRAPHICS_OPS.with(Cell::get)
}

/// Memory returned by the embedder's `allocate` callback.
#[derive(Debug)]
pub struct ForeignMemory {
    raw: BufferlinkMemory,
}

impl AsFd for ForeignMemory {
    fn as_fd(&self) -> BorrowedFd<'_> {
        // SAFETY: `allocate` checked the descriptor is non-negative and the
        // embedder keeps it open until `release` consumes this value.
        unsafe { BorrowedFd::borrow_raw(self.raw.fd) }
    }
}

#[derive(Debug)]
pub struct ForeignImage(*mut c_void);

/// Graphics device that forwards to the ops registered when it was created.
#[derive(Debug)]
pub struct ForeignDevice {
    ops: Option<BufferlinkGraphicsOps>,
}

impl ForeignDevice {
    /// Capture the currently registered ops.
    pub fn from_registered() -> Self {
        Self {
            ops: graphics_ops(),
        }
    }

    fn ops(&self) -> Result<BufferlinkGraphicsOps, GraphicsError> {
        self.ops
            .ok_or_else(|| GraphicsError::Setup("graphics ops not registered".into()))
    }
}

fn required<F>(callback: Option<F>, name: &str) -> Result<F, GraphicsError> {
    callback.ok_or_else(|| GraphicsError::Setup(format!("missing `{name}` callback")))
}

fn check(rc: c_int, error: fn(String) -> GraphicsError) -> Result<(), GraphicsError> {
    if rc == 0 {
        Ok(())
    } else {
        Err(error(format!("callback returned {rc}")))
    }
}

fn format_code(format: PixelFormat) -> u32 {
    match format {
        PixelFormat::Rgba8Unorm => 0,
    }
}

impl GraphicsDevice for ForeignDevice {
    type Memory = ForeignMemory;
    type Image = ForeignImage;
    type Renderbuffer = u32;
    type Framebuffer = u32;

    fn setup(&mut self) -> Result<u32, GraphicsError> {
        let ops = self.ops()?;
        let setup = required(ops.setup, "setup")?;
        let mut framebuffer = 0u32;
        // SAFETY: the callback contract is documented on `BufferlinkGraphicsOps`;
        // `framebuffer` is a valid out-pointer.
        check(unsafe { setup(ops.user_data, &mut framebuffer) }, GraphicsError::Setup)?;
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&mut self, framebuffer: u32) {
        if let Some((ops, destroy)) = self.ops.and_then(|ops| Some((ops, ops.destroy_framebuffer?))) {
            // SAFETY: see `setup`.
            unsafe { destroy(ops.user_data, framebuffer) };
        }
    }

    fn allocate(&mut self, descriptor: &BufferDescriptor) -> Result<ForeignMemory, GraphicsError> {
        let ops = self.ops()?;
        let allocate = required(ops.allocate, "allocate")?;
        let mut raw = BufferlinkMemory {
            fd: -1,
            handle: std::ptr::null_mut(),
        };
        // SAFETY: see `setup`; `raw` is a valid out-pointer.
        let rc = unsafe {
            allocate(
                ops.user_data,
                descriptor.width,
                descriptor.height,
                format_code(descriptor.format),
                descriptor.usage.0,
                &mut raw,
            )
        };
        check(rc, GraphicsError::Allocation)?;
        if raw.fd < 0 {
            return Err(GraphicsError::Allocation(
                "allocation returned no descriptor".into(),
            ));
        }
        trace!(fd = raw.fd, "embedder allocated memory");
        Ok(ForeignMemory { raw })
    }

    fn release(&mut self, memory: ForeignMemory) {
        if let Some((ops, release)) = self.ops.and_then(|ops| Some((ops, ops.release?))) {
            // SAFETY: see `setup`; ownership of the memory returns to the embedder.
            unsafe { release(ops.user_data, memory.raw) };
        }
    }

    fn import_image(&mut self, memory: &ForeignMemory) -> Result<ForeignImage, GraphicsError> {
        let ops = self.ops()?;
        let import = required(ops.import_image, "import_image")?;
        let mut image = std::ptr::null_mut();
        // SAFETY: see `setup`; both pointers are valid for the call.
        check(
            unsafe { import(ops.user_data, &memory.raw, &mut image) },
            GraphicsError::Import,
        )?;
        Ok(ForeignImage(image))
    }

    fn destroy_image(&mut self, image: ForeignImage) {
        if let Some((ops, destroy)) = self.ops.and_then(|ops| Some((ops, ops.destroy_image?))) {
            // SAFETY: see `setup`.
            unsafe { destroy(ops.user_data, image.0) };
        }
    }

    fn create_attachments(
        &mut self,
        image: &ForeignImage,
        width: u32,
        height: u32,
    ) -> Result<Attachments<u32>, GraphicsError> {
        let ops = self.ops()?;
        let create = required(ops.create_attachments, "create_attachments")?;
        let mut out = BufferlinkAttachments {
            color: 0,
            depth_stencil: 0,
        };
        // SAFETY: see `setup`; `out` is a valid out-pointer.
        check(
            unsafe { create(ops.user_data, image.0, width, height, &mut out) },
            GraphicsError::Attachment,
        )?;
        Ok(Attachments {
            color: out.color,
            depth_stencil: out.depth_stencil,
        })
    }

    fn destroy_attachments(&mut self, attachments: Attachments<u32>) {
        if let Some((ops, destroy)) = self.ops.and_then(|ops| Some((ops, ops.destroy_attachments?))) {
            let raw = BufferlinkAttachments {
                color: attachments.color,
                depth_stencil: attachments.depth_stencil,
            };
            // SAFETY: see `setup`.
            unsafe { destroy(ops.user_data, raw) };
        }
    }

    fn bind(&mut self, framebuffer: u32, attachments: &Attachments<u32>) -> Result<(), GraphicsError> {
        let ops = self.ops()?;
        let bind = required(ops.bind, "bind")?;
        let raw = BufferlinkAttachments {
            color: attachments.color,
            depth_stencil: attachments.depth_stencil,
        };
        // SAFETY: see `setup`; `raw` outlives the call.
        check(
            unsafe { bind(ops.user_data, framebuffer, &raw) },
            GraphicsError::Attachment,
        )
    }

    fn flush(&mut self) {
        if let Some((ops, flush)) = self.ops.and_then(|ops| Some((ops, ops.flush?))) {
            // SAFETY: see `setup`.
            unsafe { flush(ops.user_data) };
        }
    }
}
