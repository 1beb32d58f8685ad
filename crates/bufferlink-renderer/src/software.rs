//! A graphics device without a GPU.
//!
//! Buffer memory is an anonymous shared-memory file, so its descriptor can
//! travel to the host exactly like real graphics memory would. Images and
//! attachments are plain identifiers. Counters track what is live so tests
//! and the simulator can check that nothing leaks.

use std::fs::File;
use std::io;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use serde::Serialize;
use tracing::trace;

use crate::graphics::{Attachments, BufferDescriptor, GraphicsDevice, GraphicsError};

/// Shared-memory backing of one buffer.
#[derive(Debug)]
pub struct SoftwareMemory {
    id: u32,
    len: u64,
    fd: OwnedFd,
}

impl SoftwareMemory {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl AsFd for SoftwareMemory {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

#[derive(Debug)]
pub struct SoftwareImage {
    memory_id: u32,
}

/// Snapshot of a [`SoftwareDevice`]'s counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeviceStats {
    pub setups: u32,
    pub allocations: u64,
    pub live_memory: usize,
    pub live_images: usize,
    pub live_attachments: usize,
    pub binds: u64,
    pub flushes: u64,
}

#[derive(Debug, Default)]
pub struct SoftwareDevice {
    next_id: u32,
    stats: DeviceStats,
    fail_allocations: bool,
    fail_attachments: bool,
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> DeviceStats {
        self.stats
    }

    /// Make every following allocation fail.
    pub fn fail_allocations(&mut self, fail: bool) {
        self.fail_allocations = fail;
    }

    /// Make every following attachment creation fail.
    pub fn fail_attachments(&mut self, fail: bool) {
        self.fail_attachments = fail;
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

impl GraphicsDevice for SoftwareDevice {
    type Memory = SoftwareMemory;
    type Image = SoftwareImage;
    type Renderbuffer = u32;
    type Framebuffer = u32;

    fn setup(&mut self) -> Result<u32, GraphicsError> {
        self.stats.setups += 1;
        Ok(self.next_id())
    }

    fn destroy_framebuffer(&mut self, framebuffer: u32) {
        trace!(framebuffer, "destroyed framebuffer");
    }

    fn allocate(&mut self, descriptor: &BufferDescriptor) -> Result<SoftwareMemory, GraphicsError> {
        if self.fail_allocations {
            return Err(GraphicsError::Allocation("allocation disabled".into()));
        }
        let len = descriptor.byte_len();
        let file = File::from(shared_memory()?);
        file.set_len(len)?;

        self.stats.allocations += 1;
        self.stats.live_memory += 1;
        let id = self.next_id();
        trace!(id, len, "allocated shared memory");
        Ok(SoftwareMemory {
            id,
            len,
            fd: OwnedFd::from(file),
        })
    }

    fn release(&mut self, memory: SoftwareMemory) {
        self.stats.live_memory -= 1;
        trace!(id = memory.id, "released shared memory");
    }

    fn import_image(&mut self, memory: &SoftwareMemory) -> Result<SoftwareImage, GraphicsError> {
        self.stats.live_images += 1;
        Ok(SoftwareImage {
            memory_id: memory.id,
        })
    }

    fn destroy_image(&mut self, image: SoftwareImage) {
        self.stats.live_images -= 1;
        trace!(memory_id = image.memory_id, "destroyed image");
    }

    fn create_attachments(
        &mut self,
        _image: &SoftwareImage,
        _width: u32,
        _height: u32,
    ) -> Result<Attachments<u32>, GraphicsError> {
        if self.fail_attachments {
            return Err(GraphicsError::Attachment("attachments disabled".into()));
        }
        self.stats.live_attachments += 1;
        Ok(Attachments {
            color: self.next_id(),
            depth_stencil: self.next_id(),
        })
    }

    fn destroy_attachments(&mut self, _attachments: Attachments<u32>) {
        self.stats.live_attachments -= 1;
    }

    fn bind(&mut self, _framebuffer: u32, _attachments: &Attachments<u32>) -> Result<(), GraphicsError> {
        self.stats.binds += 1;
        Ok(())
    }

    fn flush(&mut self) {
        self.stats.flushes += 1;
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn shared_memory() -> io::Result<OwnedFd> {
    use std::os::fd::FromRawFd;

    // SAFETY: the name is a valid NUL-terminated string.
    let fd = unsafe { libc::memfd_create(c"bufferlink-buffer".as_ptr(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `memfd_create` returned a fresh descriptor owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn shared_memory() -> io::Result<OwnedFd> {
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let path = std::env::temp_dir().join(format!(
        "bufferlink-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(&path)?;
    std::fs::remove_file(&path)?;
    Ok(OwnedFd::from(file))
}
