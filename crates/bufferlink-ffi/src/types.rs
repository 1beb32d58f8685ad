use std::ffi::c_void;
use std::os::raw::c_int;

use bufferlink_renderer::{RenderTarget, RendererBackend};

use crate::device::ForeignDevice;

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferlinkResult {
    Ok = 0,
    InvalidArgument = 1,
    ChannelError = 2,
    GraphicsError = 3,
    InvalidState = 4,
    ProtocolError = 5,
    Internal = 99,
}

/// `EGL_PLATFORM_SURFACELESS_MESA`: targets render off-screen.
pub const BUFFERLINK_PLATFORM_SURFACELESS: u32 = 0x31DD;

pub type BufferlinkBackend = *mut c_void;
pub type BufferlinkTarget = *mut c_void;

/// One graphics memory object as the embedder describes it.
///
/// `fd` is the shareable descriptor sent to the host; it stays owned by the
/// embedder until `release` is called. `handle` is opaque to bufferlink.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BufferlinkMemory {
    pub fd: c_int,
    pub handle: *mut c_void,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferlinkAttachments {
    pub color: u32,
    pub depth_stencil: u32,
}

/// Graphics callbacks supplied by the embedder.
///
/// Every callback receives `user_data` first. Callbacks returning `c_int`
/// report success with `0`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BufferlinkGraphicsOps {
    pub user_data: *mut c_void,
    pub setup: Option<unsafe extern "C" fn(*mut c_void, *mut u32) -> c_int>,
    pub destroy_framebuffer: Option<unsafe extern "C" fn(*mut c_void, u32)>,
    pub allocate: Option<
        unsafe extern "C" fn(*mut c_void, u32, u32, u32, u32, *mut BufferlinkMemory) -> c_int,
    >,
    pub release: Option<unsafe extern "C" fn(*mut c_void, BufferlinkMemory)>,
    pub import_image:
        Option<unsafe extern "C" fn(*mut c_void, *const BufferlinkMemory, *mut *mut c_void) -> c_int>,
    pub destroy_image: Option<unsafe extern "C" fn(*mut c_void, *mut c_void)>,
    pub create_attachments: Option<
        unsafe extern "C" fn(*mut c_void, *mut c_void, u32, u32, *mut BufferlinkAttachments) -> c_int,
    >,
    pub destroy_attachments: Option<unsafe extern "C" fn(*mut c_void, BufferlinkAttachments)>,
    pub bind: Option<unsafe extern "C" fn(*mut c_void, u32, *const BufferlinkAttachments) -> c_int>,
    pub flush: Option<unsafe extern "C" fn(*mut c_void)>,
}

/// Called with the pool ID whenever the host presents one of its frames.
pub type BufferlinkFrameCompleteFn = unsafe extern "C" fn(*mut c_void, u32);

/// Entry points the host graphics runtime calls to manage the backend.
#[repr(C)]
pub struct BufferlinkRendererBackendInterface {
    pub create: unsafe extern "C" fn(c_int) -> BufferlinkBackend,
    pub destroy: unsafe extern "C" fn(BufferlinkBackend),
    pub get_native_display: unsafe extern "C" fn(BufferlinkBackend) -> *mut c_void,
    pub get_platform: unsafe extern "C" fn(BufferlinkBackend) -> u32,
}

/// Entry points the host graphics runtime calls to manage one target.
#[repr(C)]
pub struct BufferlinkRendererTargetInterface {
    pub create: unsafe extern "C" fn(c_int) -> BufferlinkTarget,
    pub destroy: unsafe extern "C" fn(BufferlinkTarget),
    pub initialize:
        unsafe extern "C" fn(BufferlinkTarget, BufferlinkBackend, u32, u32) -> BufferlinkResult,
    pub get_native_window: unsafe extern "C" fn(BufferlinkTarget) -> *mut c_void,
    pub resize: unsafe extern "C" fn(BufferlinkTarget, u32, u32) -> BufferlinkResult,
    pub frame_will_render: unsafe extern "C" fn(BufferlinkTarget) -> BufferlinkResult,
    pub frame_rendered: unsafe extern "C" fn(BufferlinkTarget) -> BufferlinkResult,
    pub deinitialize: unsafe extern "C" fn(BufferlinkTarget),
}

pub(crate) struct BackendHandle {
    pub(crate) backend: RendererBackend,
}

pub(crate) struct TargetHandle {
    pub(crate) target: RenderTarget<ForeignDevice>,
}
