//! bufferlink-ffi: C-ABI renderer backend.
//!
//! The host graphics runtime finds two interface tables by symbol,
//! [`bufferlink_renderer_backend_interface`] and
//! [`bufferlink_renderer_target_interface`], and drives the renderer through
//! them. Before creating targets the embedder registers its graphics
//! callbacks with [`bufferlink_set_graphics_ops`] and wires
//! [`bufferlink_backend_socket_fd`] / [`bufferlink_backend_dispatch`] into
//! its event loop.
//!
//! All state is per thread; every call for one backend must come from the
//! thread that created it.

#![cfg(unix)]

mod backend;
mod device;
mod error;
mod target;
mod types;

use std::ffi::c_void;
use std::os::raw::c_char;
use std::panic::AssertUnwindSafe;

pub use backend::{
    bufferlink_backend_dispatch, bufferlink_backend_socket_fd,
    bufferlink_renderer_backend_interface,
};
pub use device::{ForeignDevice, ForeignImage, ForeignMemory};
pub use target::bufferlink_renderer_target_interface;
pub use types::{
    BufferlinkAttachments, BufferlinkBackend, BufferlinkFrameCompleteFn, BufferlinkGraphicsOps,
    BufferlinkMemory, BufferlinkRendererBackendInterface, BufferlinkRendererTargetInterface,
    BufferlinkResult, BufferlinkTarget, BUFFERLINK_PLATFORM_SURFACELESS,
};

fn ffi_boundary<T>(on_panic: T, f: impl FnOnce() -> T) -> T {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            error::set_panic_error();
            on_panic
        }
    }
}

/// Register the graphics callbacks used by targets created afterwards on
/// this thread. Passing null clears the registration.
///
/// # Safety
/// `ops` must be null or point to a valid `BufferlinkGraphicsOps`. The
/// callbacks and `user_data` must stay valid while any target uses them.
#[no_mangle]
pub unsafe extern "C" fn bufferlink_set_graphics_ops(
    ops: *const BufferlinkGraphicsOps,
) -> BufferlinkResult {
    ffi_boundary(BufferlinkResult::Internal, || {
        error::clear_error_state();
        // SAFETY: Pointer validity is guaranteed by the caller.
        let ops = unsafe { ops.as_ref() }.copied();
        device::set_graphics_ops(ops);
        BufferlinkResult::Ok
    })
}

/// Register the callback run whenever the host presents a frame of any
/// target on this thread. Passing `None` clears it.
///
/// # Safety
/// `callback` and `user_data` must stay valid until cleared.
#[no_mangle]
pub unsafe extern "C" fn bufferlink_set_frame_complete_callback(
    callback: Option<BufferlinkFrameCompleteFn>,
    user_data: *mut c_void,
) {
    ffi_boundary((), || {
        target::set_frame_complete_callback(callback.map(|callback| (callback, user_data)));
    });
}

#[no_mangle]
pub extern "C" fn bufferlink_last_error() -> *const c_char {
    ffi_boundary(std::ptr::null(), error::last_error_ptr)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::ffi::CStr;
    use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd};
    use std::os::raw::c_int;
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    use bufferlink_channel::{ChannelConfig, Dispatch, HostChannel};
    use bufferlink_wire::{BufferId, Message, PoolId};

    use super::*;

    #[derive(Default)]
    struct Counters {
        allocations: Cell<u32>,
        releases: Cell<u32>,
        frames: Cell<u32>,
        last_pool: Cell<u32>,
    }

    unsafe fn counters<'a>(user_data: *mut c_void) -> &'a Counters {
        &*(user_data as *const Counters)
    }

    unsafe extern "C" fn setup(_: *mut c_void, out: *mut u32) -> c_int {
        *out = 1;
        0
    }

    unsafe extern "C" fn allocate(
        user_data: *mut c_void,
        _width: u32,
        _height: u32,
        _format: u32,
        _usage: u32,
        out: *mut BufferlinkMemory,
    ) -> c_int {
        let (memory, _peer) = UnixStream::pair().expect("pair");
        (*out).fd = memory.into_raw_fd();
        let counters = counters(user_data);
        counters.allocations.set(counters.allocations.get() + 1);
        0
    }

    unsafe extern "C" fn release(user_data: *mut c_void, memory: BufferlinkMemory) {
        drop(OwnedFd::from_raw_fd(memory.fd));
        let counters = counters(user_data);
        counters.releases.set(counters.releases.get() + 1);
    }

    unsafe extern "C" fn import_image(
        _: *mut c_void,
        _: *const BufferlinkMemory,
        out: *mut *mut c_void,
    ) -> c_int {
        *out = std::ptr::NonNull::<u8>::dangling().as_ptr().cast();
        0
    }

    unsafe extern "C" fn create_attachments(
        _: *mut c_void,
        _: *mut c_void,
        _: u32,
        _: u32,
        out: *mut BufferlinkAttachments,
    ) -> c_int {
        *out = BufferlinkAttachments {
            color: 2,
            depth_stencil: 3,
        };
        0
    }

    unsafe extern "C" fn bind(_: *mut c_void, _: u32, _: *const BufferlinkAttachments) -> c_int {
        0
    }

    unsafe extern "C" fn on_frame(user_data: *mut c_void, pool_id: u32) {
        let counters = counters(user_data);
        counters.last_pool.set(pool_id);
        counters.frames.set(counters.frames.get() + 1);
    }

    fn ops(counters: &Counters) -> BufferlinkGraphicsOps {
        BufferlinkGraphicsOps {
            user_data: counters as *const Counters as *mut c_void,
            setup: Some(setup),
            destroy_framebuffer: None,
            allocate: Some(allocate),
            release: Some(release),
            import_image: Some(import_image),
            destroy_image: None,
            create_attachments: Some(create_attachments),
            destroy_attachments: None,
            bind: Some(bind),
            flush: None,
        }
    }

    fn host() -> (HostChannel, c_int) {
        let mut host = HostChannel::initialize(ChannelConfig::with_timeout(Some(
            Duration::from_secs(2),
        )));
        let fd = host.release_client_fd(true).expect("client fd");
        (host, fd.into_raw_fd())
    }

    fn next(host: &HostChannel) -> Option<Message> {
        let mut seen = None;
        if host
            .wait_readable(Some(Duration::from_millis(100)))
            .expect("poll")
        {
            host.dispatch(&mut |channel: &HostChannel, message: Message| {
                if let Message::BufferAllocation { .. } = message {
                    channel.receive_file_descriptor().expect("descriptor");
                }
                seen = Some(message);
                Dispatch::Continue
            });
        }
        seen
    }

    #[test]
    fn last_error_starts_empty() {
        error::clear_error_state();
        let ptr = bufferlink_last_error();
        assert!(!ptr.is_null());

        // SAFETY: bufferlink_last_error returns a pointer to a thread-local CString.
        let text = unsafe { CStr::from_ptr(ptr).to_str().expect("utf-8") };
        assert!(text.is_empty());
    }

    #[test]
    fn backend_reports_surfaceless_platform() {
        let interface = &bufferlink_renderer_backend_interface;
        let (_host, fd) = host();
        // SAFETY: `fd` is an open socket handed over to the backend.
        unsafe {
            let backend = (interface.create)(fd);
            assert!(!backend.is_null());
            assert_eq!((interface.get_platform)(backend), 0x31DD);
            assert!((interface.get_native_display)(backend).is_null());
            assert!(bufferlink_backend_socket_fd(backend) >= 0);
            (interface.destroy)(backend);
        }
    }

    #[test]
    fn invalid_arguments_are_reported() {
        let backend = &bufferlink_renderer_backend_interface;
        let target = &bufferlink_renderer_target_interface;
        // SAFETY: null handles and negative descriptors are rejected before use.
        unsafe {
            assert!((backend.create)(-1).is_null());
            assert_eq!(bufferlink_backend_dispatch(std::ptr::null_mut()), -1);
            assert_eq!(bufferlink_backend_socket_fd(std::ptr::null_mut()), -1);
            assert_eq!(
                (target.frame_will_render)(std::ptr::null_mut()),
                BufferlinkResult::InvalidArgument
            );
            (target.destroy)(std::ptr::null_mut());
            (backend.destroy)(std::ptr::null_mut());
        }
        // SAFETY: the pointer is a thread-local CString.
        let text = unsafe { CStr::from_ptr(bufferlink_last_error()) };
        assert!(text.to_string_lossy().contains("null"));
    }

    #[test]
    fn frame_without_graphics_ops_fails_cleanly() {
        let backend_iface = &bufferlink_renderer_backend_interface;
        let target_iface = &bufferlink_renderer_target_interface;
        let (backend_host, backend_fd) = host();
        let (_target_host, target_fd) = host();
        backend_host.send_message(&Message::PoolConstructionReply { pool_id: PoolId(1) });

        // SAFETY: descriptors are handed over; handles are used while alive.
        unsafe {
            assert_eq!(bufferlink_set_graphics_ops(std::ptr::null()), BufferlinkResult::Ok);
            let backend = (backend_iface.create)(backend_fd);
            let target = (target_iface.create)(target_fd);
            assert_eq!(
                (target_iface.initialize)(target, backend, 8, 8),
                BufferlinkResult::Ok
            );
            assert_eq!(
                (target_iface.frame_will_render)(target),
                BufferlinkResult::GraphicsError
            );
            assert_eq!(
                (target_iface.frame_rendered)(target),
                BufferlinkResult::InvalidState
            );
            (target_iface.destroy)(target);
            (backend_iface.destroy)(backend);
        }
    }

    #[test]
    fn full_frame_through_the_c_interface() {
        let counters = Counters::default();
        let ops = ops(&counters);
        let backend_iface = &bufferlink_renderer_backend_interface;
        let target_iface = &bufferlink_renderer_target_interface;
        let (backend_host, backend_fd) = host();
        let (target_host, target_fd) = host();
        backend_host.send_message(&Message::PoolConstructionReply { pool_id: PoolId(7) });

        // SAFETY: `ops` and `counters` outlive every handle created below;
        // descriptors are handed over to the backend and target.
        unsafe {
            assert_eq!(bufferlink_set_graphics_ops(&ops), BufferlinkResult::Ok);
            bufferlink_set_frame_complete_callback(
                Some(on_frame),
                &counters as *const Counters as *mut c_void,
            );

            let backend = (backend_iface.create)(backend_fd);
            let target = (target_iface.create)(target_fd);
            assert!((target_iface.get_native_window)(target).is_null());
            assert_eq!(
                (target_iface.initialize)(target, backend, 32, 16),
                BufferlinkResult::Ok
            );
            assert_eq!(
                next(&target_host),
                Some(Message::RegisterPool { pool_id: PoolId(7) })
            );

            assert_eq!((target_iface.frame_will_render)(target), BufferlinkResult::Ok);
            assert_eq!((target_iface.frame_rendered)(target), BufferlinkResult::Ok);
            assert_eq!(next(&backend_host), Some(Message::PoolConstruction));
            assert_eq!(
                next(&backend_host),
                Some(Message::BufferAllocation {
                    pool_id: PoolId(7),
                    buffer_id: BufferId(0)
                })
            );
            assert_eq!(
                next(&backend_host),
                Some(Message::BufferCommit {
                    pool_id: PoolId(7),
                    buffer_id: BufferId(0)
                })
            );
            assert_eq!(counters.allocations.get(), 1);

            backend_host.send_message(&Message::FrameComplete { pool_id: PoolId(7) });
            assert_eq!(bufferlink_backend_dispatch(backend), 1);
            assert_eq!(counters.frames.get(), 1);

            assert_eq!((target_iface.resize)(target, 64, 64), BufferlinkResult::Ok);
            assert_eq!(counters.releases.get(), 1);
            assert_eq!(
                next(&target_host),
                Some(Message::PoolPurge { pool_id: PoolId(7) })
            );

            (target_iface.deinitialize)(target);
            assert_eq!(
                next(&target_host),
                Some(Message::UnregisterPool { pool_id: PoolId(7) })
            );
            (target_iface.destroy)(target);
            (backend_iface.destroy)(backend);

            bufferlink_set_frame_complete_callback(None, std::ptr::null_mut());
            bufferlink_set_graphics_ops(std::ptr::null());
        }
        assert_eq!(counters.last_pool.get(), 7);
    }
}
