use std::cell::Cell;
use std::ffi::c_void;
use std::os::fd::{FromRawFd, OwnedFd};
use std::os::raw::c_int;

use bufferlink_renderer::{RenderTarget, RendererConfig};
use tracing::warn;

use crate::backend::with_backend;
use crate::device::ForeignDevice;
use crate::error;
use crate::types::{
    BufferlinkFrameCompleteFn, BufferlinkRendererTargetInterface, BufferlinkResult,
    BufferlinkTarget, TargetHandle,
};

thread_local! {
    static FRAME_COMPLETE: Cell<Option<(BufferlinkFrameCompleteFn, *mut c_void)>> =
        const { Cell::new(None) };
}

pub(crate) fn set_frame_complete_callback(callback: Option<(BufferlinkFrameCompleteFn, *mut c_void)>) {
    FRAME_COMPLETE.with(|slot| slot.set(callback));
}

fn notify_frame_complete(pool_id: u32) {
    if let Some((callback, user_data)) = FRAME_COMPLETE.with(Cell::get) {
        // SAFETY: the embedder registered this callback for this thread.
        unsafe { callback(user_data, pool_id) };
    }
}

/// Target entry points, looked up by symbol name by the host runtime.
#[no_mangle]
#[allow(non_upper_case_globals)]
pub static bufferlink_renderer_target_interface: BufferlinkRendererTargetInterface =
    BufferlinkRendererTargetInterface {
        create: target_create,
        destroy: target_destroy,
        initialize: target_initialize,
        get_native_window: target_get_native_window,
        resize: target_resize,
        frame_will_render: target_frame_will_render,
        frame_rendered: target_frame_rendered,
        deinitialize: target_deinitialize,
    };

fn with_target<T>(
    handle: BufferlinkTarget,
    on_error: T,
    f: impl FnOnce(&mut TargetHandle) -> T,
) -> T {
    if handle.is_null() {
        let _ = error::set_invalid_argument("target handle cannot be null");
        return on_error;
    }

    let target_handle = {
        // SAFETY: Pointer validity is guaranteed by the caller.
        unsafe { &mut *(handle as *mut TargetHandle) }
    };

    f(target_handle)
}

/// Create a target on its own host socket, taking ownership of `socket_fd`.
///
/// The graphics ops registered on this thread are captured now.
///
/// # Safety
/// `socket_fd` must be an open socket descriptor not owned elsewhere.
unsafe extern "C" fn target_create(socket_fd: c_int) -> BufferlinkTarget {
    crate::ffi_boundary(std::ptr::null_mut(), || {
        error::clear_error_state();
        if socket_fd < 0 {
            let _ = error::set_invalid_argument("socket_fd must be a valid descriptor");
            return std::ptr::null_mut();
        }

        // SAFETY: the caller transfers ownership of an open descriptor.
        let fd = unsafe { OwnedFd::from_raw_fd(socket_fd) };
        let target = RenderTarget::new(
            ForeignDevice::from_registered(),
            fd,
            &RendererConfig::from_env(),
        );
        Box::into_raw(Box::new(TargetHandle { target })) as BufferlinkTarget
    })
}

/// # Safety
/// `target` must be null or a handle returned by `create`, not yet destroyed.
unsafe extern "C" fn target_destroy(target: BufferlinkTarget) {
    crate::ffi_boundary((), || {
        if target.is_null() {
            return;
        }
        // SAFETY: Pointer was allocated by Box::into_raw in `target_create`.
        drop(unsafe { Box::from_raw(target as *mut TargetHandle) });
    });
}

/// # Safety
/// `target` and `backend` must be valid handles.
unsafe extern "C" fn target_initialize(
    target: BufferlinkTarget,
    backend: crate::types::BufferlinkBackend,
    width: u32,
    height: u32,
) -> BufferlinkResult {
    crate::ffi_boundary(BufferlinkResult::Internal, || {
        error::clear_error_state();
        with_backend(backend, BufferlinkResult::InvalidArgument, |backend| {
            with_target(target, BufferlinkResult::InvalidArgument, |handle| {
                match handle.target.initialize(&backend.backend, width, height) {
                    Ok(()) => {
                        handle
                            .target
                            .on_frame_complete(|pool_id| notify_frame_complete(pool_id.0));
                        BufferlinkResult::Ok
                    }
                    Err(err) => error::map_renderer_error(&err),
                }
            })
        })
    })
}

/// Targets render off-screen; there is no native window.
unsafe extern "C" fn target_get_native_window(_target: BufferlinkTarget) -> *mut c_void {
    std::ptr::null_mut()
}

/// # Safety
/// `target` must be a valid target handle.
unsafe extern "C" fn target_resize(target: BufferlinkTarget, width: u32, height: u32) -> BufferlinkResult {
    crate::ffi_boundary(BufferlinkResult::Internal, || {
        error::clear_error_state();
        with_target(target, BufferlinkResult::InvalidArgument, |handle| {
            match handle.target.resize(width, height) {
                Ok(()) => BufferlinkResult::Ok,
                Err(err) => error::map_renderer_error(&err),
            }
        })
    })
}

/// Pick and bind the buffer for the next frame. Aborts when none is free.
///
/// # Safety
/// `target` must be a valid target handle.
unsafe extern "C" fn target_frame_will_render(target: BufferlinkTarget) -> BufferlinkResult {
    crate::ffi_boundary(BufferlinkResult::Internal, || {
        error::clear_error_state();
        with_target(target, BufferlinkResult::InvalidArgument, |handle| {
            match handle.target.frame_will_render() {
                Ok(_) => BufferlinkResult::Ok,
                Err(err) => error::map_renderer_error(&err),
            }
        })
    })
}

/// # Safety
/// `target` must be a valid target handle.
unsafe extern "C" fn target_frame_rendered(target: BufferlinkTarget) -> BufferlinkResult {
    crate::ffi_boundary(BufferlinkResult::Internal, || {
        error::clear_error_state();
        with_target(target, BufferlinkResult::InvalidArgument, |handle| {
            match handle.target.frame_rendered() {
                Ok(_) => BufferlinkResult::Ok,
                Err(err) => {
                    warn!(error = %err, "frame rendered out of order");
                    error::map_renderer_error(&err)
                }
            }
        })
    })
}

/// # Safety
/// `target` must be a valid target handle.
unsafe extern "C" fn target_deinitialize(target: BufferlinkTarget) {
    crate::ffi_boundary((), || {
        with_target(target, (), |handle| handle.target.deinitialize());
    });
}
