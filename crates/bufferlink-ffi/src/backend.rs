use std::ffi::c_void;
use std::os::fd::{FromRawFd, OwnedFd};
use std::os::raw::c_int;

use bufferlink_channel::Dispatch;
use bufferlink_renderer::{RendererBackend, RendererConfig};

use crate::error;
use crate::types::{
    BackendHandle, BufferlinkBackend, BufferlinkRendererBackendInterface,
    BUFFERLINK_PLATFORM_SURFACELESS,
};

/// Backend entry points, looked up by symbol name by the host runtime.
#[no_mangle]
#[allow(non_upper_case_globals)]
pub static bufferlink_renderer_backend_interface: BufferlinkRendererBackendInterface =
    BufferlinkRendererBackendInterface {
        create: backend_create,
        destroy: backend_destroy,
        get_native_display: backend_get_native_display,
        get_platform: backend_get_platform,
    };

pub(crate) fn with_backend<T>(
    handle: BufferlinkBackend,
    on_error: T,
    f: impl FnOnce(&BackendHandle) -> T,
) -> T {
    if handle.is_null() {
        let _ = error::set_invalid_argument("backend handle cannot be null");
        return on_error;
    }

    let backend_handle = {
        // SAFETY: Pointer validity is guaranteed by the caller.
        unsafe { &*(handle as *const BackendHandle) }
    };

    f(backend_handle)
}

/// Create a backend on the host socket `socket_fd`, taking ownership of it.
///
/// # Safety
/// `socket_fd` must be an open socket descriptor not owned elsewhere.
unsafe extern "C" fn backend_create(socket_fd: c_int) -> BufferlinkBackend {
    crate::ffi_boundary(std::ptr::null_mut(), || {
        error::clear_error_state();
        if socket_fd < 0 {
            let _ = error::set_invalid_argument("socket_fd must be a valid descriptor");
            return std::ptr::null_mut();
        }

        // SAFETY: the caller transfers ownership of an open descriptor.
        let fd = unsafe { OwnedFd::from_raw_fd(socket_fd) };
        let backend = RendererBackend::new(fd, RendererConfig::from_env());
        Box::into_raw(Box::new(BackendHandle { backend })) as BufferlinkBackend
    })
}

/// # Safety
/// `backend` must be null or a handle returned by `create`, not yet destroyed.
unsafe extern "C" fn backend_destroy(backend: BufferlinkBackend) {
    crate::ffi_boundary((), || {
        if backend.is_null() {
            return;
        }
        // SAFETY: Pointer was allocated by Box::into_raw in `backend_create`.
        let handle = unsafe { Box::from_raw(backend as *mut BackendHandle) };
        handle.backend.shutdown();
    });
}

/// The default display.
unsafe extern "C" fn backend_get_native_display(_backend: BufferlinkBackend) -> *mut c_void {
    std::ptr::null_mut()
}

unsafe extern "C" fn backend_get_platform(_backend: BufferlinkBackend) -> u32 {
    BUFFERLINK_PLATFORM_SURFACELESS
}

/// Descriptor the embedder's event loop should watch, or -1.
///
/// # Safety
/// `backend` must be a valid backend handle.
#[no_mangle]
pub unsafe extern "C" fn bufferlink_backend_socket_fd(backend: BufferlinkBackend) -> c_int {
    crate::ffi_boundary(-1, || {
        with_backend(backend, -1, |handle| handle.backend.socket_fd().unwrap_or(-1))
    })
}

/// Handle one pending host notification. Call when the socket is readable.
///
/// Returns 1 to keep watching the socket, 0 once the host is gone, -1 on an
/// invalid handle. A notification for an unknown pool aborts the process.
///
/// # Safety
/// `backend` must be a valid backend handle.
#[no_mangle]
pub unsafe extern "C" fn bufferlink_backend_dispatch(backend: BufferlinkBackend) -> c_int {
    crate::ffi_boundary(-1, || {
        error::clear_error_state();
        with_backend(backend, -1, |handle| match handle.backend.dispatch() {
            Ok(Dispatch::Continue) => 1,
            Ok(Dispatch::Remove) => 0,
            Err(err) => {
                let _ = error::map_renderer_error(&err);
                0
            }
        })
    })
}
