use std::cell::RefCell;
use std::ffi::CString;
use std::os::raw::c_char;

use bufferlink_renderer::RendererError;
use tracing::error;

use crate::types::BufferlinkResult;

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
}

pub(crate) fn clear_error_state() {
    LAST_ERROR.with(|state| {
        *state.borrow_mut() = CString::default();
    });
}

pub(crate) fn set_error_message(message: impl Into<String>) {
    let sanitized = message.into().replace('\0', "?");
    LAST_ERROR.with(|state| {
        *state.borrow_mut() = CString::new(sanitized).unwrap_or_default();
    });
}

pub(crate) fn set_invalid_argument(message: impl Into<String>) -> BufferlinkResult {
    set_error_message(message);
    BufferlinkResult::InvalidArgument
}

pub(crate) fn set_panic_error() {
    set_error_message("panic across FFI boundary");
}

/// Record `err` and classify it.
///
/// Protocol violations never return: the renderer and host disagree about
/// which buffers are in use, and the process must not keep rendering.
pub(crate) fn map_renderer_error(err: &RendererError) -> BufferlinkResult {
    if err.is_protocol_violation() {
        fatal(err);
    }
    set_error_message(err.to_string());
    match err {
        RendererError::Channel(_) => BufferlinkResult::ChannelError,
        RendererError::Graphics(_) => BufferlinkResult::GraphicsError,
        RendererError::UnexpectedReply(_) => BufferlinkResult::ProtocolError,
        RendererError::NotInitialized | RendererError::AlreadyInitialized => {
            BufferlinkResult::InvalidState
        }
        RendererError::NoCurrentBuffer => BufferlinkResult::InvalidState,
        RendererError::Exhausted { .. } | RendererError::UnknownPool(_) => {
            BufferlinkResult::ProtocolError
        }
    }
}

pub(crate) fn fatal(err: &RendererError) -> ! {
    error!(error = %err, "protocol violation, aborting");
    std::process::abort()
}

pub(crate) fn last_error_ptr() -> *const c_char {
    LAST_ERROR.with(|state| state.borrow().as_ptr())
}
