//! Share GPU render buffers between a renderer and a compositor.
//!
//! A renderer draws into a small pool of buffers, hands each buffer's memory
//! to the compositor once, and afterwards only names buffers by ID in fixed
//! 32-byte messages over a Unix socket pair. The compositor presents committed
//! buffers and hands them back with release notifications.
//!
//! # Crate Structure
//!
//! - [`transport`]: socket pairs, descriptor passing and readiness waits
//! - [`wire`]: the fixed-size message codec
//! - [`channel`]: host and client channel endpoints
//! - [`renderer`]: buffer pools, render targets and notification routing
//! - [`compositor`]: the host side, tracking pools and presenting frames

/// Re-export transport types.
pub mod transport {
    pub use bufferlink_transport::*;
}

/// Re-export wire types.
pub mod wire {
    pub use bufferlink_wire::*;
}

/// Re-export channel types.
pub mod channel {
    pub use bufferlink_channel::*;
}

/// Re-export renderer types.
pub mod renderer {
    pub use bufferlink_renderer::*;
}

/// Re-export compositor types.
pub mod compositor {
    pub use bufferlink_compositor::*;
}
