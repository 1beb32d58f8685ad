//! Local socket transport for bufferlink.
//!
//! A [`LocalSocket`] is one end of a connected Unix stream socket pair. It
//! moves whole byte blocks with a single system call per block and can carry
//! an open file descriptor as `SCM_RIGHTS` ancillary data.
//!
//! This is the lowest layer of bufferlink. Channels and the buffer pool
//! protocol are built on top of it.

#![cfg(unix)]

pub mod error;
pub mod fd;
pub mod readiness;
pub mod socket;

pub use error::{Result, TransportError};
pub use readiness::{poll_readable, wait_readable};
pub use socket::{map_blocking_error, IoMode, LocalSocket};
