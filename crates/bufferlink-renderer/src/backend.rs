//! The renderer's shared connection to the host.
//!
//! Pool construction, buffer allocation and commits go out on the backend
//! channel, and the host's release and frame-complete notifications for
//! every pool come back on it. [`RendererBackend::dispatch`] reads one
//! notification and routes it by pool ID.

use std::cell::{Ref, RefCell};
use std::collections::{HashMap, HashSet};
use std::os::fd::{OwnedFd, RawFd};
use std::rc::{Rc, Weak};
use std::time::Duration;

use bufferlink_channel::{ClientChannel, Dispatch};
use bufferlink_wire::{Message, PoolId};
use tracing::{debug, error, info, warn};

use crate::config::RendererConfig;
use crate::error::{RendererError, Result};
use crate::pool::PoolState;

/// Pool ID to pool lookup. Entries never keep a pool alive.
#[derive(Debug, Default)]
struct Router {
    pools: HashMap<PoolId, Weak<PoolState>>,
    /// Pools that were torn down. Their notifications may still be in flight.
    ///
    /// Grows by one ID per torn-down target for the backend's lifetime and
    /// is never pruned: a notification for a retired pool can arrive at any
    /// later point, and an ID missing from here would turn it fatal.
    retired: HashSet<PoolId>,
}

impl Router {
    fn insert(&mut self, pool_id: PoolId, state: &Rc<PoolState>) {
        self.retired.remove(&pool_id);
        self.pools.insert(pool_id, Rc::downgrade(state));
    }

    fn remove(&mut self, pool_id: PoolId) {
        if self.pools.remove(&pool_id).is_some() {
            self.retired.insert(pool_id);
        }
    }

    /// `Ok(None)` for retired pools, an error for pools never seen.
    fn lookup(&self, pool_id: PoolId) -> Result<Option<Rc<PoolState>>> {
        if let Some(state) = self.pools.get(&pool_id).and_then(Weak::upgrade) {
            return Ok(Some(state));
        }
        if self.retired.contains(&pool_id) || self.pools.contains_key(&pool_id) {
            debug!(%pool_id, "dropping notification for retired pool");
            return Ok(None);
        }
        error!(%pool_id, "notification for unknown pool");
        Err(RendererError::UnknownPool(pool_id))
    }
}

struct BackendInner {
    channel: RefCell<ClientChannel>,
    router: RefCell<Router>,
    config: RendererConfig,
}

/// Handle to the backend channel and its router.
///
/// Cheap to clone; every render target keeps one.
#[derive(Clone)]
pub struct RendererBackend {
    inner: Rc<BackendInner>,
}

impl RendererBackend {
    /// Adopt `fd` as the backend channel.
    pub fn new(fd: OwnedFd, config: RendererConfig) -> Self {
        let channel = ClientChannel::initialize(fd, config.channel);
        info!(fd = ?channel.socket_fd(), "renderer backend created");
        Self {
            inner: Rc::new(BackendInner {
                channel: RefCell::new(channel),
                router: RefCell::new(Router::default()),
                config,
            }),
        }
    }

    /// Descriptor the embedder's event loop should watch.
    pub fn socket_fd(&self) -> Option<RawFd> {
        self.inner.channel.borrow().socket_fd()
    }

    pub fn config(&self) -> &RendererConfig {
        &self.inner.config
    }

    /// Number of pools currently routed.
    pub fn registered_pools(&self) -> usize {
        self.inner.router.borrow().pools.len()
    }

    /// Readiness callback: read one notification and deliver it.
    ///
    /// A notification naming a pool this backend never registered is a
    /// protocol violation and is returned as [`RendererError::UnknownPool`].
    pub fn dispatch(&self) -> Result<Dispatch> {
        let mut received = None;
        let outcome = self.inner.channel.borrow().dispatch(&mut |message: Message| {
            received = Some(message);
            Dispatch::Continue
        });
        if let Some(message) = received {
            self.route(message)?;
        }
        Ok(outcome)
    }

    /// Wait up to `timeout` for the socket to become readable, then dispatch.
    ///
    /// Returns `Continue` without dispatching on timeout.
    pub fn wait_and_dispatch(&self, timeout: Option<Duration>) -> Result<Dispatch> {
        if !self.inner.channel.borrow().wait_readable(timeout)? {
            return Ok(Dispatch::Continue);
        }
        self.dispatch()
    }

    /// Close the backend channel. Targets still alive can no longer talk to
    /// the host.
    pub fn shutdown(&self) {
        self.inner.channel.borrow_mut().deinitialize();
    }

    pub(crate) fn channel(&self) -> Ref<'_, ClientChannel> {
        self.inner.channel.borrow()
    }

    pub(crate) fn register_pool(&self, pool_id: PoolId, state: &Rc<PoolState>) {
        self.inner.router.borrow_mut().insert(pool_id, state);
        debug!(%pool_id, "routing pool");
    }

    pub(crate) fn unregister_pool(&self, pool_id: PoolId) {
        self.inner.router.borrow_mut().remove(pool_id);
        debug!(%pool_id, "stopped routing pool");
    }

    fn route(&self, message: Message) -> Result<()> {
        match message {
            Message::ReleaseBuffer { pool_id, buffer_id } => {
                if let Some(state) = self.lookup(pool_id)? {
                    state.on_release_notification(pool_id, buffer_id);
                }
            }
            Message::FrameComplete { pool_id } => {
                if let Some(state) = self.lookup(pool_id)? {
                    state.on_frame_complete_notification(pool_id);
                }
            }
            other => warn!(message = %other, "ignoring unexpected message from host"),
        }
        Ok(())
    }

    fn lookup(&self, pool_id: PoolId) -> Result<Option<Rc<PoolState>>> {
        // The router borrow ends here so listeners may call back into the
        // backend.
        self.inner.router.borrow().lookup(pool_id)
    }
}

impl std::fmt::Debug for RendererBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererBackend")
            .field("socket_fd", &self.socket_fd())
            .field("router", &self.inner.router.borrow())
            .finish()
    }
}
