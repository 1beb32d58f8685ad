use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use bufferlink_wire::{BufferId, PoolId};
use tracing::{debug, trace};

use crate::buffer::Buffer;
use crate::graphics::GraphicsDevice;

/// Number of buffers in every pool.
pub const POOL_SIZE: usize = 4;

type FrameListener = Rc<dyn Fn(PoolId)>;

/// The part of a pool that host notifications touch.
///
/// Shared between the owning target and the backend's router, which holds
/// it weakly. All mutation goes through `Cell`s; everything runs on one
/// thread.
pub struct PoolState {
    pool_id: Cell<Option<PoolId>>,
    locked: [Cell<bool>; POOL_SIZE],
    releases: Cell<u64>,
    frames_completed: Cell<u64>,
    frame_listener: RefCell<Option<FrameListener>>,
}

impl PoolState {
    fn new() -> Self {
        Self {
            pool_id: Cell::new(None),
            locked: std::array::from_fn(|_| Cell::new(false)),
            releases: Cell::new(0),
            frames_completed: Cell::new(0),
            frame_listener: RefCell::new(None),
        }
    }

    /// Host-assigned ID, once pool construction has completed.
    pub fn pool_id(&self) -> Option<PoolId> {
        self.pool_id.get()
    }

    pub fn is_locked(&self, buffer_id: BufferId) -> bool {
        self.locked
            .get(buffer_id.index())
            .is_some_and(Cell::get)
    }

    /// IDs of every buffer the host currently holds.
    pub fn locked_buffers(&self) -> Vec<BufferId> {
        (0..POOL_SIZE)
            .filter(|&index| self.locked[index].get())
            .map(|index| BufferId(index as u32))
            .collect()
    }

    pub fn releases(&self) -> u64 {
        self.releases.get()
    }

    pub fn frames_completed(&self) -> u64 {
        self.frames_completed.get()
    }

    /// The host is done with `buffer_id`.
    ///
    /// Ignored unless `pool_id` names this pool; a notification can still be
    /// in flight after a purge. Releases may arrive in any order. Returns
    /// whether a lock was cleared.
    pub fn on_release_notification(&self, pool_id: PoolId, buffer_id: BufferId) -> bool {
        if self.pool_id.get() != Some(pool_id) {
            debug!(%pool_id, %buffer_id, "ignoring release for another pool");
            return false;
        }
        let Some(lock) = self.locked.get(buffer_id.index()) else {
            debug!(%pool_id, %buffer_id, "ignoring release for buffer outside pool");
            return false;
        };
        let was_locked = lock.replace(false);
        if was_locked {
            self.releases.set(self.releases.get() + 1);
        }
        trace!(%pool_id, %buffer_id, was_locked, "buffer released");
        was_locked
    }

    /// A committed frame of this pool was presented.
    ///
    /// Buffer state is untouched; the installed listener, if any, is told.
    pub fn on_frame_complete_notification(&self, pool_id: PoolId) {
        if self.pool_id.get() != Some(pool_id) {
            debug!(%pool_id, "ignoring frame completion for another pool");
            return;
        }
        self.frames_completed.set(self.frames_completed.get() + 1);
        let listener = self.frame_listener.borrow().clone();
        if let Some(listener) = listener {
            listener(pool_id);
        }
    }

    pub(crate) fn set_pool_id(&self, pool_id: Option<PoolId>) {
        self.pool_id.set(pool_id);
    }

    pub(crate) fn set_frame_listener(&self, listener: Option<FrameListener>) {
        *self.frame_listener.borrow_mut() = listener;
    }

    fn first_free(&self) -> Option<usize> {
        self.locked.iter().position(|lock| !lock.get())
    }

    fn lock(&self, index: usize) {
        self.locked[index].set(true);
    }

    fn clear_locks(&self) {
        for lock in &self.locked {
            lock.set(false);
        }
    }
}

impl fmt::Debug for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolState")
            .field("pool_id", &self.pool_id.get())
            .field("locked", &self.locked_buffers())
            .field("releases", &self.releases.get())
            .field("frames_completed", &self.frames_completed.get())
            .finish()
    }
}

/// Fixed set of buffers owned by one render target.
pub struct BufferPool<G: GraphicsDevice> {
    state: Rc<PoolState>,
    buffers: [Buffer<G>; POOL_SIZE],
    current: Option<usize>,
}

impl<G: GraphicsDevice> BufferPool<G> {
    pub fn new() -> Self {
        Self {
            state: Rc::new(PoolState::new()),
            buffers: std::array::from_fn(|index| Buffer::new(BufferId(index as u32))),
            current: None,
        }
    }

    pub fn state(&self) -> &Rc<PoolState> {
        &self.state
    }

    pub fn pool_id(&self) -> Option<PoolId> {
        self.state.pool_id()
    }

    /// Buffer being rendered into, if a frame is in progress.
    pub fn current(&self) -> Option<BufferId> {
        self.current.map(|index| self.buffers[index].id())
    }

    pub fn buffer(&self, buffer_id: BufferId) -> Option<&Buffer<G>> {
        self.buffers.get(buffer_id.index())
    }

    pub fn buffers(&self) -> &[Buffer<G>] {
        &self.buffers
    }

    /// Number of slots with graphics memory bound.
    pub fn allocated(&self) -> usize {
        self.buffers.iter().filter(|b| b.is_allocated()).count()
    }

    /// Make the first unlocked buffer current.
    ///
    /// Returns `None` when the host holds every buffer.
    pub(crate) fn select_free(&mut self) -> Option<usize> {
        let index = self.state.first_free()?;
        self.current = Some(index);
        trace!(buffer_id = index, "selected buffer");
        Some(index)
    }

    pub(crate) fn buffer_mut(&mut self, index: usize) -> &mut Buffer<G> {
        &mut self.buffers[index]
    }

    pub(crate) fn clear_current(&mut self) {
        self.current = None;
    }

    /// Lock the current buffer and clear the current slot.
    pub(crate) fn commit(&mut self) -> Option<BufferId> {
        let index = self.current.take()?;
        self.state.lock(index);
        Some(self.buffers[index].id())
    }

    /// Release every buffer's graphics state and clear every lock.
    ///
    /// Returns how many buffers had state to release.
    pub(crate) fn purge(&mut self, device: &mut G) -> usize {
        let released = self
            .buffers
            .iter_mut()
            .map(|buffer| buffer.release(device))
            .filter(|&released| released)
            .count();
        self.state.clear_locks();
        self.current = None;
        released
    }
}

impl<G: GraphicsDevice> Default for BufferPool<G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: GraphicsDevice> fmt::Debug for BufferPool<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("state", &self.state)
            .field("current", &self.current)
            .field("allocated", &self.allocated())
            .finish()
    }
}
