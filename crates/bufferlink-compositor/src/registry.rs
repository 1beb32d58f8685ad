use std::collections::{BTreeMap, VecDeque};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use bufferlink_wire::{BufferId, PoolId};
use tracing::{debug, info};

use crate::compositor::ConnectionId;
use crate::error::{CompositorError, Result};

/// What the host knows about one pool.
#[derive(Debug)]
pub struct PoolRecord {
    owner: ConnectionId,
    registered: bool,
    buffers: BTreeMap<BufferId, OwnedFd>,
    pending: VecDeque<BufferId>,
    displayed: Option<BufferId>,
    commits: u64,
    presented: u64,
}

impl PoolRecord {
    fn new(owner: ConnectionId) -> Self {
        Self {
            owner,
            registered: false,
            buffers: BTreeMap::new(),
            pending: VecDeque::new(),
            displayed: None,
            commits: 0,
            presented: 0,
        }
    }

    /// Connection that asked for the pool; notifications go back on it.
    pub fn owner(&self) -> ConnectionId {
        self.owner
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// IDs of every buffer whose descriptor has arrived.
    pub fn buffer_ids(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.buffers.keys().copied()
    }

    pub fn buffer_fd(&self, buffer_id: BufferId) -> Option<BorrowedFd<'_>> {
        self.buffers.get(&buffer_id).map(AsFd::as_fd)
    }

    /// Committed buffers waiting to be presented, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.pending.iter().copied()
    }

    pub fn displayed(&self) -> Option<BufferId> {
        self.displayed
    }

    pub fn commits(&self) -> u64 {
        self.commits
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }
}

/// Result of presenting one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Presented {
    pub displayed: BufferId,
    /// The buffer it replaced, now free for the renderer.
    pub released: Option<BufferId>,
}

/// Every pool the host has handed out.
#[derive(Debug)]
pub struct PoolRegistry {
    pools: BTreeMap<PoolId, PoolRecord>,
    next_id: u32,
}

impl Default for PoolRegistry {
    fn default() -> Self {
        Self {
            pools: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pool owned by `owner`. IDs start at 1 and are never reused.
    pub fn create(&mut self, owner: ConnectionId) -> PoolId {
        let pool_id = PoolId(self.next_id);
        self.next_id += 1;
        self.pools.insert(pool_id, PoolRecord::new(owner));
        info!(%pool_id, %owner, "pool created");
        pool_id
    }

    pub fn get(&self, pool_id: PoolId) -> Option<&PoolRecord> {
        self.pools.get(&pool_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PoolId, &PoolRecord)> {
        self.pools.iter().map(|(id, record)| (*id, record))
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    fn record_mut(&mut self, pool_id: PoolId) -> Result<&mut PoolRecord> {
        self.pools
            .get_mut(&pool_id)
            .ok_or(CompositorError::UnknownPool(pool_id))
    }

    pub fn register(&mut self, pool_id: PoolId) -> Result<()> {
        self.record_mut(pool_id)?.registered = true;
        debug!(%pool_id, "pool registered");
        Ok(())
    }

    /// Drop every buffer and pending commit of the pool.
    ///
    /// Returns how many buffer descriptors were closed.
    pub fn purge(&mut self, pool_id: PoolId) -> Result<usize> {
        let record = self.record_mut(pool_id)?;
        let closed = record.buffers.len();
        record.buffers.clear();
        record.pending.clear();
        record.displayed = None;
        debug!(%pool_id, closed, "pool purged");
        Ok(closed)
    }

    pub fn unregister(&mut self, pool_id: PoolId) -> Result<PoolRecord> {
        let record = self
            .pools
            .remove(&pool_id)
            .ok_or(CompositorError::UnknownPool(pool_id))?;
        info!(%pool_id, "pool unregistered");
        Ok(record)
    }

    /// Store the descriptor of a newly allocated buffer.
    ///
    /// A repeated allocation for the same ID replaces the old descriptor.
    pub fn add_buffer(&mut self, pool_id: PoolId, buffer_id: BufferId, fd: OwnedFd) -> Result<()> {
        let record = self.record_mut(pool_id)?;
        if record.buffers.insert(buffer_id, fd).is_some() {
            debug!(%pool_id, %buffer_id, "buffer replaced");
        }
        Ok(())
    }

    /// Queue a committed buffer for presentation.
    pub fn commit(&mut self, pool_id: PoolId, buffer_id: BufferId) -> Result<()> {
        let record = self.record_mut(pool_id)?;
        if !record.buffers.contains_key(&buffer_id) {
            return Err(CompositorError::UnknownBuffer { pool_id, buffer_id });
        }
        record.pending.push_back(buffer_id);
        record.commits += 1;
        Ok(())
    }

    /// Display the oldest pending commit.
    ///
    /// Returns `None` when nothing is pending.
    pub fn present_next(&mut self, pool_id: PoolId) -> Result<Option<Presented>> {
        let record = self.record_mut(pool_id)?;
        let Some(displayed) = record.pending.pop_front() else {
            return Ok(None);
        };
        let released = record.displayed.replace(displayed);
        record.presented += 1;
        Ok(Some(Presented {
            displayed,
            released,
        }))
    }

    /// Remove every pool owned by `owner`. Returns their IDs.
    pub fn drop_owned_by(&mut self, owner: ConnectionId) -> Vec<PoolId> {
        let owned: Vec<PoolId> = self
            .pools
            .iter()
            .filter(|(_, record)| record.owner == owner)
            .map(|(id, _)| *id)
            .collect();
        for pool_id in &owned {
            self.pools.remove(pool_id);
        }
        owned
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;

    use super::*;

    fn fd() -> OwnedFd {
        let (a, _b) = UnixStream::pair().expect("pair");
        OwnedFd::from(a)
    }

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let mut registry = PoolRegistry::new();
        let a = registry.create(ConnectionId(0));
        let b = registry.create(ConnectionId(0));
        registry.unregister(a).expect("unregister");
        let c = registry.create(ConnectionId(0));
        assert_eq!((a, b, c), (PoolId(1), PoolId(2), PoolId(3)));
    }

    #[test]
    fn commit_requires_allocated_buffer() {
        let mut registry = PoolRegistry::new();
        let pool = registry.create(ConnectionId(0));
        assert!(matches!(
            registry.commit(pool, BufferId(0)),
            Err(CompositorError::UnknownBuffer { .. })
        ));
        registry.add_buffer(pool, BufferId(0), fd()).expect("add");
        registry.commit(pool, BufferId(0)).expect("commit");
        assert_eq!(registry.get(pool).expect("pool").commits(), 1);
    }

    #[test]
    fn presenting_releases_previous_buffer() {
        let mut registry = PoolRegistry::new();
        let pool = registry.create(ConnectionId(0));
        for id in 0..2 {
            registry.add_buffer(pool, BufferId(id), fd()).expect("add");
            registry.commit(pool, BufferId(id)).expect("commit");
        }

        assert_eq!(
            registry.present_next(pool).expect("present"),
            Some(Presented {
                displayed: BufferId(0),
                released: None
            })
        );
        assert_eq!(
            registry.present_next(pool).expect("present"),
            Some(Presented {
                displayed: BufferId(1),
                released: Some(BufferId(0))
            })
        );
        assert_eq!(registry.present_next(pool).expect("present"), None);
    }

    #[test]
    fn purge_forgets_buffers_and_commits() {
        let mut registry = PoolRegistry::new();
        let pool = registry.create(ConnectionId(0));
        registry.add_buffer(pool, BufferId(0), fd()).expect("add");
        registry.commit(pool, BufferId(0)).expect("commit");

        assert_eq!(registry.purge(pool).expect("purge"), 1);
        let record = registry.get(pool).expect("pool");
        assert_eq!(record.buffer_ids().count(), 0);
        assert_eq!(record.pending().count(), 0);
        assert_eq!(record.displayed(), None);
    }

    #[test]
    fn unknown_pools_are_errors() {
        let mut registry = PoolRegistry::new();
        assert!(matches!(
            registry.register(PoolId(5)),
            Err(CompositorError::UnknownPool(PoolId(5)))
        ));
        assert!(registry.present_next(PoolId(5)).is_err());
    }

    #[test]
    fn owner_disconnect_drops_its_pools() {
        let mut registry = PoolRegistry::new();
        let a = registry.create(ConnectionId(0));
        let b = registry.create(ConnectionId(1));
        assert_eq!(registry.drop_owned_by(ConnectionId(0)), vec![a]);
        assert!(registry.get(a).is_none());
        assert!(registry.get(b).is_some());
    }
}
