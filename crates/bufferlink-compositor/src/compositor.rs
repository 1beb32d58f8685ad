use std::fmt;
use std::os::fd::{OwnedFd, RawFd};
use std::time::Duration;

use bufferlink_channel::{ChannelConfig, ChannelError, Dispatch, HostChannel};
use bufferlink_transport::poll_readable;
use bufferlink_wire::{Message, PoolId};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{CompositorError, Result};
use crate::registry::{PoolRegistry, Presented};

/// Index of one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(pub usize);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Counters over the compositor's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompositorStats {
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub pools_created: u64,
    pub buffers_received: u64,
    pub commits: u64,
    pub frames_presented: u64,
    pub releases_sent: u64,
    pub purges: u64,
}

/// Host end of any number of renderer connections.
pub struct Compositor {
    connections: Vec<Option<HostChannel>>,
    registry: PoolRegistry,
    config: ChannelConfig,
    stats: CompositorStats,
}

impl Compositor {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            connections: Vec::new(),
            registry: PoolRegistry::new(),
            config,
            stats: CompositorStats::default(),
        }
    }

    /// Create a connection and hand out its client descriptor.
    ///
    /// The descriptor is released exactly once; pass it to the renderer.
    /// Slots of closed connections are reused, so an ID names a connection
    /// only while that connection is open.
    pub fn open_connection(&mut self) -> Result<(ConnectionId, OwnedFd)> {
        let mut channel = HostChannel::initialize(self.config);
        if !channel.is_available() {
            return Err(ChannelError::Unavailable.into());
        }
        let fd = channel.release_client_fd(true)?;
        let id = match self.connections.iter().position(Option::is_none) {
            Some(index) => {
                self.connections[index] = Some(channel);
                ConnectionId(index)
            }
            None => {
                self.connections.push(Some(channel));
                ConnectionId(self.connections.len() - 1)
            }
        };
        self.stats.connections_opened += 1;
        info!(connection = %id, "connection opened");
        Ok((id, fd))
    }

    pub fn registry(&self) -> &PoolRegistry {
        &self.registry
    }

    pub fn stats(&self) -> CompositorStats {
        self.stats
    }

    /// Number of connections still open.
    pub fn live_connections(&self) -> usize {
        self.connections.iter().flatten().count()
    }

    pub fn socket_fd(&self, connection: ConnectionId) -> Option<RawFd> {
        self.connections
            .get(connection.0)
            .and_then(Option::as_ref)
            .and_then(HostChannel::socket_fd)
    }

    /// Readiness callback for one connection: handle one message.
    ///
    /// A closed or desynchronised connection is closed and every pool it
    /// owns is dropped.
    pub fn dispatch(&mut self, connection: ConnectionId) -> Result<Dispatch> {
        let channel = self
            .connections
            .get_mut(connection.0)
            .and_then(Option::take)
            .ok_or(CompositorError::UnknownConnection(connection))?;

        let mut session = Session {
            connection,
            registry: &mut self.registry,
            stats: &mut self.stats,
        };
        let outcome = channel.dispatch(&mut |channel: &HostChannel, message: Message| {
            session.handle(channel, message)
        });

        match outcome {
            Dispatch::Continue => self.connections[connection.0] = Some(channel),
            Dispatch::Remove => self.close(connection, channel),
        }
        Ok(outcome)
    }

    /// Wait up to `timeout` for any connection to become readable and
    /// dispatch each readable one once. Returns how many were dispatched.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<usize> {
        let live: Vec<(ConnectionId, RawFd)> = self
            .connections
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let fd = slot.as_ref()?.socket_fd()?;
                Some((ConnectionId(index), fd))
            })
            .collect();
        if live.is_empty() {
            return Ok(0);
        }

        let fds: Vec<RawFd> = live.iter().map(|(_, fd)| *fd).collect();
        let ready = poll_readable(&fds, timeout)?;

        let mut dispatched = 0;
        for ((connection, _), readable) in live.into_iter().zip(ready) {
            if readable {
                self.dispatch(connection)?;
                dispatched += 1;
            }
        }
        Ok(dispatched)
    }

    /// Present the oldest pending frame of `pool_id`.
    ///
    /// The replaced buffer is released and the frame reported complete,
    /// both on the connection that owns the pool.
    pub fn present_next(&mut self, pool_id: PoolId) -> Result<Option<Presented>> {
        let Some(presented) = self.registry.present_next(pool_id)? else {
            return Ok(None);
        };
        self.stats.frames_presented += 1;

        let owner = self
            .registry
            .get(pool_id)
            .map(|record| record.owner())
            .ok_or(CompositorError::UnknownPool(pool_id))?;
        let Some(channel) = self.connections.get(owner.0).and_then(Option::as_ref) else {
            warn!(%pool_id, %owner, "owner connection is gone");
            return Ok(Some(presented));
        };

        if let Some(buffer_id) = presented.released {
            channel.send_message(&Message::ReleaseBuffer { pool_id, buffer_id });
            self.stats.releases_sent += 1;
        }
        channel.send_message(&Message::FrameComplete { pool_id });
        debug!(%pool_id, buffer_id = %presented.displayed, "presented frame");
        Ok(Some(presented))
    }

    /// Present one pending frame of every registered pool.
    pub fn present_all(&mut self) -> Result<usize> {
        let ready: Vec<PoolId> = self
            .registry
            .iter()
            .filter(|(_, record)| record.is_registered() && record.pending().next().is_some())
            .map(|(pool_id, _)| pool_id)
            .collect();
        for pool_id in &ready {
            self.present_next(*pool_id)?;
        }
        Ok(ready.len())
    }

    /// Close every connection.
    pub fn shutdown(&mut self) {
        for index in 0..self.connections.len() {
            if let Some(channel) = self.connections[index].take() {
                self.close(ConnectionId(index), channel);
            }
        }
    }

    fn close(&mut self, connection: ConnectionId, mut channel: HostChannel) {
        channel.deinitialize();
        let dropped = self.registry.drop_owned_by(connection);
        self.stats.connections_closed += 1;
        info!(%connection, pools = dropped.len(), "connection closed");
    }
}

impl fmt::Debug for Compositor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compositor")
            .field("live_connections", &self.live_connections())
            .field("pools", &self.registry.len())
            .field("stats", &self.stats)
            .finish()
    }
}

/// Message handling for one dispatch, borrowing the compositor's state.
struct Session<'a> {
    connection: ConnectionId,
    registry: &'a mut PoolRegistry,
    stats: &'a mut CompositorStats,
}

impl Session<'_> {
    fn handle(&mut self, channel: &HostChannel, message: Message) -> Dispatch {
        let connection = self.connection;
        let outcome = match message {
            Message::PoolConstruction => {
                let pool_id = self.registry.create(connection);
                self.stats.pools_created += 1;
                channel.send_message(&Message::PoolConstructionReply { pool_id });
                Ok(())
            }
            Message::RegisterPool { pool_id } => self.registry.register(pool_id),
            Message::PoolPurge { pool_id } => self.registry.purge(pool_id).map(|_| {
                self.stats.purges += 1;
            }),
            Message::UnregisterPool { pool_id } => self.registry.unregister(pool_id).map(drop),
            Message::BufferAllocation { pool_id, buffer_id } => {
                // The descriptor is the very next thing on this socket.
                match channel.receive_file_descriptor() {
                    Ok(fd) => {
                        self.stats.buffers_received += 1;
                        self.registry.add_buffer(pool_id, buffer_id, fd)
                    }
                    Err(err) => {
                        warn!(
                            %connection, %pool_id, %buffer_id, error = %err,
                            "buffer descriptor did not follow allocation"
                        );
                        return Dispatch::Remove;
                    }
                }
            }
            Message::BufferCommit { pool_id, buffer_id } => {
                self.stats.commits += 1;
                self.registry.commit(pool_id, buffer_id)
            }
            Message::PoolConstructionReply { .. }
            | Message::FrameComplete { .. }
            | Message::ReleaseBuffer { .. } => {
                warn!(%connection, %message, "ignoring host-bound message from client");
                Ok(())
            }
        };

        match outcome {
            Ok(()) => Dispatch::Continue,
            Err(err) => {
                warn!(%connection, %message, error = %err, "client is out of sync");
                Dispatch::Remove
            }
        }
    }
}
