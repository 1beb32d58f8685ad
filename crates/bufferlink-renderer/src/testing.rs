use std::os::fd::OwnedFd;
use std::time::Duration;

use bufferlink_channel::{ChannelConfig, Dispatch, HostChannel};
use bufferlink_wire::{Message, PoolId};

use crate::backend::RendererBackend;
use crate::config::RendererConfig;
use crate::software::SoftwareDevice;
use crate::target::RenderTarget;

pub(crate) const WIDTH: u32 = 64;
pub(crate) const HEIGHT: u32 = 32;

fn config() -> RendererConfig {
    RendererConfig {
        channel: ChannelConfig::with_timeout(Some(Duration::from_secs(2))),
        ..RendererConfig::default()
    }
}

/// In-process host ends for a backend and its targets.
pub(crate) struct Harness {
    pub backend_host: HostChannel,
    pub backend: RendererBackend,
}

impl Harness {
    pub fn new() -> Self {
        let config = config();
        let mut backend_host = HostChannel::initialize(config.channel);
        let fd = backend_host
            .release_client_fd(true)
            .expect("backend fd should release");
        Self {
            backend_host,
            backend: RendererBackend::new(fd, config),
        }
    }

    /// A target whose host end is returned alongside it, not yet initialized.
    pub fn target(&self) -> (HostChannel, RenderTarget<SoftwareDevice>) {
        let mut host = HostChannel::initialize(config().channel);
        let fd = host
            .release_client_fd(true)
            .expect("target fd should release");
        let target = RenderTarget::new(SoftwareDevice::new(), fd, &config());
        (host, target)
    }

    /// An initialized target. The reply is queued before the request is
    /// sent, so no host thread is needed.
    pub fn ready_target(&self, pool_id: u32) -> (HostChannel, RenderTarget<SoftwareDevice>) {
        let (host, mut target) = self.target();
        self.backend_host
            .send_message(&Message::PoolConstructionReply {
                pool_id: PoolId(pool_id),
            });
        target
            .initialize(&self.backend, WIDTH, HEIGHT)
            .expect("target should initialize");
        (host, target)
    }

    /// Everything the renderer sent on the backend channel so far. Buffer
    /// allocations are paired with the descriptor that followed them.
    pub fn drain_backend(&self) -> Vec<(Message, Option<OwnedFd>)> {
        let mut received = Vec::new();
        while self
            .backend_host
            .wait_readable(Some(Duration::ZERO))
            .expect("poll should succeed")
        {
            let outcome = self
                .backend_host
                .dispatch(&mut |channel: &HostChannel, message: Message| {
                    let fd = match message {
                        Message::BufferAllocation { .. } => Some(
                            channel
                                .receive_file_descriptor()
                                .expect("descriptor should follow allocation"),
                        ),
                        _ => None,
                    };
                    received.push((message, fd));
                    Dispatch::Continue
                });
            if outcome == Dispatch::Remove {
                break;
            }
        }
        received
    }
}

/// Every message the renderer sent on a target channel so far.
pub(crate) fn drain(host: &HostChannel) -> Vec<Message> {
    let mut received = Vec::new();
    while host
        .wait_readable(Some(Duration::ZERO))
        .expect("poll should succeed")
    {
        let outcome = host.dispatch(&mut |_: &HostChannel, message: Message| {
            received.push(message);
            Dispatch::Continue
        });
        if outcome == Dispatch::Remove {
            break;
        }
    }
    received
}
