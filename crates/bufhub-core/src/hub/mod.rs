//! In-process buffer service
//!
//! [`Hub`] answers the client protocol for every channel it hands out. It
//! owns the slice memory, arbitrates ownership transitions, fans readiness
//! out through each channel's event fd and keeps the persistent registry.
//! Dropping a channel counts as giving up whatever that channel held.

mod registry;

use crate::client::BufferHubClient;
use crate::config::{ClientConfig, HubConfig};
use crate::event::EventFd;
use crate::protocol::{Channel, ChannelHandle, Connector, Opcode, Reply, Request};
use crate::slice::BufferId;
use crate::{Error, Result};
use parking_lot::Mutex;
use registry::{ChannelId, Registry};
use std::os::fd::{AsFd, BorrowedFd};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

static NEXT_INSTANCE: AtomicU32 = AtomicU32::new(0);

/// Buffer service living in this process
#[derive(Clone)]
pub struct Hub {
    registry: Arc<Mutex<Registry>>,
    endpoint_path: String,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    pub fn with_config(config: HubConfig) -> Self {
        let instance = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
        let endpoint_path = config.endpoint_path.clone();
        Self {
            registry: Arc::new(Mutex::new(Registry::new(config, instance))),
            endpoint_path,
        }
    }

    /// Client connected to this hub's endpoint
    pub fn client(&self) -> BufferHubClient {
        BufferHubClient::new(Arc::new(self.clone()))
            .with_config(ClientConfig::default().with_endpoint_path(&self.endpoint_path))
    }

    /// Number of live buffers
    pub fn buffer_count(&self) -> usize {
        self.registry.lock().buffer_count()
    }

    /// Identity registered under a persistent name
    pub fn persistent_id(&self, name: &str) -> Option<BufferId> {
        self.registry.lock().persistent_id(name)
    }
}

impl Connector for Hub {
    fn connect(&self, path: &str) -> Result<Box<dyn Channel>> {
        if path != self.endpoint_path {
            return Err(Error::NotFound(format!("no service at \"{}\"", path)));
        }
        let (id, event) = self.registry.lock().open_channel()?;
        trace!(channel = id, "opened channel");
        Ok(Box::new(HubChannel {
            id,
            registry: self.registry.clone(),
            event,
        }))
    }
}

/// One client's connection to a [`Hub`]
pub struct HubChannel {
    id: ChannelId,
    registry: Arc<Mutex<Registry>>,
    event: Arc<EventFd>,
}

impl Channel for HubChannel {
    fn call(&self, request: Request) -> Result<Reply> {
        let mut registry = self.registry.lock();
        match request {
            Request::NewConsumer => {
                let (id, event) = registry.add_consumer(self.id)?;
                let channel = HubChannel {
                    id,
                    registry: self.registry.clone(),
                    event,
                };
                Ok(Reply::Channel(ChannelHandle::new(Box::new(channel))))
            }
            other => registry.handle(self.id, other),
        }
    }

    fn send_impulse(&self, opcode: Opcode) -> Result<()> {
        if !matches!(opcode, Opcode::ProducerGain | Opcode::ConsumerRelease) {
            return Err(Error::InvalidArgument(format!("{:?} cannot be sent as an impulse", opcode)));
        }
        // Nobody waits for an impulse's outcome.
        if let Err(e) = self.registry.lock().impulse(self.id, opcode) {
            warn!(channel = self.id, ?opcode, "impulse failed: {}", e);
        }
        Ok(())
    }

    fn event_fd(&self) -> BorrowedFd<'_> {
        self.event.as_fd()
    }
}

impl Drop for HubChannel {
    fn drop(&mut self) {
        trace!(channel = self.id, "closing channel");
        self.registry.lock().close_channel(self.id);
    }
}
