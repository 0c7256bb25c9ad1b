//! Producer side of a shared buffer

use crate::buffer::SharedBuffer;
use crate::client::BufferHubClient;
use crate::consumer::Consumer;
use crate::fence::Fence;
use crate::protocol::{BufferParams, ChannelHandle, Opcode, PersistentName, Request};
use crate::slice::SliceMapper;
use crate::usage::Usage;
use crate::{Error, Result};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::{debug, error};

/// Writes into a buffer and posts it to consumers.
///
/// A producer is either fully imported or closed with the error that stopped
/// it. Ownership transitions are decided by the service; every call returns
/// its verdict.
pub struct Producer {
    buffer: SharedBuffer,
}

impl Producer {
    /// Allocate a fresh anonymous buffer
    pub fn create(client: &BufferHubClient, params: BufferParams) -> Self {
        debug!(?params, "creating producer");
        Self::allocate(client, "create buffer", Request::CreateBuffer(params))
    }

    /// Get or create a buffer registered under `name`
    pub fn create_persistent(
        client: &BufferHubClient,
        name: &str,
        user: u32,
        group: u32,
        params: BufferParams,
    ) -> Self {
        debug!(name, user, group, ?params, "creating persistent producer");
        let request = Request::CreatePersistentBuffer(PersistentName::new(name, user, group), params);
        Self::allocate(client, "create persistent buffer", request)
    }

    /// Allocate an anonymous `size` byte blob
    pub fn create_blob(client: &BufferHubClient, usage: Usage, size: usize) -> Self {
        match BufferParams::blob(usage, size) {
            Ok(params) => Self::create(client, params),
            Err(e) => Self::closed(client, e),
        }
    }

    /// Get or create a `size` byte blob registered under `name`
    pub fn create_persistent_blob(
        client: &BufferHubClient,
        name: &str,
        user: u32,
        group: u32,
        usage: Usage,
        size: usize,
    ) -> Self {
        match BufferParams::blob(usage, size) {
            Ok(params) => Self::create_persistent(client, name, user, group, params),
            Err(e) => Self::closed(client, e),
        }
    }

    pub fn create_uncached_blob(client: &BufferHubClient, size: usize) -> Self {
        Self::create_blob(client, Usage::UNCACHED_BLOB, size)
    }

    pub fn create_persistent_uncached_blob(
        client: &BufferHubClient,
        name: &str,
        user: u32,
        group: u32,
        size: usize,
    ) -> Self {
        Self::create_persistent_blob(client, name, user, group, Usage::UNCACHED_BLOB, size)
    }

    /// Attach to an existing persistent buffer by name
    pub fn get_persistent(client: &BufferHubClient, name: &str) -> Self {
        debug!(name, "attaching to persistent producer");
        Self::allocate(client, "get persistent buffer", Request::GetPersistentBuffer(name.to_string()))
    }

    /// Import from a live producer channel
    pub fn import(handle: ChannelHandle, mapper: Arc<dyn SliceMapper>) -> Self {
        let mut buffer = SharedBuffer::from_channel(handle.into_channel(), mapper);
        // Failure leaves the buffer closed with the error.
        let _ = buffer.import_buffer();
        Self { buffer }
    }

    /// Import from the result of a call that hands out a producer channel
    pub fn import_status(status: Result<ChannelHandle>, mapper: Arc<dyn SliceMapper>) -> Self {
        match status {
            Ok(handle) => Self::import(handle, mapper),
            Err(e) => Self {
                buffer: SharedBuffer::closed(e, mapper),
            },
        }
    }

    fn allocate(client: &BufferHubClient, op: &str, request: Request) -> Self {
        let mut buffer = SharedBuffer::connect(client);
        if buffer.is_closed() {
            return Self { buffer };
        }
        if let Err(e) = buffer.invoke(op, request) {
            buffer.close(e);
            return Self { buffer };
        }
        let _ = buffer.import_buffer();
        Self { buffer }
    }

    fn closed(client: &BufferHubClient, error: Error) -> Self {
        error!("invalid producer parameters: {}", error);
        Self {
            buffer: SharedBuffer::closed(error, client.mapper().clone()),
        }
    }

    /// Hand the buffer to consumers.
    ///
    /// `fence` marks when this producer's own writes complete; `metadata`
    /// must be exactly the buffer's configured metadata size.
    pub fn post(&mut self, fence: &Fence, metadata: &[u8]) -> Result<()> {
        if !self.buffer.is_closed() && metadata.len() != self.buffer.metadata_size() {
            return Err(Error::SizeMismatch {
                expected: self.buffer.metadata_size(),
                actual: metadata.len(),
            });
        }
        let request = Request::ProducerPost {
            fence: fence.borrow().duplicate()?,
            metadata: metadata.to_vec(),
        };
        self.buffer.invoke("post", request)?.into_done()
    }

    /// Take the buffer back for writing.
    ///
    /// Returns the fence of the last consumer's outstanding reads; wait on it
    /// before touching the memory.
    pub fn gain(&mut self) -> Result<Fence> {
        self.buffer.invoke("gain", Request::ProducerGain)?.into_fence()
    }

    /// Request a gain without waiting for the reply or a fence
    pub fn gain_async(&mut self) -> Result<()> {
        self.buffer.impulse("gain async", Opcode::ProducerGain)
    }

    /// Register this buffer under `name` in the persistent registry
    pub fn make_persistent(&mut self, name: &str, user: u32, group: u32) -> Result<()> {
        let request = Request::ProducerMakePersistent(PersistentName::new(name, user, group));
        self.buffer.invoke("make persistent", request)?.into_done()
    }

    /// Drop this buffer's persistent registration
    pub fn remove_persistence(&mut self) -> Result<()> {
        self.buffer
            .invoke("remove persistence", Request::ProducerRemovePersistence)?
            .into_done()
    }

    /// Open and import one more consumer of this buffer
    pub fn create_consumer_buffer(&mut self) -> Consumer {
        let mapper = self.buffer.mapper().clone();
        Consumer::import_status(self.buffer.create_consumer(), mapper)
    }
}

impl Deref for Producer {
    type Target = SharedBuffer;

    fn deref(&self) -> &SharedBuffer {
        &self.buffer
    }
}

impl DerefMut for Producer {
    fn deref_mut(&mut self) -> &mut SharedBuffer {
        &mut self.buffer
    }
}
