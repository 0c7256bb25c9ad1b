//! Consumer side of a shared buffer

use crate::buffer::SharedBuffer;
use crate::fence::Fence;
use crate::protocol::{ChannelHandle, Opcode, Request};
use crate::slice::SliceMapper;
use crate::{Error, Result};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::trace;

/// Reads posted buffers and releases them back to the producer
pub struct Consumer {
    buffer: SharedBuffer,
}

impl Consumer {
    /// Import from a live consumer channel
    pub fn import(handle: ChannelHandle, mapper: Arc<dyn SliceMapper>) -> Self {
        let mut buffer = SharedBuffer::from_channel(handle.into_channel(), mapper);
        // Failure leaves the buffer closed with the error.
        let _ = buffer.import_buffer();
        Self { buffer }
    }

    /// Import from the result of a `create_consumer` call
    pub fn import_status(status: Result<ChannelHandle>, mapper: Arc<dyn SliceMapper>) -> Self {
        match status {
            Ok(handle) => Self::import(handle, mapper),
            Err(e) => Self {
                buffer: SharedBuffer::closed(e, mapper),
            },
        }
    }

    /// Open and import one more consumer of the same buffer
    pub fn create_consumer_buffer(&mut self) -> Consumer {
        let mapper = self.buffer.mapper().clone();
        Consumer::import_status(self.buffer.create_consumer(), mapper)
    }

    /// Take read ownership of the pending post.
    ///
    /// Fills `metadata` with the posted metadata, whose length must match the
    /// buffer's configured metadata size, and returns the producer's fence.
    /// Wait on the fence before reading.
    pub fn acquire(&mut self, metadata: &mut [u8]) -> Result<Fence> {
        if !self.buffer.is_closed() && metadata.len() != self.buffer.metadata_size() {
            return Err(Error::SizeMismatch {
                expected: self.buffer.metadata_size(),
                actual: metadata.len(),
            });
        }
        let request = Request::ConsumerAcquire {
            metadata_size: metadata.len(),
        };
        let (fence, posted) = self.buffer.invoke("acquire", request)?.into_acquired()?;
        if posted.len() != metadata.len() {
            let e = Error::Protocol(format!(
                "acquired {} metadata bytes, expected {}",
                posted.len(),
                metadata.len()
            ));
            // The service counts this consumer as holding the buffer; dropping
            // the channel hands it back.
            self.buffer.close(e.clone());
            return Err(e);
        }
        metadata.copy_from_slice(&posted);
        trace!(id = ?self.buffer.id(), fence = ?fence.as_raw_fd(), "acquired");
        Ok(fence)
    }

    /// Acquire a buffer that carries no metadata
    pub fn acquire_fence(&mut self) -> Result<Fence> {
        self.acquire(&mut [])
    }

    /// Return the buffer; `fence` marks when this consumer's reads complete
    pub fn release(&mut self, fence: &Fence) -> Result<()> {
        let request = Request::ConsumerRelease {
            fence: fence.borrow().duplicate()?,
        };
        self.buffer.invoke("release", request)?.into_done()
    }

    /// Release without a fence and without waiting for the reply
    pub fn release_async(&mut self) -> Result<()> {
        self.buffer.impulse("release async", Opcode::ConsumerRelease)
    }

    /// Release a buffer this consumer never touched
    pub fn discard(&mut self) -> Result<()> {
        self.release(&Fence::empty())
    }

    /// Stop (or resume) holding up the producer's gains
    pub fn set_ignore(&mut self, ignore: bool) -> Result<()> {
        self.buffer
            .invoke("set ignore", Request::ConsumerSetIgnore(ignore))?
            .into_done()
    }
}

impl Deref for Consumer {
    type Target = SharedBuffer;

    fn deref(&self) -> &SharedBuffer {
        &self.buffer
    }
}

impl DerefMut for Consumer {
    fn deref_mut(&mut self) -> &mut SharedBuffer {
        &mut self.buffer
    }
}
