//! State shared by producers and consumers

use crate::client::BufferHubClient;
use crate::event::{poll_fd, Readiness};
use crate::guard::SliceGuard;
use crate::import::import_slices;
use crate::protocol::{Channel, ChannelHandle, Opcode, Reply, Request};
use crate::slice::{BufferId, Slice, SliceMapper};
use crate::usage::{Rect, Usage};
use crate::{Error, Result};
use std::os::fd::BorrowedFd;
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// One logical buffer as seen by this process.
///
/// Owns the channel to the service, the imported slices and, through the
/// channel, the readiness descriptor. A buffer whose construction or import
/// failed is closed: it keeps the error and refuses further work.
pub struct SharedBuffer {
    channel: Option<Box<dyn Channel>>,
    mapper: Arc<dyn SliceMapper>,
    id: Option<BufferId>,
    metadata_size: usize,
    slices: Vec<Slice>,
    error: Option<Error>,
}

impl SharedBuffer {
    /// Open a channel to the client's endpoint
    pub(crate) fn connect(client: &BufferHubClient) -> Self {
        match client.connect() {
            Ok(channel) => Self::from_channel(channel, client.mapper().clone()),
            Err(e) => {
                error!(endpoint = %client.config().endpoint_path, "failed to connect: {}", e);
                Self::closed(e, client.mapper().clone())
            }
        }
    }

    pub(crate) fn from_channel(channel: Box<dyn Channel>, mapper: Arc<dyn SliceMapper>) -> Self {
        Self {
            channel: Some(channel),
            mapper,
            id: None,
            metadata_size: 0,
            slices: Vec::new(),
            error: None,
        }
    }

    pub(crate) fn closed(error: Error, mapper: Arc<dyn SliceMapper>) -> Self {
        Self {
            channel: None,
            mapper,
            id: None,
            metadata_size: 0,
            slices: Vec::new(),
            error: Some(error),
        }
    }

    /// Identity assigned by the service, once imported
    pub fn id(&self) -> Option<BufferId> {
        self.id
    }

    pub fn slice_count(&self) -> usize {
        self.slices.len()
    }

    pub fn slice(&self, index: usize) -> Option<&Slice> {
        self.slices.get(index)
    }

    /// Metadata size every post/acquire must use
    pub fn metadata_size(&self) -> usize {
        self.metadata_size
    }

    pub fn is_closed(&self) -> bool {
        self.error.is_some()
    }

    /// The error this buffer was closed with
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub(crate) fn mapper(&self) -> &Arc<dyn SliceMapper> {
        &self.mapper
    }

    /// Readiness descriptor, absent once closed
    pub fn event_fd(&self) -> Option<BorrowedFd<'_>> {
        self.channel.as_ref().map(|c| c.event_fd())
    }

    /// Tear down the channel and remember why
    pub fn close(&mut self, error: Error) {
        debug!(id = ?self.id, "closing buffer: {}", error);
        self.channel = None;
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn channel(&self) -> Result<&dyn Channel> {
        match (&self.channel, &self.error) {
            (Some(channel), None) => Ok(channel.as_ref()),
            (_, Some(error)) => Err(error.clone()),
            (None, None) => Err(Error::NotReady),
        }
    }

    /// Perform one remote call; transport failures close the buffer
    pub(crate) fn invoke(&mut self, op: &str, request: Request) -> Result<Reply> {
        let result = self.channel()?.call(request);
        if let Err(e) = &result {
            error!(id = ?self.id, "{} failed: {}", op, e);
            if e.is_transport() {
                self.close(e.clone());
            }
        }
        result
    }

    /// Send a one-way notification; transport failures close the buffer
    pub(crate) fn impulse(&mut self, op: &str, opcode: Opcode) -> Result<()> {
        let result = self.channel()?.send_impulse(opcode);
        if let Err(e) = &result {
            error!(id = ?self.id, "{} failed: {}", op, e);
            if e.is_transport() {
                self.close(e.clone());
            }
        }
        result
    }

    /// Fetch the slice descriptors and map them all.
    ///
    /// The identity and slice list are replaced only after every slice has
    /// been mapped. On failure they are left untouched and the buffer is
    /// closed with the error.
    pub fn import_buffer(&mut self) -> Result<()> {
        let reply = self.invoke("get buffers", Request::GetBuffers);
        let imported = reply
            .and_then(Reply::into_buffers)
            .and_then(|descriptors| import_slices(&descriptors, self.mapper.as_ref()));

        match imported {
            Ok(imported) => {
                debug!(id = %imported.id, slices = imported.slices.len(), "imported buffer");
                self.id = Some(imported.id);
                self.metadata_size = imported.metadata_size;
                self.slices = imported.slices;
                Ok(())
            }
            Err(e) => {
                error!(id = ?self.id, "failed to import buffer: {}", e);
                self.close(e.clone());
                Err(e)
            }
        }
    }

    /// Wait for the readiness descriptor.
    ///
    /// `None` waits forever and `Some(Duration::ZERO)` does not block.
    pub fn poll(&self, timeout: Option<Duration>) -> Result<Readiness> {
        poll_fd(self.channel()?.event_fd(), timeout)
    }

    /// Lock `rect` of slice `index` for CPU access.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not a valid slice index.
    pub fn lock(&self, usage: Usage, rect: Rect, index: usize) -> Result<SliceGuard<'_>> {
        if self.is_closed() {
            return Err(Error::NotReady);
        }
        assert!(
            index < self.slices.len(),
            "slice index {} out of range ({} slices)",
            index,
            self.slices.len()
        );
        self.slices[index].lock(index, usage, rect)
    }

    /// Lock a whole slice
    pub fn lock_all(&self, usage: Usage, index: usize) -> Result<SliceGuard<'_>> {
        let (width, height) = match self.slices.get(index) {
            Some(slice) => (slice.width(), slice.height()),
            None => (0, 0),
        };
        self.lock(usage, Rect::full(width, height), index)
    }

    /// Address of the first `size` bytes of a blob, for writing.
    ///
    /// The pointer stays valid only until the next lock or unlock of slice 0.
    pub fn blob_read_write_pointer(&self, size: usize) -> Result<NonNull<u8>> {
        self.blob_pointer(Usage::UNCACHED_BLOB, size)
    }

    /// Address of the first `size` bytes of a blob, for reading.
    pub fn blob_read_only_pointer(&self, size: usize) -> Result<NonNull<u8>> {
        self.blob_pointer(Usage::UNCACHED_BLOB_READ, size)
    }

    fn blob_pointer(&self, usage: Usage, size: usize) -> Result<NonNull<u8>> {
        let width = u32::try_from(size)
            .map_err(|_| Error::InvalidArgument(format!("blob size {} too large", size)))?;
        let guard = self.lock(usage, Rect::full(width, 1), 0)?;
        Ok(guard.as_ptr())
    }

    /// Ask the service for a new consumer channel of this buffer
    pub fn create_consumer(&mut self) -> Result<ChannelHandle> {
        self.invoke("create consumer", Request::NewConsumer)?.into_channel()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventFd;
    use crate::slice::ShmMapper;
    use parking_lot::Mutex;
    use std::os::fd::AsFd;
    use tracing_test::traced_test;

    /// Answers every call with the same reply
    struct FixedChannel {
        reply: Mutex<Option<Result<Reply>>>,
        event: EventFd,
    }

    impl FixedChannel {
        fn boxed(reply: Result<Reply>) -> Box<dyn Channel> {
            Box::new(Self {
                reply: Mutex::new(Some(reply)),
                event: EventFd::new().unwrap(),
            })
        }
    }

    impl Channel for FixedChannel {
        fn call(&self, _request: Request) -> Result<Reply> {
            self.reply
                .lock()
                .take()
                .unwrap_or_else(|| Err(Error::Transport("reply already taken".to_string())))
        }

        fn send_impulse(&self, _opcode: Opcode) -> Result<()> {
            Ok(())
        }

        fn event_fd(&self) -> BorrowedFd<'_> {
            self.event.as_fd()
        }
    }

    #[test]
    #[traced_test]
    fn test_empty_import_is_logged() {
        let mut buffer = SharedBuffer::from_channel(FixedChannel::boxed(Ok(Reply::Buffers(Vec::new()))), Arc::new(ShmMapper));
        assert_eq!(buffer.import_buffer(), Err(Error::NoBuffers));
        assert!(buffer.is_closed());
        assert!(buffer.event_fd().is_none());
        assert!(logs_contain("expected to receive at least one buffer handle"));
    }

    #[test]
    fn test_unexpected_reply_is_a_protocol_error() {
        let mut buffer = SharedBuffer::from_channel(FixedChannel::boxed(Ok(Reply::Done)), Arc::new(ShmMapper));
        assert!(matches!(buffer.import_buffer(), Err(Error::Protocol(_))));
        assert!(matches!(buffer.error(), Some(Error::Protocol(_))));
    }

    #[test]
    fn test_close_keeps_first_error() {
        let mut buffer = SharedBuffer::from_channel(FixedChannel::boxed(Ok(Reply::Done)), Arc::new(ShmMapper));
        assert!(!buffer.is_closed());
        buffer.close(Error::PeerGone);
        buffer.close(Error::NotReady);
        assert_eq!(buffer.error(), Some(&Error::PeerGone));
        assert_eq!(buffer.poll(None), Err(Error::PeerGone));
    }
}
