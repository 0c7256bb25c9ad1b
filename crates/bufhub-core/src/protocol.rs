//! Buffer service protocol and the channel seam
//!
//! A [`Channel`] carries one client's requests to the buffer service. Each
//! [`Request`] is one atomic call whose result is authoritative; the client
//! keeps no state machine of its own.

use crate::fence::Fence;
use crate::format::PixelFormat;
use crate::slice::SliceDescriptor;
use crate::usage::Usage;
use crate::{Error, Result};
use std::fmt;
use std::os::fd::BorrowedFd;

/// Well-known endpoint of the buffer service
pub const CLIENT_PATH: &str = "system/buffer_hub/client";

/// Method identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    CreateBuffer = 1,
    CreatePersistentBuffer = 2,
    GetPersistentBuffer = 3,
    GetBuffers = 4,
    NewConsumer = 5,
    ProducerMakePersistent = 6,
    ProducerRemovePersistence = 7,
    ProducerPost = 8,
    ProducerGain = 9,
    ConsumerAcquire = 10,
    ConsumerRelease = 11,
    ConsumerSetIgnore = 12,
}

/// Allocation parameters of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferParams {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub usage: Usage,
    pub metadata_size: usize,
    pub slice_count: usize,
}

impl BufferParams {
    pub fn new(width: u32, height: u32, format: PixelFormat, usage: Usage) -> Self {
        Self {
            width,
            height,
            format,
            usage,
            metadata_size: 0,
            slice_count: 1,
        }
    }

    /// A `size` x 1 byte array with no metadata
    pub fn blob(usage: Usage, size: usize) -> Result<Self> {
        let width = u32::try_from(size)
            .map_err(|_| Error::InvalidArgument(format!("blob size {} too large", size)))?;
        Ok(Self::new(width, 1, PixelFormat::Blob, usage))
    }

    pub fn with_metadata_size(mut self, metadata_size: usize) -> Self {
        self.metadata_size = metadata_size;
        self
    }

    pub fn with_slice_count(mut self, slice_count: usize) -> Self {
        self.slice_count = slice_count;
        self
    }

    /// Row pitch in bytes of every slice
    pub fn stride(&self) -> u32 {
        self.width.saturating_mul(self.format.bytes_per_pixel() as u32)
    }
}

/// Owner of a persistent buffer name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentName {
    pub name: String,
    pub user: u32,
    pub group: u32,
}

impl PersistentName {
    pub fn new(name: &str, user: u32, group: u32) -> Self {
        Self {
            name: name.to_string(),
            user,
            group,
        }
    }
}

/// One remote call with its arguments
#[derive(Debug)]
pub enum Request {
    CreateBuffer(BufferParams),
    CreatePersistentBuffer(PersistentName, BufferParams),
    GetPersistentBuffer(String),
    GetBuffers,
    NewConsumer,
    ProducerMakePersistent(PersistentName),
    ProducerRemovePersistence,
    ProducerPost { fence: Fence, metadata: Vec<u8> },
    ProducerGain,
    ConsumerAcquire { metadata_size: usize },
    ConsumerRelease { fence: Fence },
    ConsumerSetIgnore(bool),
}

impl Request {
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::CreateBuffer(_) => Opcode::CreateBuffer,
            Request::CreatePersistentBuffer(..) => Opcode::CreatePersistentBuffer,
            Request::GetPersistentBuffer(_) => Opcode::GetPersistentBuffer,
            Request::GetBuffers => Opcode::GetBuffers,
            Request::NewConsumer => Opcode::NewConsumer,
            Request::ProducerMakePersistent(_) => Opcode::ProducerMakePersistent,
            Request::ProducerRemovePersistence => Opcode::ProducerRemovePersistence,
            Request::ProducerPost { .. } => Opcode::ProducerPost,
            Request::ProducerGain => Opcode::ProducerGain,
            Request::ConsumerAcquire { .. } => Opcode::ConsumerAcquire,
            Request::ConsumerRelease { .. } => Opcode::ConsumerRelease,
            Request::ConsumerSetIgnore(_) => Opcode::ConsumerSetIgnore,
        }
    }
}

/// Successful result of a remote call
#[derive(Debug)]
pub enum Reply {
    Done,
    Buffers(Vec<SliceDescriptor>),
    Channel(ChannelHandle),
    Acquired { fence: Fence, metadata: Vec<u8> },
    Fence(Fence),
}

impl Reply {
    pub fn into_done(self) -> Result<()> {
        match self {
            Reply::Done => Ok(()),
            other => Err(unexpected("done", &other)),
        }
    }

    pub fn into_buffers(self) -> Result<Vec<SliceDescriptor>> {
        match self {
            Reply::Buffers(buffers) => Ok(buffers),
            other => Err(unexpected("buffers", &other)),
        }
    }

    pub fn into_channel(self) -> Result<ChannelHandle> {
        match self {
            Reply::Channel(handle) => Ok(handle),
            other => Err(unexpected("channel", &other)),
        }
    }

    pub fn into_acquired(self) -> Result<(Fence, Vec<u8>)> {
        match self {
            Reply::Acquired { fence, metadata } => Ok((fence, metadata)),
            other => Err(unexpected("acquired", &other)),
        }
    }

    pub fn into_fence(self) -> Result<Fence> {
        match self {
            Reply::Fence(fence) => Ok(fence),
            other => Err(unexpected("fence", &other)),
        }
    }
}

fn unexpected(expected: &str, got: &Reply) -> Error {
    let got = match got {
        Reply::Done => "done",
        Reply::Buffers(_) => "buffers",
        Reply::Channel(_) => "channel",
        Reply::Acquired { .. } => "acquired",
        Reply::Fence(_) => "fence",
    };
    Error::Protocol(format!("expected {} reply, got {}", expected, got))
}

/// Connection to the buffer service
pub trait Channel: Send {
    /// Synchronous request/response round trip
    fn call(&self, request: Request) -> Result<Reply>;

    /// One-way notification; returns once sent, without waiting for a reply
    fn send_impulse(&self, opcode: Opcode) -> Result<()>;

    /// Descriptor the service signals when this client can act
    fn event_fd(&self) -> BorrowedFd<'_>;
}

/// Opens channels to a named endpoint
pub trait Connector: Send + Sync {
    fn connect(&self, path: &str) -> Result<Box<dyn Channel>>;
}

/// A live channel handed off between components
pub struct ChannelHandle {
    channel: Box<dyn Channel>,
}

impl ChannelHandle {
    pub fn new(channel: Box<dyn Channel>) -> Self {
        Self { channel }
    }

    pub fn into_channel(self) -> Box<dyn Channel> {
        self.channel
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle").finish_non_exhaustive()
    }
}
