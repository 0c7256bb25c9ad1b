//! bufhub - Fence-gated producer/consumer sharing of cross-process buffers
//!
//! A [`Producer`] allocates or attaches to a buffer through a [`Channel`] to
//! the buffer service, writes it, and posts it. Each [`Consumer`] acquires
//! the post, reads, and releases. The service decides every ownership
//! transition; [`Fence`]s let ownership move before the hardware work behind
//! it has finished.

pub mod buffer;
pub mod client;
pub mod config;
pub mod consumer;
pub mod error;
pub mod event;
pub mod fence;
pub mod format;
pub mod guard;
pub mod hub;
pub mod import;
pub mod producer;
pub mod protocol;
pub mod shm;
pub mod slice;
pub mod slice_region;
pub mod usage;

pub use buffer::SharedBuffer;
pub use client::BufferHubClient;
pub use config::{ClientConfig, HubConfig};
pub use consumer::Consumer;
pub use error::{Error, Result};
pub use event::Readiness;
pub use fence::{BorrowedFence, Fence, FenceSignal};
pub use format::PixelFormat;
pub use guard::SliceGuard;
pub use hub::Hub;
pub use producer::Producer;
pub use protocol::{BufferParams, Channel, ChannelHandle, Connector, Opcode, Reply, Request, CLIENT_PATH};
pub use slice::{BufferId, ShmMapper, Slice, SliceDescriptor, SliceMapper};
pub use usage::{Rect, Usage};
