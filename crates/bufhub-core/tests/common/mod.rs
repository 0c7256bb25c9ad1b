//! Test doubles shared by the integration tests

#![allow(dead_code)]

use bufhub_core::event::EventFd;
use bufhub_core::slice_region::SliceRegion;
use bufhub_core::{
    BufferId, Channel, Error, Opcode, PixelFormat, Reply, Request, Result, ShmMapper, Slice, SliceDescriptor,
    SliceMapper, Usage,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::os::fd::{AsFd, BorrowedFd};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Maps like [`ShmMapper`] but fails slice `n` once armed
pub struct FailingMapper {
    fail_index: AtomicI64,
}

impl FailingMapper {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail_index: AtomicI64::new(-1),
        })
    }

    pub fn arm(&self, index: u32) {
        self.fail_index.store(i64::from(index), Ordering::SeqCst);
    }

    pub fn disarm(&self) {
        self.fail_index.store(-1, Ordering::SeqCst);
    }
}

impl SliceMapper for FailingMapper {
    fn map(&self, desc: &SliceDescriptor) -> Result<Slice> {
        if self.fail_index.load(Ordering::SeqCst) == i64::from(desc.index) {
            return Err(Error::SharedMemory(format!("injected failure on slice {}", desc.index)));
        }
        ShmMapper.map(desc)
    }
}

/// Channel answering from a queue and recording what it was asked
pub struct ScriptedChannel {
    replies: Mutex<VecDeque<Result<Reply>>>,
    calls: Arc<Mutex<Vec<Opcode>>>,
    event: EventFd,
}

impl ScriptedChannel {
    pub fn new(replies: Vec<Result<Reply>>) -> (Self, Arc<Mutex<Vec<Opcode>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let channel = Self {
            replies: Mutex::new(replies.into()),
            calls: calls.clone(),
            event: EventFd::new().unwrap(),
        };
        (channel, calls)
    }
}

impl Channel for ScriptedChannel {
    fn call(&self, request: Request) -> Result<Reply> {
        self.calls.lock().push(request.opcode());
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Transport("script exhausted".to_string())))
    }

    fn send_impulse(&self, opcode: Opcode) -> Result<()> {
        self.calls.lock().push(opcode);
        Ok(())
    }

    fn event_fd(&self) -> BorrowedFd<'_> {
        self.event.as_fd()
    }
}

/// A real one-slice blob region plus its descriptor
pub fn blob_region(tag: &str, size: u32, metadata_size: usize) -> (SliceRegion, SliceDescriptor) {
    let desc = SliceDescriptor {
        buffer_id: BufferId(42),
        index: 0,
        os_id: format!("/bufhub_it_{}_{}", tag, std::process::id()),
        width: size,
        height: 1,
        stride: size,
        format: PixelFormat::Blob,
        usage: Usage::UNCACHED_BLOB,
        metadata_size,
    };
    let region = SliceRegion::create(&desc).unwrap();
    (region, desc)
}
