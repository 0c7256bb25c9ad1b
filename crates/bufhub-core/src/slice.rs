//! Slice descriptors and locally mapped slices

use crate::format::PixelFormat;
use crate::guard::SliceGuard;
use crate::slice_region::SliceRegion;
use crate::usage::{Rect, Usage};
use crate::{Error, Result};
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};

/// Identity the buffer service assigns to a logical buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remote description of one slice, as handed out by `GetBuffers`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceDescriptor {
    pub buffer_id: BufferId,
    pub index: u32,
    /// OS name of the backing shared memory object
    pub os_id: String,
    pub width: u32,
    pub height: u32,
    /// Row pitch in bytes
    pub stride: u32,
    pub format: PixelFormat,
    pub usage: Usage,
    /// Metadata size configured for the owning buffer
    pub metadata_size: usize,
}

impl SliceDescriptor {
    /// Size of the pixel data in bytes
    pub fn data_size(&self) -> usize {
        self.stride as usize * self.height as usize
    }
}

/// Maps remote slice descriptors into this process
pub trait SliceMapper: Send + Sync {
    fn map(&self, desc: &SliceDescriptor) -> Result<Slice>;
}

/// Mapper for slices backed by POSIX shared memory
#[derive(Debug, Default, Clone, Copy)]
pub struct ShmMapper;

impl SliceMapper for ShmMapper {
    fn map(&self, desc: &SliceDescriptor) -> Result<Slice> {
        let region = SliceRegion::open(desc)?;
        Ok(Slice::new(region, desc))
    }
}

/// One locally mapped slice
pub struct Slice {
    region: SliceRegion,
    width: u32,
    height: u32,
    stride: u32,
    format: PixelFormat,
    usage: Usage,
    locked: AtomicBool,
}

impl Slice {
    pub fn new(region: SliceRegion, desc: &SliceDescriptor) -> Self {
        Self {
            region,
            width: desc.width,
            height: desc.height,
            stride: desc.stride,
            format: desc.format,
            usage: desc.usage,
            locked: AtomicBool::new(false),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn os_id(&self) -> &str {
        self.region.os_id()
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Lock `rect` for CPU access with the given intent.
    ///
    /// `index` is only used for error reporting.
    pub(crate) fn lock(&self, index: usize, usage: Usage, rect: Rect) -> Result<SliceGuard<'_>> {
        if !rect.fits(self.width, self.height) {
            return Err(Error::InvalidArgument(format!(
                "lock rect {:?} outside {}x{} slice",
                rect, self.width, self.height
            )));
        }
        if !usage.cpu_read() && !usage.cpu_write() {
            return Err(Error::InvalidArgument("lock usage has no CPU access bits".to_string()));
        }
        if (usage.cpu_read() && !self.usage.cpu_read()) || (usage.cpu_write() && !self.usage.cpu_write()) {
            return Err(Error::InvalidArgument(format!(
                "lock usage {:?} not allowed by slice usage {:?}",
                usage, self.usage
            )));
        }
        if self
            .locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::AlreadyLocked(index));
        }

        let bpp = self.format.bytes_per_pixel();
        let stride = self.stride as usize;
        let offset = rect.y as usize * stride + rect.x as usize * bpp;
        let len = (rect.height as usize - 1) * stride + rect.width as usize * bpp;
        debug_assert!(offset + len <= self.region.data_size());

        // In bounds of a non-null mapping.
        let ptr = unsafe { NonNull::new_unchecked(self.region.data_ptr().as_ptr().add(offset)) };
        Ok(SliceGuard::new(ptr, len, usage.cpu_write(), &self.locked))
    }
}
