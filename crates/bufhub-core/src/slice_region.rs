//! Self-describing shared memory region backing one slice

use crate::format::PixelFormat;
use crate::shm::SharedMemory;
use crate::slice::SliceDescriptor;
use crate::usage::Usage;
use crate::{Error, Result};
use std::ptr::NonNull;

/// Header at the start of every slice region
#[repr(C)]
#[derive(Clone, Copy)]
struct SliceHeader {
    /// Magic number for validation
    magic: u32,
    /// Version number
    version: u32,
    buffer_id: u32,
    slice_index: u32,
    width: u32,
    height: u32,
    /// Row pitch in bytes
    stride: u32,
    format: u32,
    usage: u64,
}

const MAGIC: u32 = 0x4248_5542; // "BUHB"
const VERSION: u32 = 1;

/// Offset of the pixel data from the start of the region
pub const DATA_OFFSET: usize = 64;

const _: () = assert!(std::mem::size_of::<SliceHeader>() <= DATA_OFFSET);

/// A mapped slice region with a validated header
pub struct SliceRegion {
    shm: SharedMemory,
    /// First pixel byte, `DATA_OFFSET` into the mapping
    data: NonNull<u8>,
    data_size: usize,
}

// Safety: `data` points into `shm`, which is Send and outlives it.
unsafe impl Send for SliceRegion {}

impl SliceRegion {
    fn data_start(shm: &SharedMemory) -> Result<NonNull<u8>> {
        let base = NonNull::new(shm.as_mut_ptr())
            .ok_or_else(|| Error::SharedMemory(format!("region {} is not mapped", shm.name())))?;
        // The mapping is at least DATA_OFFSET bytes long.
        Ok(unsafe { NonNull::new_unchecked(base.as_ptr().add(DATA_OFFSET)) })
    }

    /// Calculate required size for the given geometry
    fn calc_size(stride: u32, height: u32) -> usize {
        DATA_OFFSET + stride as usize * height as usize
    }

    /// Create and stamp a new region described by `desc`
    pub fn create(desc: &SliceDescriptor) -> Result<Self> {
        let data_size = desc.data_size();
        let shm = SharedMemory::create(&desc.os_id, Self::calc_size(desc.stride, desc.height))?;

        let header = SliceHeader {
            magic: MAGIC,
            version: VERSION,
            buffer_id: desc.buffer_id.0,
            slice_index: desc.index,
            width: desc.width,
            height: desc.height,
            stride: desc.stride,
            format: desc.format as u32,
            usage: desc.usage.bits(),
        };
        let data = Self::data_start(&shm)?;
        unsafe { std::ptr::write_unaligned(shm.as_mut_ptr() as *mut SliceHeader, header) };

        Ok(Self { shm, data, data_size })
    }

    /// Open an existing region and check it matches `desc`
    pub fn open(desc: &SliceDescriptor) -> Result<Self> {
        let shm = SharedMemory::open(&desc.os_id)?;
        if shm.size() < Self::calc_size(desc.stride, desc.height) {
            return Err(Error::SharedMemory(format!(
                "region {} is {} bytes, too small for {}x{} stride {}",
                desc.os_id,
                shm.size(),
                desc.width,
                desc.height,
                desc.stride
            )));
        }

        let data = Self::data_start(&shm)?;
        let header = unsafe { std::ptr::read_unaligned(shm.as_ptr() as *const SliceHeader) };
        if header.magic != MAGIC {
            return Err(Error::SharedMemory("invalid magic number".to_string()));
        }
        if header.version != VERSION {
            return Err(Error::SharedMemory(format!(
                "version mismatch: expected {}, got {}",
                VERSION, header.version
            )));
        }
        if header.buffer_id != desc.buffer_id.0 || header.slice_index != desc.index {
            return Err(Error::SharedMemory(format!(
                "region {} belongs to buffer {} slice {}",
                desc.os_id, header.buffer_id, header.slice_index
            )));
        }
        if header.width != desc.width
            || header.height != desc.height
            || header.stride != desc.stride
            || PixelFormat::from_u32(header.format) != Some(desc.format)
            || Usage::from_bits_retain(header.usage) != desc.usage
        {
            return Err(Error::SharedMemory(format!(
                "region {} geometry does not match its descriptor",
                desc.os_id
            )));
        }

        Ok(Self {
            shm,
            data,
            data_size: desc.data_size(),
        })
    }

    /// Size of the pixel data in bytes
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// Pointer to the first pixel byte
    pub fn data_ptr(&self) -> NonNull<u8> {
        self.data
    }

    pub fn os_id(&self) -> &str {
        self.shm.name()
    }
}
