//! Buffer usage flags and lock regions

use bitflags::bitflags;

bitflags! {
    /// How a buffer is allowed to be accessed.
    ///
    /// The CPU read/write bits follow the usual "rarely"/"often" split; the
    /// `OFTEN` values are supersets of the `RARELY` values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Usage: u64 {
        const CPU_READ_RARELY = 0x0000_0002;
        const CPU_READ_OFTEN = 0x0000_0003;
        const CPU_WRITE_RARELY = 0x0000_0020;
        const CPU_WRITE_OFTEN = 0x0000_0030;
        const GPU_TEXTURE = 0x0000_0100;
        const GPU_RENDER_TARGET = 0x0000_0200;
        const COMPOSER_OVERLAY = 0x0000_0800;
        const GPU_DATA_BUFFER = 0x0100_0000;
        const PRIVATE_UNCACHED = 0x2000_0000;
    }
}

const CPU_READ_MASK: u64 = 0x0000_000f;
const CPU_WRITE_MASK: u64 = 0x0000_00f0;

impl Usage {
    /// Usage for small metadata blobs that bypass the CPU cache
    pub const UNCACHED_BLOB: Usage = Usage::CPU_READ_RARELY
        .union(Usage::CPU_WRITE_RARELY)
        .union(Usage::PRIVATE_UNCACHED);

    /// Usage for read-only blob access
    pub const UNCACHED_BLOB_READ: Usage = Usage::CPU_READ_RARELY.union(Usage::PRIVATE_UNCACHED);

    pub fn cpu_read(&self) -> bool {
        self.bits() & CPU_READ_MASK != 0
    }

    pub fn cpu_write(&self) -> bool {
        self.bits() & CPU_WRITE_MASK != 0
    }
}

/// Pixel rectangle within a slice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle covering a whole `width` x `height` surface
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Check that the rectangle is non-empty and lies inside a surface
    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && u64::from(self.x) + u64::from(self.width) <= u64::from(width)
            && u64::from(self.y) + u64::from(self.height) <= u64::from(height)
    }
}
