//! Pixel format definitions

/// Supported slice pixel formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PixelFormat {
    Rgba8888 = 1,
    Rgbx8888 = 2,
    Rgb888 = 3,
    Rgb565 = 4,
    Bgra8888 = 5,
    RgbaFp16 = 0x16,
    /// Raw bytes; width is the byte count and height is 1
    Blob = 0x21,
    Y8 = 0x2020_3859,
}

impl PixelFormat {
    /// Size of one pixel in bytes
    pub const fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Blob | PixelFormat::Y8 => 1,
            PixelFormat::Rgb565 => 2,
            PixelFormat::Rgb888 => 3,
            PixelFormat::Rgba8888 | PixelFormat::Rgbx8888 | PixelFormat::Bgra8888 => 4,
            PixelFormat::RgbaFp16 => 8,
        }
    }

    /// Convert from the raw wire value
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(PixelFormat::Rgba8888),
            2 => Some(PixelFormat::Rgbx8888),
            3 => Some(PixelFormat::Rgb888),
            4 => Some(PixelFormat::Rgb565),
            5 => Some(PixelFormat::Bgra8888),
            0x16 => Some(PixelFormat::RgbaFp16),
            0x21 => Some(PixelFormat::Blob),
            0x2020_3859 => Some(PixelFormat::Y8),
            _ => None,
        }
    }
}
