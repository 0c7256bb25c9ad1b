//! RAII slice lock guard

use crate::{Error, Result};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};

/// Scoped CPU access to a locked slice region.
///
/// The slice is unlocked when the guard is dropped. The guard only guards
/// local reentrancy; it is not a cross-process mutex.
pub struct SliceGuard<'a> {
    /// First byte of the locked rectangle
    ptr: NonNull<u8>,
    /// Bytes from the first to the last pixel of the rectangle
    len: usize,
    writable: bool,
    /// Lock flag of the owning slice
    locked: &'a AtomicBool,
}

impl<'a> SliceGuard<'a> {
    pub(crate) fn new(ptr: NonNull<u8>, len: usize, writable: bool, locked: &'a AtomicBool) -> Self {
        Self {
            ptr,
            len,
            writable,
            locked,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Raw address of the locked rectangle
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Locked bytes (read-only)
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Locked bytes (mutable, requires a write usage)
    pub fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        if !self.writable {
            return Err(Error::ReadOnly);
        }
        Ok(unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) })
    }

    /// Unlock explicitly
    pub fn unlock(self) {}
}

impl Drop for SliceGuard<'_> {
    fn drop(&mut self) {
        self.locked.store(false, Ordering::Release);
    }
}
