//! POSIX shared memory wrapper

use crate::{Error, Result};
use shared_memory::{Shmem, ShmemConf};

/// Shared memory region wrapper
///
/// The creating side owns the OS object and unlinks it on drop; mappings
/// opened elsewhere stay valid until they are dropped themselves.
pub struct SharedMemory {
    inner: Shmem,
    name: String,
    size: usize,
}

// Safety: the mapping is process-wide and never aliased mutably through
// this wrapper; concurrent access to the bytes is governed by fences.
unsafe impl Send for SharedMemory {}

impl SharedMemory {
    /// Create a new shared memory region
    pub fn create(name: &str, size: usize) -> Result<Self> {
        let shmem = ShmemConf::new()
            .size(size)
            .os_id(name)
            .create()
            .map_err(|e| Error::SharedMemory(format!("create {}: {}", name, e)))?;

        Ok(Self {
            inner: shmem,
            name: name.to_string(),
            size,
        })
    }

    /// Open an existing shared memory region
    pub fn open(name: &str) -> Result<Self> {
        let shmem = ShmemConf::new()
            .os_id(name)
            .open()
            .map_err(|e| Error::SharedMemory(format!("open {}: {}", name, e)))?;

        let size = shmem.len();

        Ok(Self {
            inner: shmem,
            name: name.to_string(),
            size,
        })
    }

    /// Get the OS name of the shared memory region
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the size of the shared memory region
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether dropping this mapping removes the OS object
    pub fn is_owner(&self) -> bool {
        self.inner.is_owner()
    }

    /// Get a raw pointer to the shared memory
    pub fn as_ptr(&self) -> *const u8 {
        self.inner.as_ptr()
    }

    /// Get a mutable raw pointer to the shared memory
    ///
    /// Takes `&self` because the bytes are shared with other processes anyway;
    /// callers serialize access through slice locks and fences.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.inner.as_ptr()
    }
}
