//! Atomic multi-slice import

use crate::slice::{BufferId, Slice, SliceDescriptor, SliceMapper};
use crate::{Error, Result};
use tracing::{error, trace};

/// A fully mapped buffer, ready to be installed in one swap
pub struct ImportedBuffer {
    pub id: BufferId,
    pub metadata_size: usize,
    pub slices: Vec<Slice>,
}

/// Map every descriptor of a batch, or none of them.
///
/// Slices mapped before a failure are dropped before returning, so the
/// caller never sees a partial batch.
pub fn import_slices(descriptors: &[SliceDescriptor], mapper: &dyn SliceMapper) -> Result<ImportedBuffer> {
    let first = descriptors.first().ok_or_else(|| {
        error!("expected to receive at least one buffer handle but got zero");
        Error::NoBuffers
    })?;

    let mut slices = Vec::with_capacity(descriptors.len());
    for (i, desc) in descriptors.iter().enumerate() {
        trace!(i, id = %desc.buffer_id, os_id = %desc.os_id, "importing slice");
        if desc.buffer_id != first.buffer_id {
            return Err(Error::ImportFailed {
                index: i,
                reason: format!("slice belongs to buffer {}, expected {}", desc.buffer_id, first.buffer_id),
            });
        }
        let slice = mapper.map(desc).map_err(|e| Error::ImportFailed {
            index: i,
            reason: e.to_string(),
        })?;
        slices.push(slice);
    }

    Ok(ImportedBuffer {
        id: first.buffer_id,
        metadata_size: first.metadata_size,
        slices,
    })
}
