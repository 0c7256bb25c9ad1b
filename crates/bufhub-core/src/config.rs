//! Client and hub configuration

use crate::protocol::CLIENT_PATH;

/// Default maximum number of live buffers in a hub
pub const DEFAULT_MAX_BUFFERS: usize = 1024;

/// Default largest metadata blob a buffer may carry
pub const DEFAULT_MAX_METADATA_SIZE: usize = 64 * 1024;

/// Default largest number of slices in one buffer
pub const DEFAULT_MAX_SLICE_COUNT: usize = 16;

/// Default prefix of slice shared memory names
pub const DEFAULT_SHM_PREFIX: &str = "bufhub";

/// Client-side settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Endpoint producers connect to when allocating or attaching
    pub endpoint_path: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint_path: CLIENT_PATH.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn with_endpoint_path(mut self, path: &str) -> Self {
        self.endpoint_path = path.to_string();
        self
    }
}

/// Settings of an in-process hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Endpoint the hub answers on
    pub endpoint_path: String,
    /// Prefix of every slice shared memory name
    pub shm_prefix: String,
    /// Maximum number of live buffers
    pub max_buffers: usize,
    pub max_metadata_size: usize,
    pub max_slice_count: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            endpoint_path: CLIENT_PATH.to_string(),
            shm_prefix: DEFAULT_SHM_PREFIX.to_string(),
            max_buffers: DEFAULT_MAX_BUFFERS,
            max_metadata_size: DEFAULT_MAX_METADATA_SIZE,
            max_slice_count: DEFAULT_MAX_SLICE_COUNT,
        }
    }
}

impl HubConfig {
    pub fn with_endpoint_path(mut self, path: &str) -> Self {
        self.endpoint_path = path.to_string();
        self
    }

    pub fn with_shm_prefix(mut self, prefix: &str) -> Self {
        self.shm_prefix = prefix.to_string();
        self
    }

    pub fn with_max_buffers(mut self, max_buffers: usize) -> Self {
        self.max_buffers = max_buffers;
        self
    }

    pub fn with_max_metadata_size(mut self, max_metadata_size: usize) -> Self {
        self.max_metadata_size = max_metadata_size;
        self
    }

    pub fn with_max_slice_count(mut self, max_slice_count: usize) -> Self {
        self.max_slice_count = max_slice_count;
        self
    }
}
