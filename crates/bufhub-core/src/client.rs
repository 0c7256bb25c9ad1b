//! Entry point bundling how to reach the service and how to map slices

use crate::config::ClientConfig;
use crate::protocol::{Channel, Connector};
use crate::slice::{ShmMapper, SliceMapper};
use crate::Result;
use std::sync::Arc;

/// Everything a producer needs to allocate or attach to a buffer
#[derive(Clone)]
pub struct BufferHubClient {
    connector: Arc<dyn Connector>,
    mapper: Arc<dyn SliceMapper>,
    config: ClientConfig,
}

impl BufferHubClient {
    /// Client using shared memory mapping and the default endpoint
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            mapper: Arc::new(ShmMapper),
            config: ClientConfig::default(),
        }
    }

    pub fn with_mapper(mut self, mapper: Arc<dyn SliceMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn mapper(&self) -> &Arc<dyn SliceMapper> {
        &self.mapper
    }

    /// Open a fresh channel to the configured endpoint
    pub fn connect(&self) -> Result<Box<dyn Channel>> {
        self.connector.connect(&self.config.endpoint_path)
    }
}
