//! Uniform byte-range access, virtual or fully resident.

pub mod cached;
pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{info, warn};

use crate::constants::{DEFAULT_CACHE_BUDGET, DEFAULT_REQUEST_TIMEOUT_MS};
use crate::error::{ProviderError, Result};
use crate::protocol::FileId;
use crate::resource::FileResource;
use crate::worker::Worker;

pub use cached::RangeCachingProvider;
pub use memory::InMemoryProvider;

/// Random access to the bytes of one file.
///
/// Ranges are clamped into `[0, file_size]`; a range starting at or past the
/// end yields an empty buffer rather than an error.
#[async_trait]
pub trait VirtualDataProvider: Send + Sync {
    async fn byte_range(
        &self,
        start: u64,
        end: u64,
    ) -> Result<Bytes>;

    async fn file_size(&self) -> Result<u64>;

    /// True when bytes are fetched on demand rather than held in memory.
    fn is_virtual(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Byte budget shared by all cached ranges of one provider.
    pub cache_budget: u64,
    /// Per-request timeout; `None` waits forever.
    pub request_timeout: Option<Duration>,
    /// Window size to request from the worker instead of its default.
    pub window_size: Option<u64>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            cache_budget: DEFAULT_CACHE_BUDGET,
            request_timeout: Some(Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS)),
            window_size: None,
        }
    }
}

/// Opens `resource` through `worker` when one is given. If there is no worker
/// or it cannot serve the file, the resource is read fully into memory.
pub async fn open_data_source(
    worker: Option<&Worker>,
    file_id: FileId,
    resource: Arc<dyn FileResource>,
    config: &ProviderConfig,
) -> Result<Box<dyn VirtualDataProvider>> {
    if let Some(worker) = worker {
        match open_virtual(worker, file_id.clone(), Arc::clone(&resource), config).await {
            Ok(provider) => return Ok(Box::new(provider)),
            Err(e) => warn!(
                "virtual access to {} unavailable ({}), reading it into memory",
                file_id, e
            ),
        }
    }
    let data = resource
        .read_all()
        .map_err(|e| ProviderError::upstream(&file_id, e))?;
    info!("loaded {} into memory ({} bytes)", file_id, data.len());
    Ok(Box::new(InMemoryProvider::new(data)))
}

async fn open_virtual(
    worker: &Worker,
    file_id: FileId,
    resource: Arc<dyn FileResource>,
    config: &ProviderConfig,
) -> Result<RangeCachingProvider> {
    let client = worker.connect(config.request_timeout).await?;
    RangeCachingProvider::open(client, file_id, resource, config).await
}
