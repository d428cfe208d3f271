pub mod cli;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod output;
pub mod protocol;
pub mod provider;
pub mod range;
pub mod resource;
pub mod worker;

pub use client::WorkerClient;
pub use error::{ErrorKind, ProviderError, Result};
pub use protocol::FileId;
pub use provider::{
    InMemoryProvider, ProviderConfig, RangeCachingProvider, VirtualDataProvider, open_data_source,
};
pub use resource::{FileResource, LocalFile, MemoryResource};
pub use worker::Worker;
