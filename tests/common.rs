#![allow(dead_code)]
use assert_fs::TempDir;
use assert_fs::prelude::*;
use hexpeek::{FileId, MemoryResource, ProviderConfig, RangeCachingProvider, Worker};
use std::path::PathBuf;
use std::sync::Arc;

/// Deterministic file contents: byte `i` is `i % 251`.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Builds a fixture tree:
/// root/
///   data.bin  (`len` pattern bytes)
pub fn fixture_file(len: usize) -> (TempDir, PathBuf) {
    let td = TempDir::new().unwrap();
    let file = td.child("data.bin");
    file.write_binary(&pattern(len)).unwrap();
    let path = file.path().to_path_buf();
    (td, path)
}

pub struct Harness {
    pub worker: Worker,
    pub resource: Arc<MemoryResource>,
    pub provider: RangeCachingProvider,
}

/// Spawns a worker and opens `data` on it through a fresh provider.
pub async fn open_memory(
    data: Vec<u8>,
    config: ProviderConfig,
) -> Harness {
    let worker = Worker::spawn().unwrap();
    let resource = Arc::new(MemoryResource::new(data));
    let client = worker.connect(config.request_timeout).await.unwrap();
    let provider = RangeCachingProvider::open(client, FileId::from("mem"), resource.clone(), &config)
        .await
        .unwrap();
    Harness {
        worker,
        resource,
        provider,
    }
}
