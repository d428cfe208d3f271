use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};

use crate::error::{ProviderError, Result};
use crate::protocol::FileId;
use crate::range;
use crate::resource::FileResource;

/// Open file resources on the worker, keyed by [`FileId`].
#[derive(Default)]
pub struct FileHandleManager {
    sessions: HashMap<FileId, Arc<dyn FileResource>>,
}

impl FileHandleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `handle` under `file_id`, replacing any previous session.
    /// Returns the size observed at open time.
    pub fn open_file(
        &mut self,
        file_id: FileId,
        handle: Arc<dyn FileResource>,
    ) -> Result<u64> {
        let size = handle
            .size()
            .map_err(|e| ProviderError::upstream(&file_id, e))?;
        info!("opened {} ({} bytes)", file_id, size);
        if self
            .sessions
            .insert(file_id.clone(), handle)
            .is_some()
        {
            debug!("replaced existing session for {}", file_id);
        }
        Ok(size)
    }

    pub fn has_file(
        &self,
        file_id: &FileId,
    ) -> bool {
        self.sessions.contains_key(file_id)
    }

    /// Queries the live resource; the size may differ from the last call.
    pub fn file_size(
        &self,
        file_id: &FileId,
    ) -> Result<u64> {
        self.handle(file_id)?
            .size()
            .map_err(|e| ProviderError::upstream(file_id, e))
    }

    /// Reads `[start, end)` clamped into the current file size.
    pub fn read_byte_range(
        &self,
        file_id: &FileId,
        start: u64,
        end: u64,
    ) -> Result<Bytes> {
        let size = self.file_size(file_id)?;
        let range = range::clamp(start, end, size);
        if range.is_empty() {
            return Ok(Bytes::new());
        }
        let data = self
            .handle(file_id)?
            .read_at(range.start, range.end)
            .map_err(|e| ProviderError::upstream(file_id, e))?;
        if data.len() != range::len(&range) {
            return Err(ProviderError::upstream(
                file_id,
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "resource returned {} bytes for {}..{}",
                        data.len(),
                        range.start,
                        range.end
                    ),
                ),
            ));
        }
        Ok(data)
    }

    /// Drops the session. Closing an unknown id is not an error.
    pub fn close_file(
        &mut self,
        file_id: &FileId,
    ) -> bool {
        let closed = self.sessions.remove(file_id).is_some();
        if closed {
            info!("closed {}", file_id);
        }
        closed
    }

    pub fn close_all(&mut self) {
        self.sessions.clear();
    }

    fn handle(
        &self,
        file_id: &FileId,
    ) -> Result<&Arc<dyn FileResource>> {
        self.sessions
            .get(file_id)
            .ok_or_else(|| ProviderError::NotOpen(file_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::resource::MemoryResource;

    fn manager_with(
        id: &str,
        data: Vec<u8>,
    ) -> (FileHandleManager, Arc<MemoryResource>) {
        let res = Arc::new(MemoryResource::new(data));
        let mut mgr = FileHandleManager::new();
        mgr.open_file(FileId::from(id), res.clone()).unwrap();
        (mgr, res)
    }

    #[test]
    fn reads_are_clamped_to_size() {
        let data: Vec<u8> = (0..100u8).collect();
        let (mgr, _) = manager_with("f", data.clone());
        let id = FileId::from("f");

        assert_eq!(&mgr.read_byte_range(&id, 10, 20).unwrap()[..], &data[10..20]);
        assert_eq!(&mgr.read_byte_range(&id, 90, 500).unwrap()[..], &data[90..]);
        assert!(mgr.read_byte_range(&id, 100, 200).unwrap().is_empty());
        assert!(mgr.read_byte_range(&id, 50, 10).unwrap().is_empty());
    }

    #[test]
    fn size_is_requeried_each_call() {
        let (mgr, res) = manager_with("f", vec![0; 10]);
        let id = FileId::from("f");
        assert_eq!(mgr.file_size(&id).unwrap(), 10);
        res.replace(vec![0; 25]);
        assert_eq!(mgr.file_size(&id).unwrap(), 25);
        assert_eq!(mgr.read_byte_range(&id, 0, 100).unwrap().len(), 25);
    }

    #[test]
    fn reopen_replaces_session() {
        let (mut mgr, _) = manager_with("f", vec![1; 10]);
        let id = FileId::from("f");
        mgr.open_file(id.clone(), Arc::new(MemoryResource::new(vec![2; 4])))
            .unwrap();
        assert_eq!(&mgr.read_byte_range(&id, 0, 10).unwrap()[..], &[2, 2, 2, 2]);
    }

    #[test]
    fn unknown_or_closed_file_is_not_open() {
        let (mut mgr, _) = manager_with("f", vec![0; 10]);
        let id = FileId::from("f");
        assert!(mgr.close_file(&id));
        assert!(!mgr.close_file(&id));
        assert!(!mgr.has_file(&id));

        let err = mgr.read_byte_range(&id, 0, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotOpen);
        let err = mgr.file_size(&FileId::from("other")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotOpen);
    }

    #[test]
    fn rejected_read_is_upstream_error() {
        let (mgr, res) = manager_with("f", vec![0; 10]);
        res.set_failing(true);
        let err = mgr.read_byte_range(&FileId::from("f"), 0, 5).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamRead);
    }
}
