//! Window-aligned read cache on the worker side.
//!
//! Arbitrary reads are widened to windows that start on a multiple of the
//! configured window size and extend `window_size + overlap` bytes. Each file
//! keeps at most `max_window_count` windows; the least recently accessed go
//! first.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use tracing::{debug, info};

use crate::constants::{DEFAULT_MAX_WINDOW_COUNT, DEFAULT_WINDOW_OVERLAP, DEFAULT_WINDOW_SIZE};
use crate::error::{ProviderError, Result};
use crate::protocol::FileId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowConfig {
    pub window_size: u64,
    pub overlap: u64,
    pub max_window_count: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            overlap: DEFAULT_WINDOW_OVERLAP,
            max_window_count: DEFAULT_MAX_WINDOW_COUNT,
        }
    }
}

type WindowKey = (u64, u64);

struct Window {
    start: u64,
    end: u64,
    data: Bytes,
    last_accessed: u64,
}

impl Window {
    /// Whether the stored bytes reach `wanted_end`. Data read near end of
    /// file stops short of `end`; if the file has since grown the window is
    /// stale.
    fn covers(
        &self,
        wanted_end: u64,
    ) -> bool {
        self.start + self.data.len() as u64 >= wanted_end.min(self.end)
    }
}

#[derive(Default)]
pub struct WindowManager {
    defaults: WindowConfig,
    configs: HashMap<FileId, WindowConfig>,
    windows: HashMap<FileId, HashMap<WindowKey, Window>>,
    clock: u64,
}

impl WindowManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `defaults` for every file that has no explicit window size yet.
    pub fn with_defaults(defaults: WindowConfig) -> Self {
        Self {
            defaults,
            ..Default::default()
        }
    }

    /// Config for `file_id`, created from the defaults on first access.
    pub fn config(
        &mut self,
        file_id: &FileId,
    ) -> &WindowConfig {
        self.configs
            .entry(file_id.clone())
            .or_insert_with(|| self.defaults.clone())
    }

    /// Returns `[start, end)` of `file_id`, served from cached windows where
    /// possible. `read_fn(window_start, window_end)` must return the bytes of
    /// that range clamped to end of file.
    ///
    /// The result is shorter than requested only when the data ends first.
    pub fn get_window<F>(
        &mut self,
        file_id: &FileId,
        start: u64,
        end: u64,
        mut read_fn: F,
    ) -> Result<Bytes>
    where
        F: FnMut(u64, u64) -> Result<Bytes>,
    {
        if start >= end {
            return Ok(Bytes::new());
        }
        let config = self.config(file_id).clone();

        let mut parts = Vec::new();
        let mut pos = start;
        while pos < end {
            let (part, exhausted) = self.window_slice(file_id, &config, pos, end, &mut read_fn)?;
            pos += part.len() as u64;
            if !part.is_empty() {
                parts.push(part);
            }
            if exhausted {
                break;
            }
        }
        Ok(concat(parts))
    }

    fn window_slice<F>(
        &mut self,
        file_id: &FileId,
        config: &WindowConfig,
        pos: u64,
        end: u64,
        read_fn: &mut F,
    ) -> Result<(Bytes, bool)>
    where
        F: FnMut(u64, u64) -> Result<Bytes>,
    {
        let window_start = pos / config.window_size * config.window_size;
        let window_end = window_start
            .saturating_add(config.window_size)
            .saturating_add(config.overlap);
        let wanted_end = end.min(window_end);
        let key = (window_start, window_end);

        self.clock += 1;
        let tick = self.clock;
        let windows = self.windows.entry(file_id.clone()).or_default();

        let cached = match windows.get_mut(&key) {
            Some(window) if window.covers(wanted_end) => {
                window.last_accessed = tick;
                debug!("window hit {}-{} for {}", window_start, window_end, file_id);
                Some(window.data.clone())
            }
            Some(_) => {
                debug!(
                    "window {}-{} for {} is stale, re-reading",
                    window_start, window_end, file_id
                );
                windows.remove(&key);
                None
            }
            None => None,
        };

        let data = match cached {
            Some(data) => data,
            None => {
                debug!("window miss {}-{} for {}", window_start, window_end, file_id);
                let data = read_fn(window_start, window_end)?;
                windows.insert(
                    key,
                    Window {
                        start: window_start,
                        end: window_end,
                        data: data.clone(),
                        last_accessed: tick,
                    },
                );
                evict_if_needed(windows, config.max_window_count, file_id);
                data
            }
        };

        let data_end = window_start + data.len() as u64;
        let slice_end = wanted_end.min(data_end);
        if pos >= slice_end {
            return Ok((Bytes::new(), true));
        }
        let part = data.slice((pos - window_start) as usize..(slice_end - window_start) as usize);
        Ok((part, slice_end < wanted_end))
    }

    /// Changes the window size for `file_id`. Cached windows no longer line
    /// up with the new alignment and are dropped.
    pub fn set_window_size(
        &mut self,
        file_id: &FileId,
        window_size: u64,
    ) -> Result<()> {
        if window_size == 0 {
            return Err(ProviderError::InvalidRequest(
                "window size must be greater than zero".to_string(),
            ));
        }
        let defaults = self.defaults.clone();
        self.configs
            .entry(file_id.clone())
            .or_insert(defaults)
            .window_size = window_size;
        self.windows.remove(file_id);
        info!("window size for {} set to {}", file_id, window_size);
        Ok(())
    }

    pub fn clear_cache(
        &mut self,
        file_id: &FileId,
    ) {
        self.windows.remove(file_id);
        self.configs.remove(file_id);
    }

    pub fn clear_all_caches(&mut self) {
        self.windows.clear();
        self.configs.clear();
    }

    pub fn window_count(
        &self,
        file_id: &FileId,
    ) -> usize {
        self.windows.get(file_id).map_or(0, HashMap::len)
    }

    /// `(start, end)` of every cached window for `file_id`, sorted.
    pub fn cached_windows(
        &self,
        file_id: &FileId,
    ) -> Vec<(u64, u64)> {
        let mut keys: Vec<_> = self
            .windows
            .get(file_id)
            .map(|w| w.keys().copied().collect())
            .unwrap_or_default();
        keys.sort_unstable();
        keys
    }
}

fn evict_if_needed(
    windows: &mut HashMap<WindowKey, Window>,
    max_window_count: usize,
    file_id: &FileId,
) {
    if windows.len() <= max_window_count {
        return;
    }
    let mut by_age: Vec<(u64, WindowKey)> = windows
        .iter()
        .map(|(key, w)| (w.last_accessed, *key))
        .collect();
    by_age.sort_unstable();
    let excess = windows.len() - max_window_count;
    for (_, key) in by_age.into_iter().take(excess) {
        windows.remove(&key);
        debug!("evicted window {}-{} for {}", key.0, key.1, file_id);
    }
}

fn concat(mut parts: Vec<Bytes>) -> Bytes {
    match parts.len() {
        0 => Bytes::new(),
        1 => parts.swap_remove(0),
        _ => {
            let total = parts.iter().map(Bytes::len).sum();
            let mut buf = BytesMut::with_capacity(total);
            for part in &parts {
                buf.extend_from_slice(part);
            }
            buf.freeze()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    fn byte_at(offset: u64) -> u8 {
        (offset % 251) as u8
    }

    /// Reads from a synthetic file of `size` bytes, recording each call.
    fn reader<'a>(
        size: &'a Cell<u64>,
        calls: &'a RefCell<Vec<(u64, u64)>>,
    ) -> impl FnMut(u64, u64) -> Result<Bytes> + 'a {
        move |start, end| {
            calls.borrow_mut().push((start, end));
            let end = end.min(size.get());
            let start = start.min(end);
            Ok((start..end).map(byte_at).collect::<Vec<u8>>().into())
        }
    }

    fn expected(
        start: u64,
        end: u64,
    ) -> Vec<u8> {
        (start..end).map(byte_at).collect()
    }

    #[test]
    fn unaligned_request_reads_from_window_start() {
        let size = Cell::new(1_000_000);
        let calls = RefCell::new(Vec::new());
        let mut mgr = WindowManager::new();
        let id = FileId::from("f");

        let data = mgr
            .get_window(&id, 300_000, 300_100, reader(&size, &calls))
            .unwrap();

        assert_eq!(&data[..], &expected(300_000, 300_100)[..]);
        let calls = calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, 256 * 1024);
        assert_ne!(calls[0].0, 300_000);
        assert_eq!(calls[0].0 % (256 * 1024), 0);
    }

    #[test]
    fn adjacent_small_reads_share_one_window() {
        let size = Cell::new(1_000_000);
        let calls = RefCell::new(Vec::new());
        let mut mgr = WindowManager::new();
        let id = FileId::from("f");
        mgr.set_window_size(&id, 256 * 1024).unwrap();

        let a = mgr.get_window(&id, 0, 10, reader(&size, &calls)).unwrap();
        let b = mgr.get_window(&id, 10, 20, reader(&size, &calls)).unwrap();

        assert_eq!(&a[..], &expected(0, 10)[..]);
        assert_eq!(&b[..], &expected(10, 20)[..]);
        assert_eq!(calls.borrow().len(), 1);
        assert_eq!(mgr.window_count(&id), 1);
    }

    #[test]
    fn evicts_least_recently_accessed_window() {
        let size = Cell::new(100_000);
        let calls = RefCell::new(Vec::new());
        let mut mgr = WindowManager::with_defaults(WindowConfig {
            window_size: 1024,
            overlap: 0,
            max_window_count: 2,
        });
        let id = FileId::from("f");

        mgr.get_window(&id, 0, 10, reader(&size, &calls)).unwrap();
        mgr.get_window(&id, 1024, 1034, reader(&size, &calls)).unwrap();
        // touch the first window so the second becomes the oldest
        mgr.get_window(&id, 5, 15, reader(&size, &calls)).unwrap();
        mgr.get_window(&id, 2048, 2058, reader(&size, &calls)).unwrap();

        assert_eq!(mgr.cached_windows(&id), vec![(0, 1024), (2048, 3072)]);
        assert_eq!(calls.borrow().len(), 3);
    }

    #[test]
    fn set_window_size_realigns_and_clears() {
        let size = Cell::new(100_000);
        let calls = RefCell::new(Vec::new());
        let mut mgr = WindowManager::new();
        let id = FileId::from("f");

        mgr.get_window(&id, 3000, 3010, reader(&size, &calls)).unwrap();
        assert_eq!(mgr.window_count(&id), 1);

        mgr.set_window_size(&id, 1024).unwrap();
        assert_eq!(mgr.window_count(&id), 0);
        assert_eq!(mgr.config(&id).window_size, 1024);

        mgr.get_window(&id, 3000, 3010, reader(&size, &calls)).unwrap();
        assert_eq!(calls.borrow()[1], (2048, 2048 + 1024 + DEFAULT_WINDOW_OVERLAP));
    }

    #[test]
    fn zero_window_size_is_rejected() {
        let mut mgr = WindowManager::new();
        let err = mgr.set_window_size(&FileId::from("f"), 0).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
    }

    #[test]
    fn long_request_spans_consecutive_windows() {
        let size = Cell::new(1_000_000);
        let calls = RefCell::new(Vec::new());
        let mut mgr = WindowManager::new();
        let id = FileId::from("f");

        let data = mgr
            .get_window(&id, 100, 600_000, reader(&size, &calls))
            .unwrap();

        assert_eq!(data.len(), 600_000 - 100);
        assert_eq!(&data[..], &expected(100, 600_000)[..]);
        let starts: Vec<u64> = calls.borrow().iter().map(|c| c.0).collect();
        assert_eq!(starts, vec![0, 256 * 1024, 512 * 1024]);
    }

    #[test]
    fn read_past_end_of_file_is_truncated() {
        let size = Cell::new(1000);
        let calls = RefCell::new(Vec::new());
        let mut mgr = WindowManager::new();
        let id = FileId::from("f");

        let data = mgr.get_window(&id, 900, 2000, reader(&size, &calls)).unwrap();
        assert_eq!(&data[..], &expected(900, 1000)[..]);
        let empty = mgr.get_window(&id, 1000, 2000, reader(&size, &calls)).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn window_is_reread_after_file_grows() {
        let size = Cell::new(100);
        let calls = RefCell::new(Vec::new());
        let mut mgr = WindowManager::new();
        let id = FileId::from("f");

        mgr.get_window(&id, 0, 50, reader(&size, &calls)).unwrap();
        size.set(500);
        let data = mgr.get_window(&id, 0, 400, reader(&size, &calls)).unwrap();

        assert_eq!(&data[..], &expected(0, 400)[..]);
        assert_eq!(calls.borrow().len(), 2);
        assert_eq!(mgr.window_count(&id), 1);
    }

    #[test]
    fn failed_read_caches_nothing() {
        let mut mgr = WindowManager::new();
        let id = FileId::from("f");
        let err = mgr
            .get_window(&id, 0, 10, |_, _| {
                Err(ProviderError::upstream(
                    &FileId::from("f"),
                    std::io::Error::other("gone"),
                ))
            })
            .unwrap_err();
        assert!(matches!(err, ProviderError::UpstreamRead { .. }));
        assert_eq!(mgr.window_count(&id), 0);
    }

    #[test]
    fn huge_window_size_saturates_instead_of_overflowing() {
        let size = Cell::new(10_000);
        let calls = RefCell::new(Vec::new());
        let mut mgr = WindowManager::new();
        let id = FileId::from("f");
        mgr.set_window_size(&id, u64::MAX).unwrap();

        let data = mgr
            .get_window(&id, 5000, 5010, reader(&size, &calls))
            .unwrap();
        assert_eq!(&data[..], &expected(5000, 5010)[..]);
        let data = mgr
            .get_window(&id, 9990, 10_000, reader(&size, &calls))
            .unwrap();
        assert_eq!(&data[..], &expected(9990, 10_000)[..]);

        assert_eq!(&calls.borrow()[..], &[(0, u64::MAX)]);
        assert_eq!(mgr.cached_windows(&id), vec![(0, u64::MAX)]);
    }

    #[test]
    fn clear_cache_drops_windows_and_config() {
        let size = Cell::new(10_000);
        let calls = RefCell::new(Vec::new());
        let mut mgr = WindowManager::new();
        let id = FileId::from("f");
        mgr.set_window_size(&id, 512).unwrap();
        mgr.get_window(&id, 0, 10, reader(&size, &calls)).unwrap();

        mgr.clear_cache(&id);
        assert_eq!(mgr.window_count(&id), 0);
        assert_eq!(mgr.config(&id).window_size, DEFAULT_WINDOW_SIZE);

        mgr.get_window(&id, 0, 10, reader(&size, &calls)).unwrap();
        mgr.clear_all_caches();
        assert_eq!(mgr.window_count(&id), 0);
    }
}
