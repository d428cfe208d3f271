// Centralized magic numbers & default values
pub const DEFAULT_WINDOW_SIZE: u64 = 256 * 1024;
pub const DEFAULT_WINDOW_OVERLAP: u64 = 4 * 1024;
pub const DEFAULT_MAX_WINDOW_COUNT: usize = 10;
pub const DEFAULT_CACHE_BUDGET: u64 = 10 * 1024 * 1024;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_DUMP_LENGTH: u64 = 256;
pub const DEFAULT_DUMP_WIDTH: u64 = 16;
pub const WORKER_THREAD_NAME: &str = "hexpeek-worker";
