use clap::Parser;

use crate::constants::{
    DEFAULT_CACHE_BUDGET, DEFAULT_DUMP_LENGTH, DEFAULT_DUMP_WIDTH, DEFAULT_REQUEST_TIMEOUT_MS,
};

#[derive(Parser, Debug)]
#[command(name = "hexpeek")]
#[command(
    about = "Inspect a byte range of a file of any size as a hex dump, reading it through a \
             cached background worker instead of loading it whole."
)]
pub struct Cli {
    /// File to inspect.
    pub path: String,

    /// Offset of the first byte to show.
    #[arg(short = 'o', long = "offset", default_value_t = 0)]
    pub offset: u64,

    /// Number of bytes to show.
    #[arg(short = 'l', long = "length", default_value_t = DEFAULT_DUMP_LENGTH)]
    pub length: u64,

    /// Bytes per dump row.
    #[arg(
        short = 'w',
        long = "width",
        default_value_t = DEFAULT_DUMP_WIDTH,
        value_parser = clap::value_parser!(u64).range(1..=64)
    )]
    pub width: u64,

    /// Worker window size in bytes (defaults to the worker's 256 KiB).
    #[arg(long = "window-size", value_parser = clap::value_parser!(u64).range(1..))]
    pub window_size: Option<u64>,

    /// Byte budget of the host-side range cache.
    #[arg(long = "cache-budget", default_value_t = DEFAULT_CACHE_BUDGET)]
    pub cache_budget: u64,

    /// Per-request timeout in milliseconds; 0 waits forever.
    #[arg(long = "timeout-ms", default_value_t = DEFAULT_REQUEST_TIMEOUT_MS)]
    pub timeout_ms: u64,

    /// Read the whole file into memory instead of using the worker.
    #[arg(short = 'm', long = "in-memory")]
    pub in_memory: bool,

    /// Print only the file size.
    #[arg(short = 's', long = "size-only", conflicts_with_all = ["offset", "length"])]
    pub size_only: bool,

    /// Log level used when RUST_LOG is not set.
    #[arg(long = "log-level", default_value = "warn")]
    pub log_level: String,
}
