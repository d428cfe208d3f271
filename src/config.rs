use crate::cli::Cli;
use crate::provider::ProviderConfig;
use anyhow::Result;
use clap::Parser;
use std::time::Duration;

/// Application configuration derived from CLI arguments
#[derive(Debug, Clone)]
pub struct Config {
    pub path: String,
    pub offset: u64,
    pub length: u64,
    pub width: usize,
    pub window_size: Option<u64>,
    pub cache_budget: u64,
    /// `None` disables request timeouts.
    pub request_timeout: Option<Duration>,
    pub in_memory: bool,
    pub size_only: bool,
    pub log_level: String,
}

impl Config {
    /// Parse CLI arguments into a Config
    pub fn from_cli() -> Result<Self> {
        Ok(Self::from(Cli::parse()))
    }

    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            cache_budget: self.cache_budget,
            request_timeout: self.request_timeout,
            window_size: self.window_size,
        }
    }
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        Config {
            path: cli.path,
            offset: cli.offset,
            length: cli.length,
            width: cli.width as usize,
            window_size: cli.window_size,
            cache_budget: cli.cache_budget,
            request_timeout: (cli.timeout_ms > 0).then(|| Duration::from_millis(cli.timeout_ms)),
            in_memory: cli.in_memory,
            size_only: cli.size_only,
            log_level: cli.log_level,
        }
    }
}
