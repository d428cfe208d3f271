use std::sync::Arc;

use anyhow::{Context, Result};
use hexpeek::config::Config;
use hexpeek::{FileId, LocalFile, Worker, logging, open_data_source, output};
use path_slash::PathExt;
use tracing::warn;

fn main() -> Result<()> {
    let config = Config::from_cli()?;
    logging::init(&config.log_level);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    let path = dunce::canonicalize(&config.path)
        .with_context(|| format!("cannot access {}", config.path))?;
    let resource =
        LocalFile::open(&path).with_context(|| format!("cannot open {}", path.display()))?;

    // The worker is optional: without it the file is read into memory.
    let worker = if config.in_memory {
        None
    } else {
        match Worker::spawn() {
            Ok(worker) => Some(worker),
            Err(e) => {
                warn!("{e}");
                None
            }
        }
    };

    let file_id = FileId::new(resource.path().to_slash_lossy());
    let provider = open_data_source(
        worker.as_ref(),
        file_id,
        Arc::new(resource),
        &config.provider_config(),
    )
    .await?;

    let size = provider.file_size().await?;
    if config.size_only {
        println!("{size}");
        return Ok(());
    }

    let start = config.offset.min(size);
    let end = config.offset.saturating_add(config.length).min(size);
    let data = provider.byte_range(start, end).await?;

    print!(
        "{}",
        output::format_header(&config.path, size, start, end, provider.is_virtual())
    );
    print!("{}", output::format_hex_dump(&data, start, config.width));
    Ok(())
}
