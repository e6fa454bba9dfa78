//! chunkup entry point.
//!
//! Usage: `chunkup [CONFIG]`. Without `CONFIG` the platform default path
//! is read.

mod app;
mod config;

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting chunkup");

    let config_arg = std::env::args_os().nth(1).map(PathBuf::from);
    let config = config::Config::load(config_arg)?;
    tracing::info!(
        bucket = %config.bucket,
        key = %config.key,
        task_limit = config.task_limit,
        chunk_size = config.chunk_size,
        "configuration loaded"
    );

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    Ok(())
}
