//! cachedget - fetch a URL through the on-disk response cache
//!
//! Prints the response body to stdout. Logging goes to stderr and is
//! controlled by `RUST_LOG` (default `warn`).

use std::sync::Arc;

use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use cachedget::cache::CacheStore;
use cachedget::cli::{Cli, StartupConfig};
use cachedget::{CachedClient, HttpFetcher, RequestError};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli = Cli::parse();
    let config = StartupConfig::from_cli(&cli)?;

    let store = match config.cache_dir {
        Some(dir) => CacheStore::new(dir),
        None => CacheStore::default_location().ok_or("could not determine a cache directory")?,
    };
    let client = CachedClient::new(Arc::new(HttpFetcher::new()), store, config.options);

    if config.clear {
        let deleted = client.clear_cache().await?;
        eprintln!("Cleared {deleted} cached responses");
    }

    let Some(url) = config.url else {
        return Ok(());
    };

    match client.request(&url, &config.headers).await {
        Ok(body) => print!("{body}"),
        // The fetch worked; only persisting it failed
        Err(RequestError::StoreWrite { body, source, .. }) => {
            warn!(error = %source, "Response was not cached");
            print!("{body}");
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}
