//! Command-line interface parsing for cachedget
//!
//! This module handles parsing of CLI arguments using clap and turns them into
//! a [`StartupConfig`] for the binary.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

use crate::cache::FingerprintPolicy;
use crate::config::RequestOptions;

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// A `--header` argument is not of the form `Name: value`
    #[error("Invalid header: '{0}'. Expected 'Name: value'")]
    InvalidHeader(String),
}

/// cachedget - HTTP(S) GET with an on-disk response cache
#[derive(Parser, Debug)]
#[command(name = "cachedget")]
#[command(about = "Fetch a URL, reusing a cached response when one exists")]
#[command(version)]
pub struct Cli {
    /// URL to fetch (http or https)
    #[arg(required_unless_present = "clear")]
    pub url: Option<String>,

    /// Request header, repeatable
    ///
    /// Examples:
    ///   cachedget https://example.com -H "Accept: application/json"
    #[arg(short = 'H', long = "header", value_name = "NAME: VALUE")]
    pub headers: Vec<String>,

    /// Always fetch from the network and leave the cache untouched
    #[arg(long)]
    pub no_cache: bool,

    /// Cache root directory (defaults to the platform cache directory)
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Key the cache on URL path and headers only, ignoring host, scheme and query
    #[arg(long)]
    pub path_only: bool,

    /// Delete every cached response before fetching
    #[arg(long)]
    pub clear: bool,
}

/// Configuration derived from CLI arguments for application startup
#[derive(Debug, Clone, Default)]
pub struct StartupConfig {
    /// URL to fetch, if any
    pub url: Option<String>,
    /// Parsed request headers
    pub headers: HashMap<String, String>,
    /// Client options
    pub options: RequestOptions,
    /// Explicit cache root
    pub cache_dir: Option<PathBuf>,
    /// Whether to clear the cache first
    pub clear: bool,
}

/// Parses a `Name: value` header argument.
///
/// The name is trimmed and must be non-empty; the value is trimmed and may be
/// empty.
pub fn parse_header_arg(s: &str) -> Result<(String, String), CliError> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| CliError::InvalidHeader(s.to_string()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(CliError::InvalidHeader(s.to_string()));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

impl StartupConfig {
    /// Creates a StartupConfig from parsed CLI arguments.
    ///
    /// # Returns
    /// * `Ok(StartupConfig)` with appropriate settings
    /// * `Err(CliError)` if a header argument is malformed
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let headers = cli
            .headers
            .iter()
            .map(|h| parse_header_arg(h))
            .collect::<Result<HashMap<_, _>, _>>()?;

        let options = RequestOptions {
            use_cache: !cli.no_cache,
            fingerprint: if cli.path_only {
                FingerprintPolicy::PathOnly
            } else {
                FingerprintPolicy::Origin
            },
            ..Default::default()
        };

        Ok(StartupConfig {
            url: cli.url.clone(),
            headers,
            options,
            cache_dir: cli.cache_dir.clone(),
            clear: cli.clear,
        })
    }
}
