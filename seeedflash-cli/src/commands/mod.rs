//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod boards;
pub(crate) mod check;
pub(crate) mod completions;
pub(crate) mod flash;
pub(crate) mod libs;
pub(crate) mod ports;
pub(crate) mod watch;

use anyhow::{Context, Result};
use seeedflash::{Downloader, ReqwestTransport};
use std::sync::Arc;

/// Downloader backed by the blocking HTTP client.
pub(crate) fn http_downloader() -> Result<Downloader> {
    let transport = ReqwestTransport::new().context("Failed to create HTTP client")?;
    Ok(Downloader::new(Arc::new(transport)))
}
