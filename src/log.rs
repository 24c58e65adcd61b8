//! Debug logging to a file named by `CHECKRUN_DEBUG`.
//!
//! Output goes to a file rather than stdout because isolated children talk
//! to their parent over stdout.

use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

pub const ENV_DEBUG: &str = "CHECKRUN_DEBUG";
pub const ENV_LOG: &str = "CHECKRUN_LOG";

/// Install a global subscriber if `CHECKRUN_DEBUG` names a file.
///
/// Returns `Ok(false)` when the variable is unset. Child processes append to
/// the same file their parent created.
pub fn init_from_env() -> Result<bool> {
    let Ok(path) = std::env::var(ENV_DEBUG) else {
        return Ok(false);
    };
    let is_child = std::env::var_os(crate::runner::child::ENV_CHILD).is_some();
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(is_child)
        .truncate(!is_child)
        .open(&path)
        .with_context(|| format!("failed to open debug log {path}"))?;

    let filter = EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new("debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
        .context("a global tracing subscriber is already installed")?;
    Ok(true)
}
