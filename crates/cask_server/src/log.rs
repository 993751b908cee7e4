//! Logging setup.

use anyhow::{bail, Result};
use tracing::Level;

/// Install the global tracing subscriber: compact single-line output on
/// stderr at the configured level. cask is one small binary, so there is
/// no in-process log rotation; redirect stderr if the logs need keeping.
pub fn init(log_level: &str) -> Result<()> {
    let level: Level = match log_level.parse() {
        Ok(level) => level,
        Err(_) => {
            bail!("invalid log level `{log_level}`, expected TRACE, DEBUG, INFO, WARN or ERROR")
        }
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
