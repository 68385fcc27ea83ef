use std::{
    fs::{self, OpenOptions},
    path::Path,
    sync::Mutex,
};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{errors::Error, Result};

/// Initialize logging for the relay.
///
/// Everything goes to stdout and is appended to `log_file`, which `/logs`
/// reads back. Can be overridden with `RUST_LOG`.
pub fn init(service_name: &str, log_file: &Path) -> Result<()> {
    // Default: info for our crates, warn for everything else.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,relay=info,relay_core=info,relay_telegram=info,relay_http=info,{service_name}=info"
        ))
    });

    if let Some(parent) = log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_ansi(true))
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init()
        .map_err(|e| Error::Config(format!("logging already initialized: {e}")))?;

    Ok(())
}

/// Last `n` lines of the log file (for `/logs`).
pub fn tail_lines(log_file: &Path, n: usize) -> Result<Vec<String>> {
    let txt = fs::read_to_string(log_file)?;
    let lines: Vec<&str> = txt.lines().collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].iter().map(|s| s.to_string()).collect())
}
