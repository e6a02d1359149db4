//! Tracing subscriber installation for binaries.
//!
//! The library itself only emits `tracing` events. Applications that want the
//! configured [`LogTarget`] honoured call [`init_tracing`] once at startup.
//! The filter comes from `RUST_LOG` and defaults to `info`.

use std::fs::OpenOptions;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::LogTarget;
use crate::error::Result;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Install a global fmt subscriber writing to `target`.
///
/// Returns an error if the log file cannot be opened. Installing twice is
/// harmless; the second call leaves the first subscriber in place.
pub fn init_tracing(target: &LogTarget) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match target {
        LogTarget::Stderr => builder.with_writer(std::io::stderr).try_init(),
        LogTarget::Stdout => builder.with_writer(std::io::stdout).try_init(),
        LogTarget::File(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .try_init()
        }
    };

    if let Err(e) = installed {
        tracing::debug!("tracing subscriber already installed: {}", e);
    }
    Ok(())
}
