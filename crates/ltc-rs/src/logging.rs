//! Tracing subscriber setup for binaries and tests that embed the runtime.
//!
//! The runtime itself only emits `tracing` events; nothing is printed until a subscriber is
//! installed. [`init_logging`] installs a formatted subscriber whose filter comes from
//! `LTC_LOG`, then `RUST_LOG`, then `info`. It is idempotent and leaves an already installed
//! global subscriber in place.

use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static TRACING_INITIALIZED: OnceCell<()> = OnceCell::new();

const DEFAULT_FILTER: &str = "info";
const LOG_FILTER_ENV: &str = "LTC_LOG";

fn build_env_filter() -> EnvFilter {
    let directives = std::env::var(LOG_FILTER_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .or_else(|| {
            std::env::var("RUST_LOG")
                .ok()
                .filter(|value| !value.trim().is_empty())
        })
        .unwrap_or_else(|| DEFAULT_FILTER.to_string());
    EnvFilter::try_new(&directives).unwrap_or_else(|err| {
        eprintln!("ignoring invalid log filter '{directives}': {err}");
        EnvFilter::new(DEFAULT_FILTER)
    })
}

/// Installs the global subscriber once.
pub fn init_logging() {
    TRACING_INITIALIZED.get_or_init(|| {
        let layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false);
        let _ = tracing_subscriber::registry()
            .with(build_env_filter())
            .with(layer)
            .try_init();
    });
}

/// Reports whether [`init_logging`] has run in this process.
pub fn is_initialized() -> bool {
    TRACING_INITIALIZED.get().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging();
        init_logging();
        assert!(is_initialized());
        tracing::debug!("logging initialized twice without panicking");
    }
}
