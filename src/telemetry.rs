//! Tracing subscriber set-up for binaries and tests.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::util::SubscriberInitExt;

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// Install a formatted subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` (for example `"bucketbeam=info"`).
///
/// Only the first call has an effect. If another global subscriber was set
/// elsewhere it is left in place.
pub fn init_tracing(default_directive: &str) {
    INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive));
        let subscriber = fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .finish();
        if subscriber.try_init().is_err() {
            tracing::debug!("global tracing subscriber already installed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init_tracing("bucketbeam=debug");
        init_tracing("bucketbeam=trace");
        tracing::info!("tracing initialised");
    }
}
