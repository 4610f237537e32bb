use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

static INSTALLED: OnceLock<bool> = OnceLock::new();

/// Install the global `tracing` subscriber and route `log` records into it.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` is used. Only the
/// first call installs anything. Returns whether this process ended up with
/// our subscriber (false when another one was already set).
pub fn init_logging(default_filter: &str) -> bool {
    *INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_filter))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .finish();
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            return false;
        }
        if let Err(err) = tracing_log::LogTracer::init() {
            tracing::debug!("log bridge already installed: {err}");
        }
        true
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let first = init_logging("debug");
        let second = init_logging("trace");
        assert_eq!(first, second);
        tracing::info!("logging initialised");
    }
}
