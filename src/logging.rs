//! Tracing initialization

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber
///
/// `RUST_LOG` wins when set; otherwise the level is `debug` in debug mode
/// and `info` otherwise. Calling it again is a no-op.
pub fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        init_logging(true);
        init_logging(false);
        tracing::info!("logging initialized twice");
    }
}
