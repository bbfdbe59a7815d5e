//! Tracing subscriber setup for the binary.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over the `info` default.
///
/// With `json` set every event is written as one JSON object per line.
pub fn init(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if json {
        builder
            .json()
            .with_current_span(false)
            .try_init()
            .map_err(|e| anyhow!("failed to install JSON subscriber: {e}"))
    } else {
        builder
            .with_target(false)
            .try_init()
            .map_err(|e| anyhow!("failed to install subscriber: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_an_error_not_a_panic() {
        // Another test binary thread may already own the global subscriber.
        let _ = init(false);
        assert!(init(true).is_err());
    }
}
