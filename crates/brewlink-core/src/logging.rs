/*!
 * Logging functionality for Brewlink.
 *
 * This module provides tracing setup for consistent logging across the
 * bridge and its embedding process.
 */
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Error, Result};

/// Initialize the logging system with default configuration
pub fn init() -> Result<()> {
    init_with_filter("info")
}

/// Initialize the logging system with a specific filter
///
/// # Arguments
///
/// * `filter` - The log filter string (e.g., "info", "debug", "brewlink=trace")
pub fn init_with_filter(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .map_err(|e| Error::logging(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// Create a new span for a device, tagged with its identity
///
/// # Arguments
///
/// * `component` - The name of the component (e.g., "channel", "session")
/// * `identity` - The device identity the component is bound to
pub fn device_span(component: &str, identity: &str) -> tracing::Span {
    tracing::info_span!("device", component = %component, identity = %identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init() {
        // This will fail if called multiple times in the same process
        // but it's fine for a single test
        let _ = init();
    }

    #[test]
    fn test_device_span() {
        let span = device_span("channel", "AA:BB:CC");
        let _guard = span.enter();
        tracing::debug!("span test");
    }
}
