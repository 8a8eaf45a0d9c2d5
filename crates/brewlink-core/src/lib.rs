/*!
 * Brewlink Core
 *
 * This crate provides the foundation for the Brewlink bridge: the device
 * identity and endpoint types, the core error taxonomy, and logging setup.
 */

#![warn(missing_docs)]

pub mod error;
pub mod logging;
pub mod types;

pub use error::{Error, Result};
pub use types::{CapabilityState, DeviceEndpoint, DeviceIdentity};

/// Brewlink core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization
pub fn init() -> Result<()> {
    logging::init()?;
    tracing::info!("Brewlink Core {} initialized", VERSION);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
