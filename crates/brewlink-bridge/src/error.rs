/*!
 * Error types for the Brewlink bridge.
 *
 * Network-layer failures (resolution, handshake, socket errors) are absorbed
 * and retried inside the message channel and never cross the accessory
 * boundary; only `DeviceUnreachable` is surfaced to the host platform, at
 * the moment an operation is attempted against a disconnected channel.
 */
use thiserror::Error;

/// Error type for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The advertised hostname could not be resolved to an address
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// The connection attempt or established socket failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// The connection handshake did not complete within the timeout
    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(std::time::Duration),

    /// A capability operation was attempted while the device is not connected
    #[error("Device not reachable")]
    DeviceUnreachable,

    /// A payload could not be serialized for transmission
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The discovery subsystem failed
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// The registry could not be read or mutated
    #[error("Registry error: {0}")]
    Registry(String),

    /// The channel has been explicitly closed
    #[error("Channel closed")]
    ChannelClosed,
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Serialization(e.to_string())
    }
}

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            BridgeError::DeviceUnreachable.to_string(),
            "Device not reachable"
        );
        assert_eq!(
            BridgeError::Resolution("dev1.local".to_string()).to_string(),
            "Resolution error: dev1.local"
        );
    }
}
