/*!
 * Brewlink Bridge
 *
 * This crate implements the discovery-and-connection-lifecycle subsystem of
 * the Brewlink bridge: mDNS discovery of espresso machine controllers,
 * per-device auto-reconnecting WebSocket channels, and the mapping between
 * asynchronous device status pushes and the host platform's on/off
 * capability surface.
 */

#![warn(missing_docs)]

pub mod accessory;
pub mod channel;
pub mod discovery;
pub mod error;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod wire;

// Re-export the primary surface for convenience
pub use accessory::{AccessoryHandle, AccessoryInformation, AccessoryPlatform};
pub use channel::{ChannelEvent, ChannelOptions, ChannelState, MessageChannel};
pub use discovery::{Advertisement, DiscoveryOptions, DiscoveryService};
pub use error::{BridgeError, Result};
pub use registry::{BridgeRegistry, RegistryEvent, SharedBridgeRegistry};
pub use resolver::{MdnsResolver, Resolve, StaticResolver};
pub use session::DeviceSession;

/// Brewlink bridge crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
