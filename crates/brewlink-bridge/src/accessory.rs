/*!
 * Host-platform accessory surface.
 *
 * The home-automation host's accessory registry is an external collaborator:
 * the bridge only needs a factory for accessory handles keyed by a
 * deterministic UUID, and a handle it can push identification metadata and
 * active-state updates into. Both are modeled as traits so the host adapter
 * layer (and the tests) can supply their own implementations.
 */
use std::fmt::Debug;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::Result;

/// Static identification metadata registered for an accessory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessoryInformation {
    /// The accessory name
    pub name: String,
    /// The device manufacturer
    pub manufacturer: String,
    /// The device model
    pub model: String,
    /// The device serial number (the hardware token)
    pub serial: String,
}

/// A handle to one accessory exposed by the host platform.
///
/// Handles are created once per device identity and reused across
/// re-discoveries; the bridge never creates a second handle for the same
/// identity.
pub trait AccessoryHandle: Send + Sync + Debug {
    /// Get the deterministic accessory UUID
    fn id(&self) -> Uuid;

    /// Get the accessory display name
    fn display_name(&self) -> String;

    /// Register the accessory's identification metadata
    fn set_information(&self, info: AccessoryInformation);

    /// Propagate a new active state to the host's capability surface
    fn update_active(&self, active: bool);
}

/// Factory and registrar for accessory handles
pub trait AccessoryPlatform: Send + Sync + Debug {
    /// Create a new accessory handle
    fn create_accessory(&self, display_name: &str, id: Uuid) -> Arc<dyn AccessoryHandle>;

    /// Register a newly created accessory with the host platform.
    ///
    /// Called exactly once per device identity; re-discoveries of a known
    /// identity reuse the already-registered handle.
    fn register_accessory(&self, accessory: Arc<dyn AccessoryHandle>) -> Result<()>;
}
