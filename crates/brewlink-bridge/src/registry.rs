/*!
 * Registry of discovered devices.
 *
 * Maps each stable device identity to its accessory handle and live
 * session. The registry is mutated only by the discovery service, so the
 * invariant of at most one live session per identity holds as long as
 * discovery is the single writer.
 */
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::debug;

use brewlink_core::types::DeviceIdentity;

use crate::accessory::AccessoryHandle;
use crate::error::{BridgeError, Result};
use crate::session::DeviceSession;

/// Capacity of the registry event channel
const EVENT_CAPACITY: usize = 64;

/// Event types for the device registry
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A previously unseen identity was registered with a new accessory
    AccessoryRegistered(DeviceIdentity),
    /// A re-discovered identity had its session replaced
    SessionReplaced(DeviceIdentity),
}

/// One registry entry: the accessory handle and the live session
struct RegistryEntry {
    accessory: Arc<dyn AccessoryHandle>,
    session: Arc<DeviceSession>,
}

/// Device registry keyed by stable device identity
pub struct BridgeRegistry {
    entries: RwLock<HashMap<DeviceIdentity, RegistryEntry>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl std::fmt::Debug for BridgeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeRegistry")
            .field("devices", &self.len().unwrap_or(0))
            .finish()
    }
}

impl BridgeRegistry {
    /// Create a new, empty registry
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Get the accessory handle for an identity, if registered
    pub fn accessory(&self, identity: &DeviceIdentity) -> Result<Option<Arc<dyn AccessoryHandle>>> {
        let entries = self.read()?;
        Ok(entries.get(identity).map(|e| Arc::clone(&e.accessory)))
    }

    /// Get the live session for an identity, if any
    pub fn session(&self, identity: &DeviceIdentity) -> Result<Option<Arc<DeviceSession>>> {
        let entries = self.read()?;
        Ok(entries.get(identity).map(|e| Arc::clone(&e.session)))
    }

    /// Check whether an identity is registered
    pub fn contains(&self, identity: &DeviceIdentity) -> Result<bool> {
        Ok(self.read()?.contains_key(identity))
    }

    /// Count registered identities
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    /// Check whether the registry is empty
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    /// Get all registered identities
    pub fn identities(&self) -> Result<Vec<DeviceIdentity>> {
        Ok(self.read()?.keys().cloned().collect())
    }

    /// Insert or replace the entry for an identity.
    ///
    /// Emits `AccessoryRegistered` for a first sighting and
    /// `SessionReplaced` for a re-sighting. Returns the session that was
    /// replaced, if any.
    pub fn insert(
        &self,
        identity: DeviceIdentity,
        accessory: Arc<dyn AccessoryHandle>,
        session: Arc<DeviceSession>,
    ) -> Result<Option<Arc<DeviceSession>>> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| BridgeError::Registry("Failed to acquire write lock".to_string()))?;

        let previous = entries.insert(identity.clone(), RegistryEntry { accessory, session });

        match &previous {
            Some(_) => {
                debug!("Replaced session for {}", identity);
                let _ = self.events.send(RegistryEvent::SessionReplaced(identity));
            }
            None => {
                debug!("Registered accessory for {}", identity);
                let _ = self.events.send(RegistryEvent::AccessoryRegistered(identity));
            }
        }

        Ok(previous.map(|e| e.session))
    }

    /// Subscribe to registry events
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<DeviceIdentity, RegistryEntry>>> {
        self.entries
            .read()
            .map_err(|_| BridgeError::Registry("Failed to acquire read lock".to_string()))
    }
}

impl Default for BridgeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A shared registry that can be cloned across tasks
#[derive(Debug, Clone, Default)]
pub struct SharedBridgeRegistry(Arc<BridgeRegistry>);

impl SharedBridgeRegistry {
    /// Create a new shared registry
    pub fn new() -> Self {
        Self(Arc::new(BridgeRegistry::new()))
    }

    /// Get a reference to the registry
    pub fn registry(&self) -> &BridgeRegistry {
        &self.0
    }
}

impl AsRef<BridgeRegistry> for SharedBridgeRegistry {
    fn as_ref(&self) -> &BridgeRegistry {
        self.registry()
    }
}
