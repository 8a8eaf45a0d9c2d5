/*!
 * Core data types for the Brewlink bridge.
 *
 * This module defines the identity, endpoint and capability types shared
 * between the discovery, session and accessory layers.
 */
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for deriving deterministic accessory UUIDs from hardware tokens.
///
/// The same physical device must map to the same accessory UUID across
/// restarts and re-advertisements, so the UUID is a v5 hash of the
/// normalized hardware token under this fixed namespace.
const ACCESSORY_NAMESPACE: Uuid = Uuid::from_u128(0x6f4a_1c3e_9b2d_4e8f_a1b5_c7d9_e0f2_3a4b_u128);

/// A stable identifier for a physical espresso machine controller.
///
/// Derived from the MAC-like hardware token carried in the advertisement
/// metadata. Tokens are normalized (trimmed, uppercased) so that cosmetic
/// differences between sightings never produce distinct identities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    /// Derive an identity from an advertised hardware token
    pub fn from_hardware_token<S: AsRef<str>>(token: S) -> Self {
        Self(token.as_ref().trim().to_ascii_uppercase())
    }

    /// Get the normalized hardware token
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the deterministic accessory UUID for this identity
    pub fn accessory_uuid(&self) -> Uuid {
        Uuid::new_v5(&ACCESSORY_NAMESPACE, self.0.as_bytes())
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connection target observed in a single advertisement sighting.
///
/// Endpoints are ephemeral: the host and port are rebuilt on every sighting
/// and never assumed stable, since the device's network attachment can
/// change between advertisements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEndpoint {
    /// The advertised hostname (resolved to an address at connect time)
    pub host: String,
    /// The advertised port
    pub port: u16,
    /// The stable device identity
    pub identity: DeviceIdentity,
    /// The advertised display name
    pub display_name: String,
}

impl fmt::Display for DeviceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} [{}]", self.host, self.port, self.identity)
    }
}

/// The externally visible on/off state of a device.
///
/// `active` is `None` until the device pushes its first status message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityState {
    /// Whether the device reports itself powered on
    pub active: Option<bool>,
}

impl CapabilityState {
    /// Check whether the state has been learned from the device yet
    pub fn is_known(&self) -> bool {
        self.active.is_some()
    }
}
