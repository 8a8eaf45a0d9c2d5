/*!
 * Device session for one espresso machine controller.
 *
 * The session is the only component that understands the device's
 * application-level message vocabulary. It binds one persistent message
 * channel to one device identity, translates inbound status payloads into
 * capability updates, and turns capability requests from the host platform
 * into outbound commands.
 */
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use brewlink_core::types::{CapabilityState, DeviceEndpoint};

use crate::accessory::{AccessoryHandle, AccessoryInformation};
use crate::channel::{ChannelEvent, ChannelOptions, ChannelState, MessageChannel};
use crate::error::{BridgeError, Result};
use crate::resolver::Resolve;
use crate::wire::{Command, StatusPayload};

/// Manufacturer reported in the accessory identification
const MANUFACTURER: &str = "oznu-platform";
/// Model reported in the accessory identification
const MODEL: &str = "Rancilio";

/// A live session bound to one device identity
pub struct DeviceSession {
    endpoint: DeviceEndpoint,
    accessory: Arc<dyn AccessoryHandle>,
    channel: MessageChannel,
    capability: Arc<RwLock<CapabilityState>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("endpoint", &self.endpoint)
            .field("state", &self.channel.state())
            .finish()
    }
}

impl DeviceSession {
    /// Bind a fresh message channel to the given endpoint and accessory.
    ///
    /// Registers the accessory's identification metadata exactly once and
    /// starts the event pump that applies inbound status pushes to the
    /// capability state.
    pub fn bind(
        endpoint: DeviceEndpoint,
        accessory: Arc<dyn AccessoryHandle>,
        resolver: Arc<dyn Resolve>,
        options: ChannelOptions,
    ) -> Arc<Self> {
        accessory.set_information(AccessoryInformation {
            name: endpoint.display_name.clone(),
            manufacturer: MANUFACTURER.to_string(),
            model: MODEL.to_string(),
            serial: endpoint.identity.as_str().to_string(),
        });

        let channel = MessageChannel::spawn(
            Arc::clone(&resolver),
            endpoint.host.clone(),
            endpoint.port,
            options,
        );
        let events = channel.subscribe();
        let capability = Arc::new(RwLock::new(CapabilityState::default()));

        let pump = tokio::spawn(pump(
            events,
            Arc::clone(&capability),
            Arc::clone(&accessory),
            endpoint.to_string(),
        ));

        Arc::new(Self {
            endpoint,
            accessory,
            channel,
            capability,
            pump: Mutex::new(Some(pump)),
        })
    }

    /// Get the endpoint this session was created from
    pub fn endpoint(&self) -> &DeviceEndpoint {
        &self.endpoint
    }

    /// Get the accessory handle this session is bound to
    pub fn accessory(&self) -> &Arc<dyn AccessoryHandle> {
        &self.accessory
    }

    /// Get the current connection state of the underlying channel
    pub fn connection_state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Check whether the device is currently reachable
    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    /// Get the last known active state (`None` until the first status push)
    pub fn active(&self) -> Option<bool> {
        self.capability.read().map(|c| c.active).unwrap_or(None)
    }

    /// Request a power state change.
    ///
    /// Fails with `DeviceUnreachable` when not connected, without queueing
    /// anything. When connected the command is sent and acknowledged
    /// optimistically; the wire protocol has no correlation envelope, so the
    /// session never waits for device confirmation.
    pub fn set_active(&self, value: bool) -> Result<()> {
        if !self.channel.is_connected() {
            warn!("{} not connected, rejecting set", self.endpoint);
            return Err(BridgeError::DeviceUnreachable);
        }

        debug!("{} set active = {}", self.endpoint, value);
        self.channel.send(&Command::set_power(value))
    }

    /// Trigger a status push and return the currently cached active state.
    ///
    /// Fails with `DeviceUnreachable` when not connected. The returned value
    /// is whatever the capability state currently holds; it is refreshed
    /// asynchronously by later inbound messages rather than by waiting for a
    /// response here.
    pub fn poll_active(&self) -> Result<Option<bool>> {
        if !self.channel.is_connected() {
            warn!("{} not connected, rejecting get", self.endpoint);
            return Err(BridgeError::DeviceUnreachable);
        }

        debug!("{} polling status", self.endpoint);
        self.channel.send(&Command::query_status())?;
        Ok(self.active())
    }

    /// Tear the session down: close the channel and stop the event pump
    pub async fn shutdown(&self) {
        self.channel.close().await;
        let pump = self.pump.lock().ok().and_then(|mut p| p.take());
        if let Some(pump) = pump {
            pump.abort();
            let _ = pump.await;
        }
    }
}

/// Apply channel events to the capability state, in receipt order
async fn pump(
    mut events: broadcast::Receiver<ChannelEvent>,
    capability: Arc<RwLock<CapabilityState>>,
    accessory: Arc<dyn AccessoryHandle>,
    endpoint: String,
) {
    loop {
        match events.recv().await {
            Ok(ChannelEvent::Message(payload)) => {
                let status = StatusPayload::parse(&payload);
                if let Some(power) = status.power {
                    debug!("{} reports power = {}", endpoint, power);
                    if let Ok(mut capability) = capability.write() {
                        capability.active = Some(power);
                    }
                    accessory.update_active(power);
                }
            }
            Ok(ChannelEvent::StateChanged { old, new }) => {
                debug!("{} channel {} -> {}", endpoint, old, new);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("{} event pump lagged, skipped {} events", endpoint, skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
