/*!
 * mDNS discovery of espresso machine controllers.
 *
 * Listens for DNS-SD advertisements of the controller's service type,
 * filters them down to the expected device kind, and creates or reuses a
 * device session per stable device identity. The browse is refreshed once
 * shortly after start (for devices slow to respond at boot) and on a fixed
 * interval thereafter, for as long as the service runs.
 */
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, trace, warn};

use brewlink_core::types::{DeviceEndpoint, DeviceIdentity};

use crate::accessory::AccessoryPlatform;
use crate::channel::ChannelOptions;
use crate::error::{BridgeError, Result};
use crate::registry::SharedBridgeRegistry;
use crate::resolver::Resolve;
use crate::session::DeviceSession;

/// DNS-SD service type advertised by the machine controllers
pub const SERVICE_TYPE: &str = "_oznu-platform._tcp.local.";

/// Device kind tag an advertisement must carry to be accepted
pub const DEVICE_KIND: &str = "rancilio";

/// TXT record key carrying the device kind
const TXT_TYPE_KEY: &str = "type";

/// TXT record key carrying the hardware token
const TXT_MAC_KEY: &str = "mac";

/// Options controlling discovery scheduling
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Delay before the one-shot refresh after start
    pub launch_refresh_delay: Duration,
    /// Interval between periodic refreshes thereafter
    pub refresh_interval: Duration,
    /// Options for the channels of sessions created by this service
    pub channel: ChannelOptions,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            launch_refresh_delay: Duration::from_secs(5),
            refresh_interval: Duration::from_secs(60),
            channel: ChannelOptions::default(),
        }
    }
}

/// One advertisement sighting, decoupled from the mDNS backend
#[derive(Debug, Clone)]
pub struct Advertisement {
    /// The advertised hostname
    pub host: String,
    /// The advertised port
    pub port: u16,
    /// The advertised instance display name
    pub display_name: String,
    /// The advertisement's TXT metadata
    pub txt: HashMap<String, String>,
}

impl From<&ServiceInfo> for Advertisement {
    fn from(info: &ServiceInfo) -> Self {
        let fullname = info.get_fullname();
        let display_name = fullname
            .strip_suffix(SERVICE_TYPE)
            .map(|s| s.trim_end_matches('.'))
            .filter(|s| !s.is_empty())
            .unwrap_or(fullname)
            .to_string();

        let txt = info
            .get_properties()
            .iter()
            .map(|p| (p.key().to_string(), p.val_str().to_string()))
            .collect();

        Self {
            host: info.get_hostname().to_string(),
            port: info.get_port(),
            display_name,
            txt,
        }
    }
}

/// Discovery service with an explicit start/stop lifecycle
pub struct DiscoveryService {
    platform: Arc<dyn AccessoryPlatform>,
    resolver: Arc<dyn Resolve>,
    registry: SharedBridgeRegistry,
    options: DiscoveryOptions,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DiscoveryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryService")
            .field("service_type", &SERVICE_TYPE)
            .field("options", &self.options)
            .finish()
    }
}

impl DiscoveryService {
    /// Create a new discovery service
    pub fn new(
        platform: Arc<dyn AccessoryPlatform>,
        resolver: Arc<dyn Resolve>,
        registry: SharedBridgeRegistry,
        options: DiscoveryOptions,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            platform,
            resolver,
            registry,
            options,
            shutdown,
            task: Mutex::new(None),
        }
    }

    /// Get the registry this service populates
    pub fn registry(&self) -> &SharedBridgeRegistry {
        &self.registry
    }

    /// Start listening for advertisements.
    ///
    /// Single-call component: a second call fails rather than spawning a
    /// duplicate browse loop.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut task = self
            .task
            .lock()
            .map_err(|_| BridgeError::Discovery("Failed to acquire task lock".to_string()))?;
        if task.is_some() {
            return Err(BridgeError::Discovery("Already started".to_string()));
        }

        let daemon = ServiceDaemon::new()
            .map_err(|e| BridgeError::Discovery(format!("Failed to create mDNS daemon: {}", e)))?;

        let service = Arc::clone(self);
        let shutdown = self.shutdown.subscribe();
        *task = Some(tokio::spawn(async move {
            if let Err(e) = service.run(daemon, shutdown).await {
                error!("Discovery loop failed: {}", e);
            }
        }));

        info!("Discovery started for {}", SERVICE_TYPE);
        Ok(())
    }

    /// Stop the browse loop and refresh timer
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            let _ = task.await;
        }
        info!("Discovery stopped");
    }

    async fn run(&self, daemon: ServiceDaemon, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut browser = daemon
            .browse(SERVICE_TYPE)
            .map_err(|e| BridgeError::Discovery(format!("Failed to browse: {}", e)))?;

        // One refresh shortly after launch, then a fixed long interval
        let mut refresh = interval_at(
            Instant::now() + self.options.launch_refresh_delay,
            self.options.refresh_interval,
        );

        loop {
            tokio::select! {
                event = browser.recv_async() => match event {
                    Ok(ServiceEvent::ServiceResolved(info)) => {
                        let advertisement = Advertisement::from(&info);
                        if let Err(e) = self.process_advertisement(advertisement).await {
                            warn!("Failed to process advertisement: {}", e);
                        }
                    }
                    Ok(event) => trace!("Ignoring browse event: {:?}", event),
                    Err(e) => {
                        warn!("Browse channel closed: {}", e);
                        break;
                    }
                },
                _ = refresh.tick() => {
                    debug!("Refreshing browse for {}", SERVICE_TYPE);
                    let _ = daemon.stop_browse(SERVICE_TYPE);
                    browser = daemon
                        .browse(SERVICE_TYPE)
                        .map_err(|e| BridgeError::Discovery(format!("Failed to re-browse: {}", e)))?;
                },
                _ = shutdown.changed() => break,
            }
        }

        let _ = daemon.stop_browse(SERVICE_TYPE);
        let _ = daemon.shutdown();
        Ok(())
    }

    /// Apply one advertisement sighting to the registry.
    ///
    /// Advertisements of the wrong device kind or without a hardware token
    /// are dropped silently (expected noise on shared networks). Returns
    /// the identity that was created or refreshed, if any.
    pub async fn process_advertisement(
        &self,
        advertisement: Advertisement,
    ) -> Result<Option<DeviceIdentity>> {
        match advertisement.txt.get(TXT_TYPE_KEY) {
            Some(kind) if kind == DEVICE_KIND => {}
            _ => {
                trace!("Dropping advertisement of foreign kind from {}", advertisement.host);
                return Ok(None);
            }
        }

        let Some(token) = advertisement.txt.get(TXT_MAC_KEY) else {
            trace!("Dropping advertisement without hardware token from {}", advertisement.host);
            return Ok(None);
        };

        let identity = DeviceIdentity::from_hardware_token(token);
        let endpoint = DeviceEndpoint {
            host: advertisement.host.clone(),
            port: advertisement.port,
            identity: identity.clone(),
            display_name: advertisement.display_name.clone(),
        };

        let registry = self.registry.registry();
        let accessory = match registry.accessory(&identity)? {
            Some(accessory) => {
                info!("Found existing machine at {}", endpoint);
                // Tear the previous channel down before binding a new one,
                // so one identity never owns two sockets.
                if let Some(previous) = registry.session(&identity)? {
                    previous.shutdown().await;
                }
                accessory
            }
            None => {
                info!("Found new machine at {}", endpoint);
                let accessory = self
                    .platform
                    .create_accessory(&endpoint.display_name, identity.accessory_uuid());
                self.platform.register_accessory(Arc::clone(&accessory))?;
                accessory
            }
        };

        let session = DeviceSession::bind(
            endpoint,
            Arc::clone(&accessory),
            Arc::clone(&self.resolver),
            self.options.channel.clone(),
        );
        registry.insert(identity.clone(), accessory, session)?;

        Ok(Some(identity))
    }
}
