use std::sync::{Arc, Mutex};
use std::time::Duration;

use brewlink_bridge::{
    AccessoryHandle, AccessoryInformation, AccessoryPlatform, DiscoveryOptions, DiscoveryService,
    MdnsResolver, RegistryEvent, SharedBridgeRegistry,
};

use tokio::time::sleep;
use tracing::info;
use uuid::Uuid;

/// An accessory platform that just logs everything the bridge pushes to it.
#[derive(Debug, Default)]
struct LogPlatform;

#[derive(Debug)]
struct LogAccessory {
    id: Uuid,
    name: Mutex<String>,
}

impl AccessoryHandle for LogAccessory {
    fn id(&self) -> Uuid {
        self.id
    }

    fn display_name(&self) -> String {
        self.name.lock().unwrap().clone()
    }

    fn set_information(&self, info: AccessoryInformation) {
        *self.name.lock().unwrap() = info.name.clone();
        info!(
            "Accessory {}: {} by {} ({}, serial {})",
            self.id, info.name, info.manufacturer, info.model, info.serial
        );
    }

    fn update_active(&self, active: bool) {
        info!("Accessory {} is now {}", self.id, if active { "on" } else { "off" });
    }
}

impl AccessoryPlatform for LogPlatform {
    fn create_accessory(&self, display_name: &str, id: Uuid) -> Arc<dyn AccessoryHandle> {
        Arc::new(LogAccessory {
            id,
            name: Mutex::new(display_name.to_string()),
        })
    }

    fn register_accessory(&self, accessory: Arc<dyn AccessoryHandle>) -> brewlink_bridge::Result<()> {
        info!("Registered accessory {}", accessory.id());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize the logger
    brewlink_core::init()?;

    // Create the discovery service with a real mDNS resolver
    let platform = Arc::new(LogPlatform);
    let resolver = Arc::new(MdnsResolver::new()?);
    let registry = SharedBridgeRegistry::new();
    let service = Arc::new(DiscoveryService::new(
        platform,
        resolver,
        registry.clone(),
        DiscoveryOptions::default(),
    ));

    // Watch registry events in the background
    let mut events = registry.registry().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                RegistryEvent::AccessoryRegistered(identity) => {
                    info!("New machine registered: {}", identity);
                }
                RegistryEvent::SessionReplaced(identity) => {
                    info!("Machine re-discovered: {}", identity);
                }
            }
        }
    });

    // Start browsing for machines
    info!("Starting discovery...");
    service.start()?;

    // Poll discovered machines for a while
    for _ in 0..12 {
        sleep(Duration::from_secs(10)).await;

        for identity in registry.registry().identities()? {
            let Some(session) = registry.registry().session(&identity)? else {
                continue;
            };
            info!(
                "{} at {}: state={}, active={:?}",
                identity,
                session.endpoint(),
                session.connection_state(),
                session.active()
            );

            // Trigger a status push when the machine is reachable
            if session.is_connected() {
                let _ = session.poll_active();
            }
        }
    }

    // Shut everything down
    info!("Stopping discovery...");
    service.stop().await;
    for identity in registry.registry().identities()? {
        if let Some(session) = registry.registry().session(&identity)? {
            session.shutdown().await;
        }
    }

    info!("Example completed!");
    Ok(())
}
