//! Discovery and registry behavior driven by synthetic advertisements.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use brewlink_bridge::{
    AccessoryHandle, AccessoryInformation, AccessoryPlatform, Advertisement, BridgeError,
    DiscoveryOptions, DiscoveryService, SharedBridgeRegistry, StaticResolver,
};
use brewlink_core::types::DeviceIdentity;

/// Accessory double that records everything pushed into it
#[derive(Debug)]
struct RecordingAccessory {
    id: Uuid,
    name: String,
    information: Mutex<Vec<AccessoryInformation>>,
    active_updates: Mutex<Vec<bool>>,
}

impl RecordingAccessory {
    fn new(name: &str, id: Uuid) -> Self {
        Self {
            id,
            name: name.to_string(),
            information: Mutex::new(Vec::new()),
            active_updates: Mutex::new(Vec::new()),
        }
    }
}

impl AccessoryHandle for RecordingAccessory {
    fn id(&self) -> Uuid {
        self.id
    }

    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn set_information(&self, info: AccessoryInformation) {
        self.information.lock().unwrap().push(info);
    }

    fn update_active(&self, active: bool) {
        self.active_updates.lock().unwrap().push(active);
    }
}

/// Platform double that counts factory and registration calls
#[derive(Debug, Default)]
struct RecordingPlatform {
    created: Mutex<Vec<Arc<RecordingAccessory>>>,
    registrations: Mutex<Vec<Uuid>>,
}

impl RecordingPlatform {
    fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    fn registration_count(&self) -> usize {
        self.registrations.lock().unwrap().len()
    }

    fn accessory(&self, index: usize) -> Arc<RecordingAccessory> {
        Arc::clone(&self.created.lock().unwrap()[index])
    }
}

impl AccessoryPlatform for RecordingPlatform {
    fn create_accessory(&self, display_name: &str, id: Uuid) -> Arc<dyn AccessoryHandle> {
        let accessory = Arc::new(RecordingAccessory::new(display_name, id));
        self.created.lock().unwrap().push(Arc::clone(&accessory));
        accessory
    }

    fn register_accessory(
        &self,
        accessory: Arc<dyn AccessoryHandle>,
    ) -> brewlink_bridge::Result<()> {
        self.registrations.lock().unwrap().push(accessory.id());
        Ok(())
    }
}

fn advertisement(host: &str, port: u16, kind: Option<&str>, mac: Option<&str>) -> Advertisement {
    let mut txt = HashMap::new();
    if let Some(kind) = kind {
        txt.insert("type".to_string(), kind.to_string());
    }
    if let Some(mac) = mac {
        txt.insert("mac".to_string(), mac.to_string());
    }
    Advertisement {
        host: host.to_string(),
        port,
        display_name: "Rancilio".to_string(),
        txt,
    }
}

fn service() -> (Arc<DiscoveryService>, Arc<RecordingPlatform>) {
    let platform = Arc::new(RecordingPlatform::default());
    let resolver = Arc::new(StaticResolver::new("127.0.0.1".parse().unwrap()));
    let service = Arc::new(DiscoveryService::new(
        platform.clone(),
        resolver,
        SharedBridgeRegistry::new(),
        DiscoveryOptions::default(),
    ));
    (service, platform)
}

#[tokio::test]
async fn foreign_kind_is_ignored() {
    let (service, platform) = service();

    let result = service
        .process_advertisement(advertisement(
            "other.local.",
            8080,
            Some("garage-door"),
            Some("AA:BB:CC"),
        ))
        .await
        .unwrap();

    assert!(result.is_none());
    assert!(service.registry().registry().is_empty().unwrap());
    assert_eq!(platform.created_count(), 0);
    assert_eq!(platform.registration_count(), 0);
}

#[tokio::test]
async fn missing_kind_is_ignored() {
    let (service, platform) = service();

    let result = service
        .process_advertisement(advertisement("dev1.local.", 8080, None, Some("AA:BB:CC")))
        .await
        .unwrap();

    assert!(result.is_none());
    assert_eq!(platform.created_count(), 0);
}

#[tokio::test]
async fn missing_hardware_token_is_ignored() {
    let (service, platform) = service();

    let result = service
        .process_advertisement(advertisement("dev1.local.", 8080, Some("rancilio"), None))
        .await
        .unwrap();

    assert!(result.is_none());
    assert!(service.registry().registry().is_empty().unwrap());
    assert_eq!(platform.created_count(), 0);
}

#[tokio::test]
async fn new_identity_creates_one_accessory_and_session() -> anyhow::Result<()> {
    let (service, platform) = service();

    let identity = service
        .process_advertisement(advertisement(
            "dev1.local.",
            8080,
            Some("rancilio"),
            Some("AA:BB:CC"),
        ))
        .await?
        .expect("advertisement should be accepted");

    assert_eq!(identity, DeviceIdentity::from_hardware_token("AA:BB:CC"));

    let registry = service.registry().registry();
    assert_eq!(registry.len()?, 1);
    assert!(registry.session(&identity)?.is_some());
    assert_eq!(platform.created_count(), 1);
    assert_eq!(platform.registration_count(), 1);

    // Identification is registered exactly once, with the hardware token as serial
    let accessory = platform.accessory(0);
    let information = accessory.information.lock().unwrap();
    assert_eq!(information.len(), 1);
    assert_eq!(information[0].serial, "AA:BB:CC");
    assert_eq!(information[0].manufacturer, "oznu-platform");
    assert_eq!(information[0].model, "Rancilio");
    Ok(())
}

#[tokio::test]
async fn repeated_sighting_reuses_accessory() {
    let (service, platform) = service();
    let adv = advertisement("dev1.local.", 8080, Some("rancilio"), Some("AA:BB:CC"));

    let first = service
        .process_advertisement(adv.clone())
        .await
        .unwrap()
        .unwrap();
    let registry = service.registry().registry();
    let first_session = registry.session(&first).unwrap().unwrap();

    let second = service
        .process_advertisement(adv)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(first, second);
    // One registry entry, one accessory, one host-platform registration
    assert_eq!(registry.len().unwrap(), 1);
    assert_eq!(platform.created_count(), 1);
    assert_eq!(platform.registration_count(), 1);

    // The session itself is replaced, never duplicated
    let second_session = registry.session(&second).unwrap().unwrap();
    assert!(!Arc::ptr_eq(&first_session, &second_session));
}

#[tokio::test]
async fn token_normalization_deduplicates() {
    let (service, platform) = service();

    service
        .process_advertisement(advertisement(
            "dev1.local.",
            8080,
            Some("rancilio"),
            Some("aa:bb:cc"),
        ))
        .await
        .unwrap();
    service
        .process_advertisement(advertisement(
            "dev1.local.",
            8080,
            Some("rancilio"),
            Some(" AA:BB:CC "),
        ))
        .await
        .unwrap();

    assert_eq!(service.registry().registry().len().unwrap(), 1);
    assert_eq!(platform.created_count(), 1);
}

#[tokio::test]
async fn endpoint_changes_are_tracked_across_sightings() -> anyhow::Result<()> {
    let (service, _platform) = service();
    let identity = DeviceIdentity::from_hardware_token("AA:BB:CC");

    service
        .process_advertisement(advertisement(
            "dev1.local.",
            8080,
            Some("rancilio"),
            Some("AA:BB:CC"),
        ))
        .await?;
    service
        .process_advertisement(advertisement(
            "dev2.local.",
            9090,
            Some("rancilio"),
            Some("AA:BB:CC"),
        ))
        .await?;

    let registry = service.registry().registry();
    let session = registry.session(&identity)?.expect("session should exist");
    assert_eq!(session.endpoint().host, "dev2.local.");
    assert_eq!(session.endpoint().port, 9090);
    Ok(())
}

#[tokio::test]
async fn set_while_disconnected_fails_without_sending() {
    let (service, platform) = service();

    let identity = service
        .process_advertisement(advertisement(
            // Nothing listens here, so the channel never reaches Connected
            "unreachable.local.",
            1,
            Some("rancilio"),
            Some("AA:BB:CC"),
        ))
        .await
        .unwrap()
        .unwrap();

    let session = service
        .registry()
        .registry()
        .session(&identity)
        .unwrap()
        .unwrap();

    let result = session.set_active(true);
    assert!(matches!(result, Err(BridgeError::DeviceUnreachable)));

    let result = session.poll_active();
    assert!(matches!(result, Err(BridgeError::DeviceUnreachable)));

    // No capability update was ever pushed to the host surface
    let accessory = platform.accessory(0);
    assert!(accessory.active_updates.lock().unwrap().is_empty());

    session.shutdown().await;
}
