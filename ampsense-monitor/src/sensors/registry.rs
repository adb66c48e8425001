use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use crate::errors::RegistryError;
use crate::models::{SensorInfo, SensorKind};
use crate::transport::{CURRENT_SENSOR_SERVICE, Transport};

const EVENT_CHANNEL_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Added(SensorInfo),
    Removed(SensorInfo),
}

/// Inventory of known sensors. Consumers mirror it through the event
/// stream; the registry itself never touches the transport except during
/// discovery sweeps.
pub struct SensorRegistry {
    sensors: RwLock<Vec<SensorInfo>>,
    events: broadcast::Sender<RegistryEvent>,
    sweeping: AtomicBool,
}

impl SensorRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);

        Self {
            sensors: RwLock::new(Vec::new()),
            events,
            sweeping: AtomicBool::new(false),
        }
    }

    pub async fn snapshot(&self) -> Vec<SensorInfo> {
        self.sensors.read().await.clone()
    }

    pub async fn current_sensors(&self) -> Vec<SensorInfo> {
        self.sensors
            .read()
            .await
            .iter()
            .filter(|sensor| sensor.kind == SensorKind::Current)
            .cloned()
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    pub async fn is_registered(&self, info: &SensorInfo) -> bool {
        contains(&self.sensors.read().await, info)
    }

    /// Add a sensor. Rejects entries that collide on id or on the
    /// logical/physical device pair; sensors without either device id can
    /// coexist freely.
    pub async fn register(&self, info: SensorInfo) -> Result<(), RegistryError> {
        {
            let mut sensors = self.sensors.write().await;
            if contains(&sensors, &info) {
                return Err(RegistryError::Duplicate);
            }
            sensors.push(info.clone());
        }

        tracing::info!(sensor = %info.name, id = %info.id, "sensor registered");
        let _ = self.events.send(RegistryEvent::Added(info));

        Ok(())
    }

    pub async fn unregister(&self, id: Uuid) -> Result<SensorInfo, RegistryError> {
        let removed = {
            let mut sensors = self.sensors.write().await;
            let index = sensors
                .iter()
                .position(|sensor| sensor.id == id)
                .ok_or(RegistryError::NotFound)?;
            sensors.remove(index)
        };

        tracing::info!(sensor = %removed.name, id = %removed.id, "sensor unregistered");
        let _ = self.events.send(RegistryEvent::Removed(removed.clone()));

        Ok(removed)
    }

    /// Sweep the transport for current sensing peripherals that are not
    /// registered yet. Only one sweep may run at a time; concurrent calls
    /// fail with [`RegistryError::Busy`].
    pub async fn discover_unregistered(
        &self,
        transport: &Arc<dyn Transport>,
    ) -> Result<Vec<SensorInfo>, RegistryError> {
        if self.sweeping.swap(true, Ordering::SeqCst) {
            return Err(RegistryError::Busy);
        }

        let found = self.sweep(transport).await;
        self.sweeping.store(false, Ordering::SeqCst);

        Ok(found)
    }

    async fn sweep(&self, transport: &Arc<dyn Transport>) -> Vec<SensorInfo> {
        let devices = match transport.discover(CURRENT_SENSOR_SERVICE).await {
            Ok(devices) => devices,
            Err(e) => {
                tracing::warn!(error = %e, "device sweep failed");
                return Vec::new();
            }
        };

        let sensors = self.sensors.read().await;
        let unregistered: Vec<SensorInfo> = devices
            .into_iter()
            .map(|device| SensorInfo {
                id: Uuid::new_v4(),
                kind: SensorKind::Current,
                name: device.name,
                logical_device_id: Some(device.id),
                physical_device_id: device.container_id,
                location_id: None,
            })
            .filter(|candidate| !contains(&sensors, candidate))
            .collect();

        tracing::debug!(count = unregistered.len(), "sweep found unregistered sensors");

        unregistered
    }
}

impl Default for SensorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn contains(sensors: &[SensorInfo], info: &SensorInfo) -> bool {
    sensors.iter().any(|existing| {
        existing.id == info.id
            || ((info.logical_device_id.is_some() || info.physical_device_id.is_some())
                && existing.logical_device_id == info.logical_device_id
                && existing.physical_device_id == info.physical_device_id)
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::errors::TransportError;
    use crate::transport::{DeviceInfo, ServiceHandle, SimulatedTransport};

    use super::*;

    fn manual_sensor(name: &str) -> SensorInfo {
        SensorInfo {
            id: Uuid::new_v4(),
            kind: SensorKind::Current,
            name: name.to_string(),
            logical_device_id: None,
            physical_device_id: None,
            location_id: None,
        }
    }

    fn device_sensor(name: &str, device_id: &str) -> SensorInfo {
        SensorInfo {
            id: Uuid::new_v4(),
            kind: SensorKind::Current,
            name: name.to_string(),
            logical_device_id: Some(device_id.to_string()),
            physical_device_id: Some(format!("container:{device_id}")),
            location_id: None,
        }
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_id() {
        let registry = SensorRegistry::new();
        let sensor = manual_sensor("Main feed");

        registry.register(sensor.clone()).await.unwrap();
        let result = registry.register(sensor).await;

        assert!(matches!(result, Err(RegistryError::Duplicate)));
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_device_pair() {
        let registry = SensorRegistry::new();

        registry
            .register(device_sensor("Main feed", "sim:a"))
            .await
            .unwrap();
        let result = registry.register(device_sensor("Renamed feed", "sim:a")).await;

        assert!(matches!(result, Err(RegistryError::Duplicate)));
    }

    #[tokio::test]
    async fn test_manual_sensors_do_not_collide() {
        let registry = SensorRegistry::new();

        registry.register(manual_sensor("First")).await.unwrap();
        registry.register(manual_sensor("Second")).await.unwrap();

        assert_eq!(registry.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn test_unregister_unknown_id() {
        let registry = SensorRegistry::new();

        let result = registry.unregister(Uuid::new_v4()).await;

        assert!(matches!(result, Err(RegistryError::NotFound)));
    }

    #[tokio::test]
    async fn test_events_reflect_membership_changes() {
        let registry = SensorRegistry::new();
        let mut events = registry.subscribe();

        let sensor = manual_sensor("Main feed");
        registry.register(sensor.clone()).await.unwrap();
        registry.unregister(sensor.id).await.unwrap();

        assert!(matches!(events.recv().await, Ok(RegistryEvent::Added(info)) if info.id == sensor.id));
        assert!(matches!(events.recv().await, Ok(RegistryEvent::Removed(info)) if info.id == sensor.id));
    }

    #[tokio::test]
    async fn test_sweep_skips_registered_devices() {
        let registry = SensorRegistry::new();
        let simulated = Arc::new(SimulatedTransport::new());
        simulated.add_device("sim:a", "Feeder A").await;
        simulated.add_device("sim:b", "Feeder B").await;

        registry
            .register(device_sensor("Feeder A", "sim:a"))
            .await
            .unwrap();

        let transport: Arc<dyn Transport> = simulated;
        let found = registry.discover_unregistered(&transport).await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].logical_device_id.as_deref(), Some("sim:b"));
    }

    struct SlowTransport;

    #[async_trait]
    impl Transport for SlowTransport {
        async fn discover(&self, _service: Uuid) -> Result<Vec<DeviceInfo>, TransportError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(vec![])
        }

        async fn device_info(&self, _device_id: &str) -> Result<DeviceInfo, TransportError> {
            Err(TransportError::DeviceNotFound)
        }

        async fn bind_service(
            &self,
            _device_id: &str,
            _service: Uuid,
        ) -> Result<Box<dyn ServiceHandle>, TransportError> {
            Err(TransportError::DeviceNotFound)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_sweeps_report_busy() {
        let registry = SensorRegistry::new();
        let transport: Arc<dyn Transport> = Arc::new(SlowTransport);

        let (first, second) = tokio::join!(
            registry.discover_unregistered(&transport),
            registry.discover_unregistered(&transport),
        );

        match (first, second) {
            (Ok(_), Err(RegistryError::Busy)) | (Err(RegistryError::Busy), Ok(_)) => {}
            other => panic!("expected one sweep and one busy rejection, got {other:?}"),
        }
    }
}
