use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use ampsense_monitor::configs::{Database, SchemaManager, Storage};
use ampsense_monitor::models::{SensorInfo, SensorKind};
use ampsense_monitor::transport::{
    COEFFICIENT_CHARACTERISTIC, CURRENT_CHARACTERISTIC, SimulatedDevice, SimulatedTransport,
};

pub async fn setup_test_db() -> Arc<Storage> {
    Arc::new(
        Storage::new(
            Database {
                clean_start: true,
                url: String::from("sqlite::memory:"),
            },
            SchemaManager::default(),
        )
        .await
        .unwrap(),
    )
}

pub fn test_sensor_info(name: &str, device_id: &str) -> SensorInfo {
    SensorInfo {
        id: Uuid::new_v4(),
        kind: SensorKind::Current,
        name: name.to_string(),
        logical_device_id: Some(device_id.to_string()),
        physical_device_id: Some(format!("container:{device_id}")),
        location_id: None,
    }
}

/// Register a peripheral with notifications enabled on both pipeline
/// characteristics.
pub async fn add_current_device(
    transport: &SimulatedTransport,
    device_id: &str,
    name: &str,
) -> Arc<SimulatedDevice> {
    let device = transport.add_device(device_id, name).await;
    device.enable_notify(CURRENT_CHARACTERISTIC);
    device.enable_notify(COEFFICIENT_CHARACTERISTIC);
    device
}

/// Poll `predicate` until it holds or `timeout` of (paused) clock time
/// passes. Returns whether the predicate held.
pub async fn wait_until<F>(mut predicate: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
