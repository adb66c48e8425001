use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast, mpsc, watch};
use tokio_stream::{StreamExt, wrappers};
use uuid::Uuid;

use crate::errors::TransportError;

use super::{
    COEFFICIENT_CHARACTERISTIC, CURRENT_CHARACTERISTIC, CURRENT_SENSOR_SERVICE, CacheMode,
    DEVICE_INFORMATION_SERVICE, DeviceInfo, ServiceHandle, Transport, encode_coefficient,
    encode_i32,
};

/// In-process transport backed by scripted peripherals. Used by the mock
/// runner and the integration tests to drive the pipeline without radio
/// hardware.
pub struct SimulatedTransport {
    devices: Arc<RwLock<HashMap<String, Arc<SimulatedDevice>>>>,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self {
            devices: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a peripheral exposing the current sensing and device
    /// information services.
    pub async fn add_device(&self, id: &str, name: &str) -> Arc<SimulatedDevice> {
        let device = Arc::new(SimulatedDevice::new(id, name));
        self.devices
            .write()
            .await
            .insert(id.to_string(), device.clone());
        device
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn discover(&self, service: Uuid) -> Result<Vec<DeviceInfo>, TransportError> {
        let devices = self.devices.read().await;
        Ok(devices
            .values()
            .filter(|device| device.services.contains(&service))
            .map(|device| device.descriptor())
            .collect())
    }

    async fn device_info(&self, device_id: &str) -> Result<DeviceInfo, TransportError> {
        let devices = self.devices.read().await;
        devices
            .get(device_id)
            .map(|device| device.descriptor())
            .ok_or(TransportError::DeviceNotFound)
    }

    async fn bind_service(
        &self,
        device_id: &str,
        service: Uuid,
    ) -> Result<Box<dyn ServiceHandle>, TransportError> {
        let devices = self.devices.read().await;
        let device = devices
            .get(device_id)
            .ok_or(TransportError::DeviceNotFound)?;

        if !device.services.contains(&service) {
            return Err(TransportError::Failed(format!(
                "device {device_id} does not expose service {service}"
            )));
        }

        Ok(Box::new(SimulatedServiceHandle {
            device: device.clone(),
        }))
    }
}

/// One scripted peripheral. Tests mutate its state directly; the handle
/// side only ever reads.
pub struct SimulatedDevice {
    id: String,
    name: String,
    container_id: String,
    services: HashSet<Uuid>,
    connected: watch::Sender<bool>,
    characteristics: Mutex<HashMap<Uuid, Vec<u8>>>,
    notifiers: Mutex<HashMap<Uuid, broadcast::Sender<Vec<u8>>>>,
    notify_supported: Mutex<HashSet<Uuid>>,
    fail_reads: AtomicU32,
    auto_connect: AtomicBool,
}

impl SimulatedDevice {
    fn new(id: &str, name: &str) -> Self {
        let mut services = HashSet::new();
        services.insert(CURRENT_SENSOR_SERVICE);
        services.insert(DEVICE_INFORMATION_SERVICE);

        Self {
            id: id.to_string(),
            name: name.to_string(),
            container_id: format!("container:{id}"),
            services,
            connected: watch::Sender::new(false),
            characteristics: Mutex::new(HashMap::new()),
            notifiers: Mutex::new(HashMap::new()),
            notify_supported: Mutex::new(HashSet::new()),
            fail_reads: AtomicU32::new(0),
            auto_connect: AtomicBool::new(true),
        }
    }

    fn descriptor(&self) -> DeviceInfo {
        DeviceInfo {
            id: self.id.clone(),
            container_id: Some(self.container_id.clone()),
            name: self.name.clone(),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.send_replace(connected);
    }

    /// Whether a characteristic read while disconnected brings the link
    /// up, as a radio connection attempt would.
    pub fn set_auto_connect(&self, enabled: bool) {
        self.auto_connect.store(enabled, Ordering::SeqCst);
    }

    /// Allow notification subscriptions on a characteristic. Without
    /// this, subscribers are told to poll.
    pub fn enable_notify(&self, characteristic: Uuid) {
        if let Ok(mut supported) = self.notify_supported.lock() {
            supported.insert(characteristic);
        }
    }

    pub fn put_characteristic(&self, characteristic: Uuid, payload: Vec<u8>) {
        if let Ok(mut characteristics) = self.characteristics.lock() {
            characteristics.insert(characteristic, payload);
        }
    }

    /// Store a new value and push it to any notification subscribers.
    pub fn notify(&self, characteristic: Uuid, payload: Vec<u8>) {
        self.put_characteristic(characteristic, payload.clone());
        if let Ok(notifiers) = self.notifiers.lock() {
            if let Some(sender) = notifiers.get(&characteristic) {
                let _ = sender.send(payload);
            }
        }
    }

    /// Fail the next `count` characteristic reads.
    pub fn fail_next_reads(&self, count: u32) {
        self.fail_reads.store(count, Ordering::SeqCst);
    }

    pub fn push_current(&self, raw: i32) {
        self.notify(CURRENT_CHARACTERISTIC, encode_i32(raw));
    }

    pub fn set_coefficient(&self, numerator: i32, denominator: i32) {
        self.notify(
            COEFFICIENT_CHARACTERISTIC,
            encode_coefficient(numerator, denominator),
        );
    }

    fn notifier(&self, characteristic: Uuid) -> Option<broadcast::Sender<Vec<u8>>> {
        let supported = self
            .notify_supported
            .lock()
            .ok()?
            .contains(&characteristic);
        if !supported {
            return None;
        }

        let mut notifiers = self.notifiers.lock().ok()?;
        Some(
            notifiers
                .entry(characteristic)
                .or_insert_with(|| broadcast::channel(32).0)
                .clone(),
        )
    }
}

struct SimulatedServiceHandle {
    device: Arc<SimulatedDevice>,
}

#[async_trait]
impl ServiceHandle for SimulatedServiceHandle {
    async fn read_characteristic(
        &self,
        characteristic: Uuid,
        _mode: CacheMode,
    ) -> Result<Vec<u8>, TransportError> {
        let remaining = self.device.fail_reads.load(Ordering::SeqCst);
        if remaining > 0 {
            self.device.fail_reads.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::Failed(String::from(
                "injected read failure",
            )));
        }

        if !*self.device.connected.borrow() {
            if self.device.auto_connect.load(Ordering::SeqCst) {
                self.device.set_connected(true);
            } else {
                return Err(TransportError::Failed(String::from(
                    "device unreachable",
                )));
            }
        }

        let characteristics = self
            .device
            .characteristics
            .lock()
            .map_err(|_| TransportError::Failed(String::from("device state poisoned")))?;
        characteristics
            .get(&characteristic)
            .cloned()
            .ok_or_else(|| {
                TransportError::Failed(format!("characteristic {characteristic} has no value"))
            })
    }

    async fn subscribe_notify(
        &self,
        characteristic: Uuid,
    ) -> Result<mpsc::Receiver<Vec<u8>>, TransportError> {
        let sender = self
            .device
            .notifier(characteristic)
            .ok_or(TransportError::NotSupported)?;

        // Lagged subscribers skip ahead; the stream ends with the device.
        let mut source =
            wrappers::BroadcastStream::new(sender.subscribe()).filter_map(|result| result.ok());
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            while let Some(payload) = source.next().await {
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    fn connection_status(&self) -> watch::Receiver<bool> {
        self.device.connected.subscribe()
    }
}
