use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use uuid::{Uuid, uuid};

use crate::errors::TransportError;

mod simulated;

pub use simulated::{SimulatedDevice, SimulatedTransport};

/// Primary service exposed by current sensing peripherals.
pub const CURRENT_SENSOR_SERVICE: Uuid = uuid!("00000000-0001-0002-0003-0123456789ab");

/// Raw current samples, little-endian i32 at offset 0.
pub const CURRENT_CHARACTERISTIC: Uuid = uuid!("00010000-1000-2000-3012-3456789ab000");

/// Calibration ratio, little-endian i32 numerator at offset 0 and
/// denominator at offset 4.
pub const COEFFICIENT_CHARACTERISTIC: Uuid = uuid!("00010000-1000-2000-3012-3456789ab001");

/// Standard device information service.
pub const DEVICE_INFORMATION_SERVICE: Uuid = uuid!("0000180a-0000-1000-8000-00805f9b34fb");

pub const HARDWARE_REVISION_CHARACTERISTIC: Uuid = uuid!("00002a27-0000-1000-8000-00805f9b34fb");

pub const FIRMWARE_REVISION_CHARACTERISTIC: Uuid = uuid!("00002a26-0000-1000-8000-00805f9b34fb");

/// Whether a characteristic read may be served from the peripheral cache
/// or must go out to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Cached,
    Uncached,
}

/// Address and naming data for a discovered peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub container_id: Option<String>,
    pub name: String,
}

/// Access to peripherals over some wireless or in-process medium.
#[async_trait]
pub trait Transport: Send + Sync {
    /// List peripherals currently advertising the given service.
    async fn discover(&self, service: Uuid) -> Result<Vec<DeviceInfo>, TransportError>;

    /// Resolve a device address to its full descriptor.
    async fn device_info(&self, device_id: &str) -> Result<DeviceInfo, TransportError>;

    /// Open a session against one service of one peripheral.
    async fn bind_service(
        &self,
        device_id: &str,
        service: Uuid,
    ) -> Result<Box<dyn ServiceHandle>, TransportError>;
}

/// A bound service session. Reads may provoke a connection attempt;
/// connection state is reported out-of-band through `connection_status`.
#[async_trait]
pub trait ServiceHandle: Send + Sync {
    async fn read_characteristic(
        &self,
        characteristic: Uuid,
        mode: CacheMode,
    ) -> Result<Vec<u8>, TransportError>;

    /// Subscribe to value change notifications. Fails with
    /// [`TransportError::NotSupported`] when the characteristic cannot
    /// notify, in which case callers fall back to polling.
    async fn subscribe_notify(
        &self,
        characteristic: Uuid,
    ) -> Result<mpsc::Receiver<Vec<u8>>, TransportError>;

    fn connection_status(&self) -> watch::Receiver<bool>;
}

/// Decode a little-endian i32 at the given byte offset, if the payload
/// is long enough.
pub fn i32_le_at(payload: &[u8], offset: usize) -> Option<i32> {
    let bytes = payload.get(offset..offset + 4)?;
    Some(i32::from_le_bytes(bytes.try_into().ok()?))
}

pub fn encode_i32(value: i32) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

pub fn encode_coefficient(numerator: i32, denominator: i32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8);
    payload.extend_from_slice(&numerator.to_le_bytes());
    payload.extend_from_slice(&denominator.to_le_bytes());
    payload
}
