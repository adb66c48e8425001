#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Device not found")]
    DeviceNotFound,

    #[error("Notifications not supported")]
    NotSupported,

    #[error("Transport operation failed: {0}")]
    Failed(String),
}
