#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("A discovery sweep is already running")]
    Busy,

    #[error("Sensor is already registered")]
    Duplicate,

    #[error("Sensor not found in registry")]
    NotFound,
}
