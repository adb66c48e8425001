#[derive(Debug, thiserror::Error)]
pub enum BindError {
    /// The identity carries no usable device address, or the peripheral
    /// could not be resolved.
    #[error("Sensor device not found")]
    NotFound,

    #[error("Bind cancelled before completion")]
    Cancelled,

    #[error("Sensor does not measure current")]
    InvalidKind,
}
