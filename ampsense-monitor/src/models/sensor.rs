use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Measurement family a sensor belongs to. Only current sensors carry the
/// full acquisition pipeline; other kinds are tracked for inventory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Current,
    Thermometer,
}

/// Stable identity of a sensor known to the registry.
///
/// `logical_device_id` addresses the peripheral on the transport;
/// `physical_device_id` identifies the enclosing hardware container.
/// Either may be absent for sensors that were registered manually.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorInfo {
    pub id: Uuid,
    pub kind: SensorKind,
    pub name: String,
    pub logical_device_id: Option<String>,
    pub physical_device_id: Option<String>,
    pub location_id: Option<Uuid>,
}
