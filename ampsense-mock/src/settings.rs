use std::error::Error;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logger {
    pub level: String,
}

/// Pace and failure shape of the simulated day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Simulated seconds that pass per real second.
    pub time_scale: f64,
    /// Real seconds between samples.
    pub sample_interval: u64,
    /// Chance per sample that a sensor drops its link.
    pub flap_probability: f64,
    /// Real seconds a dropped sensor stays offline.
    pub outage_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockSensor {
    pub name: String,
    pub device_id: String,
    /// Peak draw at the top of the daily load curve, in amps.
    pub peak_amps: f64,
    /// Calibration ratio the device reports, numerator then denominator.
    pub coefficient: (i32, i32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub logger: Logger,
    pub scenario: Scenario,
    pub sensors: Vec<MockSensor>,
}

impl Settings {
    pub fn new() -> Result<Self, Box<dyn Error>> {
        let settings: Settings = toml::from_str(include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../",
            "configs/mock.toml"
        )))?;

        Ok(settings)
    }
}
