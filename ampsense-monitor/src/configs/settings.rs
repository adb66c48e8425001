use std::error::Error;
use std::path::PathBuf;
use std::{env, fs, io};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{SensorInfo, SensorKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logger {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    pub clean_start: bool,
    pub url: String,
}

/// Electrical limits of the monitored panel, in amps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Panel {
    pub capacity: f32,
    pub warning_alert_current: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Telemetry {
    pub url: String,
}

/// A sensor known ahead of time, registered at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorSeed {
    pub kind: SensorKind,
    pub name: String,
    pub logical_device_id: Option<String>,
    pub physical_device_id: Option<String>,
    pub location_id: Option<Uuid>,
}

impl From<SensorSeed> for SensorInfo {
    fn from(seed: SensorSeed) -> Self {
        SensorInfo {
            id: Uuid::new_v4(),
            kind: seed.kind,
            name: seed.name,
            logical_device_id: seed.logical_device_id,
            physical_device_id: seed.physical_device_id,
            location_id: seed.location_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub logger: Logger,
    pub database: Database,
    pub panel: Panel,
    pub telemetry: Option<Telemetry>,
    #[serde(default)]
    pub sensors: Vec<SensorSeed>,
}

impl Settings {
    pub fn new() -> Result<Self, Box<dyn Error>> {
        let run_mode = env::var("RUN_MODE").unwrap_or("development".into());

        let base: Settings = toml::from_str(&fs::read_to_string("configs/default.toml")?)?;

        let settings: Settings = match fs::read_to_string(format!("configs/{run_mode}.toml")) {
            Ok(overlay) => Self::merge(base, toml::from_str::<toml::Value>(&overlay)?)?,
            Err(_) => base,
        };

        Self::normalize(settings)
    }

    pub fn merge<L, R, T>(left: L, right: R) -> Result<T, Box<dyn Error>>
    where
        L: Serialize,
        R: Serialize,
        T: Serialize + DeserializeOwned,
    {
        let mut left_map = serde_json::to_value(&left)?
            .as_object()
            .map(|map| map.to_owned())
            .ok_or("Failed to serialize left value which is not an object")?;

        let mut right_map = serde_json::to_value(&right)?
            .as_object()
            .map(|map| map.to_owned())
            .ok_or("Failed to serialize right value which is not an object")?;

        right_map.retain(|_, v| !v.is_null());
        left_map.extend(right_map);

        let value = serde_json::to_value(&left_map)?;

        Ok(serde_json::from_value(value)?)
    }

    /// Resolve relative sqlite file paths against the working directory
    /// so the daemon behaves the same regardless of where it was started.
    fn normalize(mut settings: Settings) -> Result<Self, Box<dyn Error>> {
        if let Some(rest) = settings.database.url.strip_prefix("sqlite://") {
            let (path, query) = match rest.split_once('?') {
                Some((path, query)) => (path, Some(query)),
                None => (rest, None),
            };

            if path != ":memory:" {
                let normalized = Self::normalize_path(path)?.to_string_lossy().to_string();
                settings.database.url = match query {
                    Some(query) => format!("sqlite://{normalized}?{query}"),
                    None => format!("sqlite://{normalized}"),
                };
            }
        }

        Ok(settings)
    }

    fn normalize_path(path: &str) -> io::Result<PathBuf> {
        let path_buf = PathBuf::from(path);

        Ok(if path_buf.is_absolute() {
            path_buf.clone()
        } else {
            env::current_dir()?.as_path().join(&path_buf)
        })
    }
}
