mod schema;
mod settings;
mod storage;

pub use schema::SchemaManager;
pub use settings::{Database, Logger, Panel, SensorSeed, Settings, Telemetry};
pub use storage::Storage;
