mod power_record;
mod sensor;

pub use power_record::{PowerRecord, PowerRecordTable};
pub use sensor::{SensorInfo, SensorKind};

pub trait Table: Send + Sync {
    /// The name of the table
    fn name(&self) -> &'static str;

    /// The SQL statement to create the table
    fn create(&self) -> String;

    /// The SQL statement to dispose the table
    fn dispose(&self) -> String;

    /// The dependencies of the table
    fn dependencies(&self) -> Vec<&'static str>;
}
