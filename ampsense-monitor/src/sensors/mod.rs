mod device;
mod registry;
mod sensor;

pub use device::{AVERAGE_TO_RMS, Coefficient, SensorDevice};
pub use registry::{RegistryEvent, SensorRegistry};
pub use sensor::CurrentSensor;
