mod distribution;
mod logger;
mod telemetry;

pub use distribution::{DEFAULT_CAPACITY, PowerDistribution};
pub use logger::PowerDistributionLogger;
pub use telemetry::{HttpTelemetrySink, TelemetrySink};
