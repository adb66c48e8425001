use std::sync::Arc;

use ampsense_monitor::configs::Settings;
use ampsense_monitor::run;
use ampsense_monitor::transport::{CURRENT_CHARACTERISTIC, SimulatedTransport, encode_i32};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Arc::new(Settings::new().expect("Failed to load settings."));

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let app_name = env!("CARGO_PKG_NAME").replace('-', "_");
            let level = settings.logger.level.as_str();

            format!("{app_name}={level}").into()
        }))
        .init();

    // Stand-in peripherals until a radio transport lands. Each seeded
    // sensor gets a device holding a steady raw value; with notifications
    // left off the pipeline exercises the polled read path.
    let transport = Arc::new(SimulatedTransport::new());
    for seed in &settings.sensors {
        if let Some(device_id) = &seed.logical_device_id {
            let device = transport.add_device(device_id, &seed.name).await;
            device.set_coefficient(1, 100);
            device.put_characteristic(CURRENT_CHARACTERISTIC, encode_i32(900));
        }
    }

    run(&settings, transport).await
}
