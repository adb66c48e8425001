use std::sync::Arc;
use std::time::Duration;

use ampsense_monitor::configs::{
    Database, Logger as MonitorLogger, Panel, SensorSeed, Settings as MonitorSettings,
};
use ampsense_monitor::models::SensorKind;
use ampsense_monitor::power::DEFAULT_CAPACITY;
use ampsense_monitor::transport::{
    COEFFICIENT_CHARACTERISTIC, CURRENT_CHARACTERISTIC, SimulatedDevice, SimulatedTransport,
};
use rand_distr::{Distribution, Normal};
use tokio::time;

use crate::settings::Settings;
use crate::simulate::{daily_load_factor, raw_for_amps};

pub mod settings;
mod simulate;

/// Run the full monitor against scripted peripherals that follow a
/// household load curve, with random link drops thrown in.
pub async fn run(settings: &Arc<Settings>) {
    let transport = Arc::new(SimulatedTransport::new());

    let mut devices: Vec<Arc<SimulatedDevice>> = Vec::new();
    for sensor in &settings.sensors {
        let device = transport.add_device(&sensor.device_id, &sensor.name).await;
        device.enable_notify(CURRENT_CHARACTERISTIC);
        device.enable_notify(COEFFICIENT_CHARACTERISTIC);

        let (numerator, denominator) = sensor.coefficient;
        device.set_coefficient(numerator, denominator);

        devices.push(device);
    }

    let monitor_settings = Arc::new(monitor_settings_for(settings));
    let _monitor = {
        let transport = transport.clone();
        tokio::spawn(async move {
            if let Err(e) = ampsense_monitor::run(&monitor_settings, transport).await {
                tracing::error!(error = %e, "monitor exited");
            }
        })
    };

    let scenario = &settings.scenario;
    let step = scenario.sample_interval.max(1);
    let noise = Normal::new(0.0, 0.03).expect("Fail to create noise distribution");

    let mut interval = time::interval(Duration::from_secs(step));
    let mut outages: Vec<u64> = vec![0; settings.sensors.len()];
    let mut elapsed: u64 = 0;

    loop {
        interval.tick().await;
        elapsed += step;

        let simulated_seconds = elapsed as f64 * scenario.time_scale;
        let day_fraction = (simulated_seconds % 86400.0) / 86400.0;
        let factor = daily_load_factor(day_fraction);

        for (index, sensor) in settings.sensors.iter().enumerate() {
            let device = &devices[index];

            if outages[index] > 0 {
                outages[index] = outages[index].saturating_sub(step);
                if outages[index] == 0 {
                    tracing::info!(sensor = %sensor.name, "sensor back online");
                    device.set_connected(true);
                }
                continue;
            }

            if rand::random_bool(scenario.flap_probability) {
                tracing::info!(sensor = %sensor.name, "sensor dropped");
                device.set_connected(false);
                outages[index] = scenario.outage_seconds.max(1);
                continue;
            }

            let jitter = 1.0 + noise.sample(&mut rand::rng());
            let amps = (sensor.peak_amps * factor * jitter).max(0.0);

            let (numerator, denominator) = sensor.coefficient;
            device.push_current(raw_for_amps(amps, numerator, denominator));
        }

        tracing::debug!(day_fraction, factor, "scenario tick");
    }
}

fn monitor_settings_for(settings: &Settings) -> MonitorSettings {
    MonitorSettings {
        logger: MonitorLogger {
            level: settings.logger.level.clone(),
        },
        database: Database {
            clean_start: true,
            url: String::from("sqlite::memory:"),
        },
        panel: Panel {
            capacity: DEFAULT_CAPACITY,
            warning_alert_current: None,
        },
        telemetry: None,
        sensors: settings
            .sensors
            .iter()
            .map(|sensor| SensorSeed {
                kind: SensorKind::Current,
                name: sensor.name.clone(),
                logical_device_id: Some(sensor.device_id.clone()),
                physical_device_id: None,
                location_id: None,
            })
            .collect(),
    }
}
