use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::configs::{SchemaManager, Settings, Storage};
use crate::observe::{History, Timestamped};
use crate::power::{HttpTelemetrySink, PowerDistribution, PowerDistributionLogger, TelemetrySink};
use crate::sensors::SensorRegistry;
use crate::transport::Transport;

pub mod configs;
pub mod errors;
pub mod models;
pub mod observe;
pub mod power;
pub mod repositories;
pub mod sensors;
pub mod transport;

const LIVE_WINDOW: time::Duration = time::Duration::seconds(60);
const STATUS_INTERVAL: Duration = Duration::from_secs(10);

/// Wire the pipeline over the given transport and run until interrupted.
pub async fn run(settings: &Arc<Settings>, transport: Arc<dyn Transport>) -> anyhow::Result<()> {
    let storage = Arc::new(
        Storage::new(settings.database.clone(), SchemaManager::default()).await?,
    );

    let registry = Arc::new(SensorRegistry::new());
    for seed in &settings.sensors {
        if let Err(e) = registry.register(seed.clone().into()).await {
            tracing::warn!(sensor = %seed.name, error = %e, "skipping seed sensor");
        }
    }

    let distribution = PowerDistribution::with_capacity(
        registry.clone(),
        transport.clone(),
        settings.panel.capacity,
        settings.panel.warning_alert_current,
    )
    .await;

    let telemetry = settings
        .telemetry
        .as_ref()
        .map(|t| Arc::new(HttpTelemetrySink::new(t.url.clone())) as Arc<dyn TelemetrySink>);
    let logger = PowerDistributionLogger::new(&distribution, storage.clone(), telemetry);

    // Rolling one minute of total readings, kept fresh by a ticker so
    // entries age out even when the panel is quiet.
    let (live_tx, live_rx) = mpsc::unbounded_channel();
    let (tick_tx, tick_rx) = mpsc::unbounded_channel();
    let live = History::windowed(live_rx, tick_rx, |entry: &Timestamped<f32>| {
        OffsetDateTime::now_utc() - entry.at > LIVE_WINDOW
    });

    let feeder = {
        let mut source = distribution.watch_total_current();
        tokio::spawn(async move {
            while source.changed().await.is_ok() {
                let value = *source.borrow_and_update();
                if live_tx.send(Timestamped::now(value)).is_err() {
                    break;
                }
            }
        })
    };

    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            if tick_tx.send(()).is_err() {
                break;
            }
        }
    });

    tracing::info!(
        capacity = settings.panel.capacity,
        sensors = settings.sensors.len(),
        "power monitor started"
    );

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    status.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
            _ = status.tick() => {
                let total = distribution.total_current();
                let warning = distribution.is_warning();
                let critical = distribution.is_critical();
                let window = live.history().await.len();
                tracing::info!(total, warning, critical, window, "panel status");
            }
        }
    }

    feeder.abort();
    ticker.abort();
    live.dispose();
    logger.dispose().await;
    distribution.dispose().await;

    Ok(())
}
