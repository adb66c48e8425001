use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::configs::Storage;
use crate::models::PowerRecord;
use crate::power::distribution::PowerDistribution;
use crate::power::telemetry::TelemetrySink;
use crate::repositories::PowerRecordRepository;

const RECORD_WINDOW: Duration = Duration::from_secs(5);
const TELEMETRY_WINDOW: Duration = Duration::from_secs(60);
const RECORD_CHANNEL_SIZE: usize = 100;

/// Persists the distribution's total and fans stored records out to
/// subscribers. A storage failure drops the current window and starts a
/// fresh one; the sampling loop itself never stops while the source
/// lives.
pub struct PowerDistributionLogger {
    records: broadcast::Sender<PowerRecord>,
    repository: Arc<PowerRecordRepository>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl PowerDistributionLogger {
    pub fn new(
        distribution: &PowerDistribution,
        storage: Arc<Storage>,
        telemetry: Option<Arc<dyn TelemetrySink>>,
    ) -> Self {
        Self::from_stream(distribution.watch_total_current(), storage, telemetry)
    }

    /// Drive the logger from an arbitrary total current stream.
    pub fn from_stream(
        source: watch::Receiver<f32>,
        storage: Arc<Storage>,
        telemetry: Option<Arc<dyn TelemetrySink>>,
    ) -> Self {
        let repository = Arc::new(PowerRecordRepository::new(storage));
        let (records, _) = broadcast::channel(RECORD_CHANNEL_SIZE);

        let mut tasks = vec![tokio::spawn(record_loop(
            source.clone(),
            repository.clone(),
            records.clone(),
        ))];

        if let Some(sink) = telemetry {
            tasks.push(tokio::spawn(telemetry_loop(source, sink)));
        }

        Self {
            records,
            repository,
            tasks: Mutex::new(tasks),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PowerRecord> {
        self.records.subscribe()
    }

    pub async fn records_in_range(
        &self,
        start_time: OffsetDateTime,
        end_time: OffsetDateTime,
    ) -> Result<Vec<PowerRecord>, sqlx::Error> {
        self.repository
            .find_by_time_range(start_time, end_time)
            .await
    }

    /// Stop the sampling tasks. Safe to call more than once.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::debug!("power logger disposed");

        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => Vec::new(),
        };
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
    }
}

async fn record_loop(
    source: watch::Receiver<f32>,
    repository: Arc<PowerRecordRepository>,
    records: broadcast::Sender<PowerRecord>,
) {
    loop {
        if let Err(e) = record_windows(source.clone(), &repository, &records).await {
            tracing::error!(error = %e, "power record write failed, resubscribing");
        }

        if source.has_changed().is_err() {
            break;
        }
    }
}

async fn record_windows(
    mut source: watch::Receiver<f32>,
    repository: &PowerRecordRepository,
    records: &broadcast::Sender<PowerRecord>,
) -> Result<(), sqlx::Error> {
    let mut window: Vec<f32> = Vec::new();

    let mut ticker = tokio::time::interval(RECORD_WINDOW);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            changed = source.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                window.push(*source.borrow_and_update());
            }
            _ = ticker.tick() => {
                if window.is_empty() {
                    continue;
                }

                let mean = window.iter().sum::<f32>() / window.len() as f32;
                window.clear();

                let record = repository
                    .create(&PowerRecord {
                        id: 0,
                        consumption: mean,
                        time: OffsetDateTime::now_utc(),
                    })
                    .await?;

                tracing::debug!(consumption = record.consumption, "power record persisted");
                let _ = records.send(record);
            }
        }
    }
}

async fn telemetry_loop(source: watch::Receiver<f32>, sink: Arc<dyn TelemetrySink>) {
    loop {
        if let Err(e) = telemetry_windows(source.clone(), sink.as_ref()).await {
            tracing::warn!(error = %e, "telemetry push failed, resubscribing");
        }

        if source.has_changed().is_err() {
            break;
        }
    }
}

async fn telemetry_windows(
    mut source: watch::Receiver<f32>,
    sink: &dyn TelemetrySink,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut window: Vec<f32> = Vec::new();

    let mut ticker = tokio::time::interval(TELEMETRY_WINDOW);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            changed = source.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                window.push(*source.borrow_and_update());
            }
            _ = ticker.tick() => {
                if window.is_empty() {
                    continue;
                }

                let mean = window.iter().sum::<f32>() / window.len() as f32;
                window.clear();

                sink.send(serde_json::json!({ "consumption": mean })).await?;
                tracing::debug!(consumption = mean, "telemetry pushed");
            }
        }
    }
}
