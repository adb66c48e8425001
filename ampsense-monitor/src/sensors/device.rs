use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::errors::BindError;
use crate::models::{SensorInfo, SensorKind};
use crate::observe::{Property, debounce};
use crate::transport::{
    COEFFICIENT_CHARACTERISTIC, CURRENT_CHARACTERISTIC, CURRENT_SENSOR_SERVICE, CacheMode,
    DEVICE_INFORMATION_SERVICE, FIRMWARE_REVISION_CHARACTERISTIC,
    HARDWARE_REVISION_CHARACTERISTIC, ServiceHandle, Transport, i32_le_at,
};

/// Converts a mean of rectified samples into an RMS amplitude, assuming a
/// sinusoidal waveform.
pub const AVERAGE_TO_RMS: f32 = std::f32::consts::PI / (2.0 * std::f32::consts::SQRT_2);

const CONNECTION_DEBOUNCE: Duration = Duration::from_millis(500);
const COEFFICIENT_POLL_INTERVAL: Duration = Duration::from_secs(120);
const CURRENT_POLL_INTERVAL: Duration = Duration::from_secs(10);
const AVERAGING_WINDOW: Duration = Duration::from_secs(1);

static TRACE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_trace_id() -> u64 {
    TRACE_COUNTER.fetch_add(1, Ordering::Relaxed) + 1
}

/// Calibration ratio published by the peripheral. Raw samples are scaled
/// by `numerator / denominator` after the RMS conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coefficient {
    pub numerator: i32,
    pub denominator: i32,
}

impl Coefficient {
    /// Neutral ratio used until the peripheral reports one, and again
    /// whenever the link drops.
    pub const IDENTITY: Coefficient = Coefficient {
        numerator: 1,
        denominator: 1,
    };

    /// Decode from an 8 byte payload. Short payloads and zero denominators
    /// fall back to [`Coefficient::IDENTITY`] rather than poisoning the
    /// scaling chain.
    pub fn from_payload(payload: &[u8]) -> Self {
        match (i32_le_at(payload, 0), i32_le_at(payload, 4)) {
            (Some(numerator), Some(denominator)) if denominator != 0 => Coefficient {
                numerator,
                denominator,
            },
            _ => Coefficient::IDENTITY,
        }
    }

    /// Scale a raw sample into amps.
    pub fn apply(self, raw: i32) -> f32 {
        raw as f32 * AVERAGE_TO_RMS * self.numerator as f32 / self.denominator as f32
    }
}

/// A bound current sensing peripheral with its acquisition pipeline
/// running. Created through [`SensorDevice::bind`]; the pipeline stops on
/// [`SensorDevice::dispose`] or drop.
pub struct SensorDevice {
    trace_id: u64,
    info: SensorInfo,
    service: Arc<dyn ServiceHandle>,
    is_connected: Property<bool>,
    raw_current: Property<i32>,
    current: Property<Option<f32>>,
    coefficient: Property<Coefficient>,
    hardware_revision: Property<String>,
    firmware_revision: Property<String>,
    recheck: mpsc::UnboundedSender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl SensorDevice {
    /// Resolve the peripheral, open its current sensing service and start
    /// the acquisition tasks.
    ///
    /// Fails with [`BindError::InvalidKind`] for non current sensors and
    /// [`BindError::NotFound`] when the identity carries no usable address
    /// or the peripheral cannot be resolved.
    pub async fn bind(
        transport: Arc<dyn Transport>,
        info: &SensorInfo,
    ) -> Result<Arc<Self>, BindError> {
        if info.kind != SensorKind::Current {
            return Err(BindError::InvalidKind);
        }

        let device_id = info.logical_device_id.as_deref().ok_or(BindError::NotFound)?;

        let trace_id = next_trace_id();
        tracing::debug!(trace_id, device_id, "binding current sensor");

        let resolved = transport
            .device_info(device_id)
            .await
            .map_err(|_| BindError::NotFound)?;
        let service: Arc<dyn ServiceHandle> = Arc::from(
            transport
                .bind_service(&resolved.id, CURRENT_SENSOR_SERVICE)
                .await
                .map_err(|_| BindError::NotFound)?,
        );

        let is_connected = Property::new(false);
        let raw_current = Property::new(0);
        let current = Property::new(None);
        let coefficient = Property::new(Coefficient::IDENTITY);
        let hardware_revision = Property::new(String::new());
        let firmware_revision = Property::new(String::new());

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (recheck_tx, recheck_rx) = mpsc::unbounded_channel();

        let (debounced_rx, debounce_task) =
            debounce(service.connection_status(), CONNECTION_DEBOUNCE);

        let connectivity_task = tokio::spawn(connectivity_loop(
            debounced_rx.clone(),
            recheck_rx,
            service.connection_status(),
            LinkOutputs {
                is_connected: is_connected.clone(),
                raw_current: raw_current.clone(),
                coefficient: coefficient.clone(),
                raw_tx: raw_tx.clone(),
                trace_id,
            },
        ));

        let coefficient_task = {
            let coefficient = coefficient.clone();
            tokio::spawn(run_lane(
                service.clone(),
                COEFFICIENT_CHARACTERISTIC,
                COEFFICIENT_POLL_INTERVAL,
                debounced_rx.clone(),
                move |payload| coefficient.set(Coefficient::from_payload(&payload)),
            ))
        };

        let current_task = {
            let raw_current = raw_current.clone();
            let raw_tx = raw_tx.clone();
            tokio::spawn(run_lane(
                service.clone(),
                CURRENT_CHARACTERISTIC,
                CURRENT_POLL_INTERVAL,
                debounced_rx,
                move |payload| match i32_le_at(&payload, 0) {
                    Some(sample) => {
                        tracing::trace!(trace_id, sample, "current sample");
                        raw_current.set(sample);
                        let _ = raw_tx.send(sample);
                    }
                    None => tracing::debug!(trace_id, "short current payload dropped"),
                },
            ))
        };

        let join_task = tokio::spawn(join_loop(
            raw_rx,
            coefficient.watch(),
            current.clone(),
            trace_id,
        ));

        // The device owns the task handles from here on, so an early drop
        // (a cancelled bind) still tears the pipeline down.
        let device = Arc::new(Self {
            trace_id,
            info: info.clone(),
            service,
            is_connected,
            raw_current,
            current,
            coefficient,
            hardware_revision,
            firmware_revision,
            recheck: recheck_tx,
            tasks: Mutex::new(vec![
                debounce_task,
                connectivity_task,
                coefficient_task,
                current_task,
                join_task,
            ]),
            disposed: AtomicBool::new(false),
        });

        device.read_revisions(&transport, &resolved.id).await;

        // A read against the live service provokes a connection attempt on
        // transports that connect lazily. The value itself is discarded;
        // data flows through the notify and poll lanes.
        if let Err(e) = device
            .service
            .read_characteristic(CURRENT_CHARACTERISTIC, CacheMode::Uncached)
            .await
        {
            tracing::debug!(trace_id, error = %e, "initial current read failed");
        }

        let _ = device.recheck.send(());

        Ok(device)
    }

    async fn read_revisions(&self, transport: &Arc<dyn Transport>, device_id: &str) {
        let info_service = match transport
            .bind_service(device_id, DEVICE_INFORMATION_SERVICE)
            .await
        {
            Ok(service) => service,
            Err(e) => {
                tracing::debug!(
                    trace_id = self.trace_id,
                    error = %e,
                    "device information service unavailable"
                );
                return;
            }
        };

        match info_service
            .read_characteristic(HARDWARE_REVISION_CHARACTERISTIC, CacheMode::Cached)
            .await
        {
            Ok(payload) => self
                .hardware_revision
                .set(String::from_utf8_lossy(&payload).into_owned()),
            Err(e) => {
                tracing::debug!(trace_id = self.trace_id, error = %e, "hardware revision read failed")
            }
        }

        match info_service
            .read_characteristic(FIRMWARE_REVISION_CHARACTERISTIC, CacheMode::Cached)
            .await
        {
            Ok(payload) => self
                .firmware_revision
                .set(String::from_utf8_lossy(&payload).into_owned()),
            Err(e) => {
                tracing::debug!(trace_id = self.trace_id, error = %e, "firmware revision read failed")
            }
        }
    }

    pub fn info(&self) -> &SensorInfo {
        &self.info
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected.get()
    }

    pub fn watch_is_connected(&self) -> watch::Receiver<bool> {
        self.is_connected.watch()
    }

    pub fn raw_current(&self) -> i32 {
        self.raw_current.get()
    }

    pub fn watch_raw_current(&self) -> watch::Receiver<i32> {
        self.raw_current.watch()
    }

    /// Mean current over the last non-empty averaging window, in amps.
    /// `None` until the first window closes.
    pub fn current(&self) -> Option<f32> {
        self.current.get()
    }

    pub fn watch_current(&self) -> watch::Receiver<Option<f32>> {
        self.current.watch()
    }

    pub fn coefficient(&self) -> Coefficient {
        self.coefficient.get()
    }

    pub fn watch_coefficient(&self) -> watch::Receiver<Coefficient> {
        self.coefficient.watch()
    }

    pub fn hardware_revision(&self) -> String {
        self.hardware_revision.get()
    }

    pub fn firmware_revision(&self) -> String {
        self.firmware_revision.get()
    }

    /// Stop the acquisition tasks. Safe to call more than once.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::debug!(trace_id = self.trace_id, "sensor device disposed");

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

impl Drop for SensorDevice {
    fn drop(&mut self) {
        if let Ok(tasks) = self.tasks.lock() {
            for task in tasks.iter() {
                task.abort();
            }
        }
    }
}

/// Pipeline ends the connectivity task writes into.
struct LinkOutputs {
    is_connected: Property<bool>,
    raw_current: Property<i32>,
    coefficient: Property<Coefficient>,
    raw_tx: mpsc::UnboundedSender<i32>,
    trace_id: u64,
}

/// Tracks the debounced link state and applies transition side effects.
/// A drop to disconnected pushes one zero sample and resets the
/// calibration so the averaged output decays instead of freezing.
async fn connectivity_loop(
    mut debounced_rx: watch::Receiver<bool>,
    mut recheck_rx: mpsc::UnboundedReceiver<()>,
    status_rx: watch::Receiver<bool>,
    outputs: LinkOutputs,
) {
    let mut was_connected = false;

    loop {
        let connected = tokio::select! {
            changed = debounced_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                *debounced_rx.borrow_and_update()
            }
            recheck = recheck_rx.recv() => {
                if recheck.is_none() {
                    break;
                }
                // Rechecks bypass the debounce and sample the live state.
                *status_rx.borrow()
            }
        };

        if connected != was_connected {
            if connected {
                tracing::info!(trace_id = outputs.trace_id, "sensor connected");
            } else {
                tracing::info!(trace_id = outputs.trace_id, "sensor disconnected");
            }
        }

        outputs.is_connected.set(connected);

        if was_connected && !connected {
            // Zero first, identity second: the join consumes raw samples
            // ahead of coefficient changes, so the re-emit sees the zero.
            outputs.raw_current.set(0);
            let _ = outputs.raw_tx.send(0);
            outputs.coefficient.set(Coefficient::IDENTITY);
        }

        was_connected = connected;
    }
}

enum LaneExit {
    Disconnected,
    StreamEnded,
    Shutdown,
}

/// One characteristic lane. Waits out disconnected spells, then streams
/// payloads until the link drops again or the pipeline shuts down.
async fn run_lane<F>(
    service: Arc<dyn ServiceHandle>,
    characteristic: Uuid,
    poll_interval: Duration,
    mut connected_rx: watch::Receiver<bool>,
    mut on_payload: F,
) where
    F: FnMut(Vec<u8>),
{
    loop {
        while !*connected_rx.borrow_and_update() {
            if connected_rx.changed().await.is_err() {
                return;
            }
        }

        match stream_characteristic(
            &service,
            characteristic,
            poll_interval,
            &mut connected_rx,
            &mut on_payload,
        )
        .await
        {
            LaneExit::Disconnected | LaneExit::StreamEnded => continue,
            LaneExit::Shutdown => return,
        }
    }
}

/// Stream one characteristic while connected, preferring notifications
/// and falling back to polled reads.
async fn stream_characteristic<F>(
    service: &Arc<dyn ServiceHandle>,
    characteristic: Uuid,
    poll_interval: Duration,
    connected_rx: &mut watch::Receiver<bool>,
    mut on_payload: F,
) -> LaneExit
where
    F: FnMut(Vec<u8>),
{
    match service.subscribe_notify(characteristic).await {
        Ok(mut notifications) => loop {
            tokio::select! {
                changed = connected_rx.changed() => {
                    if changed.is_err() {
                        return LaneExit::Shutdown;
                    }
                    if !*connected_rx.borrow_and_update() {
                        return LaneExit::Disconnected;
                    }
                }
                payload = notifications.recv() => match payload {
                    Some(payload) => on_payload(payload),
                    None => return LaneExit::StreamEnded,
                },
            }
        },
        Err(e) => {
            tracing::debug!(%characteristic, error = %e, "notifications unavailable, polling instead");

            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                tokio::select! {
                    changed = connected_rx.changed() => {
                        if changed.is_err() {
                            return LaneExit::Shutdown;
                        }
                        if !*connected_rx.borrow_and_update() {
                            return LaneExit::Disconnected;
                        }
                    }
                    _ = ticker.tick() => {
                        match service.read_characteristic(characteristic, CacheMode::Uncached).await {
                            Ok(payload) => on_payload(payload),
                            Err(e) => tracing::debug!(%characteristic, error = %e, "characteristic read failed"),
                        }
                    }
                }
            }
        }
    }
}

/// Scales raw samples by the latest coefficient and closes a mean window
/// once per second. Empty windows publish nothing, so the output holds
/// its last value through quiet spells.
async fn join_loop(
    mut raw_rx: mpsc::UnboundedReceiver<i32>,
    mut coefficient_rx: watch::Receiver<Coefficient>,
    current: Property<Option<f32>>,
    trace_id: u64,
) {
    let mut window: Vec<f32> = Vec::new();
    let mut last_raw: Option<i32> = None;

    let mut ticker = tokio::time::interval(AVERAGING_WINDOW);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            // Raw samples drain ahead of coefficient changes so a
            // disconnect zero lands before the identity re-emit.
            biased;

            sample = raw_rx.recv() => {
                let Some(sample) = sample else { break };
                last_raw = Some(sample);
                window.push(coefficient_rx.borrow().apply(sample));
            }
            changed = coefficient_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let coefficient = *coefficient_rx.borrow_and_update();
                if let Some(raw) = last_raw {
                    window.push(coefficient.apply(raw));
                }
            }
            _ = ticker.tick() => {
                if !window.is_empty() {
                    let mean = window.iter().sum::<f32>() / window.len() as f32;
                    current.set(Some(mean));
                    tracing::debug!(trace_id, amps = mean, samples = window.len(), "averaging window closed");
                    window.clear();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::transport::{encode_coefficient, encode_i32};

    #[test]
    fn test_coefficient_zero_denominator_clamps_to_identity() {
        let payload = encode_coefficient(5, 0);
        assert_eq!(Coefficient::from_payload(&payload), Coefficient::IDENTITY);
    }

    #[test]
    fn test_coefficient_short_payload_clamps_to_identity() {
        let payload = encode_i32(5);
        assert_eq!(Coefficient::from_payload(&payload), Coefficient::IDENTITY);
    }

    #[test]
    fn test_coefficient_apply_scales_raw_samples() {
        let coefficient = Coefficient {
            numerator: 100,
            denominator: 1000,
        };

        let amps = coefficient.apply(1000);
        let expected = 100.0 * AVERAGE_TO_RMS;
        assert!(
            (amps - expected).abs() < 1e-3,
            "expected {expected}, got {amps}"
        );
    }
}
