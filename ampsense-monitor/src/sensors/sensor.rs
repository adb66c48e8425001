use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{RwLock, oneshot, watch};
use tokio::task::JoinHandle;

use crate::errors::BindError;
use crate::models::SensorInfo;
use crate::observe::Property;
use crate::sensors::SensorDevice;
use crate::transport::Transport;

/// Registry-facing wrapper around one current sensor.
///
/// The wrapper exists before its peripheral does: [`CurrentSensor::spawn`]
/// returns immediately and binds in the background, so a sensor that never
/// comes up simply reports no reading. The `current` property mirrors the
/// device output once attached.
pub struct CurrentSensor {
    info: SensorInfo,
    current: Property<Option<f32>>,
    device: RwLock<Option<Arc<SensorDevice>>>,
    cancel_tx: Mutex<Option<oneshot::Sender<()>>>,
    bind_task: Mutex<Option<JoinHandle<()>>>,
    forward_task: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl CurrentSensor {
    /// Start binding in the background and return the wrapper right away.
    pub fn spawn(transport: Arc<dyn Transport>, info: SensorInfo) -> Arc<Self> {
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let sensor = Arc::new(Self {
            info,
            current: Property::new(None),
            device: RwLock::new(None),
            cancel_tx: Mutex::new(Some(cancel_tx)),
            bind_task: Mutex::new(None),
            forward_task: Mutex::new(None),
            disposed: AtomicBool::new(false),
        });

        let task = {
            let sensor = sensor.clone();
            tokio::spawn(async move {
                match bind_device(transport, &sensor.info, cancel_rx).await {
                    Ok(device) => sensor.attach(device).await,
                    Err(BindError::Cancelled) => {
                        tracing::debug!(sensor = %sensor.info.name, "bind cancelled");
                    }
                    Err(e) => {
                        tracing::warn!(sensor = %sensor.info.name, error = %e, "bind failed");
                    }
                }
            })
        };

        if let Ok(mut slot) = sensor.bind_task.lock() {
            *slot = Some(task);
        }

        sensor
    }

    /// Bind eagerly, surfacing the failure to the caller.
    pub async fn bind(
        transport: Arc<dyn Transport>,
        info: SensorInfo,
    ) -> Result<Arc<Self>, BindError> {
        let device = SensorDevice::bind(transport, &info).await?;

        let sensor = Arc::new(Self {
            info,
            current: Property::new(None),
            device: RwLock::new(None),
            cancel_tx: Mutex::new(None),
            bind_task: Mutex::new(None),
            forward_task: Mutex::new(None),
            disposed: AtomicBool::new(false),
        });

        sensor.attach(device).await;

        Ok(sensor)
    }

    async fn attach(self: &Arc<Self>, device: Arc<SensorDevice>) {
        let mut source = device.watch_current();
        let current = self.current.clone();
        let forward = tokio::spawn(async move {
            loop {
                let value = *source.borrow_and_update();
                current.set(value);

                if source.changed().await.is_err() {
                    break;
                }
            }
        });

        *self.device.write().await = Some(device);
        if let Ok(mut slot) = self.forward_task.lock() {
            *slot = Some(forward);
        }

        // Dispose may have run while we were attaching; it only tears down
        // what it can see, so finish the job here.
        if self.disposed.load(Ordering::SeqCst) {
            let forward = match self.forward_task.lock() {
                Ok(mut slot) => slot.take(),
                Err(_) => None,
            };
            if let Some(task) = forward {
                task.abort();
            }

            if let Some(device) = self.device.write().await.take() {
                device.dispose().await;
            }
        }
    }

    pub fn info(&self) -> &SensorInfo {
        &self.info
    }

    /// Latest averaged reading in amps, `None` while unbound or before the
    /// first window closes.
    pub fn current(&self) -> Option<f32> {
        self.current.get()
    }

    pub fn watch_current(&self) -> watch::Receiver<Option<f32>> {
        self.current.watch()
    }

    pub async fn device(&self) -> Option<Arc<SensorDevice>> {
        self.device.read().await.clone()
    }

    /// Cancel a pending bind or tear down the bound device. Safe to call
    /// more than once.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Ok(mut slot) = self.cancel_tx.lock() {
            if let Some(cancel) = slot.take() {
                let _ = cancel.send(());
            }
        }

        // Await rather than abort: a bind that already succeeded must
        // finish attaching so the device below is visible to us.
        let bind_task = match self.bind_task.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(task) = bind_task {
            let _ = task.await;
        }

        let forward_task = match self.forward_task.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(task) = forward_task {
            task.abort();
            let _ = task.await;
        }

        if let Some(device) = self.device.write().await.take() {
            device.dispose().await;
        }
    }
}

async fn bind_device(
    transport: Arc<dyn Transport>,
    info: &SensorInfo,
    cancel_rx: oneshot::Receiver<()>,
) -> Result<Arc<SensorDevice>, BindError> {
    tokio::select! {
        result = SensorDevice::bind(transport, info) => result,
        _ = cancel_rx => Err(BindError::Cancelled),
    }
}
