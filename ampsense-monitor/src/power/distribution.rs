use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::{SensorInfo, SensorKind};
use crate::observe::{Property, combine_latest, pipe};
use crate::sensors::{CurrentSensor, RegistryEvent, SensorRegistry};
use crate::transport::Transport;

/// Rated panel capacity in amps, used when no configuration is given.
pub const DEFAULT_CAPACITY: f32 = 30.0;

const WARNING_RATIO: f32 = 0.75;

struct Member {
    sensor: Arc<CurrentSensor>,
    forward: JoinHandle<()>,
}

/// Live view over every registered current sensor.
///
/// Membership mirrors the registry. Each member contributes its latest
/// reading to `total_current`; sensors that have not produced a reading
/// yet contribute nothing rather than zero, so a panel with unbound
/// sensors reports the sum of what it can actually see.
pub struct PowerDistribution {
    capacity: Property<f32>,
    warning_alert_current: Property<f32>,
    total_current: Property<f32>,
    is_warning: Property<bool>,
    is_critical: Property<bool>,
    members: Mutex<HashMap<Uuid, Member>>,
    values: Arc<std::sync::Mutex<HashMap<Uuid, Option<f32>>>>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl PowerDistribution {
    pub async fn new(registry: Arc<SensorRegistry>, transport: Arc<dyn Transport>) -> Arc<Self> {
        Self::with_capacity(registry, transport, DEFAULT_CAPACITY, None).await
    }

    /// Build the distribution with explicit limits. The warning limit
    /// defaults to three quarters of capacity.
    pub async fn with_capacity(
        registry: Arc<SensorRegistry>,
        transport: Arc<dyn Transport>,
        capacity: f32,
        warning_alert_current: Option<f32>,
    ) -> Arc<Self> {
        let warning = warning_alert_current.unwrap_or(capacity * WARNING_RATIO);

        let capacity = Property::new(capacity);
        let warning_alert_current = Property::new(warning);
        let total_current = Property::new(0.0f32);
        let is_warning = Property::new(false);
        let is_critical = Property::new(false);

        let (warning_rx, warning_task) = combine_latest(
            total_current.watch(),
            warning_alert_current.watch(),
            |total, limit| total >= limit,
        );
        let warning_pipe = pipe(warning_rx, is_warning.clone());

        let (critical_rx, critical_task) = combine_latest(
            total_current.watch(),
            capacity.watch(),
            |total, limit| total >= limit,
        );
        let critical_pipe = pipe(critical_rx, is_critical.clone());

        let distribution = Arc::new(Self {
            capacity,
            warning_alert_current,
            total_current,
            is_warning,
            is_critical,
            members: Mutex::new(HashMap::new()),
            values: Arc::new(std::sync::Mutex::new(HashMap::new())),
            tasks: std::sync::Mutex::new(vec![
                warning_task,
                warning_pipe,
                critical_task,
                critical_pipe,
            ]),
            disposed: AtomicBool::new(false),
        });

        // The mirror task keeps the distribution alive until dispose.
        let mirror_task = {
            let distribution = distribution.clone();
            tokio::spawn(async move {
                distribution.mirror_registry(registry, transport).await;
            })
        };

        if let Ok(mut tasks) = distribution.tasks.lock() {
            tasks.push(mirror_task);
        }

        distribution
    }

    async fn mirror_registry(
        &self,
        registry: Arc<SensorRegistry>,
        transport: Arc<dyn Transport>,
    ) {
        // Subscribe before the initial snapshot so nothing registered in
        // between is missed; duplicates are absorbed by add_member.
        let mut events = registry.subscribe();

        for info in registry.current_sensors().await {
            self.add_member(&transport, info).await;
        }

        loop {
            match events.recv().await {
                Ok(RegistryEvent::Added(info)) => {
                    if info.kind == SensorKind::Current {
                        self.add_member(&transport, info).await;
                    }
                }
                Ok(RegistryEvent::Removed(info)) => self.remove_member(info.id).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "registry events lagged, resynchronizing");
                    self.resync(&transport, &registry).await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn add_member(&self, transport: &Arc<dyn Transport>, info: SensorInfo) {
        let mut members = self.members.lock().await;
        if members.contains_key(&info.id) {
            return;
        }

        tracing::debug!(sensor = %info.name, id = %info.id, "sensor joined distribution");

        let id = info.id;
        let sensor = CurrentSensor::spawn(transport.clone(), info);

        if let Ok(mut values) = self.values.lock() {
            values.insert(id, None);
        }
        self.recompute();

        let forward = {
            let mut source = sensor.watch_current();
            let values = self.values.clone();
            let total = self.total_current.clone();
            tokio::spawn(async move {
                loop {
                    if source.changed().await.is_err() {
                        break;
                    }
                    let value = *source.borrow_and_update();

                    {
                        let Ok(mut slots) = values.lock() else { break };
                        match slots.get_mut(&id) {
                            Some(slot) => *slot = value,
                            None => break,
                        }
                    }

                    recompute_total(&values, &total);
                }
            })
        };

        members.insert(id, Member { sensor, forward });
    }

    async fn remove_member(&self, id: Uuid) {
        let member = self.members.lock().await.remove(&id);
        let Some(member) = member else { return };

        tracing::debug!(sensor = %member.sensor.info().name, %id, "sensor left distribution");

        member.forward.abort();
        let _ = member.forward.await;
        member.sensor.dispose().await;

        if let Ok(mut values) = self.values.lock() {
            values.remove(&id);
        }
        self.recompute();
    }

    /// Bring membership back in line with the registry after losing
    /// events.
    async fn resync(&self, transport: &Arc<dyn Transport>, registry: &Arc<SensorRegistry>) {
        let desired = registry.current_sensors().await;

        let stale: Vec<Uuid> = {
            let members = self.members.lock().await;
            members
                .keys()
                .filter(|id| !desired.iter().any(|info| info.id == **id))
                .copied()
                .collect()
        };
        for id in stale {
            self.remove_member(id).await;
        }

        for info in desired {
            self.add_member(transport, info).await;
        }
    }

    fn recompute(&self) {
        recompute_total(&self.values, &self.total_current);
    }

    pub fn set_capacity(&self, capacity: f32) {
        self.capacity.set(capacity);
    }

    pub fn set_warning_alert_current(&self, limit: f32) {
        self.warning_alert_current.set(limit);
    }

    pub fn capacity(&self) -> f32 {
        self.capacity.get()
    }

    pub fn warning_alert_current(&self) -> f32 {
        self.warning_alert_current.get()
    }

    /// Sum of the latest readings of every member with one, in amps.
    pub fn total_current(&self) -> f32 {
        self.total_current.get()
    }

    pub fn is_warning(&self) -> bool {
        self.is_warning.get()
    }

    pub fn is_critical(&self) -> bool {
        self.is_critical.get()
    }

    pub fn watch_total_current(&self) -> watch::Receiver<f32> {
        self.total_current.watch()
    }

    pub fn watch_is_warning(&self) -> watch::Receiver<bool> {
        self.is_warning.watch()
    }

    pub fn watch_is_critical(&self) -> watch::Receiver<bool> {
        self.is_critical.watch()
    }

    pub async fn member_count(&self) -> usize {
        self.members.lock().await.len()
    }

    /// Tear down members first, then the derivation tasks. Safe to call
    /// more than once.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::debug!("power distribution disposed");

        let members: Vec<Member> = {
            let mut members = self.members.lock().await;
            members.drain().map(|(_, member)| member).collect()
        };
        for member in members {
            member.forward.abort();
            let _ = member.forward.await;
            member.sensor.dispose().await;
        }

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

fn recompute_total(
    values: &std::sync::Mutex<HashMap<Uuid, Option<f32>>>,
    total: &Property<f32>,
) {
    if let Ok(values) = values.lock() {
        let sum: f32 = values.values().flatten().sum();
        total.set(sum);
    }
}
