use std::collections::VecDeque;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;

/// A value stamped with its arrival time.
#[derive(Debug, Clone, PartialEq)]
pub struct Timestamped<T> {
    pub value: T,
    pub at: OffsetDateTime,
}

impl<T> Timestamped<T> {
    pub fn now(value: T) -> Self {
        Self {
            value,
            at: OffsetDateTime::now_utc(),
        }
    }
}

/// Change feed emitted by a [`History`].
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEvent<T> {
    /// Entry appended at `index`.
    Add { index: usize, value: T },
    /// Entry evicted from `index`.
    Remove { index: usize },
    /// Window contents shifted; consumers should take a fresh snapshot.
    Refreshed,
}

/// Replay buffer over a stream of values.
///
/// Two retention policies exist: [`History::bounded`] keeps the most recent
/// `max` entries and reports per-index changes, [`History::windowed`] evicts
/// entries an age predicate rejects, re-checked on every insert and on an
/// external tick stream. Snapshots and the feeding pump share one lock, so
/// `history` always observes a consistent state.
pub struct History<T> {
    entries: Arc<Mutex<VecDeque<T>>>,
    events: broadcast::Sender<HistoryEvent<T>>,
    pump: JoinHandle<()>,
}

impl<T: Clone + Send + 'static> History<T> {
    /// Keep the most recent `max` values from `source`.
    pub fn bounded(mut source: mpsc::UnboundedReceiver<T>, max: usize) -> Self {
        let entries = Arc::new(Mutex::new(VecDeque::with_capacity(max)));
        let (events, _) = broadcast::channel(100);

        let pump = tokio::spawn({
            let entries = entries.clone();
            let events = events.clone();
            async move {
                while let Some(value) = source.recv().await {
                    if max == 0 {
                        continue;
                    }

                    let mut queue = entries.lock().await;
                    if queue.len() == max {
                        queue.pop_front();
                        let _ = events.send(HistoryEvent::Remove { index: 0 });
                    }
                    queue.push_back(value.clone());
                    let index = queue.len() - 1;
                    drop(queue);

                    let _ = events.send(HistoryEvent::Add { index, value });
                }
            }
        });

        Self {
            entries,
            events,
            pump,
        }
    }

    /// Keep values until `expired` rejects them, re-evaluated from the front
    /// on every insert and on every tick.
    pub fn windowed<P>(
        mut source: mpsc::UnboundedReceiver<T>,
        mut ticks: mpsc::UnboundedReceiver<()>,
        expired: P,
    ) -> Self
    where
        P: Fn(&T) -> bool + Send + 'static,
    {
        let entries = Arc::new(Mutex::new(VecDeque::new()));
        let (events, _) = broadcast::channel(100);

        let pump = tokio::spawn({
            let entries = entries.clone();
            let events = events.clone();
            async move {
                loop {
                    let incoming = tokio::select! {
                        value = source.recv() => match value {
                            Some(value) => Some(value),
                            None => break,
                        },
                        tick = ticks.recv() => match tick {
                            Some(()) => None,
                            None => break,
                        },
                    };

                    let mut queue = entries.lock().await;
                    while queue.front().is_some_and(|front| expired(front)) {
                        queue.pop_front();
                    }
                    if let Some(value) = incoming {
                        queue.push_back(value);
                    }
                    drop(queue);

                    let _ = events.send(HistoryEvent::Refreshed);
                }
            }
        });

        Self {
            entries,
            events,
            pump,
        }
    }

    /// Point-in-time copy of the buffered values, oldest first.
    pub async fn history(&self) -> Vec<T> {
        self.entries.lock().await.iter().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HistoryEvent<T>> {
        self.events.subscribe()
    }

    /// Stop consuming the source. Buffered values stay readable.
    pub fn dispose(&self) {
        self.pump.abort();
    }
}

impl<T> Drop for History<T> {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
