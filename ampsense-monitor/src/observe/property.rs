use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Latest-value publisher for one piece of mutable state.
///
/// Every `set` wakes all watchers, even when the new value equals the old
/// one. Downstream consumers rely on that to re-run window and threshold
/// evaluations on steady inputs.
pub struct Property<T> {
    tx: Arc<watch::Sender<T>>,
}

impl<T> Clone for Property<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Clone> Property<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Publish a new value.
    pub fn set(&self, value: T) {
        self.tx.send_replace(value);
    }

    /// Subscribe to the value stream. A fresh receiver can read the current
    /// value immediately and is woken on the next publish.
    pub fn watch(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

/// Re-emit values from `rx` only once they have held still for `window`.
///
/// The returned receiver starts at the source's current value. The spawned
/// task ends when the source side closes.
pub fn debounce<T>(
    mut rx: watch::Receiver<T>,
    window: Duration,
) -> (watch::Receiver<T>, JoinHandle<()>)
where
    T: Clone + Send + Sync + 'static,
{
    let initial = rx.borrow_and_update().clone();
    let (tx, out) = watch::channel(initial);

    let handle = tokio::spawn(async move {
        loop {
            if rx.changed().await.is_err() {
                break;
            }

            // Absorb further updates until the value holds still.
            loop {
                let pending = rx.borrow_and_update().clone();
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            tx.send_replace(pending);
                            return;
                        }
                    }
                    _ = tokio::time::sleep(window) => {
                        tx.send_replace(pending);
                        break;
                    }
                }
            }
        }
    });

    (out, handle)
}

/// Latest-value join of two streams.
///
/// `f` runs once at subscription time and again whenever either input
/// publishes, always over the freshest pair.
pub fn combine_latest<A, B, R, F>(
    mut a: watch::Receiver<A>,
    mut b: watch::Receiver<B>,
    f: F,
) -> (watch::Receiver<R>, JoinHandle<()>)
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
    F: Fn(&A, &B) -> R + Send + 'static,
{
    let initial = f(&a.borrow_and_update(), &b.borrow_and_update());
    let (tx, out) = watch::channel(initial);

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = a.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = b.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            let value = f(&a.borrow_and_update(), &b.borrow_and_update());
            tx.send_replace(value);
        }
    });

    (out, handle)
}

/// Forward a stream into a property, starting with the stream's current
/// value.
pub fn pipe<T>(mut rx: watch::Receiver<T>, property: Property<T>) -> JoinHandle<()>
where
    T: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        loop {
            let value = rx.borrow_and_update().clone();
            property.set(value);

            if rx.changed().await.is_err() {
                break;
            }
        }
    })
}
