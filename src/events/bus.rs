use crate::events::event::ChangeEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// What `publish` does when a subscriber's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Wait until the subscriber makes room. The publisher stalls for as long
    /// as the slowest subscriber needs.
    Block,
    /// Shed the event for that subscriber only; the session stays registered.
    DropEvent,
    /// Wait up to `slow_grace`, then unregister the subscriber so one stalled
    /// viewer cannot hold up fan-out for the rest.
    DisconnectSlow,
}

/// Event bus tuning knobs.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Per-subscriber queue capacity.
    pub capacity: usize,
    /// How long `DisconnectSlow` waits before giving up on a full queue.
    pub slow_grace: Duration,
    pub policy: OverflowPolicy,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            slow_grace: Duration::from_millis(100),
            policy: OverflowPolicy::DisconnectSlow,
        }
    }
}

struct Slot {
    id: u64,
    tx: mpsc::Sender<ChangeEvent>,
}

type Registry = Arc<Mutex<Vec<Slot>>>;

/// Process-wide fan-out of [`ChangeEvent`]s.
///
/// Every subscriber owns a dedicated bounded queue, so each receives its own
/// lossless, FIFO copy of the stream and drains it at its own pace. Deliveries
/// are serialized internally, which gives all subscribers the same total event
/// order. There is no replay: a session only sees events published while it is
/// registered.
pub struct EventBus {
    registry: Registry,
    delivery: tokio::sync::Mutex<()>,
    config: BusConfig,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Vec::new())),
            delivery: tokio::sync::Mutex::new(()),
            config,
            next_id: AtomicU64::new(0),
        }
    }

    /// Registers a new session and returns its receiving half.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.config.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        // A poisoned registry means a publisher panicked; the subscription is
        // still handed out but will never receive anything.
        if let Ok(mut registry) = self.registry.lock() {
            registry.push(Slot { id, tx });
        }

        Subscription {
            id,
            rx: Some(rx),
            registry: Arc::clone(&self.registry),
        }
    }

    /// Delivers `event` to every session registered at this moment.
    ///
    /// Queue overflow is resolved per the configured [`OverflowPolicy`] and is
    /// never surfaced to the caller: notification is best-effort relative to
    /// the persisted state that triggered it. Sessions found closed are
    /// unregistered along the way.
    pub async fn publish(&self, event: ChangeEvent) {
        let _ordered = self.delivery.lock().await;

        let targets: Vec<(u64, mpsc::Sender<ChangeEvent>)> = match self.registry.lock() {
            Ok(registry) => registry.iter().map(|s| (s.id, s.tx.clone())).collect(),
            Err(_) => return,
        };

        tracing::debug!(
            kind = ?event.kind,
            subscribers = targets.len(),
            "publishing change event"
        );

        let mut dead = Vec::new();
        for (id, tx) in &targets {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Closed(_)) => dead.push(*id),
                Err(TrySendError::Full(ev)) => match self.config.policy {
                    OverflowPolicy::Block => {
                        if tx.send(ev).await.is_err() {
                            dead.push(*id);
                        }
                    }
                    OverflowPolicy::DropEvent => {
                        tracing::warn!(subscriber = *id, "subscriber queue full, shedding event");
                    }
                    OverflowPolicy::DisconnectSlow => {
                        match tokio::time::timeout(self.config.slow_grace, tx.send(ev)).await {
                            Ok(Ok(())) => {}
                            _ => {
                                tracing::warn!(
                                    subscriber = *id,
                                    "subscriber queue full past grace, unregistering"
                                );
                                dead.push(*id);
                            }
                        }
                    }
                },
            }
        }

        if !dead.is_empty() {
            if let Ok(mut registry) = self.registry.lock() {
                registry.retain(|s| !dead.contains(&s.id));
            }
        }
    }

    /// Number of currently registered sessions.
    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().map(|r| r.len()).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

/// One live viewer's channel into the [`EventBus`].
pub struct Subscription {
    id: u64,
    rx: Option<mpsc::Receiver<ChangeEvent>>,
    registry: Registry,
}

impl Subscription {
    /// Waits for the next event.
    ///
    /// Returns `None` once the session is closed and its queue is drained.
    /// Cancellation-safe: dropping the future loses no event.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Unregisters from the bus and discards anything still queued.
    ///
    /// Idempotent; also runs on drop, so a disconnected viewer releases its
    /// registration without further publishes being attempted against it.
    pub fn close(&mut self) {
        if self.rx.take().is_some() {
            if let Ok(mut registry) = self.registry.lock() {
                registry.retain(|s| s.id != self.id);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}
