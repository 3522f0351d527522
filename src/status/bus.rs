use super::{EntityKind, StatusEvent};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::RecvError};

pub const DEFAULT_CAPACITY: usize = 256;

type EntityKey = (EntityKind, String);
type Latest = Arc<RwLock<HashMap<EntityKey, Entry>>>;

struct Entry {
    event: StatusEvent,
    /// Set for final events; the entity leaves the snapshot after this.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Fan-out of status events to any number of subscribers.
///
/// Publishing never blocks and never fails, even with zero subscribers.
#[derive(Clone)]
pub struct StatusBus {
    tx: broadcast::Sender<StatusEvent>,
    latest: Latest,
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl StatusBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            latest: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn publish(&self, event: StatusEvent) {
        self.insert(event, None);
    }

    /// Publish an entity's last event. It stays in the snapshot for
    /// `linger`, then drops out without a `removed` broadcast.
    pub fn publish_final(&self, event: StatusEvent, linger: Duration) {
        self.insert(event, Some(Instant::now() + linger));
    }

    fn insert(&self, event: StatusEvent, expires_at: Option<Instant>) {
        tracing::debug!(
            kind = %event.kind,
            id = %event.id,
            state = %event.state,
            "status"
        );
        // Snapshot update and send happen under one lock so both observe the
        // same per-entity order.
        let mut latest = self
            .latest
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Instant::now();
        latest.retain(|_, entry| entry.is_live(now));
        latest.insert(
            (event.kind, event.id.clone()),
            Entry {
                event: event.clone(),
                expires_at,
            },
        );
        let _ = self.tx.send(event);
    }

    /// Forget an entity and tell subscribers it is gone.
    pub fn retire(&self, kind: EntityKind, id: &str) {
        let mut latest = self
            .latest
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        latest.remove(&(kind, id.to_string()));
        let _ = self.tx.send(StatusEvent::new(kind, id, "removed"));
    }

    /// Latest event per entity, ordered by kind then id.
    pub fn snapshot(&self) -> Vec<StatusEvent> {
        snapshot_of(&self.latest)
    }

    pub fn latest(&self, kind: EntityKind, id: &str) -> Option<StatusEvent> {
        let now = Instant::now();
        self.latest
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&(kind, id.to_string()))
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.event.clone())
    }

    pub fn subscribe(&self) -> StatusSubscription {
        StatusSubscription {
            rx: self.tx.subscribe(),
            latest: Arc::clone(&self.latest),
            backlog: VecDeque::new(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

fn snapshot_of(latest: &Latest) -> Vec<StatusEvent> {
    let latest = latest
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let now = Instant::now();
    let mut events: Vec<StatusEvent> = latest
        .values()
        .filter(|entry| entry.is_live(now))
        .map(|entry| entry.event.clone())
        .collect();
    events.sort_by(|a, b| (a.kind, &a.id).cmp(&(b.kind, &b.id)));
    events
}

/// Receiving end of the bus.
///
/// A subscriber that falls behind does not see the events it missed;
/// instead it is handed the current snapshot, so the latest status per
/// entity always wins.
pub struct StatusSubscription {
    rx: broadcast::Receiver<StatusEvent>,
    latest: Latest,
    backlog: VecDeque<StatusEvent>,
}

impl StatusSubscription {
    /// Next event, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<StatusEvent> {
        loop {
            if let Some(event) = self.backlog.pop_front() {
                return Some(event);
            }
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "status subscriber lagged, resyncing from snapshot");
                    // Drop whatever is still buffered; it is older than the snapshot.
                    self.rx = self.rx.resubscribe();
                    self.backlog.extend(snapshot_of(&self.latest));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
