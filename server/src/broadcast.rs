//! Live event distribution for the Feedgate server.
//!
//! This module holds the set of connected live-event viewers and fans every
//! accepted webhook event out to them.
//!
//! # Architecture
//!
//! - [`EventDistributor`] - owns the subscriber set and the message store
//!   handle; clones share the same set
//! - [`Subscription`] - the receiving half handed to one viewer on
//!   [`join`](EventDistributor::join)
//!
//! Each subscriber gets its own bounded queue. Publishing snapshots the set,
//! serializes the event once, and `try_send`s the same payload to every
//! queue, so a slow or dead viewer never blocks the others or the ingesting
//! caller. Dead viewers are removed when their connection handler calls
//! [`leave`](EventDistributor::leave), never from inside `publish`.
//!
//! Ingested events are written to the store one at a time in ingest order.
//! Each write waits for the previous one, so row ids and timestamps follow
//! arrival order while fan-out never waits on the store.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use feedgate_server::broadcast::EventDistributor;
//! use feedgate_server::store::SqliteMessageStore;
//! use feedgate_server::types::EventRecord;
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SqliteMessageStore::in_memory().await?;
//! let distributor = EventDistributor::new(Arc::new(store));
//!
//! let mut subscription = distributor.join();
//! let _ack = subscription.recv().await;
//!
//! distributor.ingest(EventRecord::new(json!({"for_user_id": "42"})));
//! let payload = subscription.recv().await;
//! assert!(payload.is_some());
//!
//! distributor.leave(subscription.id());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::store::{MessageStore, PersistOutcome};
use crate::types::{ConnectionAck, EventRecord};

/// Default per-subscriber queue capacity.
///
/// This value (1000) provides a balance between memory usage and the ability
/// to handle burst traffic. A viewer that falls this far behind starts
/// missing events instead of slowing anyone else down.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Identifier of a joined subscriber.
pub type SubscriberId = Uuid;

/// Serialized payload as delivered to subscribers.
pub type Payload = Arc<str>;

type SubscriberMap = HashMap<SubscriberId, mpsc::Sender<Payload>>;

/// The receiving side of one live-event subscriber.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<Payload>,
}

impl Subscription {
    /// Returns the subscriber's identifier, used for [`EventDistributor::leave`].
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Waits for the next payload.
    ///
    /// Returns `None` once the subscriber has left and its queue is drained.
    pub async fn recv(&mut self) -> Option<Payload> {
        self.receiver.recv().await
    }

    /// Returns the next payload if one is already queued.
    pub fn try_recv(&mut self) -> Result<Payload, TryRecvError> {
        self.receiver.try_recv()
    }
}

/// Central hub that tracks live subscribers and distributes events.
///
/// `EventDistributor` is `Clone`, `Send`, and `Sync`; clones share the same
/// subscriber set and store.
#[derive(Clone)]
pub struct EventDistributor {
    subscribers: Arc<RwLock<SubscriberMap>>,
    store: Arc<dyn MessageStore>,
    /// Completion signal of the most recently queued write.
    persist_tail: Arc<Mutex<Option<oneshot::Receiver<()>>>>,
    capacity: usize,
}

impl EventDistributor {
    /// Creates a distributor with the default per-subscriber capacity.
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self::with_capacity(store, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a distributor with the given per-subscriber capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn with_capacity(store: Arc<dyn MessageStore>, capacity: usize) -> Self {
        assert!(capacity > 0, "subscriber capacity must be positive");
        debug!(capacity, "Created event distributor");
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            store,
            persist_tail: Arc::new(Mutex::new(None)),
            capacity,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SubscriberMap> {
        self.subscribers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SubscriberMap> {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new subscriber.
    ///
    /// The connection acknowledgment is queued for the new subscriber only,
    /// before it can observe any published event.
    pub fn join(&self) -> Subscription {
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::channel(self.capacity);

        match serde_json::to_string(&ConnectionAck::default()) {
            Ok(ack) => {
                if sender.try_send(Payload::from(ack)).is_err() {
                    warn!(subscriber_id = %id, "Failed to queue connection ack");
                }
            }
            Err(err) => error!(error = %err, "Failed to serialize connection ack"),
        }

        let count = {
            let mut subscribers = self.write();
            subscribers.insert(id, sender);
            subscribers.len()
        };

        info!(subscriber_id = %id, subscriber_count = count, "Live event subscriber joined");

        Subscription { id, receiver }
    }

    /// Removes a subscriber. Returns `false` if it was not registered.
    pub fn leave(&self, id: SubscriberId) -> bool {
        let (removed, count) = {
            let mut subscribers = self.write();
            let removed = subscribers.remove(&id).is_some();
            (removed, subscribers.len())
        };

        if removed {
            info!(subscriber_id = %id, subscriber_count = count, "Live event subscriber left");
        } else {
            trace!(subscriber_id = %id, "Subscriber already removed");
        }

        removed
    }

    /// Delivers an event to every registered subscriber.
    ///
    /// Returns the number of subscribers the event was queued for. Failures
    /// are logged per subscriber and never stop delivery to the rest.
    pub fn publish(&self, event: &EventRecord) -> usize {
        let payload = match serde_json::to_string(event) {
            Ok(json) => Payload::from(json),
            Err(err) => {
                error!(error = %err, "Failed to serialize event for broadcast");
                return 0;
            }
        };

        // Copy-on-iterate: concurrent join/leave never touch this snapshot.
        let targets: Vec<(SubscriberId, mpsc::Sender<Payload>)> = self
            .read()
            .iter()
            .map(|(id, sender)| (*id, sender.clone()))
            .collect();

        trace!(subscriber_count = targets.len(), "Broadcasting event");

        let mut delivered = 0;
        for (id, sender) in targets {
            match sender.try_send(Arc::clone(&payload)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber_id = %id, "Subscriber lagging, dropped event");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber_id = %id, "Subscriber channel closed, awaiting leave");
                }
            }
        }

        delivered
    }

    /// Persists an event and fans it out to live subscribers.
    ///
    /// Persistence runs on its own task so a slow store never delays
    /// delivery; its failures are logged and swallowed. Writes are chained:
    /// each one starts only after the write queued before it has finished
    /// or been aborted. The returned handle completes when this event's
    /// write has finished and can be ignored.
    pub fn ingest(&self, event: EventRecord) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let record = event.clone();
        let (done, finished) = oneshot::channel();
        let previous = self
            .persist_tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(finished);

        let persist_task = tokio::spawn(async move {
            if let Some(previous) = previous {
                // Err means the previous write was aborted; order is kept either way.
                let _ = previous.await;
            }
            match store.persist(&record).await {
                Ok(PersistOutcome::Stored { id, user_id }) => {
                    trace!(id, user_id = %user_id, "Event persisted");
                }
                Ok(PersistOutcome::Skipped) => {}
                Err(err) => error!(error = %err, "Failed to persist event"),
            }
            let _ = done.send(());
        });

        let delivered = self.publish(&event);
        debug!(delivered, "Event ingested");

        persist_task
    }

    /// Returns the current number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.read().len()
    }
}

impl std::fmt::Debug for EventDistributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDistributor")
            .field("subscriber_count", &self.subscriber_count())
            .field("capacity", &self.capacity)
            .finish()
    }
}
