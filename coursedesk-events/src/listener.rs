//! Event listeners handle events after they are persisted.
//!
//! Delivery is at-least-once: a listener's checkpoint only moves past an event once the
//! event was handled successfully, and a failed event is handed again on the next poll.
//! Listeners must therefore tolerate duplicated deliveries.
//!
//! `InMemoryEventListener` runs listeners against any `EventStore`, keeping the
//! checkpoints in memory. The PostgreSQL backend provides a durable variant.
use async_trait::async_trait;
use futures::{Future, StreamExt, TryStreamExt};
use std::fmt::Display;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::event::{Event, EventId, PersistedEvent};
use crate::event_store::EventStore;
use crate::stream_query::StreamQuery;
use crate::BoxDynError;

/// Represents an event listener, which handles persisted events.
#[async_trait]
pub trait EventListener<E: Event + Clone>: Send + Sync {
    /// The type of error that may occur during the handle of an event.
    type Error: Display + Send + Sync;

    /// Returns the unique identifier of the event listener.
    fn id(&self) -> &'static str;

    /// Returns the stream query selecting the events the listener handles.
    fn query(&self) -> &StreamQuery<E>;

    /// Handles an event. An error leaves the event pending for the next poll.
    async fn handle(&self, event: PersistedEvent<E>) -> Result<(), Self::Error>;
}

/// Polling configuration of a listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    poll: Duration,
    batch_size: usize,
}

impl ListenerConfig {
    /// Creates a configuration polling at the given interval, in batches of 100 events.
    pub fn poller(poll: Duration) -> Self {
        Self {
            poll,
            batch_size: 100,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn poll(&self) -> Duration {
        self.poll
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

/// Handles the events of a batch in order, stopping at the first failure.
///
/// Returns the id of the last event handled successfully, or `last_processed` when none was.
pub async fn handle_batch<E, L>(
    listener: &L,
    events: Vec<PersistedEvent<E>>,
    mut last_processed: EventId,
) -> EventId
where
    E: Event + Clone + Send + Sync,
    L: EventListener<E>,
{
    for event in events {
        let event_id = event.id();
        if let Err(err) = listener.handle(event).await {
            tracing::warn!(
                listener = listener.id(),
                event_id,
                error = %err,
                "event handling failed, it will be retried"
            );
            break;
        }
        last_processed = event_id;
    }
    last_processed
}

#[async_trait]
trait ListenerExecutor: Send + Sync {
    fn config(&self) -> &ListenerConfig;
    /// Handles the next batch of events, returning how many were handled.
    async fn execute(&self) -> Result<usize, BoxDynError>;
}

struct InMemoryExecutor<ES, L, E> {
    event_store: ES,
    listener: L,
    config: ListenerConfig,
    checkpoint: Mutex<EventId>,
    _events: PhantomData<fn() -> E>,
}

#[async_trait]
impl<ES, L, E> ListenerExecutor for InMemoryExecutor<ES, L, E>
where
    E: Event + Clone + Send + Sync + 'static,
    ES: EventStore<E>,
    L: EventListener<E>,
{
    fn config(&self) -> &ListenerConfig {
        &self.config
    }

    async fn execute(&self) -> Result<usize, BoxDynError> {
        let mut checkpoint = self.checkpoint.lock().await;
        let query = self.listener.query().clone().change_origin(*checkpoint);
        let batch: Vec<PersistedEvent<E>> = self
            .event_store
            .stream(&query)
            .take(self.config.batch_size())
            .try_collect()
            .await?;
        let ids: Vec<EventId> = batch.iter().map(|event| event.id()).collect();
        *checkpoint = handle_batch(&self.listener, batch, *checkpoint).await;
        let last_processed = *checkpoint;
        Ok(ids.iter().take_while(|id| **id <= last_processed).count())
    }
}

/// Runs event listeners against an event store, keeping their checkpoints in memory.
pub struct InMemoryEventListener<ES, E> {
    event_store: ES,
    executors: Vec<Arc<dyn ListenerExecutor>>,
    shutdown_token: CancellationToken,
    _events: PhantomData<fn() -> E>,
}

impl<ES, E> InMemoryEventListener<ES, E>
where
    E: Event + Clone + Send + Sync + 'static,
    ES: EventStore<E> + Clone + 'static,
{
    pub fn builder(event_store: ES) -> Self {
        Self {
            event_store,
            executors: vec![],
            shutdown_token: CancellationToken::new(),
            _events: PhantomData,
        }
    }

    /// Registers a listener. It starts from the beginning of the event log.
    pub fn register_listener(
        mut self,
        listener: impl EventListener<E> + 'static,
        config: ListenerConfig,
    ) -> Self {
        self.executors.push(Arc::new(InMemoryExecutor {
            event_store: self.event_store.clone(),
            listener,
            config,
            checkpoint: Mutex::new(0),
            _events: PhantomData,
        }));
        self
    }

    /// Runs every listener until no listener has pending events it can handle.
    ///
    /// Events emitted by a listener are delivered to the others within the same call.
    pub async fn catch_up(&self) -> Result<(), BoxDynError> {
        loop {
            let mut handled = 0;
            for executor in &self.executors {
                handled += executor.execute().await?;
            }
            if handled == 0 {
                return Ok(());
            }
        }
    }

    /// Polls every listener at its configured interval until the shutdown token is cancelled.
    pub async fn start(self) -> Result<(), BoxDynError> {
        let mut handles = vec![];
        for executor in self.executors {
            let shutdown = self.shutdown_token.clone();
            handles.push(tokio::spawn(async move {
                let mut poll = tokio::time::interval(executor.config().poll());
                poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = poll.tick() => {
                            if let Err(err) = executor.execute().await {
                                tracing::error!(error = %err, "event listener poll failed");
                            }
                        }
                        _ = shutdown.cancelled() => return,
                    }
                }
            }));
        }
        futures::future::join_all(handles).await;
        Ok(())
    }

    /// Starts the listeners and stops them once the `shutdown` future completes.
    pub async fn start_with_shutdown<F: Future<Output = ()> + Send + 'static>(
        self,
        shutdown: F,
    ) -> Result<(), BoxDynError> {
        let shutdown_token = self.shutdown_token.clone();
        let shutdown_handle = async move {
            shutdown.await;
            shutdown_token.cancel();
            Ok::<(), BoxDynError>(())
        };
        futures::try_join!(self.start(), shutdown_handle).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use crate::memory::InMemoryEventStore;
    use crate::query;
    use assert2::check;
    use std::sync::Mutex as StdMutex;

    struct RecordingListener {
        query: StreamQuery<ShoppingCartEvent>,
        handled: Arc<StdMutex<Vec<EventId>>>,
        failing_event: Option<EventId>,
    }

    #[derive(Debug)]
    struct Boom;

    impl Display for Boom {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "boom")
        }
    }

    #[async_trait]
    impl EventListener<ShoppingCartEvent> for RecordingListener {
        type Error = Boom;

        fn id(&self) -> &'static str {
            "recording"
        }

        fn query(&self) -> &StreamQuery<ShoppingCartEvent> {
            &self.query
        }

        async fn handle(&self, event: PersistedEvent<ShoppingCartEvent>) -> Result<(), Boom> {
            if Some(event.id()) == self.failing_event {
                return Err(Boom);
            }
            self.handled.lock().unwrap().push(event.id());
            Ok(())
        }
    }

    fn recording(failing_event: Option<EventId>) -> (RecordingListener, Arc<StdMutex<Vec<EventId>>>) {
        let handled = Arc::new(StdMutex::new(vec![]));
        (
            RecordingListener {
                query: query!(ShoppingCartEvent, cart_id == "c1"),
                handled: handled.clone(),
                failing_event,
            },
            handled,
        )
    }

    #[tokio::test]
    async fn it_delivers_matching_events_once() {
        let store = InMemoryEventStore::new();
        store
            .append_without_validation(vec![
                item_added_event("p1", "c1"),
                item_added_event("p1", "c2"),
                item_added_event("p2", "c1"),
            ])
            .await
            .unwrap();
        let (listener, handled) = recording(None);
        let runner = InMemoryEventListener::builder(store.clone())
            .register_listener(listener, ListenerConfig::poller(Duration::from_millis(10)));

        runner.catch_up().await.unwrap();
        runner.catch_up().await.unwrap();

        check!(*handled.lock().unwrap() == vec![1, 3]);
    }

    #[tokio::test]
    async fn it_stops_at_a_failing_event_and_keeps_it_pending() {
        let store = InMemoryEventStore::new();
        store
            .append_without_validation(vec![
                item_added_event("p1", "c1"),
                item_added_event("p2", "c1"),
                item_added_event("p3", "c1"),
            ])
            .await
            .unwrap();
        let (listener, handled) = recording(Some(2));
        let runner = InMemoryEventListener::builder(store)
            .register_listener(listener, ListenerConfig::poller(Duration::from_millis(10)));

        runner.catch_up().await.unwrap();
        runner.catch_up().await.unwrap();

        check!(*handled.lock().unwrap() == vec![1]);
    }

    #[tokio::test]
    async fn it_stops_polling_on_shutdown() {
        let store = InMemoryEventStore::new();
        store
            .append_without_validation(vec![item_added_event("p1", "c1")])
            .await
            .unwrap();
        let (listener, handled) = recording(None);
        let runner = InMemoryEventListener::builder(store)
            .register_listener(listener, ListenerConfig::poller(Duration::from_millis(5)));

        runner
            .start_with_shutdown(tokio::time::sleep(Duration::from_millis(50)))
            .await
            .unwrap();

        check!(*handled.lock().unwrap() == vec![1]);
    }
}
