//! An event store keeping the events in memory.
//!
//! Appends are serialized by a write lock, so the conflict check and the insert of the new
//! events are atomic. Used by tests and by the `memory` deployment mode.
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::RwLock;

use crate::event::{Event, EventId, PersistedEvent};
use crate::event_store::{EventStore, EventStoreError};
use crate::stream_query::StreamQuery;

#[derive(Debug, thiserror::Error)]
pub enum InMemoryError {
    #[error("concurrent modification error")]
    Concurrency,
}

impl EventStoreError for InMemoryError {
    fn is_concurrency(&self) -> bool {
        matches!(self, InMemoryError::Concurrency)
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryEventStore<E> {
    events: Arc<RwLock<Vec<PersistedEvent<E>>>>,
}

impl<E> Default for InMemoryEventStore<E> {
    fn default() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl<E> InMemoryEventStore<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events stored so far.
    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

fn push_all<E>(log: &mut Vec<PersistedEvent<E>>, events: Vec<E>) -> Vec<PersistedEvent<E>>
where
    E: Clone,
{
    let first_id = log.len() as EventId + 1;
    let persisted: Vec<_> = events
        .into_iter()
        .enumerate()
        .map(|(offset, event)| PersistedEvent::new(first_id + offset as EventId, event))
        .collect();
    log.extend(persisted.iter().cloned());
    persisted
}

#[async_trait]
impl<E> EventStore<E> for InMemoryEventStore<E>
where
    E: Event + Clone + Send + Sync + 'static,
{
    type Error = InMemoryError;

    fn stream<'a>(
        &'a self,
        query: &'a StreamQuery<E>,
    ) -> BoxStream<'a, Result<PersistedEvent<E>, Self::Error>> {
        stream! {
            let matching: Vec<PersistedEvent<E>> = {
                let events = self.events.read().await;
                events.iter().filter(|event| query.matches(event)).cloned().collect()
            };
            for event in matching {
                yield Ok(event);
            }
        }
        .boxed()
    }

    async fn append(
        &self,
        events: Vec<E>,
        query: StreamQuery<E>,
        last_event_id: EventId,
    ) -> Result<Vec<PersistedEvent<E>>, Self::Error> {
        let mut log = self.events.write().await;
        let query = query.change_origin(last_event_id);
        if log.iter().any(|event| query.matches(event)) {
            return Err(InMemoryError::Concurrency);
        }
        Ok(push_all(&mut log, events))
    }

    async fn append_without_validation(
        &self,
        events: Vec<E>,
    ) -> Result<Vec<PersistedEvent<E>>, Self::Error> {
        let mut log = self.events.write().await;
        Ok(push_all(&mut log, events))
    }
}
