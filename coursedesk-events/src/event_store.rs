//! Event store is responsible for storing and retrieving events.
//!
//! It is implemented by the in-memory store of this crate and by the PostgreSQL backend.
//! Implementations must make `append` atomic: the conflict check and the insert of the new
//! events happen as one step with respect to other appends.
use crate::{
    event::{Event, EventId, PersistedEvent},
    stream_query::StreamQuery,
};

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::error::Error as StdError;

/// Errors raised by an event store.
pub trait EventStoreError: StdError + Send + Sync + 'static {
    /// Returns true when an append was rejected because the stream changed after it was read.
    fn is_concurrency(&self) -> bool;
}

/// An event store.
#[async_trait]
pub trait EventStore<E>: Send + Sync
where
    E: Event + Clone + Send + Sync + 'static,
{
    type Error: EventStoreError;

    /// Streams the events selected by the query, in append order.
    fn stream<'a>(
        &'a self,
        query: &'a StreamQuery<E>,
    ) -> BoxStream<'a, Result<PersistedEvent<E>, Self::Error>>;

    /// Appends a batch of events to the event store.
    ///
    /// Before appending, the store re-executes `query` from `last_event_id`: if any event
    /// matches, the stream changed after it was read and the append fails with a
    /// concurrency error.
    async fn append(
        &self,
        events: Vec<E>,
        query: StreamQuery<E>,
        last_event_id: EventId,
    ) -> Result<Vec<PersistedEvent<E>>, Self::Error>;

    /// Appends a batch of events **without** verifying if new events have been added
    /// since the last read.
    async fn append_without_validation(
        &self,
        events: Vec<E>,
    ) -> Result<Vec<PersistedEvent<E>>, Self::Error>;
}
