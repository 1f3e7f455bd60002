use coursedesk_events::{BoxDynError, EventStoreError};
use thiserror::Error;

/// Represents all the ways a method can fail within the PostgreSQL backend.
#[derive(Error, Debug)]
pub enum Error {
    /// Error returned from the database.
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    /// An error occurred while serializing an event payload.
    #[error("unable to serialize the event payload: {0}")]
    Serialization(#[source] BoxDynError),
    /// An error occurred while deserializing an event payload.
    #[error("unable to deserialize the event payload: {0}")]
    Deserialization(#[source] BoxDynError),
    /// Another process appended an event matching the validation query after the state was read.
    #[error("concurrent modification error")]
    Concurrency,
}

impl EventStoreError for Error {
    fn is_concurrency(&self) -> bool {
        matches!(self, Error::Concurrency)
    }
}
