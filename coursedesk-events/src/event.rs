//! Event represents an occurrence or action of interest within the system.
//!
//! The `PersistedEvent` struct wraps an event together with the id assigned by the event store.
use crate::domain_id::DomainIdSet;
use std::ops::Deref;

/// Represents the ID of an event. Ids grow with the append order.
pub type EventId = i64;

/// Represents an event in the event store.
///
/// The constant `NAMES` lists the names of all the variants an event type can take.
pub trait Event {
    /// Names of all supported events.
    const NAMES: &'static [&'static str];
    /// Retrieves the name of the event.
    fn name(&self) -> &'static str;
    /// Retrieves the domain identifiers associated with the event.
    fn domain_ids(&self) -> DomainIdSet;
}

/// Wrapper for a persisted event.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedEvent<E> {
    pub(crate) id: EventId,
    pub(crate) event: E,
}

impl<E> PersistedEvent<E> {
    /// Creates a new `PersistedEvent` instance with the given ID and event.
    pub fn new(id: EventId, event: E) -> Self {
        Self { id, event }
    }

    /// Returns the inner event.
    pub fn into_inner(self) -> E {
        self.event
    }

    /// Retrieves the ID assigned by the event store for this persisted event.
    pub fn id(&self) -> EventId {
        self.id
    }
}

impl<E> Deref for PersistedEvent<E> {
    type Target = E;

    fn deref(&self) -> &Self::Target {
        &self.event
    }
}
