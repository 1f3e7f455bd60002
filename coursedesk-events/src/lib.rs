//! Event-sourcing engine used by coursedesk.
//!
//! Business rules are written as [`Decision`]s. A decision names the states it needs, the
//! [`DecisionMaker`] rebuilds them from the events selected by their [`StreamQuery`], and the
//! resulting events are appended only if no conflicting event was stored in the meantime.
//! Reactions to stored events are written as [`EventListener`]s.

mod decision;
mod domain_id;
mod event;
mod event_store;
mod listener;
mod memory;
pub mod serde;
mod state;
pub mod stream_query;
mod testing;

#[cfg(test)]
mod fixtures;

#[doc(inline)]
pub use crate::decision::{Decision, DecisionMaker, Error as DecisionError, LoadedState};
#[doc(inline)]
pub use crate::domain_id::{DomainIdSet, DomainIdValue};
#[doc(inline)]
pub use crate::event::{Event, EventId, PersistedEvent};
#[doc(inline)]
pub use crate::event_store::{EventStore, EventStoreError};
#[doc(inline)]
pub use crate::listener::{handle_batch, EventListener, InMemoryEventListener, ListenerConfig};
#[doc(inline)]
pub use crate::memory::{InMemoryError, InMemoryEventStore};
#[doc(inline)]
pub use crate::state::{IntoState, IntoStatePart, MultiState, StateMutate, StatePart, StateQuery};
#[doc(inline)]
pub use crate::stream_query::{query, StreamFilter, StreamQuery};
#[doc(inline)]
pub use crate::testing::TestHarness;

pub type BoxDynError = Box<dyn std::error::Error + 'static + Send + Sync>;

#[doc(hidden)]
#[macro_export]
macro_rules! all_the_tuples {
    ($name:ident) => {
        $name!([], T1);
        $name!([T1], T2);
        $name!([T1, T2], T3);
        $name!([T1, T2, T3], T4);
        $name!([T1, T2, T3, T4], T5);
    };
}
