//! A State contains the initial conditions that a `Decision` uses to make the changes.
//!
//! States are rebuilt by folding the events matched by their query. Several states can be
//! loaded together as a tuple: each one is wrapped in a `StatePart` that only receives the
//! events matching its own query, and the tuple exposes the union of the queries.
use crate::all_the_tuples;
use crate::event::{Event, EventId, PersistedEvent};
use crate::stream_query::StreamQuery;
use paste::paste;
use std::ops::Deref;

/// Represents a state query used to retrieve events from the event store to build a state.
pub trait StateQuery: Clone + Send + Sync {
    /// The type of events queried by this state query.
    type Event: Event + Clone + Send + Sync;

    /// Returns the stream query used to retrieve relevant events for building the state.
    fn query(&self) -> StreamQuery<Self::Event>;
}

/// A mutable state that can be changed by events from the event store.
pub trait StateMutate: StateQuery {
    /// Mutates the state object based on the provided event.
    fn mutate(&mut self, event: Self::Event);
}

/// A group of states that can be queried and modified together.
pub trait MultiState<E: Event + Clone> {
    /// Mutates the sub-states whose query matches the provided event.
    fn mutate_all(&mut self, event: PersistedEvent<E>);
    /// The union of the queries of all sub-states.
    fn query_all(&self) -> StreamQuery<E>;
    /// The version of the multi-state: the highest version among its sub-states.
    fn version(&self) -> EventId;
}

macro_rules! impl_multi_state {
    (
        [$($ty:ident),*], $last:ident
    ) => {
        #[allow(unused_parens)]
        impl<E, $($ty,)* $last> MultiState<E> for ($(StatePart<$ty>,)* StatePart<$last>)
        where
            E: Event + Clone + Send + Sync,
            $($ty: StateMutate<Event = E>,)*
            $last: StateMutate<Event = E>,
        {
            fn mutate_all(&mut self, event: PersistedEvent<E>) {
                paste! {
                    let ($([<state_ $ty:lower>],)* [<state_ $last:lower>]) = self;
                    $(
                        if [<state_ $ty:lower>].matches_event(&event) {
                            [<state_ $ty:lower>].mutate_part(event.clone());
                        }
                    )*
                    if [<state_ $last:lower>].matches_event(&event) {
                        [<state_ $last:lower>].mutate_part(event);
                    }
                }
            }

            fn query_all(&self) -> StreamQuery<E> {
                paste! {
                    let ($([<state_ $ty:lower>],)* [<state_ $last:lower>]) = self;
                    let query = [<state_ $last:lower>].query_part();
                    $(
                        let query = query.union([<state_ $ty:lower>].query_part());
                    )*
                    query
                }
            }

            fn version(&self) -> EventId {
                paste! {
                    let ($([<state_ $ty:lower>],)* [<state_ $last:lower>]) = self;
                    let version = [<state_ $last:lower>].version();
                    $(
                        let version = version.max([<state_ $ty:lower>].version());
                    )*
                    version
                }
            }
        }
    }
}

all_the_tuples!(impl_multi_state);

/// A sub-state in a multi-state object. It tracks the version (id of the last applied
/// event) and the number of events applied to the wrapped state.
#[derive(Debug, Clone)]
pub struct StatePart<S: StateQuery> {
    version: EventId,
    applied_events: u64,
    inner: S,
}

impl<S: StateQuery> StatePart<S> {
    pub fn new(inner: S) -> Self {
        Self {
            version: 0,
            applied_events: 0,
            inner,
        }
    }

    pub fn version(&self) -> EventId {
        self.version
    }

    pub fn applied_events(&self) -> u64 {
        self.applied_events
    }

    pub fn query_part(&self) -> StreamQuery<S::Event> {
        self.inner.query().change_origin(self.version)
    }

    pub fn matches_event(&self, event: &PersistedEvent<S::Event>) -> bool {
        self.query_part().matches(event)
    }

    pub fn mutate_part(&mut self, event: PersistedEvent<S::Event>)
    where
        S: StateMutate,
    {
        self.version = event.id;
        self.applied_events += 1;
        self.inner.mutate(event.event);
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: StateQuery> Deref for StatePart<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.inner
    }
}

/// Converts a state, or a tuple of states, into `StatePart`s.
pub trait IntoStatePart<T>: Sized {
    type Target;
    fn into_state_part(self) -> Self::Target;
}

/// Extracts the states from their `StatePart`s.
pub trait IntoState<T>: Sized {
    fn into_state(self) -> T;
}

macro_rules! impl_from_state {
    (
        [$($ty:ident),*], $last:ident
    ) => {
        #[allow(unused_parens)]
        impl<$($ty,)* $last> IntoStatePart<($($ty,)* $last)> for ($($ty,)* $last)
        where
            $($ty: StateQuery,)*
            $last: StateQuery,
        {
            type Target = ($(StatePart<$ty>,)* StatePart<$last>);

            fn into_state_part(self) -> Self::Target {
                paste! {
                    let ($([<state_ $ty:lower>],)* [<state_ $last:lower>]) = self;
                    ($(StatePart::new([<state_ $ty:lower>]),)* StatePart::new([<state_ $last:lower>]))
                }
            }
        }

        #[allow(unused_parens)]
        impl<$($ty,)* $last> IntoState<($($ty,)* $last)> for ($(StatePart<$ty>,)* StatePart<$last>)
        where
            $($ty: StateQuery,)*
            $last: StateQuery,
        {
            fn into_state(self) -> ($($ty,)* $last) {
                paste! {
                    let ($([<state_ $ty:lower>],)* [<state_ $last:lower>]) = self;
                    ($([<state_ $ty:lower>].into_inner(),)* [<state_ $last:lower>].into_inner())
                }
            }
        }
    }
}

all_the_tuples!(impl_from_state);
