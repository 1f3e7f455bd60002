//! A stream query represents a query for filtering event streams based on certain criteria.
//!
//! A `StreamQuery` couples an optional `StreamFilter` with an origin (only events
//! persisted after the origin are returned) and a list of excluded event names.
//! Filters are built with the `events`, `eq`, `any_eq`, `and`, `or` helpers, or with the
//! `query!` macro, and evaluated through the `FilterEvaluator` trait: the in-memory
//! store evaluates them against events, the PostgreSQL store turns them into SQL.
use std::marker::PhantomData;

use crate::domain_id::{DomainIdSet, DomainIdValue};
use crate::event::{Event, EventId, PersistedEvent};

/// Represents a query for filtering event streams.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamQuery<E> {
    /// Selects the events of interest. `None` selects every event.
    filter: Option<StreamFilter>,
    /// Only events with an id greater than the origin are considered.
    origin: EventId,
    /// Events that will be excluded from the query result.
    /// Used to derive the validation query of a `Decision` from its state query.
    excluded_events: &'static [&'static str],
    event_type: PhantomData<E>,
}

impl<E> StreamQuery<E> {
    /// Returns the filter associated with the stream query, if any.
    pub fn filter(&self) -> Option<&StreamFilter> {
        self.filter.as_ref()
    }

    /// Returns the origin of the event stream query.
    pub fn origin(&self) -> EventId {
        self.origin
    }

    /// Returns the list of excluded events.
    pub fn excluded_events(&self) -> &'static [&'static str] {
        self.excluded_events
    }

    /// Changes the origin of the event stream query and returns the modified query.
    pub fn change_origin(mut self, origin: EventId) -> Self {
        self.origin = origin;
        self
    }

    /// Sets the list of event types that will be excluded from the query result.
    pub fn exclude_events(mut self, types: &'static [&'static str]) -> Self {
        self.excluded_events = types;
        self
    }

    /// Combines two queries: the result matches the events matched by either of them.
    ///
    /// The origin of the union is the lowest of the two origins. Excluded events are
    /// kept only when both queries agree on them.
    pub fn union(self, other: StreamQuery<E>) -> Self {
        let filter = match (self.filter, other.filter) {
            (Some(l), Some(r)) => Some(or(l, r)),
            _ => None,
        };
        let excluded_events = if self.excluded_events == other.excluded_events {
            self.excluded_events
        } else {
            &[]
        };
        StreamQuery {
            filter,
            origin: self.origin.min(other.origin),
            excluded_events,
            event_type: PhantomData,
        }
    }
}

impl<E: Event> StreamQuery<E> {
    /// Returns true if the persisted event is selected by this query.
    pub fn matches(&self, event: &PersistedEvent<E>) -> bool {
        if event.id() <= self.origin || self.excluded_events.contains(&event.name()) {
            return false;
        }
        match &self.filter {
            Some(filter) => EventMatcher::new(event.name(), &event.domain_ids()).eval(filter),
            None => true,
        }
    }
}

/// Creates a new stream query with the given filter.
pub fn query<E>(filter: Option<StreamFilter>) -> StreamQuery<E> {
    StreamQuery {
        filter,
        origin: 0,
        excluded_events: &[],
        event_type: PhantomData,
    }
}

/// Creates a new filter that allows you to specify a subset of events to pass through.
pub fn events(names: &'static [&'static str]) -> StreamFilter {
    StreamFilter::Events { names }
}

/// Creates a filter that checks for equality between a domain identifier and a value.
pub fn eq<V: DomainIdValue + ?Sized>(ident: &'static str, value: &V) -> StreamFilter {
    StreamFilter::Eq {
        ident,
        value: value.to_domain_id().unwrap_or_default(),
    }
}

/// Creates a filter matching events whose identifier equals any of the given values.
///
/// An empty list of values yields a filter that matches nothing.
pub fn any_eq<'a, V, I>(ident: &'static str, values: I) -> StreamFilter
where
    V: DomainIdValue + 'a,
    I: IntoIterator<Item = &'a V>,
{
    values
        .into_iter()
        .map(|value| eq(ident, value))
        .reduce(or)
        .unwrap_or(StreamFilter::Events { names: &[] })
}

/// Creates a filter that performs a logical AND operation between two filters.
pub fn and(l: StreamFilter, r: StreamFilter) -> StreamFilter {
    StreamFilter::And {
        l: Box::new(l),
        r: Box::new(r),
    }
}

/// Creates a filter that performs a logical OR operation between two filters.
pub fn or(l: StreamFilter, r: StreamFilter) -> StreamFilter {
    StreamFilter::Or {
        l: Box::new(l),
        r: Box::new(r),
    }
}

/// Creates a stream query with a given event type and filter.
///
/// ```
/// use coursedesk_events::{query, StreamQuery};
/// # #[derive(Clone)]
/// # struct Dummy;
/// let cart_id = "c1";
/// let q: StreamQuery<Dummy> = query!(Dummy, (events[ItemAdded, ItemRemoved]) and (cart_id == cart_id));
/// assert!(q.filter().is_some());
/// ```
#[macro_export]
macro_rules! query {
    ($event_ty:ty) => {{
        $crate::stream_query::query::<$event_ty>(None)
    }};
    ($event_ty:ty, $($filter:tt)+) => {{
        $crate::stream_query::query::<$event_ty>(Some($crate::filter!($($filter)+)))
    }};
}

#[macro_export]
#[doc(hidden)]
macro_rules! filter {
    (events[$($events:ident),+ $(,)?]) => {
        $crate::stream_query::events(&[$(stringify!($events)),+])
    };
    ($ident:ident == $value:expr) => {
        $crate::stream_query::eq(stringify!($ident), &$value)
    };
    ($ident:ident in $values:expr) => {
        $crate::stream_query::any_eq(stringify!($ident), $values)
    };
    (($($h:tt)+) and ($($t:tt)+)) => {
        $crate::stream_query::and($crate::filter!($($h)+), $crate::filter!($($t)+))
    };
    (($($h:tt)+) or ($($t:tt)+)) => {
        $crate::stream_query::or($crate::filter!($($h)+), $crate::filter!($($t)+))
    };
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamFilter {
    /// Includes only the specified events.
    Events {
        /// The list of events to include.
        names: &'static [&'static str],
    },
    /// Checks for equality between a domain identifier and a value.
    Eq {
        /// The identifier to compare.
        ident: &'static str,
        /// The value to compare against.
        value: String,
    },
    /// Performs a logical AND operation between two filters.
    And {
        l: Box<StreamFilter>,
        r: Box<StreamFilter>,
    },
    /// Performs a logical OR operation between two filters.
    Or {
        l: Box<StreamFilter>,
        r: Box<StreamFilter>,
    },
}

/// Represents a filter evaluator used to evaluate stream filters.
pub trait FilterEvaluator {
    /// The result type produced by evaluating a filter.
    type Result;
    /// Evaluates the given filter and returns the result.
    fn eval(&mut self, filter: &StreamFilter) -> Self::Result;
}

/// Evaluates a filter against the name and the domain identifiers of an event.
///
/// An `Eq` filter on an identifier the event does not carry is false.
pub struct EventMatcher<'a> {
    name: &'a str,
    domain_ids: &'a DomainIdSet,
}

impl<'a> EventMatcher<'a> {
    pub fn new(name: &'a str, domain_ids: &'a DomainIdSet) -> Self {
        Self { name, domain_ids }
    }
}

impl FilterEvaluator for EventMatcher<'_> {
    type Result = bool;

    fn eval(&mut self, filter: &StreamFilter) -> bool {
        match filter {
            StreamFilter::Events { names } => names.contains(&self.name),
            StreamFilter::Eq { ident, value } => {
                self.domain_ids.get(*ident).map(String::as_str) == Some(value.as_str())
            }
            StreamFilter::And { l, r } => self.eval(l) && self.eval(r),
            StreamFilter::Or { l, r } => self.eval(l) || self.eval(r),
        }
    }
}
