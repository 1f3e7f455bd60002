//! Domain identifiers associate an event with the domain entities it is about.
//!
//! Stream queries select events through these identifiers, so every event exposes
//! the set of ids (cart, order, enrollment, ...) it refers to.
//!
//! ```
//! use coursedesk_events::domain_ids;
//!
//! let session_id: Option<&str> = None;
//! let ids = domain_ids! {cart_id: "c1", course_id: "k1", session_id: session_id};
//!
//! assert_eq!(ids.len(), 2);
//! assert_eq!(ids.get("cart_id").map(String::as_str), Some("c1"));
//! assert_eq!(ids.get("session_id"), None);
//! ```
use serde::Serialize;
use std::{collections::BTreeMap, ops::Deref};
use uuid::Uuid;

/// A value usable as a domain identifier.
///
/// Optional values that are `None` produce no identifier at all.
pub trait DomainIdValue {
    fn to_domain_id(&self) -> Option<String>;
}

impl DomainIdValue for str {
    fn to_domain_id(&self) -> Option<String> {
        Some(self.to_string())
    }
}

impl DomainIdValue for String {
    fn to_domain_id(&self) -> Option<String> {
        Some(self.clone())
    }
}

impl DomainIdValue for Uuid {
    fn to_domain_id(&self) -> Option<String> {
        Some(self.to_string())
    }
}

impl DomainIdValue for i64 {
    fn to_domain_id(&self) -> Option<String> {
        Some(self.to_string())
    }
}

impl<T: DomainIdValue> DomainIdValue for Option<T> {
    fn to_domain_id(&self) -> Option<String> {
        self.as_ref().and_then(DomainIdValue::to_domain_id)
    }
}

impl<T: DomainIdValue + ?Sized> DomainIdValue for &T {
    fn to_domain_id(&self) -> Option<String> {
        (**self).to_domain_id()
    }
}

/// A set of domain identifiers, represented as a map of identifier names and values.
#[derive(Debug, Serialize, Default, PartialEq, Eq, Clone)]
pub struct DomainIdSet(BTreeMap<&'static str, String>);

impl DomainIdSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a domain identifier, skipping values that resolve to nothing.
    pub fn insert<V: DomainIdValue + ?Sized>(&mut self, key: &'static str, value: &V) {
        if let Some(value) = value.to_domain_id() {
            self.0.insert(key, value);
        }
    }
}

impl Deref for DomainIdSet {
    type Target = BTreeMap<&'static str, String>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Creates a domain identifiers set.
#[macro_export]
macro_rules! domain_ids {
    {} => {
        $crate::DomainIdSet::default()
    };
    {$($key:ident: $value:expr),* $(,)?} => {{
        #[allow(unused_mut)]
        let mut domain_ids = $crate::DomainIdSet::new();
        $(domain_ids.insert(stringify!($key), &$value);)*
        domain_ids
    }};
}
