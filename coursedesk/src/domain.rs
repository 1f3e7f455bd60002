//! Business rules of coursedesk.
//!
//! Every change is a `DomainEvent`. States fold the events selected by their query and
//! decisions turn a command plus the current states into new events.
pub mod cart;
pub mod catalog;
pub mod delivery;
pub mod enrollment;
pub mod order;
pub mod payment;
pub mod status;

#[cfg(test)]
pub(crate) mod fixtures;

use chrono::{DateTime, Utc};
use coursedesk_events::{domain_ids, DomainIdSet, Event};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use cart::{CartCloseReason, CartOwner};
pub use catalog::{CourseType, SessionDetails};
pub use enrollment::SessionChange;
pub use order::OrderLine;
pub use payment::{PaymentOutcome, Provider};
pub use status::{EnrollmentStatus, InvalidTransition, Lifecycle, OrderStatus, PaymentStatus};

pub type UserId = Uuid;
pub type CategoryId = Uuid;
pub type InstructorId = Uuid;
pub type CourseId = Uuid;
pub type SessionId = Uuid;
pub type AttachmentId = Uuid;
pub type CartId = Uuid;
pub type CartItemId = Uuid;
pub type OrderId = Uuid;
pub type PaymentId = Uuid;
pub type EnrollmentId = Uuid;
pub type SecureLinkId = Uuid;

/// How a domain error should be reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Forbidden,
    Conflict,
}

/// A link delivered to a student, as recorded in `MaterialsDelivered`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredLink {
    pub attachment_id: AttachmentId,
    pub file_name: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum DomainEvent {
    CategoryCreated {
        category_id: CategoryId,
        parent_id: Option<CategoryId>,
        name: String,
    },
    InstructorRegistered {
        instructor_id: InstructorId,
        name: String,
    },
    CourseCreated {
        course_id: CourseId,
        category_id: CategoryId,
        instructor_id: Option<InstructorId>,
        title: String,
        course_type: CourseType,
        price: Decimal,
        currency: String,
    },
    CourseActivated {
        course_id: CourseId,
    },
    CourseDeactivated {
        course_id: CourseId,
    },
    CoursePriceChanged {
        course_id: CourseId,
        price: Decimal,
        currency: String,
    },
    SessionScheduled {
        session_id: SessionId,
        course_id: CourseId,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        capacity: Option<u32>,
        teams_link: String,
    },
    SessionRescheduled {
        session_id: SessionId,
        course_id: CourseId,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        capacity: Option<u32>,
        teams_link: String,
    },
    AttachmentUploaded {
        attachment_id: AttachmentId,
        course_id: CourseId,
        file_name: String,
        blob_path: String,
        size_bytes: u64,
    },
    AttachmentRevoked {
        attachment_id: AttachmentId,
        course_id: CourseId,
    },
    CartOpened {
        cart_id: CartId,
        owner: CartOwner,
        opened_at: DateTime<Utc>,
    },
    CartItemAdded {
        cart_id: CartId,
        owner: CartOwner,
        cart_item_id: CartItemId,
        course_id: CourseId,
        session_id: Option<SessionId>,
    },
    CartItemRemoved {
        cart_id: CartId,
        owner: CartOwner,
        cart_item_id: CartItemId,
    },
    CartClosed {
        cart_id: CartId,
        owner: CartOwner,
        reason: CartCloseReason,
        closed_at: DateTime<Utc>,
    },
    OrderPlaced {
        order_id: OrderId,
        user_id: UserId,
        cart_id: CartId,
        lines: Vec<OrderLine>,
        amount: Decimal,
        currency: String,
        placed_at: DateTime<Utc>,
    },
    OrderStatusChanged {
        order_id: OrderId,
        user_id: UserId,
        from: OrderStatus,
        to: OrderStatus,
        changed_at: DateTime<Utc>,
    },
    PaymentInitiated {
        payment_id: PaymentId,
        order_id: OrderId,
        provider: Provider,
        amount: Decimal,
        currency: String,
        initiated_at: DateTime<Utc>,
    },
    PaymentCaptured {
        payment_id: PaymentId,
        order_id: OrderId,
        provider: Provider,
        provider_ref: String,
        raw_payload: String,
        captured_at: DateTime<Utc>,
    },
    PaymentFailed {
        payment_id: PaymentId,
        order_id: OrderId,
        provider: Provider,
        provider_ref: String,
        reason: String,
        raw_payload: String,
        failed_at: DateTime<Utc>,
    },
    EnrollmentCreated {
        enrollment_id: EnrollmentId,
        user_id: UserId,
        course_id: CourseId,
        course_type: CourseType,
        session_id: Option<SessionId>,
        order_id: OrderId,
        status: EnrollmentStatus,
        enrolled_at: DateTime<Utc>,
    },
    EnrollmentStatusChanged {
        enrollment_id: EnrollmentId,
        user_id: UserId,
        course_id: CourseId,
        session_id: Option<SessionId>,
        order_id: OrderId,
        from: EnrollmentStatus,
        to: EnrollmentStatus,
        changed_at: DateTime<Utc>,
    },
    EnrollmentSessionChanged {
        enrollment_id: EnrollmentId,
        user_id: UserId,
        course_id: CourseId,
        order_id: OrderId,
        change: SessionChange,
        previous_session_id: Option<SessionId>,
        session: Option<SessionDetails>,
        from: EnrollmentStatus,
        to: EnrollmentStatus,
        changed_at: DateTime<Utc>,
    },
    SecureLinkIssued {
        link_id: SecureLinkId,
        token: String,
        enrollment_id: EnrollmentId,
        attachment_id: AttachmentId,
        course_id: CourseId,
        issued_at: DateTime<Utc>,
    },
    MaterialsDelivered {
        enrollment_id: EnrollmentId,
        user_id: UserId,
        order_id: OrderId,
        course_id: CourseId,
        links: Vec<DeliveredLink>,
        delivered_at: DateTime<Utc>,
    },
    SecureLinkRevoked {
        token: String,
        enrollment_id: EnrollmentId,
        revoked_at: DateTime<Utc>,
    },
    MaterialDownloaded {
        token: String,
        enrollment_id: EnrollmentId,
        attachment_id: AttachmentId,
        downloaded_at: DateTime<Utc>,
    },
}

/// Declares `NAMES` and `name()` from a single list of variants.
macro_rules! event_names {
    ($($variant:ident),+ $(,)?) => {
        const NAMES: &'static [&'static str] = &[$(stringify!($variant)),+];

        fn name(&self) -> &'static str {
            match self {
                $(DomainEvent::$variant { .. } => stringify!($variant),)+
            }
        }
    };
}

impl Event for DomainEvent {
    event_names! {
        CategoryCreated,
        InstructorRegistered,
        CourseCreated,
        CourseActivated,
        CourseDeactivated,
        CoursePriceChanged,
        SessionScheduled,
        SessionRescheduled,
        AttachmentUploaded,
        AttachmentRevoked,
        CartOpened,
        CartItemAdded,
        CartItemRemoved,
        CartClosed,
        OrderPlaced,
        OrderStatusChanged,
        PaymentInitiated,
        PaymentCaptured,
        PaymentFailed,
        EnrollmentCreated,
        EnrollmentStatusChanged,
        EnrollmentSessionChanged,
        SecureLinkIssued,
        MaterialsDelivered,
        SecureLinkRevoked,
        MaterialDownloaded,
    }

    fn domain_ids(&self) -> DomainIdSet {
        match self {
            DomainEvent::CategoryCreated { category_id, .. } => domain_ids! {category_id: category_id},
            DomainEvent::InstructorRegistered { instructor_id, .. } => {
                domain_ids! {instructor_id: instructor_id}
            }
            DomainEvent::CourseCreated { course_id, .. }
            | DomainEvent::CourseActivated { course_id }
            | DomainEvent::CourseDeactivated { course_id }
            | DomainEvent::CoursePriceChanged { course_id, .. } => domain_ids! {course_id: course_id},
            DomainEvent::SessionScheduled {
                session_id,
                course_id,
                ..
            }
            | DomainEvent::SessionRescheduled {
                session_id,
                course_id,
                ..
            } => domain_ids! {session_id: session_id, course_id: course_id},
            DomainEvent::AttachmentUploaded {
                attachment_id,
                course_id,
                ..
            }
            | DomainEvent::AttachmentRevoked {
                attachment_id,
                course_id,
            } => domain_ids! {attachment_id: attachment_id, course_id: course_id},
            DomainEvent::CartOpened { cart_id, owner, .. }
            | DomainEvent::CartItemAdded { cart_id, owner, .. }
            | DomainEvent::CartItemRemoved { cart_id, owner, .. }
            | DomainEvent::CartClosed { cart_id, owner, .. } => {
                domain_ids! {cart_id: cart_id, cart_owner: owner.key()}
            }
            DomainEvent::OrderPlaced {
                order_id,
                user_id,
                cart_id,
                ..
            } => domain_ids! {order_id: order_id, user_id: user_id, cart_id: cart_id},
            DomainEvent::OrderStatusChanged {
                order_id, user_id, ..
            } => domain_ids! {order_id: order_id, user_id: user_id},
            DomainEvent::PaymentInitiated {
                payment_id,
                order_id,
                ..
            }
            | DomainEvent::PaymentCaptured {
                payment_id,
                order_id,
                ..
            }
            | DomainEvent::PaymentFailed {
                payment_id,
                order_id,
                ..
            } => domain_ids! {payment_id: payment_id, order_id: order_id},
            DomainEvent::EnrollmentCreated {
                enrollment_id,
                user_id,
                course_id,
                session_id,
                order_id,
                ..
            }
            | DomainEvent::EnrollmentStatusChanged {
                enrollment_id,
                user_id,
                course_id,
                session_id,
                order_id,
                ..
            } => domain_ids! {
                enrollment_id: enrollment_id,
                user_id: user_id,
                course_id: course_id,
                session_id: session_id,
                order_id: order_id,
            },
            DomainEvent::EnrollmentSessionChanged {
                enrollment_id,
                user_id,
                course_id,
                order_id,
                previous_session_id,
                session,
                ..
            } => domain_ids! {
                enrollment_id: enrollment_id,
                user_id: user_id,
                course_id: course_id,
                order_id: order_id,
                session_id: session.as_ref().map(|s| s.session_id),
                previous_session_id: previous_session_id,
            },
            DomainEvent::SecureLinkIssued {
                token,
                enrollment_id,
                attachment_id,
                course_id,
                ..
            } => domain_ids! {
                token: token,
                enrollment_id: enrollment_id,
                attachment_id: attachment_id,
                course_id: course_id,
            },
            DomainEvent::MaterialsDelivered {
                enrollment_id,
                user_id,
                order_id,
                ..
            } => domain_ids! {enrollment_id: enrollment_id, user_id: user_id, order_id: order_id},
            DomainEvent::SecureLinkRevoked {
                token,
                enrollment_id,
                ..
            }
            | DomainEvent::MaterialDownloaded {
                token,
                enrollment_id,
                ..
            } => domain_ids! {token: token, enrollment_id: enrollment_id},
        }
    }
}

/// Three uppercase ASCII letters, as in ISO 4217.
pub fn is_currency_code(currency: &str) -> bool {
    currency.len() == 3 && currency.bytes().all(|b| b.is_ascii_uppercase())
}
