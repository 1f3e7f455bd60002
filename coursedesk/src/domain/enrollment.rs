//! Enrollments issued for paid orders, and the live sessions attached to them.
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use coursedesk_events::{query, Decision, StateMutate, StateQuery, StreamQuery};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::catalog::{SeatError, Sessions};
use super::order::Order;
use super::{
    AttachmentId, CourseId, CourseType, DomainEvent, EnrollmentId, EnrollmentStatus, ErrorKind,
    InvalidTransition, Lifecycle, OrderId, OrderStatus, SessionId, UserId,
};

const ENROLLMENT_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_8d3b_4f0a_9e57_b1c2_d3e4_f5a6);

/// The id of the enrollment of `user_id` in a course and, for live courses, a session.
///
/// Ids are derived from the triple, so an enrollment cannot be created twice.
pub fn enrollment_id(
    user_id: UserId,
    course_id: CourseId,
    session_id: Option<SessionId>,
) -> EnrollmentId {
    let session = session_id.map_or_else(|| "-".to_string(), |id| id.to_string());
    Uuid::new_v5(
        &ENROLLMENT_NAMESPACE,
        format!("{user_id}:{course_id}:{session}").as_bytes(),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionChange {
    Attached,
    Switched,
    Detached,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnrollmentError {
    #[error("enrollment {0} not found")]
    EnrollmentNotFound(EnrollmentId),
    #[error("order {0} not found")]
    OrderNotFound(OrderId),
    #[error("order in status {0:?} is not paid")]
    OrderNotPaid(OrderStatus),
    #[error("enrollment {0} is not for a live course")]
    NotALiveEnrollment(EnrollmentId),
    #[error("enrollment {0} is completed")]
    EnrollmentCompleted(EnrollmentId),
    #[error("enrollment {0} has no session")]
    NoSessionAttached(EnrollmentId),
    #[error("enrollment is already in session {0}")]
    SameSession(SessionId),
    #[error(transparent)]
    Seat(#[from] SeatError),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition<EnrollmentStatus>),
}

impl EnrollmentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EnrollmentError::EnrollmentNotFound(_)
            | EnrollmentError::OrderNotFound(_)
            | EnrollmentError::Seat(SeatError::SessionNotFound(_)) => ErrorKind::NotFound,
            _ => ErrorKind::Validation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrollmentRecord {
    pub enrollment_id: EnrollmentId,
    pub user_id: UserId,
    pub course_id: CourseId,
    pub course_type: CourseType,
    pub session_id: Option<SessionId>,
    pub order_id: OrderId,
    pub status: EnrollmentStatus,
    pub enrolled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkRecord {
    pub token: String,
    pub attachment_id: AttachmentId,
    pub issued_at: DateTime<Utc>,
    pub revoked: bool,
    pub download_count: u64,
    pub last_downloaded_at: Option<DateTime<Utc>>,
}

/// An enrollment with its secure links and their download counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrollment {
    enrollment_id: EnrollmentId,
    record: Option<EnrollmentRecord>,
    links: BTreeMap<AttachmentId, LinkRecord>,
}

impl Enrollment {
    pub fn new(enrollment_id: EnrollmentId) -> Self {
        Self {
            enrollment_id,
            record: None,
            links: BTreeMap::new(),
        }
    }

    pub fn enrollment_id(&self) -> EnrollmentId {
        self.enrollment_id
    }

    pub fn record(&self) -> Option<&EnrollmentRecord> {
        self.record.as_ref()
    }

    pub(crate) fn require(&self) -> Result<&EnrollmentRecord, EnrollmentError> {
        self.record
            .as_ref()
            .ok_or(EnrollmentError::EnrollmentNotFound(self.enrollment_id))
    }

    pub fn links(&self) -> impl Iterator<Item = &LinkRecord> {
        self.links.values()
    }

    pub fn link_for(&self, attachment_id: &AttachmentId) -> Option<&LinkRecord> {
        self.links.get(attachment_id)
    }

    fn link_by_token(&mut self, token: &str) -> Option<&mut LinkRecord> {
        self.links.values_mut().find(|link| link.token == token)
    }
}

impl StateQuery for Enrollment {
    type Event = DomainEvent;

    fn query(&self) -> StreamQuery<DomainEvent> {
        let enrollment_id = self.enrollment_id;
        query!(
            DomainEvent,
            (events[
                EnrollmentCreated,
                EnrollmentStatusChanged,
                EnrollmentSessionChanged,
                SecureLinkIssued,
                SecureLinkRevoked,
                MaterialDownloaded
            ]) and (enrollment_id == enrollment_id)
        )
    }
}

impl StateMutate for Enrollment {
    fn mutate(&mut self, event: DomainEvent) {
        match event {
            DomainEvent::EnrollmentCreated {
                enrollment_id,
                user_id,
                course_id,
                course_type,
                session_id,
                order_id,
                status,
                enrolled_at,
            } => {
                self.record = Some(EnrollmentRecord {
                    enrollment_id,
                    user_id,
                    course_id,
                    course_type,
                    session_id,
                    order_id,
                    status,
                    enrolled_at,
                    updated_at: enrolled_at,
                });
            }
            DomainEvent::EnrollmentStatusChanged { to, changed_at, .. } => {
                if let Some(record) = self.record.as_mut() {
                    record.status = to;
                    record.updated_at = changed_at;
                }
            }
            DomainEvent::EnrollmentSessionChanged {
                session,
                to,
                changed_at,
                ..
            } => {
                if let Some(record) = self.record.as_mut() {
                    record.session_id = session.map(|s| s.session_id);
                    record.status = to;
                    record.updated_at = changed_at;
                }
            }
            DomainEvent::SecureLinkIssued {
                token,
                attachment_id,
                issued_at,
                ..
            } => {
                self.links.insert(
                    attachment_id,
                    LinkRecord {
                        token,
                        attachment_id,
                        issued_at,
                        revoked: false,
                        download_count: 0,
                        last_downloaded_at: None,
                    },
                );
            }
            DomainEvent::SecureLinkRevoked { token, .. } => {
                if let Some(link) = self.link_by_token(&token) {
                    link.revoked = true;
                }
            }
            DomainEvent::MaterialDownloaded {
                token,
                downloaded_at,
                ..
            } => {
                if let Some(link) = self.link_by_token(&token) {
                    link.download_count += 1;
                    link.last_downloaded_at = Some(downloaded_at);
                }
            }
            _ => {}
        }
    }
}

/// Which of a set of enrollment ids exist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enrollments {
    ids: Vec<EnrollmentId>,
    existing: BTreeSet<EnrollmentId>,
}

impl Enrollments {
    pub fn new(ids: impl IntoIterator<Item = EnrollmentId>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn contains(&self, id: &EnrollmentId) -> bool {
        self.existing.contains(id)
    }
}

impl StateQuery for Enrollments {
    type Event = DomainEvent;

    fn query(&self) -> StreamQuery<DomainEvent> {
        query!(DomainEvent, (events[EnrollmentCreated]) and (enrollment_id in &self.ids))
    }
}

impl StateMutate for Enrollments {
    fn mutate(&mut self, event: DomainEvent) {
        if let DomainEvent::EnrollmentCreated { enrollment_id, .. } = event {
            self.existing.insert(enrollment_id);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct OrderEntry {
    status: OrderStatus,
    expected: Vec<EnrollmentId>,
}

/// Every order and enrollment, for remediation and diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FulfillmentBook {
    orders: BTreeMap<OrderId, OrderEntry>,
    enrollments: BTreeMap<EnrollmentId, EnrollmentStatus>,
}

impl FulfillmentBook {
    /// Paid or processed orders with at least one expected enrollment missing.
    pub fn orders_missing_enrollments(&self) -> Vec<OrderId> {
        self.orders
            .iter()
            .filter(|(_, order)| {
                order.status.is_paid()
                    && order
                        .expected
                        .iter()
                        .any(|id| !self.enrollments.contains_key(id))
            })
            .map(|(order_id, _)| *order_id)
            .collect()
    }

    pub fn paid_orders(&self) -> usize {
        self.orders.values().filter(|o| o.status.is_paid()).count()
    }

    pub fn orders_by_status(&self) -> BTreeMap<OrderStatus, usize> {
        let mut totals = BTreeMap::new();
        for order in self.orders.values() {
            *totals.entry(order.status).or_default() += 1;
        }
        totals
    }

    pub fn enrollments_by_status(&self) -> BTreeMap<EnrollmentStatus, usize> {
        let mut totals = BTreeMap::new();
        for status in self.enrollments.values() {
            *totals.entry(*status).or_default() += 1;
        }
        totals
    }
}

impl StateQuery for FulfillmentBook {
    type Event = DomainEvent;

    fn query(&self) -> StreamQuery<DomainEvent> {
        query!(
            DomainEvent,
            events[
                OrderPlaced,
                OrderStatusChanged,
                EnrollmentCreated,
                EnrollmentStatusChanged,
                EnrollmentSessionChanged
            ]
        )
    }
}

impl StateMutate for FulfillmentBook {
    fn mutate(&mut self, event: DomainEvent) {
        match event {
            DomainEvent::OrderPlaced {
                order_id,
                user_id,
                lines,
                ..
            } => {
                let mut expected: Vec<EnrollmentId> = lines
                    .iter()
                    .map(|line| enrollment_id(user_id, line.course_id, line.session_id))
                    .collect();
                expected.sort();
                expected.dedup();
                self.orders.insert(
                    order_id,
                    OrderEntry {
                        status: OrderStatus::New,
                        expected,
                    },
                );
            }
            DomainEvent::OrderStatusChanged { order_id, to, .. } => {
                if let Some(order) = self.orders.get_mut(&order_id) {
                    order.status = to;
                }
            }
            DomainEvent::EnrollmentCreated {
                enrollment_id,
                status,
                ..
            } => {
                self.enrollments.insert(enrollment_id, status);
            }
            DomainEvent::EnrollmentStatusChanged {
                enrollment_id, to, ..
            }
            | DomainEvent::EnrollmentSessionChanged {
                enrollment_id, to, ..
            } => {
                self.enrollments.insert(enrollment_id, to);
            }
            _ => {}
        }
    }
}

/// Creates the missing enrollments of a paid order.
///
/// `expected` lists the enrollment ids of the order lines, as returned by
/// [`Order::expected_enrollments`], and `sessions` the sessions they sit in.
///
/// A line whose session filled up after the order was placed is enrolled without a session.
/// The enrollment keeps the id of its line and waits for a session to be attached.
#[derive(Debug)]
pub struct IssueEnrollments {
    pub order_id: OrderId,
    pub expected: Vec<EnrollmentId>,
    pub sessions: Vec<SessionId>,
    pub now: DateTime<Utc>,
}

impl IssueEnrollments {
    pub fn for_order(order: &Order, now: DateTime<Utc>) -> Self {
        let mut sessions: Vec<SessionId> =
            order.lines().iter().filter_map(|line| line.session_id).collect();
        sessions.sort();
        sessions.dedup();
        Self {
            order_id: order.order_id(),
            expected: order.expected_enrollments(),
            sessions,
            now,
        }
    }
}

impl Decision for IssueEnrollments {
    type Event = DomainEvent;
    type StateQuery = (Order, Enrollments, Sessions);
    type Error = EnrollmentError;

    fn state_query(&self) -> Self::StateQuery {
        (
            Order::new(self.order_id),
            Enrollments::new(self.expected.iter().copied()),
            Sessions::new(self.sessions.iter().copied()),
        )
    }

    fn process(
        &self,
        (order, enrollments, sessions): &Self::StateQuery,
    ) -> Result<Vec<Self::Event>, Self::Error> {
        let status = order
            .status()
            .ok_or(EnrollmentError::OrderNotFound(self.order_id))?;
        if !status.is_paid() {
            return Err(EnrollmentError::OrderNotPaid(status));
        }
        let user_id = order.user_id().unwrap_or_default();
        let mut issued = BTreeSet::new();
        let mut changes = vec![];
        for line in order.lines() {
            let id = enrollment_id(user_id, line.course_id, line.session_id);
            if enrollments.contains(&id) || !issued.insert(id) {
                continue;
            }
            let session_id = line.session_id.filter(|session_id| {
                !matches!(
                    sessions.board().check_seat(*session_id, line.course_id, None),
                    Err(SeatError::SessionFull(_))
                )
            });
            changes.push(DomainEvent::EnrollmentCreated {
                enrollment_id: id,
                user_id,
                course_id: line.course_id,
                course_type: line.course_type,
                session_id,
                order_id: self.order_id,
                status: EnrollmentStatus::Paid,
                enrolled_at: self.now,
            });
        }
        Ok(changes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Attach(SessionId),
    Switch(SessionId),
    Detach,
}

impl SessionCommand {
    fn target(&self) -> Option<SessionId> {
        match self {
            SessionCommand::Attach(session_id) | SessionCommand::Switch(session_id) => {
                Some(*session_id)
            }
            SessionCommand::Detach => None,
        }
    }
}

/// Attaches, switches or detaches the live session of an enrollment.
#[derive(Debug)]
pub struct ChangeEnrollmentSession {
    pub enrollment_id: EnrollmentId,
    pub command: SessionCommand,
    pub now: DateTime<Utc>,
}

impl Decision for ChangeEnrollmentSession {
    type Event = DomainEvent;
    type StateQuery = (Enrollment, Sessions);
    type Error = EnrollmentError;

    fn state_query(&self) -> Self::StateQuery {
        (
            Enrollment::new(self.enrollment_id),
            Sessions::new(self.command.target()),
        )
    }

    fn process(
        &self,
        (enrollment, sessions): &Self::StateQuery,
    ) -> Result<Vec<Self::Event>, Self::Error> {
        let record = enrollment.require()?;
        if record.course_type != CourseType::Live {
            return Err(EnrollmentError::NotALiveEnrollment(self.enrollment_id));
        }
        if record.status == EnrollmentStatus::Completed {
            return Err(EnrollmentError::EnrollmentCompleted(self.enrollment_id));
        }

        let (change, session, to) = match self.command {
            SessionCommand::Attach(session_id) => {
                let to = record.status.transition(EnrollmentStatus::Notified)?;
                let session = sessions.board().check_seat(
                    session_id,
                    record.course_id,
                    Some(self.enrollment_id),
                )?;
                (SessionChange::Attached, Some(session.details()), to)
            }
            SessionCommand::Switch(session_id) => {
                let current = record
                    .session_id
                    .filter(|_| record.status == EnrollmentStatus::Notified)
                    .ok_or(EnrollmentError::NoSessionAttached(self.enrollment_id))?;
                if current == session_id {
                    return Err(EnrollmentError::SameSession(session_id));
                }
                let session = sessions.board().check_seat(
                    session_id,
                    record.course_id,
                    Some(self.enrollment_id),
                )?;
                (SessionChange::Switched, Some(session.details()), record.status)
            }
            SessionCommand::Detach => {
                if record.session_id.is_none() {
                    return Err(EnrollmentError::NoSessionAttached(self.enrollment_id));
                }
                let to = record.status.transition(EnrollmentStatus::Paid)?;
                (SessionChange::Detached, None, to)
            }
        };

        Ok(vec![DomainEvent::EnrollmentSessionChanged {
            enrollment_id: self.enrollment_id,
            user_id: record.user_id,
            course_id: record.course_id,
            order_id: record.order_id,
            change,
            previous_session_id: record.session_id,
            session,
            from: record.status,
            to,
            changed_at: self.now,
        }])
    }
}

#[derive(Debug)]
pub struct CancelEnrollment {
    pub enrollment_id: EnrollmentId,
    pub now: DateTime<Utc>,
}

impl Decision for CancelEnrollment {
    type Event = DomainEvent;
    type StateQuery = Enrollment;
    type Error = EnrollmentError;

    fn state_query(&self) -> Self::StateQuery {
        Enrollment::new(self.enrollment_id)
    }

    fn process(&self, enrollment: &Self::StateQuery) -> Result<Vec<Self::Event>, Self::Error> {
        let record = enrollment.require()?;
        let to = record.status.transition(EnrollmentStatus::Cancelled)?;
        Ok(vec![DomainEvent::EnrollmentStatusChanged {
            enrollment_id: self.enrollment_id,
            user_id: record.user_id,
            course_id: record.course_id,
            session_id: record.session_id,
            order_id: record.order_id,
            from: record.status,
            to,
            changed_at: self.now,
        }])
    }
}
