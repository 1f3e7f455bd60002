//! Secure links to course materials and their download audit.
use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use coursedesk_events::{query, Decision, StateMutate, StateQuery, StreamQuery};
use rand::rngs::OsRng;
use rand::RngCore;
use uuid::Uuid;

use super::catalog::{Attachment, CourseAttachments};
use super::enrollment::Enrollment;
use super::order::Order;
use super::{
    AttachmentId, CourseId, CourseType, DeliveredLink, DomainEvent, EnrollmentId,
    EnrollmentStatus, ErrorKind, InvalidTransition, Lifecycle, OrderId, OrderStatus, SecureLinkId,
};

const SECURE_LINK_NAMESPACE: Uuid = Uuid::from_u128(0x2d7e_91b0_5c3a_4e86_a1f4_0b9c_7d2e_6f13);

/// A new download token: 256 random bits, url-safe base64 without padding.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Links are unique per enrollment and attachment.
pub fn secure_link_id(enrollment_id: EnrollmentId, attachment_id: AttachmentId) -> SecureLinkId {
    Uuid::new_v5(
        &SECURE_LINK_NAMESPACE,
        format!("{enrollment_id}:{attachment_id}").as_bytes(),
    )
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("enrollment {0} not found")]
    EnrollmentNotFound(EnrollmentId),
    #[error("enrollment {0} is not for a pdf course")]
    NotAPdfEnrollment(EnrollmentId),
    #[error("no attachments were given")]
    NoAttachments,
    #[error("attachment {0} not found")]
    AttachmentNotFound(AttachmentId),
    #[error("attachment {0} is revoked")]
    AttachmentRevoked(AttachmentId),
    #[error("secure link not found")]
    LinkNotFound,
    #[error("secure link is revoked")]
    LinkRevoked,
    #[error("material is no longer available")]
    MaterialUnavailable,
    #[error("enrollment in status {0:?} cannot download materials")]
    EnrollmentInactive(EnrollmentStatus),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition<EnrollmentStatus>),
    #[error(transparent)]
    InvalidOrderTransition(#[from] InvalidTransition<OrderStatus>),
}

impl DeliveryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeliveryError::EnrollmentNotFound(_)
            | DeliveryError::AttachmentNotFound(_)
            | DeliveryError::LinkNotFound => ErrorKind::NotFound,
            DeliveryError::LinkRevoked
            | DeliveryError::MaterialUnavailable
            | DeliveryError::EnrollmentInactive(_) => ErrorKind::Forbidden,
            _ => ErrorKind::Validation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTarget {
    pub enrollment_id: EnrollmentId,
    pub attachment_id: AttachmentId,
    pub course_id: CourseId,
    pub revoked: bool,
}

/// The link behind a download token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureLink {
    token: String,
    target: Option<LinkTarget>,
}

impl SecureLink {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            target: None,
        }
    }

    pub fn target(&self) -> Option<&LinkTarget> {
        self.target.as_ref()
    }
}

impl StateQuery for SecureLink {
    type Event = DomainEvent;

    fn query(&self) -> StreamQuery<DomainEvent> {
        let token = &self.token;
        query!(DomainEvent, (events[SecureLinkIssued, SecureLinkRevoked]) and (token == token))
    }
}

impl StateMutate for SecureLink {
    fn mutate(&mut self, event: DomainEvent) {
        match event {
            DomainEvent::SecureLinkIssued {
                enrollment_id,
                attachment_id,
                course_id,
                ..
            } => {
                self.target = Some(LinkTarget {
                    enrollment_id,
                    attachment_id,
                    course_id,
                    revoked: false,
                });
            }
            DomainEvent::SecureLinkRevoked { .. } => {
                if let Some(target) = self.target.as_mut() {
                    target.revoked = true;
                }
            }
            _ => {}
        }
    }
}

/// Checks that the holder of a token may download the linked material.
pub fn check_access<'a>(
    link: &SecureLink,
    enrollment: &Enrollment,
    attachments: &'a CourseAttachments,
) -> Result<&'a Attachment, DeliveryError> {
    let target = link.target().ok_or(DeliveryError::LinkNotFound)?;
    if target.revoked {
        return Err(DeliveryError::LinkRevoked);
    }
    let attachment = attachments
        .get(&target.attachment_id)
        .filter(|attachment| !attachment.revoked)
        .ok_or(DeliveryError::MaterialUnavailable)?;
    let record = enrollment
        .record()
        .ok_or(DeliveryError::EnrollmentNotFound(target.enrollment_id))?;
    if !record.status.is_active() {
        return Err(DeliveryError::EnrollmentInactive(record.status));
    }
    Ok(attachment)
}

/// Mints download links of a pdf enrollment and completes it.
///
/// Attachments that already have a link keep it. Once every enrollment of the order is
/// settled, a paid order becomes processed.
#[derive(Debug)]
pub struct CreateSecureLinks {
    pub enrollment_id: EnrollmentId,
    pub order_id: OrderId,
    pub course_id: CourseId,
    pub attachment_ids: Vec<AttachmentId>,
    pub tokens: BTreeMap<AttachmentId, String>,
    pub now: DateTime<Utc>,
}

impl CreateSecureLinks {
    /// Prepares links for the attachments of the enrollment, with fresh tokens.
    pub fn new(
        enrollment: &Enrollment,
        attachment_ids: Vec<AttachmentId>,
        now: DateTime<Utc>,
    ) -> Result<Self, DeliveryError> {
        let record = enrollment
            .record()
            .ok_or(DeliveryError::EnrollmentNotFound(enrollment.enrollment_id()))?;
        let tokens = attachment_ids
            .iter()
            .map(|attachment_id| (*attachment_id, generate_token()))
            .collect();
        Ok(Self {
            enrollment_id: record.enrollment_id,
            order_id: record.order_id,
            course_id: record.course_id,
            attachment_ids,
            tokens,
            now,
        })
    }
}

impl Decision for CreateSecureLinks {
    type Event = DomainEvent;
    type StateQuery = (Enrollment, Order, CourseAttachments);
    type Error = DeliveryError;

    fn state_query(&self) -> Self::StateQuery {
        (
            Enrollment::new(self.enrollment_id),
            Order::new(self.order_id),
            CourseAttachments::new(self.course_id),
        )
    }

    fn process(
        &self,
        (enrollment, order, attachments): &Self::StateQuery,
    ) -> Result<Vec<Self::Event>, Self::Error> {
        let record = enrollment
            .record()
            .ok_or(DeliveryError::EnrollmentNotFound(self.enrollment_id))?;
        if record.course_type != CourseType::Pdf {
            return Err(DeliveryError::NotAPdfEnrollment(self.enrollment_id));
        }
        if record.status != EnrollmentStatus::Completed {
            record.status.transition(EnrollmentStatus::Completed)?;
        }
        if self.attachment_ids.is_empty() {
            return Err(DeliveryError::NoAttachments);
        }

        let mut changes = vec![];
        let mut links = vec![];
        for attachment_id in &self.attachment_ids {
            let attachment = attachments
                .get(attachment_id)
                .ok_or(DeliveryError::AttachmentNotFound(*attachment_id))?;
            if attachment.revoked {
                return Err(DeliveryError::AttachmentRevoked(*attachment_id));
            }
            let token = match enrollment.link_for(attachment_id) {
                Some(existing) => existing.token.clone(),
                None => {
                    let token = self
                        .tokens
                        .get(attachment_id)
                        .cloned()
                        .unwrap_or_else(generate_token);
                    changes.push(DomainEvent::SecureLinkIssued {
                        link_id: secure_link_id(self.enrollment_id, *attachment_id),
                        token: token.clone(),
                        enrollment_id: self.enrollment_id,
                        attachment_id: *attachment_id,
                        course_id: record.course_id,
                        issued_at: self.now,
                    });
                    token
                }
            };
            if !links
                .iter()
                .any(|link: &DeliveredLink| link.attachment_id == *attachment_id)
            {
                links.push(DeliveredLink {
                    attachment_id: *attachment_id,
                    file_name: attachment.file_name.clone(),
                    token,
                });
            }
        }

        if record.status != EnrollmentStatus::Completed {
            changes.push(DomainEvent::EnrollmentStatusChanged {
                enrollment_id: self.enrollment_id,
                user_id: record.user_id,
                course_id: record.course_id,
                session_id: record.session_id,
                order_id: record.order_id,
                from: record.status,
                to: EnrollmentStatus::Completed,
                changed_at: self.now,
            });
        }

        let siblings_settled = order
            .enrollments()
            .iter()
            .filter(|(id, _)| **id != self.enrollment_id)
            .all(|(_, status)| status.is_settled());
        if siblings_settled && order.status() == Some(OrderStatus::Paid) {
            let user_id = order.user_id().unwrap_or(record.user_id);
            let to = OrderStatus::Paid.transition(OrderStatus::Processed)?;
            changes.push(DomainEvent::OrderStatusChanged {
                order_id: record.order_id,
                user_id,
                from: OrderStatus::Paid,
                to,
                changed_at: self.now,
            });
        }

        let issued = changes
            .iter()
            .any(|event| matches!(event, DomainEvent::SecureLinkIssued { .. }));
        if issued {
            changes.push(DomainEvent::MaterialsDelivered {
                enrollment_id: self.enrollment_id,
                user_id: record.user_id,
                order_id: record.order_id,
                course_id: record.course_id,
                links,
                delivered_at: self.now,
            });
        }
        Ok(changes)
    }
}

/// Records a download through a secure link.
///
/// Downloads of the same link do not invalidate each other, a revocation does.
#[derive(Debug)]
pub struct RecordDownload {
    pub token: String,
    pub enrollment_id: EnrollmentId,
    pub course_id: CourseId,
    pub now: DateTime<Utc>,
}

impl RecordDownload {
    pub fn new(token: &str, target: &LinkTarget, now: DateTime<Utc>) -> Self {
        Self {
            token: token.to_string(),
            enrollment_id: target.enrollment_id,
            course_id: target.course_id,
            now,
        }
    }
}

impl Decision for RecordDownload {
    type Event = DomainEvent;
    type StateQuery = (SecureLink, Enrollment, CourseAttachments);
    type Error = DeliveryError;

    fn state_query(&self) -> Self::StateQuery {
        (
            SecureLink::new(self.token.clone()),
            Enrollment::new(self.enrollment_id),
            CourseAttachments::new(self.course_id),
        )
    }

    fn validation_query(&self) -> Option<StreamQuery<DomainEvent>> {
        let (link, enrollment, attachments) = self.state_query();
        Some(
            link.query()
                .union(enrollment.query())
                .union(attachments.query())
                .exclude_events(&["MaterialDownloaded"]),
        )
    }

    fn process(
        &self,
        (link, enrollment, attachments): &Self::StateQuery,
    ) -> Result<Vec<Self::Event>, Self::Error> {
        let attachment = check_access(link, enrollment, attachments)?;
        Ok(vec![DomainEvent::MaterialDownloaded {
            token: self.token.clone(),
            enrollment_id: self.enrollment_id,
            attachment_id: attachment.attachment_id,
            downloaded_at: self.now,
        }])
    }
}

#[derive(Debug)]
pub struct RevokeSecureLink {
    pub token: String,
    pub now: DateTime<Utc>,
}

impl Decision for RevokeSecureLink {
    type Event = DomainEvent;
    type StateQuery = SecureLink;
    type Error = DeliveryError;

    fn state_query(&self) -> Self::StateQuery {
        SecureLink::new(self.token.clone())
    }

    fn process(&self, link: &Self::StateQuery) -> Result<Vec<Self::Event>, Self::Error> {
        let target = link.target().ok_or(DeliveryError::LinkNotFound)?;
        if target.revoked {
            return Ok(vec![]);
        }
        Ok(vec![DomainEvent::SecureLinkRevoked {
            token: self.token.clone(),
            enrollment_id: target.enrollment_id,
            revoked_at: self.now,
        }])
    }
}
