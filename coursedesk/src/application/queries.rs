use chrono::{DateTime, Utc};
use coursedesk_events::EventStore;
use rust_decimal::Decimal;
use serde::Serialize;

use super::{Application, Error};
use crate::domain::cart::{Cart, CartCloseReason, CartError, CartOwner};
use crate::domain::catalog::{CatalogError, CourseAttachments, CourseSessions, Courses};
use crate::domain::enrollment::{Enrollment, EnrollmentError};
use crate::domain::order::{Order, OrderError, Payment};
use crate::domain::{
    AttachmentId, CartId, CartItemId, CategoryId, CourseId, CourseType, DomainEvent,
    EnrollmentId, EnrollmentStatus, InstructorId, OrderId, OrderLine, OrderStatus, PaymentId,
    PaymentStatus, Provider, SessionId, UserId,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartItemView {
    pub cart_item_id: CartItemId,
    pub course_id: CourseId,
    pub session_id: Option<SessionId>,
    pub title: Option<String>,
    pub course_type: Option<CourseType>,
    pub unit_price: Option<Decimal>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartView {
    pub cart_id: CartId,
    pub owner: CartOwner,
    pub closed: Option<CartCloseReason>,
    pub opened_at: Option<DateTime<Utc>>,
    pub items: Vec<CartItemView>,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderLineView {
    #[serde(flatten)]
    pub line: OrderLine,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentView {
    pub payment_id: PaymentId,
    pub provider: Provider,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub provider_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub initiated_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl From<&Payment> for PaymentView {
    fn from(payment: &Payment) -> Self {
        Self {
            payment_id: payment.payment_id,
            provider: payment.provider,
            amount: payment.amount,
            currency: payment.currency.clone(),
            status: payment.status,
            provider_ref: payment.provider_ref.clone(),
            failure_reason: payment.failure_reason.clone(),
            initiated_at: payment.initiated_at,
            settled_at: payment.settled_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderView {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub cart_id: CartId,
    pub status: OrderStatus,
    pub amount: Decimal,
    pub currency: String,
    pub lines: Vec<OrderLineView>,
    pub payments: Vec<PaymentView>,
    pub enrollments: Vec<EnrollmentId>,
    pub placed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub session_id: SessionId,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub capacity: Option<u32>,
    pub seats_taken: u32,
    pub seats_left: Option<u32>,
    pub teams_link: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttachmentView {
    pub attachment_id: AttachmentId,
    pub file_name: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseView {
    pub course_id: CourseId,
    pub category_id: CategoryId,
    pub instructor_id: Option<InstructorId>,
    pub title: String,
    pub course_type: CourseType,
    pub price: Decimal,
    pub currency: String,
    pub active: bool,
    pub sessions: Vec<SessionView>,
    pub attachments: Vec<AttachmentView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkView {
    pub token: String,
    pub url: String,
    pub attachment_id: AttachmentId,
    pub issued_at: DateTime<Utc>,
    pub revoked: bool,
    pub download_count: u64,
    pub last_downloaded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollmentView {
    pub enrollment_id: EnrollmentId,
    pub user_id: UserId,
    pub course_id: CourseId,
    pub course_type: CourseType,
    pub session_id: Option<SessionId>,
    pub order_id: OrderId,
    pub status: EnrollmentStatus,
    pub enrolled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub links: Vec<LinkView>,
}

/// A link handed out by `create_secure_links`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecureLinkView {
    pub attachment_id: AttachmentId,
    pub file_name: String,
    pub token: String,
    pub url: String,
}

impl<ES> Application<ES>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    pub async fn get_cart(&self, cart_id: CartId) -> Result<CartView, Error> {
        let cart = self
            .decision_maker
            .load(Cart::new(cart_id))
            .await
            .map_err(Error::store)?
            .into_state();
        let owner = cart
            .owner()
            .cloned()
            .ok_or(CartError::CartNotFound(cart_id))?;
        let courses = self
            .decision_maker
            .load(Courses::new(cart.items().iter().map(|item| item.course_id)))
            .await
            .map_err(Error::store)?
            .into_state();

        let items: Vec<CartItemView> = cart
            .items()
            .iter()
            .map(|item| {
                let course = courses.get(&item.course_id);
                CartItemView {
                    cart_item_id: item.cart_item_id,
                    course_id: item.course_id,
                    session_id: item.session_id,
                    title: course.map(|c| c.title.clone()),
                    course_type: course.map(|c| c.course_type),
                    unit_price: course.map(|c| c.price),
                    currency: course.map(|c| c.currency.clone()),
                }
            })
            .collect();
        Ok(CartView {
            cart_id,
            owner,
            closed: cart.closed(),
            opened_at: cart.opened_at(),
            total: items.iter().filter_map(|item| item.unit_price).sum(),
            items,
        })
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<OrderView, Error> {
        let order = self
            .decision_maker
            .load(Order::new(order_id))
            .await
            .map_err(Error::store)?
            .into_state();
        order_view(&order).ok_or_else(|| OrderError::OrderNotFound(order_id).into())
    }

    pub async fn get_course(&self, course_id: CourseId) -> Result<CourseView, Error> {
        let (courses, sessions, attachments) = self
            .decision_maker
            .load((
                Courses::new([course_id]),
                CourseSessions::new(course_id),
                CourseAttachments::new(course_id),
            ))
            .await
            .map_err(Error::store)?
            .into_state();
        let course = courses
            .get(&course_id)
            .ok_or(CatalogError::CourseNotFound(course_id))?;

        let board = sessions.board();
        let mut session_views: Vec<SessionView> = board
            .sessions()
            .map(|session| {
                let seats_taken = board.taken(session.session_id);
                SessionView {
                    session_id: session.session_id,
                    start_at: session.start_at,
                    end_at: session.end_at,
                    capacity: session.capacity,
                    seats_taken,
                    seats_left: session
                        .capacity
                        .map(|capacity| capacity.saturating_sub(seats_taken)),
                    teams_link: session.teams_link.clone(),
                }
            })
            .collect();
        session_views.sort_by_key(|session| session.start_at);

        Ok(CourseView {
            course_id,
            category_id: course.category_id,
            instructor_id: course.instructor_id,
            title: course.title.clone(),
            course_type: course.course_type,
            price: course.price,
            currency: course.currency.clone(),
            active: course.active,
            sessions: session_views,
            attachments: attachments
                .live()
                .map(|attachment| AttachmentView {
                    attachment_id: attachment.attachment_id,
                    file_name: attachment.file_name.clone(),
                    size_bytes: attachment.size_bytes,
                })
                .collect(),
        })
    }

    pub async fn get_enrollment(&self, enrollment_id: EnrollmentId) -> Result<EnrollmentView, Error> {
        let enrollment = self
            .decision_maker
            .load(Enrollment::new(enrollment_id))
            .await
            .map_err(Error::store)?
            .into_state();
        self.enrollment_view(&enrollment)
            .ok_or_else(|| EnrollmentError::EnrollmentNotFound(enrollment_id).into())
    }

    pub(super) fn enrollment_view(&self, enrollment: &Enrollment) -> Option<EnrollmentView> {
        let record = enrollment.record()?;
        Some(EnrollmentView {
            enrollment_id: record.enrollment_id,
            user_id: record.user_id,
            course_id: record.course_id,
            course_type: record.course_type,
            session_id: record.session_id,
            order_id: record.order_id,
            status: record.status,
            enrolled_at: record.enrolled_at,
            updated_at: record.updated_at,
            links: enrollment
                .links()
                .map(|link| LinkView {
                    token: link.token.clone(),
                    url: self.download_url(&link.token),
                    attachment_id: link.attachment_id,
                    issued_at: link.issued_at,
                    revoked: link.revoked,
                    download_count: link.download_count,
                    last_downloaded_at: link.last_downloaded_at,
                })
                .collect(),
        })
    }
}

pub(super) fn order_view(order: &Order) -> Option<OrderView> {
    Some(OrderView {
        order_id: order.order_id(),
        user_id: order.user_id()?,
        cart_id: order.cart_id()?,
        status: order.status()?,
        amount: order.amount(),
        currency: order.currency().to_string(),
        lines: order
            .lines()
            .iter()
            .map(|line| OrderLineView {
                total: line.total(),
                line: line.clone(),
            })
            .collect(),
        payments: order.payments().map(PaymentView::from).collect(),
        enrollments: order.enrollments().keys().copied().collect(),
        placed_at: order.placed_at()?,
        updated_at: order.updated_at()?,
    })
}
