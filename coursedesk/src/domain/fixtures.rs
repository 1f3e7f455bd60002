use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::enrollment::enrollment_id;
use super::*;

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
        .single()
        .unwrap_or_default()
}

pub fn sar(amount: i64) -> Decimal {
    Decimal::new(amount * 100, 2)
}

pub fn schedule() -> (DateTime<Utc>, DateTime<Utc>) {
    let start_at = now() + Duration::days(7);
    (start_at, start_at + Duration::hours(2))
}

pub fn course_created(course_id: CourseId, course_type: CourseType, price: Decimal) -> DomainEvent {
    DomainEvent::CourseCreated {
        course_id,
        category_id: Uuid::nil(),
        instructor_id: None,
        title: "Course".to_string(),
        course_type,
        price,
        currency: "SAR".to_string(),
    }
}

pub fn session_scheduled(
    session_id: SessionId,
    course_id: CourseId,
    capacity: Option<u32>,
) -> DomainEvent {
    let (start_at, end_at) = schedule();
    DomainEvent::SessionScheduled {
        session_id,
        course_id,
        start_at,
        end_at,
        capacity,
        teams_link: "https://teams.example/session".to_string(),
    }
}

pub fn attachment_uploaded(
    attachment_id: AttachmentId,
    course_id: CourseId,
    file_name: &str,
) -> DomainEvent {
    DomainEvent::AttachmentUploaded {
        attachment_id,
        course_id,
        file_name: file_name.to_string(),
        blob_path: catalog::blob_path(course_id, attachment_id, file_name),
        size_bytes: 4,
    }
}

/// A paid enrollment of `user_id`, issued by an unknown order.
pub fn enrollment_created(
    user_id: UserId,
    course_id: CourseId,
    session_id: Option<SessionId>,
) -> DomainEvent {
    enrollment_created_with_id(
        enrollment_id(user_id, course_id, session_id),
        user_id,
        course_id,
        session_id,
    )
}

pub fn enrollment_created_with_id(
    enrollment_id: EnrollmentId,
    user_id: UserId,
    course_id: CourseId,
    session_id: Option<SessionId>,
) -> DomainEvent {
    DomainEvent::EnrollmentCreated {
        enrollment_id,
        user_id,
        course_id,
        course_type: if session_id.is_some() {
            CourseType::Live
        } else {
            CourseType::Pdf
        },
        session_id,
        order_id: Uuid::nil(),
        status: EnrollmentStatus::Paid,
        enrolled_at: now(),
    }
}

pub fn cart_opened(cart_id: CartId, owner: CartOwner) -> DomainEvent {
    DomainEvent::CartOpened {
        cart_id,
        owner,
        opened_at: now(),
    }
}

pub fn cart_item_added(
    cart_id: CartId,
    owner: CartOwner,
    course_id: CourseId,
    session_id: Option<SessionId>,
) -> DomainEvent {
    DomainEvent::CartItemAdded {
        cart_id,
        owner,
        cart_item_id: Uuid::new_v4(),
        course_id,
        session_id,
    }
}

pub fn pdf_line(course_id: CourseId, unit_price: Decimal) -> OrderLine {
    OrderLine {
        course_id,
        session_id: None,
        course_type: CourseType::Pdf,
        title: "Course".to_string(),
        unit_price,
        qty: 1,
    }
}

pub fn order_placed(order_id: OrderId, user_id: UserId, lines: Vec<OrderLine>) -> DomainEvent {
    let amount = lines.iter().map(OrderLine::total).sum();
    DomainEvent::OrderPlaced {
        order_id,
        user_id,
        cart_id: Uuid::new_v4(),
        lines,
        amount,
        currency: "SAR".to_string(),
        placed_at: now(),
    }
}

pub fn order_status_changed(
    order_id: OrderId,
    user_id: UserId,
    from: OrderStatus,
    to: OrderStatus,
) -> DomainEvent {
    DomainEvent::OrderStatusChanged {
        order_id,
        user_id,
        from,
        to,
        changed_at: now(),
    }
}

pub fn payment_initiated(
    payment_id: PaymentId,
    order_id: OrderId,
    provider: Provider,
    amount: Decimal,
) -> DomainEvent {
    DomainEvent::PaymentInitiated {
        payment_id,
        order_id,
        provider,
        amount,
        currency: "SAR".to_string(),
        initiated_at: now(),
    }
}
