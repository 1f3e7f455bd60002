use bytes::Bytes;
use chrono::{DateTime, Utc};
use coursedesk_events::EventStore;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::queries::{
    AttachmentView, CartView, EnrollmentView, OrderView, PaymentView, SecureLinkView,
};
use super::{Application, Error};
use crate::domain::cart::{
    AddCartItem, Cart, CartError, CartOwner, MergeCarts, OpenCart, OwnerCart, RemoveCartItem,
};
use crate::domain::catalog::{
    self, CatalogError, CourseAttachments, Courses, CreateCategory, CreateCourse,
    RegisterAttachment, RegisterInstructor, RepriceCourse, RescheduleSession, RevokeAttachment,
    ScheduleSession, SetCourseActive,
};
use crate::domain::delivery::{
    check_access, CreateSecureLinks, DeliveryError, RecordDownload, RevokeSecureLink, SecureLink,
};
use crate::domain::enrollment::{
    enrollment_id, CancelEnrollment, ChangeEnrollmentSession, Enrollment, EnrollmentError,
    IssueEnrollments, SessionCommand,
};
use crate::domain::order::{ChangeOrderStatus, InitiatePayment, Order, OrderError, PlaceOrder};
use crate::domain::payment::{HandlePaymentWebhook, PaymentError, PaymentLookup};
use crate::domain::{
    AttachmentId, CartId, CartItemId, CategoryId, CourseId, CourseType, DomainEvent,
    EnrollmentId, InstructorId, OrderId, OrderStatus, PaymentId, Provider, SessionId, UserId,
};
use crate::storage::{self, ByteStream};

#[derive(Debug, Clone, Deserialize)]
pub struct NewCourse {
    pub category_id: CategoryId,
    pub instructor_id: Option<InstructorId>,
    pub title: String,
    pub course_type: CourseType,
    pub price: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSession {
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub capacity: Option<u32>,
    pub teams_link: String,
}

/// The outcome of a payment webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookReceipt {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    /// The webhook had already been applied and changed nothing.
    pub replayed: bool,
}

/// A material ready to be streamed to the holder of a secure link.
pub struct Download {
    pub file_name: String,
    pub content_type: &'static str,
    pub size: u64,
    pub body: ByteStream,
}

impl<ES> Application<ES>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    #[tracing::instrument(skip(self))]
    pub async fn create_category(
        &self,
        parent_id: Option<CategoryId>,
        name: String,
    ) -> Result<CategoryId, Error> {
        let category_id = Uuid::new_v4();
        self.decision_maker
            .make(CreateCategory {
                category_id,
                parent_id,
                name,
            })
            .await?;
        tracing::info!(%category_id, "category created");
        Ok(category_id)
    }

    #[tracing::instrument(skip(self))]
    pub async fn register_instructor(&self, name: String) -> Result<InstructorId, Error> {
        let instructor_id = Uuid::new_v4();
        self.decision_maker
            .make(RegisterInstructor {
                instructor_id,
                name,
            })
            .await?;
        tracing::info!(%instructor_id, "instructor registered");
        Ok(instructor_id)
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_course(&self, course: NewCourse) -> Result<CourseId, Error> {
        let course_id = Uuid::new_v4();
        self.decision_maker
            .make(CreateCourse {
                course_id,
                category_id: course.category_id,
                instructor_id: course.instructor_id,
                title: course.title,
                course_type: course.course_type,
                price: course.price,
                currency: course.currency,
            })
            .await?;
        tracing::info!(%course_id, "course created");
        Ok(course_id)
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_course_active(&self, course_id: CourseId, active: bool) -> Result<(), Error> {
        self.decision_maker
            .make(SetCourseActive { course_id, active })
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn reprice_course(
        &self,
        course_id: CourseId,
        price: Decimal,
        currency: String,
    ) -> Result<(), Error> {
        self.decision_maker
            .make(RepriceCourse {
                course_id,
                price,
                currency,
            })
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn schedule_session(
        &self,
        course_id: CourseId,
        session: NewSession,
    ) -> Result<SessionId, Error> {
        let session_id = Uuid::new_v4();
        self.decision_maker
            .make(ScheduleSession {
                session_id,
                course_id,
                start_at: session.start_at,
                end_at: session.end_at,
                capacity: session.capacity,
                teams_link: session.teams_link,
            })
            .await?;
        tracing::info!(%session_id, "session scheduled");
        Ok(session_id)
    }

    #[tracing::instrument(skip(self))]
    pub async fn reschedule_session(
        &self,
        session_id: SessionId,
        session: NewSession,
    ) -> Result<(), Error> {
        self.decision_maker
            .make(RescheduleSession {
                session_id,
                start_at: session.start_at,
                end_at: session.end_at,
                capacity: session.capacity,
                teams_link: session.teams_link,
            })
            .await?;
        Ok(())
    }

    /// Stores the file of an attachment and adds it to the course.
    #[tracing::instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn upload_attachment(
        &self,
        course_id: CourseId,
        file_name: String,
        bytes: Bytes,
    ) -> Result<AttachmentView, Error> {
        if !catalog::is_valid_file_name(&file_name) {
            return Err(CatalogError::InvalidFileName(file_name).into());
        }
        let courses = self
            .decision_maker
            .load(Courses::new([course_id]))
            .await
            .map_err(Error::store)?;
        if courses.state().get(&course_id).is_none() {
            return Err(CatalogError::CourseNotFound(course_id).into());
        }

        let attachment_id = Uuid::new_v4();
        let blob_path = catalog::blob_path(course_id, attachment_id, &file_name);
        let size_bytes = self.storage.put(&blob_path, bytes).await?;
        let registered = self
            .decision_maker
            .make(RegisterAttachment {
                attachment_id,
                course_id,
                file_name: file_name.clone(),
                size_bytes,
            })
            .await;
        if let Err(err) = registered {
            if let Err(cleanup) = self.storage.delete(&blob_path).await {
                tracing::warn!(%blob_path, error = %cleanup, "attachment blob left behind");
            }
            return Err(err.into());
        }
        tracing::info!(%attachment_id, %blob_path, "attachment uploaded");
        Ok(AttachmentView {
            attachment_id,
            file_name,
            size_bytes,
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn revoke_attachment(
        &self,
        course_id: CourseId,
        attachment_id: AttachmentId,
    ) -> Result<(), Error> {
        self.decision_maker
            .make(RevokeAttachment {
                course_id,
                attachment_id,
            })
            .await?;
        Ok(())
    }

    /// Opens a cart for the owner, or returns the one already open.
    #[tracing::instrument(skip(self))]
    pub async fn init_cart(
        &self,
        user_id: Option<UserId>,
        anonymous_id: Option<String>,
    ) -> Result<CartView, Error> {
        let owner = CartOwner::from_ids(user_id, anonymous_id)?;
        let cart_id = Uuid::new_v4();
        let result = self
            .decision_maker
            .make(OpenCart {
                cart_id,
                owner,
                now: Utc::now(),
            })
            .await;
        match result {
            Ok(_) => {
                tracing::info!(%cart_id, "cart opened");
                self.get_cart(cart_id).await
            }
            Err(coursedesk_events::DecisionError::Domain(CartError::AlreadyOpen(open))) => {
                self.get_cart(open).await
            }
            Err(err) => Err(err.into()),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn add_cart_item(
        &self,
        cart_id: CartId,
        course_id: CourseId,
        session_id: Option<SessionId>,
    ) -> Result<CartView, Error> {
        self.decision_maker
            .make(AddCartItem {
                cart_id,
                cart_item_id: Uuid::new_v4(),
                course_id,
                session_id,
            })
            .await?;
        self.get_cart(cart_id).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_cart_item(
        &self,
        cart_id: CartId,
        cart_item_id: CartItemId,
    ) -> Result<CartView, Error> {
        self.decision_maker
            .make(RemoveCartItem {
                cart_id,
                cart_item_id,
            })
            .await?;
        self.get_cart(cart_id).await
    }

    /// Moves the items of the visitor's open cart into the user's open cart.
    #[tracing::instrument(skip(self))]
    pub async fn merge_carts(
        &self,
        anonymous_id: String,
        user_id: UserId,
    ) -> Result<CartView, Error> {
        self.decision_maker
            .make(MergeCarts {
                anonymous_id,
                user_id,
                new_cart_id: Uuid::new_v4(),
                now: Utc::now(),
            })
            .await?;
        let user_cart = self
            .decision_maker
            .load(OwnerCart::new(CartOwner::User(user_id)))
            .await
            .map_err(Error::store)?;
        let cart_id = user_cart
            .state()
            .open()
            .map(Cart::cart_id)
            .ok_or(Error::Conflict)?;
        self.get_cart(cart_id).await
    }

    /// Turns the user's cart into an order and closes the cart.
    #[tracing::instrument(skip(self))]
    pub async fn place_order(&self, cart_id: CartId, user_id: UserId) -> Result<OrderView, Error> {
        let cart = self
            .decision_maker
            .load(Cart::new(cart_id))
            .await
            .map_err(Error::store)?
            .into_state();
        if !cart.exists() {
            return Err(OrderError::CartNotFound(cart_id).into());
        }
        let order_id = Uuid::new_v4();
        self.decision_maker
            .make(PlaceOrder::for_cart(order_id, user_id, &cart, Utc::now()))
            .await?;
        tracing::info!(%order_id, "order placed");
        self.get_order(order_id).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn change_order_status(
        &self,
        order_id: OrderId,
        to: OrderStatus,
    ) -> Result<OrderView, Error> {
        self.decision_maker
            .make(ChangeOrderStatus {
                order_id,
                to,
                now: Utc::now(),
            })
            .await?;
        tracing::info!(%order_id, ?to, "order status changed");
        self.get_order(order_id).await
    }

    /// Records a pending payment; its id is the merchant reference sent to the gateway.
    #[tracing::instrument(skip(self))]
    pub async fn initiate_payment(
        &self,
        order_id: OrderId,
        provider: Provider,
    ) -> Result<PaymentView, Error> {
        let payment_id = Uuid::new_v4();
        self.decision_maker
            .make(InitiatePayment {
                order_id,
                payment_id,
                provider,
                now: Utc::now(),
            })
            .await?;
        let order = self
            .decision_maker
            .load(Order::new(order_id))
            .await
            .map_err(Error::store)?
            .into_state();
        order
            .payment(&payment_id)
            .map(PaymentView::from)
            .ok_or(Error::Conflict)
    }

    /// Verifies and applies a gateway webhook.
    #[tracing::instrument(skip(self, body, signature), fields(size = body.len()))]
    pub async fn handle_webhook(
        &self,
        provider: Provider,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookReceipt, Error> {
        let event = self
            .gateways
            .get(provider)?
            .parse_webhook(body, signature)
            .inspect_err(|err| tracing::warn!(error = %err, "webhook rejected"))?;
        let lookup = self
            .decision_maker
            .load(PaymentLookup::new(event.payment_id))
            .await
            .map_err(Error::store)?;
        let order_id = lookup
            .state()
            .order_id()
            .ok_or(PaymentError::PaymentNotFound(event.payment_id))?;

        let changes = self
            .decision_maker
            .make(HandlePaymentWebhook {
                order_id,
                payment_id: event.payment_id,
                provider,
                provider_ref: event.provider_ref,
                outcome: event.outcome,
                raw_payload: String::from_utf8_lossy(body).into_owned(),
                now: Utc::now(),
            })
            .await?;
        let replayed = changes.is_empty();
        if replayed {
            tracing::info!(payment_id = %event.payment_id, %order_id, "webhook replay acknowledged");
        } else {
            tracing::info!(payment_id = %event.payment_id, %order_id, "payment settled");
        }
        Ok(WebhookReceipt {
            payment_id: event.payment_id,
            order_id,
            replayed,
        })
    }

    /// Creates the missing enrollments of a paid order and returns the created ids.
    #[tracing::instrument(skip(self))]
    pub async fn issue_enrollments(&self, order_id: OrderId) -> Result<Vec<EnrollmentId>, Error> {
        let order = self
            .decision_maker
            .load(Order::new(order_id))
            .await
            .map_err(Error::store)?
            .into_state();
        if !order.exists() {
            return Err(EnrollmentError::OrderNotFound(order_id).into());
        }
        let created: Vec<EnrollmentId> = self
            .decision_maker
            .make(IssueEnrollments::for_order(&order, Utc::now()))
            .await?
            .into_iter()
            .filter_map(|event| match event.into_inner() {
                DomainEvent::EnrollmentCreated {
                    enrollment_id: id,
                    user_id,
                    course_id,
                    session_id,
                    ..
                } => {
                    if session_id.is_none() && id != enrollment_id(user_id, course_id, None) {
                        tracing::warn!(
                            %order_id,
                            enrollment_id = %id,
                            "session full, enrolled without a seat"
                        );
                    }
                    Some(id)
                }
                _ => None,
            })
            .collect();
        if !created.is_empty() {
            tracing::info!(%order_id, created = created.len(), "enrollments issued");
        }
        Ok(created)
    }

    /// Mints download links for a pdf enrollment and completes it.
    #[tracing::instrument(skip(self))]
    pub async fn create_secure_links(
        &self,
        enrollment_id: EnrollmentId,
        attachment_ids: Vec<AttachmentId>,
    ) -> Result<Vec<SecureLinkView>, Error> {
        let enrollment = self
            .decision_maker
            .load(Enrollment::new(enrollment_id))
            .await
            .map_err(Error::store)?
            .into_state();
        let decision = CreateSecureLinks::new(&enrollment, attachment_ids.clone(), Utc::now())?;
        let course_id = decision.course_id;
        let changes = self.decision_maker.make(decision).await?;
        if changes
            .iter()
            .any(|event| matches!(**event, DomainEvent::MaterialsDelivered { .. }))
        {
            tracing::info!(%enrollment_id, "materials delivered");
        }

        let (enrollment, attachments) = self
            .decision_maker
            .load((Enrollment::new(enrollment_id), CourseAttachments::new(course_id)))
            .await
            .map_err(Error::store)?
            .into_state();
        let mut links: Vec<SecureLinkView> = vec![];
        for attachment_id in attachment_ids {
            if links.iter().any(|link| link.attachment_id == attachment_id) {
                continue;
            }
            let (Some(link), Some(attachment)) = (
                enrollment.link_for(&attachment_id),
                attachments.get(&attachment_id),
            ) else {
                continue;
            };
            links.push(SecureLinkView {
                url: self.download_url(&link.token),
                attachment_id,
                file_name: attachment.file_name.clone(),
                token: link.token.clone(),
            });
        }
        Ok(links)
    }

    #[tracing::instrument(skip(self))]
    pub async fn change_enrollment_session(
        &self,
        enrollment_id: EnrollmentId,
        command: SessionCommand,
    ) -> Result<EnrollmentView, Error> {
        self.decision_maker
            .make(ChangeEnrollmentSession {
                enrollment_id,
                command,
                now: Utc::now(),
            })
            .await?;
        self.get_enrollment(enrollment_id).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel_enrollment(
        &self,
        enrollment_id: EnrollmentId,
    ) -> Result<EnrollmentView, Error> {
        self.decision_maker
            .make(CancelEnrollment {
                enrollment_id,
                now: Utc::now(),
            })
            .await?;
        tracing::info!(%enrollment_id, "enrollment cancelled");
        self.get_enrollment(enrollment_id).await
    }

    #[tracing::instrument(skip(self, token))]
    pub async fn revoke_secure_link(&self, token: String) -> Result<(), Error> {
        self.decision_maker
            .make(RevokeSecureLink {
                token,
                now: Utc::now(),
            })
            .await?;
        Ok(())
    }

    /// Opens the material behind a secure link and records the download.
    ///
    /// Nothing is recorded when access is denied or the file cannot be opened.
    #[tracing::instrument(skip(self, token))]
    pub async fn download_material(&self, token: &str) -> Result<Download, Error> {
        let link = self
            .decision_maker
            .load(SecureLink::new(token))
            .await
            .map_err(Error::store)?
            .into_state();
        let target = link.target().ok_or(DeliveryError::LinkNotFound)?.clone();
        let (enrollment, attachments) = self
            .decision_maker
            .load((
                Enrollment::new(target.enrollment_id),
                CourseAttachments::new(target.course_id),
            ))
            .await
            .map_err(Error::store)?
            .into_state();
        let attachment = check_access(&link, &enrollment, &attachments)
            .inspect_err(|err| tracing::warn!(error = %err, "download denied"))?;

        let size = self.storage.size(&attachment.blob_path).await?;
        let body = self.storage.open(&attachment.blob_path).await?;
        self.decision_maker
            .make(RecordDownload::new(token, &target, Utc::now()))
            .await?;
        tracing::info!(
            enrollment_id = %target.enrollment_id,
            attachment_id = %target.attachment_id,
            "material downloaded"
        );
        Ok(Download {
            content_type: storage::content_type(&attachment.file_name),
            file_name: attachment.file_name.clone(),
            size,
            body,
        })
    }
}

