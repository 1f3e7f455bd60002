//! Reactions to persisted events.
use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use coursedesk_events::{query, EventListener, EventStore, PersistedEvent, StreamQuery};

use crate::application::{download_url, Application, Error};
use crate::domain::{DomainEvent, ErrorKind, OrderStatus, SessionChange};
use crate::notifier::{MaterialLink, Notification, Notifier};

/// Issues the enrollments of an order as soon as it is paid.
pub struct EnrollmentIssuer<ES> {
    app: Application<ES>,
    query: StreamQuery<DomainEvent>,
}

impl<ES> EnrollmentIssuer<ES> {
    pub fn new(app: Application<ES>) -> Self {
        Self {
            app,
            query: query!(DomainEvent, events[OrderStatusChanged]),
        }
    }
}

#[async_trait]
impl<ES> EventListener<DomainEvent> for EnrollmentIssuer<ES>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    type Error = Error;

    fn id(&self) -> &'static str {
        "enrollment_issuer"
    }

    fn query(&self) -> &StreamQuery<DomainEvent> {
        &self.query
    }

    async fn handle(&self, event: PersistedEvent<DomainEvent>) -> Result<(), Self::Error> {
        let DomainEvent::OrderStatusChanged {
            order_id,
            to: OrderStatus::Paid,
            ..
        } = event.into_inner()
        else {
            return Ok(());
        };
        match self.app.issue_enrollments(order_id).await {
            Ok(_) => Ok(()),
            // Domain rejections are final, only store failures and conflicts are retried.
            Err(err) if matches!(err.kind(), Some(kind) if kind != ErrorKind::Conflict) => {
                tracing::warn!(%order_id, error = %err, "enrollments not issued");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// Sends the notifications of deliveries and live session changes.
///
/// Delivery failures are logged and never retried.
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    public_base_url: String,
    query: StreamQuery<DomainEvent>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, public_base_url: impl Into<String>) -> Self {
        Self {
            notifier,
            public_base_url: public_base_url.into(),
            query: query!(DomainEvent, events[MaterialsDelivered, EnrollmentSessionChanged]),
        }
    }

    fn notification(&self, event: DomainEvent) -> Option<Notification> {
        match event {
            DomainEvent::MaterialsDelivered {
                user_id,
                course_id,
                links,
                ..
            } => Some(Notification::MaterialsDelivered {
                user_id,
                course_id,
                links: links
                    .into_iter()
                    .map(|link| MaterialLink {
                        url: download_url(&self.public_base_url, &link.token),
                        file_name: link.file_name,
                    })
                    .collect(),
            }),
            DomainEvent::EnrollmentSessionChanged {
                user_id,
                course_id,
                change,
                previous_session_id,
                session,
                ..
            } => match (change, session, previous_session_id) {
                (SessionChange::Attached, Some(session), _) => {
                    Some(Notification::LiveSessionDetails {
                        user_id,
                        course_id,
                        session_id: session.session_id,
                        start_at: session.start_at,
                        end_at: session.end_at,
                        teams_link: session.teams_link,
                    })
                }
                (SessionChange::Switched, Some(session), _) => Some(Notification::SessionUpdated {
                    user_id,
                    course_id,
                    session_id: session.session_id,
                    start_at: session.start_at,
                    end_at: session.end_at,
                    teams_link: session.teams_link,
                }),
                (SessionChange::Detached, _, Some(session_id)) => {
                    Some(Notification::SessionCancelled {
                        user_id,
                        course_id,
                        session_id,
                    })
                }
                _ => None,
            },
            _ => None,
        }
    }
}

#[async_trait]
impl EventListener<DomainEvent> for NotificationDispatcher {
    type Error = Infallible;

    fn id(&self) -> &'static str {
        "notification_dispatcher"
    }

    fn query(&self) -> &StreamQuery<DomainEvent> {
        &self.query
    }

    async fn handle(&self, event: PersistedEvent<DomainEvent>) -> Result<(), Self::Error> {
        let event_id = event.id();
        let Some(notification) = self.notification(event.into_inner()) else {
            return Ok(());
        };
        let user_id = notification.user_id();
        if let Err(err) = self.notifier.send(notification).await {
            tracing::warn!(event_id, %user_id, error = %err, "notification not sent");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DeliveredLink, EnrollmentStatus, SessionDetails};
    use crate::notifier::{MockNotifier, NotifierError};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn materials_delivered(user_id: Uuid, course_id: Uuid) -> DomainEvent {
        DomainEvent::MaterialsDelivered {
            enrollment_id: Uuid::new_v4(),
            user_id,
            order_id: Uuid::new_v4(),
            course_id,
            links: vec![DeliveredLink {
                attachment_id: Uuid::new_v4(),
                file_name: "guide.pdf".to_string(),
                token: "tok".to_string(),
            }],
            delivered_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn it_mails_the_download_links_of_delivered_materials() {
        let user_id = Uuid::new_v4();
        let course_id = Uuid::new_v4();
        let mut notifier = MockNotifier::new();
        notifier
            .expect_send()
            .withf(move |notification| {
                *notification
                    == Notification::MaterialsDelivered {
                        user_id,
                        course_id,
                        links: vec![MaterialLink {
                            file_name: "guide.pdf".to_string(),
                            url: "https://courses.example/api/secure/materials/tok".to_string(),
                        }],
                    }
            })
            .times(1)
            .returning(|_| Ok(()));
        let dispatcher = NotificationDispatcher::new(Arc::new(notifier), "https://courses.example");

        let result = dispatcher
            .handle(PersistedEvent::new(1, materials_delivered(user_id, course_id)))
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn it_swallows_notifier_failures() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_send()
            .times(1)
            .returning(|_| Err(NotifierError("smtp unavailable".to_string())));
        let dispatcher = NotificationDispatcher::new(Arc::new(notifier), "http://localhost:8080");

        let result = dispatcher
            .handle(PersistedEvent::new(
                1,
                materials_delivered(Uuid::new_v4(), Uuid::new_v4()),
            ))
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn it_announces_a_detached_session_as_cancelled() {
        let session_id = Uuid::new_v4();
        let mut notifier = MockNotifier::new();
        notifier
            .expect_send()
            .withf(move |notification| {
                matches!(
                    notification,
                    Notification::SessionCancelled { session_id: id, .. } if *id == session_id
                )
            })
            .times(1)
            .returning(|_| Ok(()));
        let dispatcher = NotificationDispatcher::new(Arc::new(notifier), "http://localhost:8080");

        dispatcher
            .handle(PersistedEvent::new(
                1,
                DomainEvent::EnrollmentSessionChanged {
                    enrollment_id: Uuid::new_v4(),
                    user_id: Uuid::new_v4(),
                    course_id: Uuid::new_v4(),
                    order_id: Uuid::new_v4(),
                    change: SessionChange::Detached,
                    previous_session_id: Some(session_id),
                    session: None,
                    from: EnrollmentStatus::Notified,
                    to: EnrollmentStatus::Paid,
                    changed_at: Utc::now(),
                },
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn it_sends_the_details_of_an_attached_session() {
        let start_at = Utc.with_ymd_and_hms(2026, 3, 8, 9, 0, 0).unwrap();
        let session = SessionDetails {
            session_id: Uuid::new_v4(),
            start_at,
            end_at: start_at + chrono::Duration::hours(2),
            teams_link: "https://teams.example/session".to_string(),
        };
        let expected = session.clone();
        let mut notifier = MockNotifier::new();
        notifier
            .expect_send()
            .withf(move |notification| {
                matches!(
                    notification,
                    Notification::LiveSessionDetails { session_id, teams_link, .. }
                        if *session_id == expected.session_id && *teams_link == expected.teams_link
                )
            })
            .times(1)
            .returning(|_| Ok(()));
        let dispatcher = NotificationDispatcher::new(Arc::new(notifier), "http://localhost:8080");

        dispatcher
            .handle(PersistedEvent::new(
                1,
                DomainEvent::EnrollmentSessionChanged {
                    enrollment_id: Uuid::new_v4(),
                    user_id: Uuid::new_v4(),
                    course_id: Uuid::new_v4(),
                    order_id: Uuid::new_v4(),
                    change: SessionChange::Attached,
                    previous_session_id: None,
                    session: Some(session),
                    from: EnrollmentStatus::Paid,
                    to: EnrollmentStatus::Notified,
                    changed_at: Utc::now(),
                },
            ))
            .await
            .unwrap();
    }
}
