//! Outgoing customer notifications.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::domain::{CourseId, SessionId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaterialLink {
    pub file_name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    MaterialsDelivered {
        user_id: UserId,
        course_id: CourseId,
        links: Vec<MaterialLink>,
    },
    LiveSessionDetails {
        user_id: UserId,
        course_id: CourseId,
        session_id: SessionId,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        teams_link: String,
    },
    SessionUpdated {
        user_id: UserId,
        course_id: CourseId,
        session_id: SessionId,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        teams_link: String,
    },
    SessionCancelled {
        user_id: UserId,
        course_id: CourseId,
        session_id: SessionId,
    },
}

impl Notification {
    pub fn user_id(&self) -> UserId {
        match self {
            Notification::MaterialsDelivered { user_id, .. }
            | Notification::LiveSessionDetails { user_id, .. }
            | Notification::SessionUpdated { user_id, .. }
            | Notification::SessionCancelled { user_id, .. } => *user_id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifierError(pub String);

/// Delivers notifications to customers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), NotifierError>;
}

/// Writes notifications to the log instead of mailing them.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: Notification) -> Result<(), NotifierError> {
        let body =
            serde_json::to_string(&notification).map_err(|err| NotifierError(err.to_string()))?;
        tracing::info!(user_id = %notification.user_id(), %body, "notification sent");
        Ok(())
    }
}

/// Keeps sent notifications in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn send(&self, notification: Notification) -> Result<(), NotifierError> {
        self.sent.lock().await.push(notification);
        Ok(())
    }
}
