//! Notification sink and dispatcher
//!
//! The lending services hand notifications to a [`NotificationSink`] and move
//! on. In production the sink is a channel drained by a
//! [`NotificationDispatcher`] task that stores the in-app record and then
//! tries an email. Delivery failures are logged and dropped; they never reach
//! the state transition that produced the notification.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{error::AppResult, models::NewNotification, repository::CatalogStore};

/// Fire-and-forget receiver of lending events
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: NewNotification);
}

/// Outbound email transport
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> AppResult<()>;
}

/// Sink that queues notifications for the dispatcher task
#[derive(Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<NewNotification>,
}

impl ChannelNotifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<NewNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelNotifier {
    fn notify(&self, notification: NewNotification) {
        if let Err(e) = self.tx.send(notification) {
            tracing::warn!(
                receiver_id = e.0.receiver_id,
                notification_type = ?e.0.notification_type,
                "Notification dispatcher is gone, dropping notification"
            );
        }
    }
}

/// Persists notifications and sends the matching emails
pub struct NotificationDispatcher {
    store: Arc<dyn CatalogStore>,
    mailer: Option<Arc<dyn Mailer>>,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn CatalogStore>, mailer: Option<Arc<dyn Mailer>>) -> Self {
        Self { store, mailer }
    }

    /// Drain the queue until every sender is dropped
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<NewNotification>) {
        tracing::info!("Notification dispatcher started");
        while let Some(notification) = rx.recv().await {
            self.dispatch(notification).await;
        }
        tracing::info!("Notification dispatcher stopped");
    }

    pub async fn dispatch(&self, notification: NewNotification) {
        let receiver_id = notification.receiver_id;
        let notification_type = notification.notification_type;
        let subject = notification_type.subject();
        let message = notification.message.clone();

        match self.store.insert_notification(notification).await {
            Ok(row) => tracing::debug!(
                notification_id = row.id,
                receiver_id,
                ?notification_type,
                "Notification stored"
            ),
            Err(e) => tracing::warn!(
                receiver_id,
                ?notification_type,
                error = %e,
                "Failed to store notification"
            ),
        }

        let Some(mailer) = &self.mailer else {
            return;
        };

        let user = match self.store.get_user(receiver_id).await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(receiver_id, error = %e, "Cannot look up notification receiver");
                return;
            }
        };
        let Some(email) = user.email.as_deref().filter(|e| !e.is_empty()) else {
            tracing::debug!(receiver_id, "Receiver has no email address");
            return;
        };

        let body = format!("Hello {},\n\n{}\n", user.display_name(), message);
        if let Err(e) = mailer.send(email, subject, &body).await {
            tracing::warn!(receiver_id, ?notification_type, error = %e, "Failed to send email");
        }
    }
}
