//! Notification delivery
//!
//! Persists notifications and pushes them live on the recipient's
//! `users.{id}` websocket topic.

use std::sync::Arc;

use crate::storage::{NewNotification, Notification, NotificationType, Store, User};
use crate::websocket::{ConnectionHub, WsEvent};

use super::error::{not_found, ServiceError, ServiceResult};

pub const TITLE_NEW_SIGNALEMENT: &str = "Nouveau signalement";
pub const TITLE_STATUS_UPDATE: &str = "Mise à jour de votre signalement";
pub const TITLE_ACTION: &str = "Action sur votre signalement";
pub const TITLE_ASSIGNED: &str = "Entreprise assignée";
pub const TITLE_WORKS_STARTED: &str = "Travaux démarrés";
pub const TITLE_WORKS_FINISHED: &str = "Travaux terminés";

#[derive(Clone)]
pub struct Notifier {
    store: Store,
    hub: Option<Arc<ConnectionHub>>,
}

impl Notifier {
    /// Without a hub, notifications are only persisted
    pub fn new(store: Store, hub: Option<Arc<ConnectionHub>>) -> Self {
        Self { store, hub }
    }

    pub fn send(&self, new: NewNotification) -> ServiceResult<Notification> {
        if new.title.trim().is_empty() || new.message.trim().is_empty() {
            return Err(ServiceError::Validation("title and message are required".into()));
        }

        let notification = self.store.insert_notification(&new)?;
        self.publish(WsEvent::notification(&notification));

        tracing::debug!(
            notification_id = notification.id,
            user_id = notification.user_id,
            kind = %notification.notification_type,
            "Notification sent"
        );
        Ok(notification)
    }

    /// Like [`Notifier::send`] but a failure is only logged; used for side
    /// effects of operations that already succeeded
    pub fn send_quietly(&self, new: NewNotification) -> bool {
        let user_id = new.user_id;
        match self.send(new) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to deliver notification");
                false
            }
        }
    }

    /// Notify every manager; returns how many were reached
    pub fn notify_managers(
        &self,
        kind: NotificationType,
        title: &str,
        message: &str,
        signalement_id: Option<i64>,
    ) -> ServiceResult<usize> {
        let managers = self.store.list_managers()?;
        let mut sent = 0;
        for manager in managers {
            let mut new = NewNotification::new(manager.id, kind, title, message);
            new.signalement_id = signalement_id;
            if self.send_quietly(new) {
                sent += 1;
            }
        }
        Ok(sent)
    }

    /// Send the same `info` message to every account
    pub fn broadcast(&self, title: &str, message: &str) -> ServiceResult<usize> {
        let users = self.store.list_users()?;
        let count = users.len();
        for user in users {
            self.send(NewNotification::new(user.id, NotificationType::Info, title, message))?;
        }
        self.publish(WsEvent::system(message));
        Ok(count)
    }

    pub fn publish(&self, event: WsEvent) {
        if let Some(hub) = &self.hub {
            hub.publish(event);
        }
    }

    pub fn list(&self, user: &User, unread_only: bool) -> ServiceResult<Vec<Notification>> {
        Ok(self.store.list_notifications(user.id, unread_only)?)
    }

    pub fn unread_count(&self, user: &User) -> ServiceResult<u64> {
        Ok(self.store.count_unread_notifications(user.id)?)
    }

    pub fn mark_read(&self, user: &User, id: i64) -> ServiceResult<()> {
        self.owned(user, id)?;
        self.store.mark_notification_read(id)?;
        Ok(())
    }

    pub fn mark_all_read(&self, user: &User) -> ServiceResult<usize> {
        Ok(self.store.mark_all_notifications_read(user.id)?)
    }

    pub fn delete(&self, user: &User, id: i64) -> ServiceResult<()> {
        self.owned(user, id)?;
        self.store.delete_notification(id)?;
        Ok(())
    }

    fn owned(&self, user: &User, id: i64) -> ServiceResult<Notification> {
        let notification = self
            .store
            .get_notification(id)?
            .ok_or_else(|| not_found("notification", id))?;
        if notification.user_id != user.id && !user.is_manager() {
            return Err(ServiceError::Forbidden("notification belongs to another user".into()));
        }
        Ok(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::{citizen, manager};

    #[test]
    fn test_notify_managers_only() {
        let store = Store::open_in_memory().unwrap();
        let boss = manager(&store);
        let citizen = citizen(&store, "rabe@example.mg");
        let notifier = Notifier::new(store.clone(), None);

        let sent = notifier
            .notify_managers(NotificationType::Info, TITLE_NEW_SIGNALEMENT, "Nid de poule", None)
            .unwrap();

        assert_eq!(sent, 1);
        assert_eq!(notifier.unread_count(&boss).unwrap(), 1);
        assert_eq!(notifier.unread_count(&citizen).unwrap(), 0);
    }

    #[test]
    fn test_foreign_notification_is_forbidden() {
        let store = Store::open_in_memory().unwrap();
        let a = citizen(&store, "a@example.mg");
        let b = citizen(&store, "b@example.mg");
        let notifier = Notifier::new(store, None);

        let n = notifier
            .send(NewNotification::new(a.id, NotificationType::Info, "Info", "Bonjour"))
            .unwrap();

        assert!(matches!(notifier.mark_read(&b, n.id), Err(ServiceError::Forbidden(_))));
        notifier.mark_read(&a, n.id).unwrap();
        assert_eq!(notifier.unread_count(&a).unwrap(), 0);
    }

    #[test]
    fn test_broadcast_reaches_everyone() {
        let store = Store::open_in_memory().unwrap();
        let boss = manager(&store);
        let a = citizen(&store, "a@example.mg");
        let notifier = Notifier::new(store, None);

        assert_eq!(notifier.broadcast("Maintenance", "Coupure ce soir").unwrap(), 2);
        assert_eq!(notifier.unread_count(&boss).unwrap(), 1);
        assert_eq!(notifier.unread_count(&a).unwrap(), 1);
    }

    #[test]
    fn test_empty_title_rejected() {
        let store = Store::open_in_memory().unwrap();
        let a = citizen(&store, "a@example.mg");
        let notifier = Notifier::new(store, None);

        let err = notifier
            .send(NewNotification::new(a.id, NotificationType::Info, " ", "x"))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }
}
