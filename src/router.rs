use std::collections::HashMap;

use tracing::debug;

use crate::metrics;
use crate::models::Notification;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Same id as the notification accepted just before.
    RepeatOfLast,
    /// Id already present somewhere in the feed.
    AlreadyListed,
}

/// In-memory notification feed, newest first, unique by id.
#[derive(Debug, Default)]
pub struct NotificationRouter {
    notifications: Vec<Notification>,
    last_accepted: Option<String>,
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.notifications.iter().filter(|n| !n.read).count()
    }

    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.notifications.iter().find(|n| n.id == id)
    }

    /// Admits an inbound notification unless its id matches the last accepted id
    /// or any id already in the feed.
    pub fn accept(&mut self, notification: Notification) -> Result<&Notification, Rejection> {
        if self.last_accepted.as_deref() == Some(notification.id.as_str()) {
            metrics::DUPLICATES_DROPPED.with_label_values(&["last_id"]).inc();
            debug!(id = %notification.id, "Dropping repeat of last notification");
            return Err(Rejection::RepeatOfLast);
        }

        if self.notifications.iter().any(|n| n.id == notification.id) {
            metrics::DUPLICATES_DROPPED.with_label_values(&["list"]).inc();
            debug!(id = %notification.id, "Dropping notification already in feed");
            return Err(Rejection::AlreadyListed);
        }

        self.last_accepted = Some(notification.id.clone());
        self.notifications.insert(0, notification);
        metrics::NOTIFICATIONS_ACCEPTED.inc();
        Ok(&self.notifications[0])
    }

    /// Flips `read` locally. Returns false if the id is unknown.
    pub fn mark_as_read(&mut self, id: &str) -> bool {
        match self.notifications.iter_mut().find(|n| n.id == id) {
            Some(n) => {
                n.read = true;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Notification> {
        let idx = self.notifications.iter().position(|n| n.id == id)?;
        Some(self.notifications.remove(idx))
    }

    /// Adopts the server's `read` flag for every local entry the server also lists.
    /// Returns how many entries changed. Server-only entries are not added.
    pub fn reconcile(&mut self, server: &[Notification]) -> usize {
        let remote: HashMap<&str, bool> = server.iter().map(|n| (n.id.as_str(), n.read)).collect();
        let mut changed = 0;
        for local in &mut self.notifications {
            if let Some(&read) = remote.get(local.id.as_str()) {
                if local.read != read {
                    local.read = read;
                    changed += 1;
                }
            }
        }
        changed
    }

    pub fn clear(&mut self) {
        self.notifications.clear();
        self.last_accepted = None;
    }
}

#[cfg(test)]
pub(crate) fn notification(id: &str) -> Notification {
    serde_json::from_value(serde_json::json!({
        "_id": id,
        "type": "task_assignment",
        "message": format!("message {}", id),
        "sender": {"_id": "u2", "name": "Alice"},
        "task": {"_id": "t1", "title": "Fix bug"},
    }))
    .unwrap()
}
