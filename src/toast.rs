use std::collections::VecDeque;
use std::time::Duration;

use crate::metrics;
use crate::models::{Notification, Route};

pub const TOAST_CAPACITY: usize = 3;
pub const TOAST_LIFETIME: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub id: String,
    pub title: String,
    pub body: String,
    pub route: Route,
}

impl Toast {
    pub fn from_notification(notification: &Notification) -> Self {
        Self {
            id: notification.id.clone(),
            title: notification.title(),
            body: notification.message.clone(),
            route: Route::for_notification(notification),
        }
    }
}

/// Visible toasts in arrival order, oldest first.
#[derive(Debug)]
pub struct ToastQueue {
    capacity: usize,
    visible: VecDeque<Toast>,
}

impl Default for ToastQueue {
    fn default() -> Self {
        Self::new(TOAST_CAPACITY)
    }
}

impl ToastQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            visible: VecDeque::with_capacity(capacity),
        }
    }

    /// Appends a toast, returning the ones evicted to stay within capacity.
    /// A toast already on screen is not shown twice.
    pub fn push(&mut self, toast: Toast) -> Vec<Toast> {
        if self.visible.iter().any(|t| t.id == toast.id) {
            return Vec::new();
        }

        self.visible.push_back(toast);
        metrics::TOASTS_SHOWN.inc();

        let mut evicted = Vec::new();
        while self.visible.len() > self.capacity {
            if let Some(oldest) = self.visible.pop_front() {
                metrics::TOASTS_EVICTED.inc();
                evicted.push(oldest);
            }
        }
        evicted
    }

    pub fn dismiss(&mut self, id: &str) -> Option<Toast> {
        let idx = self.visible.iter().position(|t| t.id == id)?;
        self.visible.remove(idx)
    }

    /// "View details": closes the toast and hands back where it points.
    pub fn activate(&mut self, id: &str) -> Option<Route> {
        self.dismiss(id).map(|toast| toast.route)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.visible.iter().any(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.visible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    pub fn visible(&self) -> Vec<Toast> {
        self.visible.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.visible.clear();
    }
}
