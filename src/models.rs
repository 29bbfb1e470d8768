use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TaskAssignment,
    TaskUpdate,
    Message,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    #[serde(rename = "_id", alias = "id", default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// A reference the backend sends either as a bare id or as the populated document.
#[derive(Deserialize)]
#[serde(untagged)]
enum Populated<T> {
    Id(String),
    Doc(T),
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn sender_ref<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<UserRef>, D::Error> {
    Ok(Option::<Populated<UserRef>>::deserialize(deserializer)?.map(|sender| match sender {
        Populated::Id(id) => UserRef {
            id: Some(id),
            name: None,
        },
        Populated::Doc(user) => user,
    }))
}

fn task_ref<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<TaskRef>, D::Error> {
    Ok(Option::<Populated<TaskRef>>::deserialize(deserializer)?.map(|task| match task {
        Populated::Id(id) => TaskRef { id, title: None },
        Populated::Doc(task) => task,
    }))
}

/// A notification as pushed by the realtime endpoint and listed by `GET /notifications`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: NotificationKind,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(default, deserialize_with = "sender_ref")]
    pub sender: Option<UserRef>,
    #[serde(default, deserialize_with = "task_ref")]
    pub task: Option<TaskRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub read: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn sender_name(&self) -> &str {
        self.sender
            .as_ref()
            .and_then(|s| s.name.as_deref())
            .unwrap_or("Someone")
    }

    /// Headline shown on toasts and desktop alerts.
    pub fn title(&self) -> String {
        match self.kind {
            NotificationKind::Message => format!("New message from {}", self.sender_name()),
            NotificationKind::TaskAssignment => "New task assigned".to_string(),
            NotificationKind::TaskUpdate | NotificationKind::Other => "Task update".to_string(),
        }
    }
}

/// Body for `POST /notifications`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    pub recipient: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub sound_enabled: bool,
    pub notifications_enabled: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            sound_enabled: true,
            notifications_enabled: true,
        }
    }
}

/// Dashboard location a notification points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Task(String),
    Notifications,
}

impl Route {
    pub fn for_notification(notification: &Notification) -> Self {
        match &notification.task {
            Some(task) => Route::Task(task.id.clone()),
            None => Route::Notifications,
        }
    }

    pub fn path(&self) -> String {
        match self {
            Route::Task(id) => format!("/tasks/{}", id),
            Route::Notifications => "/notifications".to_string(),
        }
    }
}

/// Authenticated user snapshot returned by `POST /auth/login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: Option<String>,
}
