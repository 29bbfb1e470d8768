use std::time::Duration;

use reqwest::{Client as HttpClient, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ApiError;
use crate::models::{NewNotification, Notification, User};

// Response envelopes used by the dashboard backend
#[derive(Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct LoginResponse {
    success: bool,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    user: Option<User>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// The part of the backend the notification hub talks to.
#[trait_variant::make(Send)]
pub trait NotificationApi {
    async fn list_notifications(&self) -> Result<Vec<Notification>, ApiError>;
    async fn mark_as_read(&self, id: &str) -> Result<(), ApiError>;
}

#[derive(Clone)]
pub struct RestClient {
    http_client: HttpClient,
    base_url: String,
    token: Option<String>,
}

impl RestClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        Ok(Self {
            http_client: HttpClient::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check_status(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or(body);
        Err(ApiError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn unwrap_envelope<T: DeserializeOwned>(response: Response) -> Result<Option<T>, ApiError> {
        let envelope: Envelope<T> = Self::check_status(response).await?.json().await?;
        if !envelope.success {
            return Err(ApiError::Rejected(
                envelope.message.unwrap_or_else(|| "request failed".to_string()),
            ));
        }
        Ok(envelope.data)
    }

    /// `POST /auth/login`, returning the bearer token and the user snapshot.
    pub async fn login(&self, email: &str, password: &str) -> Result<(String, User), ApiError> {
        info!(email = %email, "Attempting login");
        let response = self
            .http_client
            .post(self.url("/auth/login"))
            .json(&LoginRequest { email, password })
            .send()
            .await?;

        let login: LoginResponse = Self::check_status(response).await?.json().await?;
        if !login.success {
            return Err(ApiError::Rejected(
                login.message.unwrap_or_else(|| "Login failed".to_string()),
            ));
        }
        match (login.token, login.user) {
            (Some(token), Some(user)) => Ok((token, user)),
            _ => Err(ApiError::Rejected("login response missing token or user".to_string())),
        }
    }

    pub async fn logout(&self) -> Result<(), ApiError> {
        if self.token.is_none() {
            return Err(ApiError::Unauthenticated);
        }
        let response = self
            .authorized(self.http_client.post(self.url("/auth/logout")))
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    pub async fn send_notification(&self, notification: &NewNotification) -> Result<Option<Notification>, ApiError> {
        let response = self
            .authorized(self.http_client.post(self.url("/notifications")))
            .json(notification)
            .send()
            .await?;
        Self::unwrap_envelope(response).await
    }
}

impl NotificationApi for RestClient {
    async fn list_notifications(&self) -> Result<Vec<Notification>, ApiError> {
        let response = self
            .authorized(self.http_client.get(self.url("/notifications")))
            .send()
            .await?;
        let list: Option<Vec<Notification>> = Self::unwrap_envelope(response).await?;
        let list = list.unwrap_or_default();
        debug!(count = list.len(), "Fetched notification list");
        Ok(list)
    }

    async fn mark_as_read(&self, id: &str) -> Result<(), ApiError> {
        let response = self
            .authorized(self.http_client.patch(self.url(&format!("/notifications/{}", id))))
            .send()
            .await?;
        Self::unwrap_envelope::<serde_json::Value>(response).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::NotificationApi;
    use crate::error::ApiError;
    use crate::models::Notification;

    /// In-memory backend with an optional artificial confirmation delay.
    #[derive(Clone, Default)]
    pub struct FakeApi {
        pub server: Arc<Mutex<HashMap<String, Notification>>>,
        pub confirmed: Arc<Mutex<Vec<String>>>,
        pub fail_writes: Arc<AtomicBool>,
        pub delay: Duration,
    }

    impl FakeApi {
        pub fn seed(&self, notification: Notification) {
            self.server
                .lock()
                .unwrap()
                .insert(notification.id.clone(), notification);
        }

        pub fn confirmed(&self) -> Vec<String> {
            self.confirmed.lock().unwrap().clone()
        }
    }

    impl NotificationApi for FakeApi {
        async fn list_notifications(&self) -> Result<Vec<Notification>, ApiError> {
            Ok(self.server.lock().unwrap().values().cloned().collect())
        }

        async fn mark_as_read(&self, id: &str) -> Result<(), ApiError> {
            tokio::time::sleep(self.delay).await;
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(ApiError::Rejected("unavailable".to_string()));
            }
            if let Some(n) = self.server.lock().unwrap().get_mut(id) {
                n.read = true;
            }
            self.confirmed.lock().unwrap().push(id.to_string());
            Ok(())
        }
    }
}
