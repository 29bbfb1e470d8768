use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::connection::ConnectionSettings;
use crate::wire;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub socket_url: String,
    pub app_url: String,
    pub data_dir: PathBuf,
    pub sound_path: PathBuf,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    pub email: Option<String>,
    pub password: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let api_url = env::var("TASKDESK_API_URL")
            .unwrap_or_else(|_| "http://localhost:5000/api".to_string())
            .trim_end_matches('/')
            .to_string();
        let socket_url = env::var("TASKDESK_SOCKET_URL").unwrap_or_else(|_| socket_base(&api_url));

        let reconnect_delay_ms: u64 = env::var("TASKDESK_RECONNECT_DELAY_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .context("TASKDESK_RECONNECT_DELAY_MS must be a number of milliseconds")?;
        let connect_timeout_secs: u64 = env::var("TASKDESK_CONNECT_TIMEOUT_SECS")
            .unwrap_or_else(|_| "20".to_string())
            .parse()
            .context("TASKDESK_CONNECT_TIMEOUT_SECS must be a number of seconds")?;

        Ok(Self {
            api_url,
            socket_url,
            app_url: env::var("TASKDESK_APP_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string())
                .trim_end_matches('/')
                .to_string(),
            data_dir: env::var("TASKDESK_DATA_DIR")
                .unwrap_or_else(|_| ".taskdesk".to_string())
                .into(),
            sound_path: env::var("TASKDESK_SOUND_PATH")
                .unwrap_or_else(|_| "sounds/notification.mp3".to_string())
                .into(),
            reconnect_delay: Duration::from_millis(reconnect_delay_ms),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            email: env::var("TASKDESK_EMAIL").ok().filter(|v| !v.is_empty()),
            password: env::var("TASKDESK_PASSWORD").ok().filter(|v| !v.is_empty()),
        })
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            url: wire::endpoint_url(&self.socket_url),
            retry_delay: self.reconnect_delay,
            connect_timeout: self.connect_timeout,
        }
    }
}

/// The realtime server lives at the API origin, without the `/api` prefix.
fn socket_base(api_url: &str) -> String {
    api_url.strip_suffix("/api").unwrap_or(api_url).to_string()
}
