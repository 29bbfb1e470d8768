use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::RestClient;
use crate::error::{ApiError, StoreError};
use crate::models::User;
use crate::preferences::{io_error, write_atomic};

pub const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub token: String,
    pub user: User,
}

/// Token plus user snapshot, kept between runs like the dashboard keeps them in storage.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(CREDENTIALS_FILE),
        }
    }

    pub fn load(&self) -> Result<Option<Credentials>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&self.path, e)),
        }
    }

    pub fn save(&self, credentials: &Credentials) -> Result<(), StoreError> {
        write_atomic(&self.path, &serde_json::to_vec_pretty(credentials)?)
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&self.path, e)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub async fn login(
    client: &RestClient,
    store: &CredentialStore,
    email: &str,
    password: &str,
) -> Result<Credentials, AuthError> {
    let (token, user) = client.login(email, password).await?;
    let credentials = Credentials { token, user };
    store.save(&credentials)?;
    info!(user_id = %credentials.user.id, "Login successful");
    Ok(credentials)
}

/// Ends the server session; local credentials are dropped whatever the server says.
pub async fn logout(client: &RestClient, store: &CredentialStore) -> Result<(), AuthError> {
    let remote = client.logout().await;
    store.clear()?;
    if let Err(e) = &remote {
        warn!("Logout request failed: {}", e);
    }
    remote.map_err(AuthError::from)
}
