//! Platform sinks for delivery: desktop notifications and the audio cue.
//!
//! Desktop alerts go through `notify-rust` on freedesktop desktops, where the
//! notification server reports which action was clicked. The audio cue runs an external
//! player and waits for its exit status, so a clip that fails to decode counts as a
//! failure.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::AlertError;
use crate::models::{Notification, Route};

#[cfg(all(unix, not(target_os = "macos")))]
const APP_NAME: &str = "TaskDesk";
/// Action id the notification server reports when the alert body is clicked.
const CLICK_ACTION: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Never asked.
    Default,
    Granted,
    Denied,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DesktopAlert {
    pub title: String,
    pub body: String,
    /// Notification id, so the desktop can replace rather than stack repeats.
    pub tag: String,
    pub route: Route,
    /// Dashboard URL opened when the alert is clicked.
    pub url: String,
}

impl DesktopAlert {
    pub fn from_notification(notification: &Notification, app_url: &str) -> Self {
        let route = Route::for_notification(notification);
        Self {
            title: notification.title(),
            body: notification.message.clone(),
            tag: notification.id.clone(),
            url: format!("{}{}", app_url.trim_end_matches('/'), route.path()),
            route,
        }
    }
}

#[trait_variant::make(Send)]
pub trait DesktopNotifier {
    fn permission(&self) -> Permission;
    /// Prompts once; the answer sticks for the rest of the process.
    async fn request_permission(&self) -> Permission;
    async fn show(&self, alert: &DesktopAlert) -> Result<(), AlertError>;
}

#[trait_variant::make(Send)]
pub trait SoundPlayer: Send + Sync {
    /// Resolves once playback has finished.
    async fn play(&self) -> Result<(), AlertError>;
    /// Second attempt after `play` failed, on a freshly created player.
    async fn play_fresh(&self) -> Result<(), AlertError>;
}

fn spawn_detached(program: &str, args: &[&str]) -> Result<(), AlertError> {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(|_| ())
        .map_err(|source| AlertError::Spawn {
            program: program.to_string(),
            source,
        })
}

/// Brings the dashboard to the front at `url` using the desktop's default browser.
pub fn open_url(url: &str) -> Result<(), AlertError> {
    #[cfg(target_os = "macos")]
    return spawn_detached("open", &[url]);
    #[cfg(target_os = "windows")]
    return spawn_detached("cmd", &["/C", "start", "", url]);
    #[cfg(all(unix, not(target_os = "macos")))]
    return spawn_detached("xdg-open", &[url]);
    #[cfg(not(any(unix, target_os = "windows")))]
    {
        let _ = url;
        Err(AlertError::Unsupported)
    }
}

fn is_click(action: &str) -> bool {
    action == CLICK_ACTION
}

/// Desktop notifications through the freedesktop notification server.
///
/// Alerts are only offered where a click can be observed and routed to the dashboard;
/// elsewhere permission resolves to [`Permission::Denied`] and delivery falls back to
/// the toast stack and the audio cue.
pub struct SystemNotifier {
    permission: Mutex<Permission>,
}

impl Default for SystemNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemNotifier {
    pub fn new() -> Self {
        Self {
            permission: Mutex::new(Permission::Default),
        }
    }

    fn set_permission(&self, permission: Permission) {
        *self.permission.lock().unwrap_or_else(|e| e.into_inner()) = permission;
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    async fn backend_available() -> bool {
        match tokio::task::spawn_blocking(notify_rust::get_capabilities).await {
            Ok(Ok(capabilities)) => {
                let actions = capabilities.iter().any(|c| c == "actions");
                debug!(?capabilities, "Notification server capabilities");
                actions
            }
            Ok(Err(e)) => {
                debug!("No notification server: {}", e);
                false
            }
            Err(e) => {
                debug!("Notification server check did not finish: {}", e);
                false
            }
        }
    }

    #[cfg(not(all(unix, not(target_os = "macos"))))]
    async fn backend_available() -> bool {
        false
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    async fn show_native(&self, alert: &DesktopAlert) -> Result<(), AlertError> {
        let summary = alert.title.clone();
        let body = alert.body.clone();
        let handle = tokio::task::spawn_blocking(move || {
            notify_rust::Notification::new()
                .appname(APP_NAME)
                .summary(&summary)
                .body(&body)
                .action(CLICK_ACTION, "View details")
                .show()
        })
        .await
        .map_err(|e| AlertError::Backend(e.to_string()))?
        .map_err(|e| AlertError::Backend(e.to_string()))?;

        let tag = alert.tag.clone();
        let url = alert.url.clone();
        tokio::spawn(async move {
            let action = tokio::task::spawn_blocking(move || {
                let mut chosen = String::new();
                handle.wait_for_action(|action| chosen = action.to_string());
                chosen
            })
            .await;

            match action {
                Ok(action) if is_click(&action) => {
                    info!(tag = %tag, url = %url, "Desktop notification clicked");
                    if let Err(e) = open_url(&url) {
                        tracing::warn!("Failed to open dashboard: {}", e);
                    }
                }
                Ok(action) => debug!(tag = %tag, action = %action, "Desktop notification closed"),
                Err(e) => debug!("Waiting on desktop notification failed: {}", e),
            }
        });
        Ok(())
    }

    #[cfg(not(all(unix, not(target_os = "macos"))))]
    async fn show_native(&self, _alert: &DesktopAlert) -> Result<(), AlertError> {
        Err(AlertError::Unsupported)
    }
}

impl DesktopNotifier for SystemNotifier {
    fn permission(&self) -> Permission {
        *self.permission.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn request_permission(&self) -> Permission {
        let current = self.permission();
        if current != Permission::Default {
            return current;
        }

        let answer = if Self::backend_available().await {
            Permission::Granted
        } else {
            Permission::Denied
        };
        info!(permission = ?answer, "Desktop notification permission resolved");
        self.set_permission(answer);
        answer
    }

    async fn show(&self, alert: &DesktopAlert) -> Result<(), AlertError> {
        if self.permission() != Permission::Granted {
            return Err(AlertError::PermissionDenied);
        }
        debug!(tag = %alert.tag, title = %alert.title, "Showing desktop notification");
        self.show_native(alert).await
    }
}

/// An external audio player invocation; the clip path is appended as the last argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl PlayerCommand {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    async fn play_to_end(&self, clip: &Path) -> Result<(), AlertError> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(clip)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|source| AlertError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(AlertError::Exit {
                program: self.program.clone(),
                status: status.to_string(),
            })
        }
    }
}

pub struct CommandSoundPlayer {
    clip: PathBuf,
    primary: Option<PlayerCommand>,
    fallback: Option<PlayerCommand>,
}

impl CommandSoundPlayer {
    /// Platform players: `paplay` then `ffplay` on Linux, `afplay` on macOS.
    pub fn new(clip: impl AsRef<Path>) -> Self {
        let (primary, fallback) = if cfg!(target_os = "macos") {
            (
                Some(PlayerCommand::new("afplay", &[])),
                Some(PlayerCommand::new("afplay", &[])),
            )
        } else if cfg!(unix) {
            (
                Some(PlayerCommand::new("paplay", &[])),
                Some(PlayerCommand::new(
                    "ffplay",
                    &["-nodisp", "-autoexit", "-loglevel", "quiet"],
                )),
            )
        } else {
            (None, None)
        };
        Self::with_commands(clip, primary, fallback)
    }

    pub fn with_commands(
        clip: impl AsRef<Path>,
        primary: Option<PlayerCommand>,
        fallback: Option<PlayerCommand>,
    ) -> Self {
        Self {
            clip: clip.as_ref().to_path_buf(),
            primary,
            fallback,
        }
    }
}

impl SoundPlayer for CommandSoundPlayer {
    async fn play(&self) -> Result<(), AlertError> {
        match &self.primary {
            Some(command) => command.play_to_end(&self.clip).await,
            None => Err(AlertError::Unsupported),
        }
    }

    async fn play_fresh(&self) -> Result<(), AlertError> {
        match &self.fallback {
            Some(command) => command.play_to_end(&self.clip).await,
            None => Err(AlertError::Unsupported),
        }
    }
}
