use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::desktop::{DesktopAlert, DesktopNotifier, Permission, SoundPlayer};
use crate::metrics;
use crate::models::{Notification, Preferences};
use crate::toast::Toast;

/// Gap between enabling sound and the confirmation cue.
pub const CONFIRMATION_CUE_DELAY: Duration = Duration::from_millis(100);

/// What a single accepted notification was delivered to.
#[derive(Debug, Default)]
pub struct Delivery {
    pub toast: Option<Toast>,
    /// The running cue; resolves to whether anything was audible.
    pub sound: Option<JoinHandle<bool>>,
    pub desktop: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Sound,
    Notifications,
}

/// Plays the audio cue to completion, falling back to a fresh player once. Never fails.
async fn play_with_fallback<S: SoundPlayer>(player: &S) -> bool {
    let failure = match player.play().await {
        Ok(()) => {
            metrics::SOUNDS_PLAYED.inc();
            return true;
        }
        Err(e) => e,
    };

    debug!("Audio cue failed, retrying with a fresh player: {}", failure);
    match player.play_fresh().await {
        Ok(()) => {
            metrics::SOUNDS_PLAYED.inc();
            true
        }
        Err(e) => {
            warn!("Audio cue could not be played: {}", e);
            false
        }
    }
}

pub struct Fanout<N, S> {
    notifier: N,
    player: Arc<S>,
    app_url: String,
}

impl<N, S> Fanout<N, S>
where
    N: DesktopNotifier,
    S: SoundPlayer + 'static,
{
    pub fn new(notifier: N, player: S, app_url: impl Into<String>) -> Self {
        Self {
            notifier,
            player: Arc::new(player),
            app_url: app_url.into(),
        }
    }

    /// Plays the cue after `delay` on its own task so delivery never waits on audio.
    pub fn spawn_cue(&self, delay: Duration) -> JoinHandle<bool> {
        let player = self.player.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            play_with_fallback(&*player).await
        })
    }

    /// Asks for desktop permission when alerts are wanted and nobody has answered yet.
    pub async fn ensure_permission(&self, prefs: Preferences) -> Permission {
        let current = self.notifier.permission();
        if prefs.notifications_enabled && current == Permission::Default {
            info!("Requesting desktop notification permission");
            return self.notifier.request_permission().await;
        }
        current
    }

    /// Side effects of a persisted toggle. Turning sound on plays the confirmation cue,
    /// and turning alerts on asks for permission.
    pub async fn on_toggled(&self, toggle: Toggle, prefs: Preferences) -> Option<JoinHandle<bool>> {
        match toggle {
            Toggle::Sound if prefs.sound_enabled => Some(self.spawn_cue(CONFIRMATION_CUE_DELAY)),
            Toggle::Notifications if prefs.notifications_enabled => {
                self.ensure_permission(prefs).await;
                None
            }
            _ => None,
        }
    }

    pub async fn deliver(&self, notification: &Notification, prefs: Preferences) -> Delivery {
        let mut delivery = Delivery::default();

        // Toasts ignore preferences; only what was unread on arrival pops up
        if !notification.read {
            delivery.toast = Some(Toast::from_notification(notification));
        }

        if prefs.sound_enabled {
            delivery.sound = Some(self.spawn_cue(Duration::ZERO));
        }

        if prefs.notifications_enabled && self.notifier.permission() == Permission::Granted {
            let alert = DesktopAlert::from_notification(notification, &self.app_url);
            match self.notifier.show(&alert).await {
                Ok(()) => {
                    metrics::DESKTOP_ALERTS_SHOWN.inc();
                    delivery.desktop = true;
                }
                Err(e) => warn!(id = %notification.id, "Failed to show desktop notification: {}", e),
            }
        }

        debug!(
            id = %notification.id,
            kind = ?notification.kind,
            sound = delivery.sound.is_some(),
            desktop = delivery.desktop,
            toast = delivery.toast.is_some(),
            "Delivered notification"
        );
        delivery
    }
}
