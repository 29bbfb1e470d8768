//! The notification hub: single owner of the feed, the toast stack and the
//! preference flags for one session.
//!
//! Inbound realtime events and UI commands are both messages on channels consumed
//! by one task, so every mutation happens in arrival order with no locking. UI
//! surfaces observe state through [`HubSnapshot`] on a `watch` channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, info, warn};

use crate::api::NotificationApi;
use crate::desktop::{DesktopNotifier, SoundPlayer};
use crate::error::{ApiError, HubClosed};
use crate::fanout::{Fanout, Toggle};
use crate::models::{Notification, Preferences, Route};
use crate::preferences::PreferenceStore;
use crate::router::NotificationRouter;
use crate::toast::{Toast, ToastQueue, TOAST_LIFETIME};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HubSnapshot {
    /// Newest first.
    pub notifications: Vec<Notification>,
    /// Badge count.
    pub unread: usize,
    /// Oldest first.
    pub toasts: Vec<Toast>,
    pub preferences: Preferences,
}

enum Command {
    MarkAsRead {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    Remove {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    DismissToast {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    ActivateToast {
        id: String,
        reply: oneshot::Sender<Option<Route>>,
    },
    ToggleSound {
        reply: oneshot::Sender<Preferences>,
    },
    ToggleNotifications {
        reply: oneshot::Sender<Preferences>,
    },
    Reconcile {
        reply: oneshot::Sender<Result<usize, ApiError>>,
    },
    Shutdown,
}

type ServerList = (
    Result<Vec<Notification>, ApiError>,
    oneshot::Sender<Result<usize, ApiError>>,
);

/// Cheap, cloneable access to a running hub.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<HubSnapshot>,
}

impl HubHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, HubClosed> {
        let (reply, response) = oneshot::channel();
        self.commands.send(make(reply)).await.map_err(|_| HubClosed)?;
        response.await.map_err(|_| HubClosed)
    }

    /// Flips `read` locally right away; the backend write happens in the background.
    pub async fn mark_as_read(&self, id: &str) -> Result<bool, HubClosed> {
        let id = id.to_string();
        self.request(|reply| Command::MarkAsRead { id, reply }).await
    }

    /// Drops the entry from the local feed only.
    pub async fn remove(&self, id: &str) -> Result<bool, HubClosed> {
        let id = id.to_string();
        self.request(|reply| Command::Remove { id, reply }).await
    }

    pub async fn dismiss_toast(&self, id: &str) -> Result<bool, HubClosed> {
        let id = id.to_string();
        self.request(|reply| Command::DismissToast { id, reply }).await
    }

    /// "View details" on a toast: closes it and returns where to go.
    pub async fn activate_toast(&self, id: &str) -> Result<Option<Route>, HubClosed> {
        let id = id.to_string();
        self.request(|reply| Command::ActivateToast { id, reply }).await
    }

    pub async fn toggle_sound(&self) -> Result<Preferences, HubClosed> {
        self.request(|reply| Command::ToggleSound { reply }).await
    }

    pub async fn toggle_notifications(&self) -> Result<Preferences, HubClosed> {
        self.request(|reply| Command::ToggleNotifications { reply }).await
    }

    /// Re-reads `read` flags from the notification list endpoint.
    pub async fn reconcile(&self) -> Result<Result<usize, ApiError>, HubClosed> {
        self.request(|reply| Command::Reconcile { reply }).await
    }

    pub fn preferences(&self) -> Preferences {
        self.snapshot.borrow().preferences
    }

    pub fn snapshot(&self) -> HubSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<HubSnapshot> {
        self.snapshot.clone()
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

pub struct NotificationHub<A, N, S> {
    router: NotificationRouter,
    toasts: ToastQueue,
    toast_timers: DelayQueue<String>,
    timer_keys: HashMap<String, delay_queue::Key>,
    toast_lifetime: Duration,
    preferences: PreferenceStore,
    fanout: Fanout<N, S>,
    api: Arc<A>,
    snapshot: watch::Sender<HubSnapshot>,
}

impl<A, N, S> NotificationHub<A, N, S>
where
    A: NotificationApi + Send + Sync + 'static,
    N: DesktopNotifier + Send + Sync + 'static,
    S: SoundPlayer + 'static,
{
    pub fn new(api: A, fanout: Fanout<N, S>, preferences: PreferenceStore) -> Self {
        let (snapshot, _) = watch::channel(HubSnapshot {
            preferences: preferences.get(),
            ..HubSnapshot::default()
        });
        Self {
            router: NotificationRouter::new(),
            toasts: ToastQueue::default(),
            toast_timers: DelayQueue::new(),
            timer_keys: HashMap::new(),
            toast_lifetime: TOAST_LIFETIME,
            preferences,
            fanout,
            api: Arc::new(api),
            snapshot,
        }
    }

    pub fn with_toast_lifetime(mut self, lifetime: Duration) -> Self {
        self.toast_lifetime = lifetime;
        self
    }

    /// Starts the hub task consuming `events`.
    pub fn spawn(self, events: mpsc::Receiver<Notification>) -> (HubHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let handle = HubHandle {
            commands: commands_tx,
            snapshot: self.snapshot.subscribe(),
        };
        let task = tokio::spawn(self.run(events, commands_rx));
        (handle, task)
    }

    async fn run(mut self, mut events: mpsc::Receiver<Notification>, mut commands: mpsc::Receiver<Command>) {
        info!("Starting notification hub");
        self.fanout.ensure_permission(self.preferences.get()).await;

        let (server_lists_tx, mut server_lists) = mpsc::unbounded_channel::<ServerList>();
        let mut events_open = true;

        loop {
            tokio::select! {
                event = events.recv(), if events_open => match event {
                    Some(notification) => self.on_inbound_event(notification).await,
                    None => {
                        debug!("Realtime event channel closed");
                        events_open = false;
                    }
                },
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command, &server_lists_tx).await,
                },
                Some((result, reply)) = server_lists.recv() => {
                    let _ = reply.send(self.apply_server_list(result));
                }
                Some(expired) = self.toast_timers.next() => {
                    let id = expired.into_inner();
                    self.timer_keys.remove(&id);
                    if self.toasts.dismiss(&id).is_some() {
                        debug!(id = %id, "Toast expired");
                        self.publish();
                    }
                }
            }
        }

        info!("Notification hub stopped");
    }

    async fn on_inbound_event(&mut self, notification: Notification) {
        let accepted = match self.router.accept(notification) {
            Ok(accepted) => accepted.clone(),
            Err(_) => return,
        };
        info!(id = %accepted.id, kind = ?accepted.kind, "New notification");

        // Toggles made from another process apply from the next delivery on
        self.preferences.reload();
        let delivery = self.fanout.deliver(&accepted, self.preferences.get()).await;
        if let Some(toast) = delivery.toast {
            self.show_toast(toast);
        }
        self.publish();
    }

    fn show_toast(&mut self, toast: Toast) {
        if self.timer_keys.contains_key(&toast.id) {
            return;
        }
        let id = toast.id.clone();
        for evicted in self.toasts.push(toast) {
            debug!(id = %evicted.id, "Toast evicted to make room");
            self.cancel_timer(&evicted.id);
        }
        if self.toasts.contains(&id) {
            let key = self.toast_timers.insert(id.clone(), self.toast_lifetime);
            self.timer_keys.insert(id, key);
        }
    }

    fn cancel_timer(&mut self, id: &str) {
        if let Some(key) = self.timer_keys.remove(id) {
            self.toast_timers.remove(&key);
        }
    }

    fn dismiss_toast(&mut self, id: &str) -> Option<Toast> {
        let toast = self.toasts.dismiss(id)?;
        self.cancel_timer(id);
        Some(toast)
    }

    async fn handle_command(&mut self, command: Command, server_lists: &mpsc::UnboundedSender<ServerList>) {
        match command {
            Command::MarkAsRead { id, reply } => {
                let found = self.router.mark_as_read(&id);
                if found {
                    self.publish();
                    self.confirm_read(id);
                }
                let _ = reply.send(found);
            }
            Command::Remove { id, reply } => {
                let removed = self.router.remove(&id).is_some();
                if removed {
                    self.publish();
                }
                let _ = reply.send(removed);
            }
            Command::DismissToast { id, reply } => {
                let dismissed = self.dismiss_toast(&id).is_some();
                if dismissed {
                    self.publish();
                }
                let _ = reply.send(dismissed);
            }
            Command::ActivateToast { id, reply } => {
                let route = self.toasts.activate(&id);
                if route.is_some() {
                    self.cancel_timer(&id);
                    self.publish();
                }
                let _ = reply.send(route);
            }
            Command::ToggleSound { reply } => {
                let prefs = self.preferences.toggle_sound();
                self.publish();
                let _ = reply.send(prefs);
                self.fanout.on_toggled(Toggle::Sound, prefs).await;
            }
            Command::ToggleNotifications { reply } => {
                let prefs = self.preferences.toggle_notifications();
                self.publish();
                let _ = reply.send(prefs);
                self.fanout.on_toggled(Toggle::Notifications, prefs).await;
            }
            Command::Reconcile { reply } => {
                let api = self.api.clone();
                let results = server_lists.clone();
                tokio::spawn(async move {
                    let result = api.list_notifications().await;
                    let _ = results.send((result, reply));
                });
            }
            Command::Shutdown => {}
        }
    }

    /// Sends the backend write for a local mark-as-read. Failures are logged and the
    /// local flag is left as is.
    fn confirm_read(&self, id: String) {
        let api = self.api.clone();
        tokio::spawn(async move {
            match api.mark_as_read(&id).await {
                Ok(()) => debug!(id = %id, "Mark-as-read confirmed"),
                Err(e) => warn!(id = %id, "Failed to confirm mark-as-read: {}", e),
            }
        });
    }

    fn apply_server_list(&mut self, result: Result<Vec<Notification>, ApiError>) -> Result<usize, ApiError> {
        let list = result.map_err(|e| {
            warn!("Failed to fetch notifications for reconciliation: {}", e);
            e
        })?;
        let changed = self.router.reconcile(&list);
        if changed > 0 {
            info!(changed, "Reconciled read state with backend");
            self.publish();
        }
        Ok(changed)
    }

    fn publish(&self) {
        self.snapshot.send_replace(HubSnapshot {
            notifications: self.router.notifications().to_vec(),
            unread: self.router.unread_count(),
            toasts: self.toasts.visible(),
            preferences: self.preferences.get(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::api::testing::FakeApi;
    use crate::desktop::testing::{RecordingNotifier, RecordingPlayer};
    use crate::desktop::Permission;
    use crate::preferences::{MemoryStorage, PreferenceStorage};
    use crate::router::notification;

    struct Harness {
        handle: HubHandle,
        events: mpsc::Sender<Notification>,
        notifier: RecordingNotifier,
        player: RecordingPlayer,
        api: FakeApi,
        task: JoinHandle<()>,
    }

    fn start(prefs: Preferences, permission: Permission, api: FakeApi) -> Harness {
        let storage = MemoryStorage::default();
        storage.save(&prefs).unwrap();
        let notifier = RecordingNotifier::new(permission, Permission::Granted);
        let player = RecordingPlayer::default();
        let fanout = Fanout::new(notifier.clone(), player.clone(), "http://app");
        let hub = NotificationHub::new(api.clone(), fanout, PreferenceStore::load(storage));
        let (events, events_rx) = mpsc::channel(16);
        let (handle, task) = hub.spawn(events_rx);
        Harness {
            handle,
            events,
            notifier,
            player,
            api,
            task,
        }
    }

    fn all_on() -> Preferences {
        Preferences::default()
    }

    async fn wait_for_feed(handle: &HubHandle, len: usize) -> HubSnapshot {
        let mut rx = handle.subscribe();
        let snapshot = rx
            .wait_for(|s| s.notifications.len() == len)
            .await
            .unwrap()
            .clone();
        snapshot
    }

    fn feed_ids(snapshot: &HubSnapshot) -> Vec<String> {
        snapshot.notifications.iter().map(|n| n.id.clone()).collect()
    }

    fn toast_ids(snapshot: &HubSnapshot) -> Vec<String> {
        snapshot.toasts.iter().map(|t| t.id.clone()).collect()
    }

    #[tokio::test]
    async fn test_byte_identical_duplicate_fans_out_once() {
        let h = start(all_on(), Permission::Granted, FakeApi::default());
        let n1: Notification = serde_json::from_value(serde_json::json!({
            "_id": "n1",
            "type": "task_assignment",
            "message": "You got a new task",
            "sender": {"name": "Alice"},
            "task": {"id": "t1", "title": "Fix bug"}
        }))
        .unwrap();

        h.events.send(n1.clone()).await.unwrap();
        h.events.send(n1).await.unwrap();
        h.events.send(notification("n2")).await.unwrap();

        let snapshot = wait_for_feed(&h.handle, 2).await;
        assert_eq!(feed_ids(&snapshot), vec!["n2", "n1"]);
        assert_eq!(snapshot.unread, 2);
        let tags: Vec<String> = h.notifier.shown().into_iter().map(|a| a.tag).collect();
        assert_eq!(tags, vec!["n1", "n2"]);
        h.player.wait_for_plays(2).await;
        assert_eq!(h.player.attempts(), 2);
        assert_eq!(toast_ids(&snapshot), vec!["n1", "n2"]);

        h.handle.shutdown().await;
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_non_adjacent_duplicate_is_dropped() {
        let h = start(all_on(), Permission::Granted, FakeApi::default());
        for id in ["a", "b", "a", "c"] {
            h.events.send(notification(id)).await.unwrap();
        }
        let snapshot = wait_for_feed(&h.handle, 3).await;
        assert_eq!(feed_ids(&snapshot), vec!["c", "b", "a"]);
        assert_eq!(h.notifier.shown().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toast_stack_keeps_latest_three() {
        let h = start(all_on(), Permission::Denied, FakeApi::default());
        for id in ["A", "B", "C", "D"] {
            h.events.send(notification(id)).await.unwrap();
        }
        let snapshot = wait_for_feed(&h.handle, 4).await;
        assert_eq!(toast_ids(&snapshot), vec!["B", "C", "D"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toasts_expire_but_feed_remains() {
        let h = start(all_on(), Permission::Denied, FakeApi::default());
        h.events.send(notification("A")).await.unwrap();
        wait_for_feed(&h.handle, 1).await;

        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert_eq!(h.handle.snapshot().toasts.len(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let snapshot = h.handle.snapshot();
        assert!(snapshot.toasts.is_empty());
        assert_eq!(snapshot.notifications.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismiss_and_activate() {
        let h = start(all_on(), Permission::Denied, FakeApi::default());
        h.events.send(notification("A")).await.unwrap();
        let mut other = notification("B");
        other.task = None;
        h.events.send(other).await.unwrap();
        wait_for_feed(&h.handle, 2).await;

        assert!(h.handle.dismiss_toast("A").await.unwrap());
        assert!(!h.handle.dismiss_toast("A").await.unwrap());
        assert_eq!(
            h.handle.activate_toast("B").await.unwrap(),
            Some(Route::Notifications)
        );
        assert!(h.handle.snapshot().toasts.is_empty());

        // Cancelled timers must not fire into later toasts
        tokio::time::sleep(Duration::from_secs(6)).await;
        h.events.send(notification("C")).await.unwrap();
        wait_for_feed(&h.handle, 3).await;
        assert_eq!(toast_ids(&h.handle.snapshot()), vec!["C"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_as_read_is_optimistic() {
        let api = FakeApi {
            delay: Duration::from_secs(30),
            ..FakeApi::default()
        };
        let h = start(all_on(), Permission::Denied, api);
        h.events.send(notification("n1")).await.unwrap();
        wait_for_feed(&h.handle, 1).await;

        assert!(h.handle.mark_as_read("n1").await.unwrap());
        let snapshot = h.handle.snapshot();
        assert!(snapshot.notifications[0].read);
        assert_eq!(snapshot.unread, 0);
        assert!(h.api.confirmed().is_empty());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(h.api.confirmed(), vec!["n1"]);
        assert!(!h.handle.mark_as_read("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_confirmation_is_not_rolled_back() {
        let api = FakeApi::default();
        api.fail_writes.store(true, Ordering::SeqCst);
        let h = start(all_on(), Permission::Denied, api);
        h.events.send(notification("n1")).await.unwrap();
        wait_for_feed(&h.handle, 1).await;

        h.handle.mark_as_read("n1").await.unwrap();
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.handle.snapshot().notifications[0].read);
    }

    #[tokio::test]
    async fn test_remove_updates_badge() {
        let h = start(all_on(), Permission::Denied, FakeApi::default());
        h.events.send(notification("a")).await.unwrap();
        h.events.send(notification("b")).await.unwrap();
        wait_for_feed(&h.handle, 2).await;

        assert!(h.handle.remove("a").await.unwrap());
        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.unread, 1);
        assert_eq!(feed_ids(&snapshot), vec!["b"]);
    }

    #[tokio::test]
    async fn test_sound_off_and_denied_still_toasts() {
        let prefs = Preferences {
            sound_enabled: false,
            notifications_enabled: true,
        };
        let h = start(prefs, Permission::Denied, FakeApi::default());
        h.events.send(notification("n1")).await.unwrap();
        let snapshot = wait_for_feed(&h.handle, 1).await;

        assert_eq!(h.player.attempts(), 0);
        assert!(h.notifier.shown().is_empty());
        assert_eq!(h.notifier.prompts(), 0);
        assert_eq!(toast_ids(&snapshot), vec!["n1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enabling_sound_plays_confirmation_cue() {
        let prefs = Preferences {
            sound_enabled: false,
            notifications_enabled: false,
        };
        let h = start(prefs, Permission::Denied, FakeApi::default());

        let updated = h.handle.toggle_sound().await.unwrap();
        assert!(updated.sound_enabled);
        assert!(h.handle.preferences().sound_enabled);
        assert_eq!(h.player.played(), 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        h.player.wait_for_plays(1).await;
        assert_eq!(h.player.played(), 1);

        let updated = h.handle.toggle_sound().await.unwrap();
        assert!(!updated.sound_enabled);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(h.player.played(), 1);
    }

    #[tokio::test]
    async fn test_enabling_notifications_prompts_once() {
        let prefs = Preferences {
            sound_enabled: false,
            notifications_enabled: false,
        };
        let h = start(prefs, Permission::Default, FakeApi::default());

        let updated = h.handle.toggle_notifications().await.unwrap();
        assert!(updated.notifications_enabled);
        // The prompt runs after the reply; the next round trip orders behind it
        h.handle.remove("none").await.unwrap();
        assert_eq!(h.notifier.prompts(), 1);

        h.handle.toggle_notifications().await.unwrap();
        h.handle.toggle_notifications().await.unwrap();
        h.handle.remove("none").await.unwrap();
        assert_eq!(h.notifier.prompts(), 1);
    }

    #[tokio::test]
    async fn test_startup_prompt_only_when_enabled() {
        let h = start(all_on(), Permission::Default, FakeApi::default());
        h.handle.remove("none").await.unwrap();
        assert_eq!(h.notifier.prompts(), 1);

        let prefs = Preferences {
            sound_enabled: true,
            notifications_enabled: false,
        };
        let quiet = start(prefs, Permission::Default, FakeApi::default());
        quiet.handle.remove("none").await.unwrap();
        assert_eq!(quiet.notifier.prompts(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_pulls_read_flags() {
        let api = FakeApi::default();
        let mut server_copy = notification("n1");
        server_copy.read = true;
        api.seed(server_copy);
        api.seed(notification("n9"));

        let h = start(all_on(), Permission::Denied, api);
        h.events.send(notification("n1")).await.unwrap();
        wait_for_feed(&h.handle, 1).await;

        assert_eq!(h.handle.reconcile().await.unwrap().unwrap(), 1);
        let snapshot = h.handle.snapshot();
        assert!(snapshot.notifications[0].read);
        assert_eq!(snapshot.notifications.len(), 1);
    }

    #[tokio::test]
    async fn test_handle_reports_closed_hub() {
        let h = start(all_on(), Permission::Denied, FakeApi::default());
        h.handle.shutdown().await;
        h.task.await.unwrap();
        assert!(h.handle.toggle_sound().await.is_err());
    }

    #[tokio::test]
    async fn test_toggle_from_other_process_applies_to_next_delivery() {
        let storage = MemoryStorage::default();
        storage.save(&all_on()).unwrap();
        let notifier = RecordingNotifier::new(Permission::Granted, Permission::Granted);
        let player = RecordingPlayer::default();
        let fanout = Fanout::new(notifier.clone(), player.clone(), "http://app");
        let hub = NotificationHub::new(
            FakeApi::default(),
            fanout,
            PreferenceStore::load(storage.clone()),
        );
        let (events, events_rx) = mpsc::channel(16);
        let (handle, _task) = hub.spawn(events_rx);

        // Another invocation turns sound off behind the running hub
        let mut other = PreferenceStore::load(storage);
        other.toggle_sound();

        events.send(notification("n1")).await.unwrap();
        let snapshot = wait_for_feed(&handle, 1).await;
        assert!(!snapshot.preferences.sound_enabled);
        assert_eq!(player.attempts(), 0);
        assert_eq!(notifier.shown().len(), 1);
    }
}
