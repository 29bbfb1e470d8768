//! Line commands for a running agent, read from stdin while `run` is active.
//!
//! Each line is parsed as its own command line, so the same clap definitions give
//! `help` output and argument errors for free.

use clap::{Parser, Subcommand};

use crate::error::HubClosed;
use crate::hub::{HubHandle, HubSnapshot};
use crate::models::{Preferences, Route};

/// One console line; the first word names the command.
#[derive(Debug, Parser)]
#[command(multicall = true)]
struct ConsoleLine {
    #[command(subcommand)]
    command: ConsoleCommand,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Show the feed, newest first
    #[command(alias = "ls")]
    List,
    /// Mark a notification as read
    Read { id: String },
    /// Remove a notification from the feed
    Remove { id: String },
    /// Close a toast
    Dismiss { id: String },
    /// Open the dashboard page for a notification
    Open { id: String },
    /// Show the sound and desktop notification settings
    Prefs,
    /// Turn the audio cue on or off
    ToggleSound,
    /// Turn desktop notifications on or off
    ToggleNotifications,
    /// Pull read flags from the server
    Sync,
    /// Stop the agent
    #[command(alias = "exit")]
    Quit,
}

/// What the caller should do after a command ran.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reply {
    pub lines: Vec<String>,
    /// Dashboard page to bring up.
    pub navigate: Option<Route>,
    pub quit: bool,
}

impl Reply {
    fn say(line: impl Into<String>) -> Self {
        Self {
            lines: vec![line.into()],
            ..Self::default()
        }
    }
}

/// Parses one input line. Blank lines yield `Ok(None)`; help and usage errors come back
/// as rendered text.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.is_empty() {
        return Ok(None);
    }
    ConsoleLine::try_parse_from(words)
        .map(|line| Some(line.command))
        .map_err(|e| e.render().to_string())
}

pub fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

pub fn describe_preferences(prefs: Preferences) -> Vec<String> {
    vec![
        format!("sound:         {}", on_off(prefs.sound_enabled)),
        format!("notifications: {}", on_off(prefs.notifications_enabled)),
    ]
}

fn describe_feed(snapshot: &HubSnapshot) -> Vec<String> {
    let mut lines: Vec<String> = snapshot
        .notifications
        .iter()
        .map(|n| {
            let marker = if n.read { " " } else { "*" };
            format!("{} {}  {}  {}", marker, n.id, n.title(), n.message)
        })
        .collect();
    lines.push(format!(
        "{} notifications, {} unread",
        snapshot.notifications.len(),
        snapshot.unread
    ));
    lines
}

pub async fn execute(hub: &HubHandle, command: ConsoleCommand) -> Result<Reply, HubClosed> {
    let reply = match command {
        ConsoleCommand::List => Reply {
            lines: describe_feed(&hub.snapshot()),
            ..Reply::default()
        },
        ConsoleCommand::Read { id } => match hub.mark_as_read(&id).await? {
            true => Reply::say(format!("marked {} as read", id)),
            false => Reply::say(format!("no notification {}", id)),
        },
        ConsoleCommand::Remove { id } => match hub.remove(&id).await? {
            true => Reply::say(format!("removed {}", id)),
            false => Reply::say(format!("no notification {}", id)),
        },
        ConsoleCommand::Dismiss { id } => match hub.dismiss_toast(&id).await? {
            true => Reply::say(format!("dismissed {}", id)),
            false => Reply::say(format!("no toast {}", id)),
        },
        ConsoleCommand::Open { id } => open(hub, &id).await?,
        ConsoleCommand::Prefs => Reply {
            lines: describe_preferences(hub.preferences()),
            ..Reply::default()
        },
        ConsoleCommand::ToggleSound => Reply {
            lines: describe_preferences(hub.toggle_sound().await?),
            ..Reply::default()
        },
        ConsoleCommand::ToggleNotifications => Reply {
            lines: describe_preferences(hub.toggle_notifications().await?),
            ..Reply::default()
        },
        ConsoleCommand::Sync => match hub.reconcile().await? {
            Ok(changed) => Reply::say(format!("{} read flags updated", changed)),
            Err(e) => Reply::say(format!("sync failed: {}", e)),
        },
        ConsoleCommand::Quit => Reply {
            quit: true,
            ..Reply::default()
        },
    };
    Ok(reply)
}

/// "View details": a visible toast is activated, otherwise the feed entry is read and
/// opened.
async fn open(hub: &HubHandle, id: &str) -> Result<Reply, HubClosed> {
    if let Some(route) = hub.activate_toast(id).await? {
        hub.mark_as_read(id).await?;
        return Ok(Reply {
            lines: vec![format!("opening {}", route.path())],
            navigate: Some(route),
            quit: false,
        });
    }

    let snapshot = hub.snapshot();
    let Some(notification) = snapshot.notifications.iter().find(|n| n.id == id) else {
        return Ok(Reply::say(format!("no notification {}", id)));
    };
    let route = Route::for_notification(notification);
    hub.mark_as_read(id).await?;
    Ok(Reply {
        lines: vec![format!("opening {}", route.path())],
        navigate: Some(route),
        quit: false,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::api::testing::FakeApi;
    use crate::desktop::testing::{RecordingNotifier, RecordingPlayer};
    use crate::desktop::Permission;
    use crate::fanout::Fanout;
    use crate::hub::NotificationHub;
    use crate::models::Notification;
    use crate::preferences::{MemoryStorage, PreferenceStore};
    use crate::router::notification;

    async fn hub_with(items: Vec<Notification>) -> (HubHandle, RecordingPlayer) {
        let player = RecordingPlayer::default();
        let fanout = Fanout::new(
            RecordingNotifier::new(Permission::Denied, Permission::Denied),
            player.clone(),
            "http://app",
        );
        let hub = NotificationHub::new(
            FakeApi::default(),
            fanout,
            PreferenceStore::load(MemoryStorage::default()),
        );
        let (events, events_rx) = mpsc::channel(16);
        let (handle, _task) = hub.spawn(events_rx);

        let count = items.len();
        for item in items {
            events.send(item).await.unwrap();
        }
        let mut snapshots = handle.subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            snapshots.wait_for(|s| s.notifications.len() == count),
        )
        .await
        .unwrap()
        .unwrap();
        (handle, player)
    }

    #[test]
    fn test_parse_lines() {
        assert_eq!(parse_line("   "), Ok(None));
        assert_eq!(parse_line("ls"), Ok(Some(ConsoleCommand::List)));
        assert_eq!(
            parse_line("read n1"),
            Ok(Some(ConsoleCommand::Read { id: "n1".to_string() }))
        );
        assert_eq!(
            parse_line("toggle-sound"),
            Ok(Some(ConsoleCommand::ToggleSound))
        );
        assert_eq!(parse_line("exit"), Ok(Some(ConsoleCommand::Quit)));
        assert!(parse_line("read").is_err());
        assert!(parse_line("frobnicate").is_err());
    }

    #[tokio::test]
    async fn test_read_and_dismiss_reach_the_hub() {
        let (hub, _) = hub_with(vec![notification("n1"), notification("n2")]).await;

        let reply = execute(&hub, ConsoleCommand::Read { id: "n1".to_string() }).await.unwrap();
        assert_eq!(reply.lines, vec!["marked n1 as read"]);
        assert_eq!(hub.snapshot().unread, 1);

        let reply = execute(&hub, ConsoleCommand::Dismiss { id: "n2".to_string() }).await.unwrap();
        assert_eq!(reply.lines, vec!["dismissed n2"]);
        assert_eq!(hub.snapshot().toasts.len(), 1);

        let reply = execute(&hub, ConsoleCommand::Remove { id: "zz".to_string() }).await.unwrap();
        assert_eq!(reply.lines, vec!["no notification zz"]);

        let listing = execute(&hub, ConsoleCommand::List).await.unwrap();
        assert_eq!(listing.lines.last().unwrap(), "2 notifications, 1 unread");
    }

    #[tokio::test]
    async fn test_open_activates_toast_and_navigates() {
        let mut general = notification("n2");
        general.task = None;
        let (hub, _) = hub_with(vec![notification("n1"), general]).await;

        let reply = execute(&hub, ConsoleCommand::Open { id: "n1".to_string() }).await.unwrap();
        assert_eq!(reply.navigate, Some(Route::Task("t1".to_string())));
        let snapshot = hub.snapshot();
        assert_eq!(snapshot.toasts.len(), 1);
        assert_eq!(snapshot.unread, 1);

        // Already off the toast stack; falls back to the feed entry
        hub.dismiss_toast("n2").await.unwrap();
        let reply = execute(&hub, ConsoleCommand::Open { id: "n2".to_string() }).await.unwrap();
        assert_eq!(reply.navigate, Some(Route::Notifications));
        assert_eq!(hub.snapshot().unread, 0);

        let reply = execute(&hub, ConsoleCommand::Open { id: "n9".to_string() }).await.unwrap();
        assert_eq!(reply.navigate, None);
    }

    #[tokio::test]
    async fn test_toggle_runs_side_effects() {
        let (hub, player) = hub_with(Vec::new()).await;

        let reply = execute(&hub, ConsoleCommand::ToggleSound).await.unwrap();
        assert_eq!(reply.lines[0], "sound:         off");
        let reply = execute(&hub, ConsoleCommand::ToggleSound).await.unwrap();
        assert_eq!(reply.lines[0], "sound:         on");

        tokio::time::timeout(Duration::from_secs(5), player.wait_for_plays(1))
            .await
            .unwrap();
        assert!(execute(&hub, ConsoleCommand::Quit).await.unwrap().quit);
    }
}
