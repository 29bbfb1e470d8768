use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::api::NotificationApi;
use crate::connection::{ConnectionManager, ConnectionSettings, ConnectionState, Connector};
use crate::desktop::{DesktopNotifier, SoundPlayer};
use crate::fanout::Fanout;
use crate::hub::{HubHandle, NotificationHub};
use crate::models::User;
use crate::preferences::PreferenceStore;

const EVENT_BUFFER: usize = 100;

/// Realtime state for one authenticated user: the hub plus its single connection.
///
/// Created on login and torn down on logout; consumers get a [`HubHandle`] instead of
/// reaching for globals.
pub struct RealtimeSession<C> {
    user: User,
    hub: HubHandle,
    hub_task: JoinHandle<()>,
    connection: ConnectionManager<C>,
}

impl<C> RealtimeSession<C>
where
    C: Connector + Send + Sync + 'static,
{
    pub fn init<A, N, S>(
        user: User,
        connector: C,
        settings: ConnectionSettings,
        api: A,
        fanout: Fanout<N, S>,
        preferences: PreferenceStore,
    ) -> Self
    where
        A: NotificationApi + Send + Sync + 'static,
        N: DesktopNotifier + Send + Sync + 'static,
        S: SoundPlayer + 'static,
    {
        info!(user_id = %user.id, name = %user.name, "Starting realtime session");

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (hub, hub_task) = NotificationHub::new(api, fanout, preferences).spawn(events_rx);

        let mut connection = ConnectionManager::new(connector, settings, events_tx);
        connection.connect(&user.id);

        Self {
            user,
            hub,
            hub_task,
            connection,
        }
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn hub(&self) -> HubHandle {
        self.hub.clone()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.state()
    }

    pub async fn teardown(mut self) {
        info!(user_id = %self.user.id, "Tearing down realtime session");
        self.connection.disconnect().await;
        self.hub.shutdown().await;
        if let Err(e) = self.hub_task.await {
            error!("Notification hub task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::api::testing::FakeApi;
    use crate::connection::testing::{pair, MockConnector};
    use crate::desktop::testing::{RecordingNotifier, RecordingPlayer};
    use crate::desktop::Permission;
    use crate::preferences::MemoryStorage;

    fn user() -> User {
        User {
            id: "u1".to_string(),
            name: "Ann".to_string(),
            email: "ann@example.com".to_string(),
            role: None,
        }
    }

    fn settings() -> ConnectionSettings {
        ConnectionSettings {
            url: "ws://test/socket.io/?EIO=4&transport=websocket".to_string(),
            retry_delay: Duration::from_millis(10),
            connect_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_events_flow_from_socket_to_snapshot() {
        let (transport, server) = pair();
        server.accept();
        let player = RecordingPlayer::default();
        let fanout = Fanout::new(
            RecordingNotifier::new(Permission::Denied, Permission::Denied),
            player.clone(),
            "http://app",
        );
        let session = RealtimeSession::init(
            user(),
            MockConnector::with(vec![transport]),
            settings(),
            FakeApi::default(),
            fanout,
            PreferenceStore::load(MemoryStorage::default()),
        );
        assert_eq!(session.user().id, "u1");

        let mut state = session.connection_state();
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == ConnectionState::Connected),
        )
        .await
        .unwrap()
        .unwrap();

        let frame = r#"42["notification",{"_id":"n1","type":"message","message":"hi","sender":{"_id":"u2","name":"Bo"}}]"#;
        server.push(frame);
        server.push(frame);

        let mut snapshots = session.hub().subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            snapshots.wait_for(|s| s.unread == 1),
        )
        .await
        .unwrap()
        .unwrap();

        let hub = session.hub();
        assert!(hub.mark_as_read("n1").await.unwrap());
        assert_eq!(hub.snapshot().unread, 0);
        tokio::time::timeout(Duration::from_secs(5), player.wait_for_plays(1))
            .await
            .unwrap();
        assert_eq!(player.attempts(), 1);

        session.teardown().await;
        assert!(hub.toggle_sound().await.is_err());
    }

    #[tokio::test]
    async fn test_teardown_stops_reconnecting() {
        let connector = MockConnector::default();
        let fanout = Fanout::new(
            RecordingNotifier::new(Permission::Denied, Permission::Denied),
            RecordingPlayer::default(),
            "http://app",
        );
        let session = RealtimeSession::init(
            user(),
            connector,
            settings(),
            FakeApi::default(),
            fanout,
            PreferenceStore::load(MemoryStorage::default()),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        let state = session.connection_state();
        session.teardown().await;
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
    }
}
