use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::error::TransportError;
use crate::metrics;
use crate::models::Notification;
use crate::wire::{self, Handshake, Packet};

/// A text-framed duplex socket.
#[trait_variant::make(Send)]
pub trait Transport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;
    /// `None` once the peer has gone away.
    async fn next_text(&mut self) -> Option<Result<String, TransportError>>;
    async fn close(&mut self);
}

#[trait_variant::make(Send)]
pub trait Connector {
    type Conn: Transport + Send + 'static;
    async fn connect(&self, url: &str) -> Result<Self::Conn, TransportError>;
}

pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.as_str().to_owned())),
                Some(Ok(Message::Close(_))) => return None,
                // Websocket-level pings are answered by tungstenite itself
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(Err(TransportError::from(e))),
                None => return None,
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("Error closing websocket: {}", e);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    type Conn = WsTransport;

    async fn connect(&self, url: &str) -> Result<WsTransport, TransportError> {
        info!("Connecting to realtime endpoint at: {}", url);
        let (stream, _) = connect_async(url).await?;
        debug!("WebSocket connection established");
        Ok(WsTransport { stream })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Full websocket URL, see [`wire::endpoint_url`].
    pub url: String,
    pub retry_delay: Duration,
    pub connect_timeout: Duration,
}

struct ActiveConnection {
    user_id: String,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Owns the single realtime connection of an authenticated session.
pub struct ConnectionManager<C> {
    connector: Arc<C>,
    settings: ConnectionSettings,
    events: mpsc::Sender<Notification>,
    state: Arc<watch::Sender<ConnectionState>>,
    active: Option<ActiveConnection>,
}

impl<C> ConnectionManager<C>
where
    C: Connector + Send + Sync + 'static,
{
    pub fn new(connector: C, settings: ConnectionSettings, events: mpsc::Sender<Notification>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector: Arc::new(connector),
            settings,
            events,
            state: Arc::new(state),
            active: None,
        }
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn current_user(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.user_id.as_str())
    }

    /// Opens the connection for `user_id` unless one is already live.
    pub fn connect(&mut self, user_id: &str) {
        if let Some(active) = &self.active {
            debug!(
                user_id = %active.user_id,
                "Realtime connection already exists, ignoring connect"
            );
            return;
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run_connection(
            self.connector.clone(),
            self.settings.clone(),
            user_id.to_string(),
            self.events.clone(),
            self.state.clone(),
            shutdown_rx,
        ));

        self.active = Some(ActiveConnection {
            user_id: user_id.to_string(),
            shutdown: shutdown_tx,
            handle,
        });
    }

    pub async fn disconnect(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        let _ = active.shutdown.send(());
        if let Err(e) = active.handle.await {
            error!("Realtime connection task failed: {}", e);
        }
        set_state(&self.state, ConnectionState::Disconnected);
        info!(user_id = %active.user_id, "Realtime connection closed");
    }
}

fn set_state(state: &watch::Sender<ConnectionState>, next: ConnectionState) {
    state.send_if_modified(|current| {
        if *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
}

async fn next_packet<T: Transport>(conn: &mut T) -> Result<Packet, TransportError> {
    match conn.next_text().await {
        Some(Ok(text)) => wire::decode(&text),
        Some(Err(e)) => Err(e),
        None => Err(TransportError::Closed),
    }
}

/// Dials, waits for the Engine.IO open packet and completes the namespace connect.
async fn open_session<C: Connector>(connector: &C, url: &str) -> Result<(C::Conn, Handshake), TransportError> {
    let mut conn = connector.connect(url).await?;

    let handshake = match next_packet(&mut conn).await? {
        Packet::Open(handshake) => {
            debug!(
                sid = %handshake.sid,
                ping_interval = handshake.ping_interval,
                "Engine handshake received"
            );
            handshake
        }
        other => {
            return Err(TransportError::Protocol(format!(
                "expected open packet, got {:?}",
                other
            )))
        }
    };

    conn.send_text(Packet::Connect(None).encode()).await?;

    loop {
        match next_packet(&mut conn).await? {
            Packet::Connect(_) => return Ok((conn, handshake)),
            Packet::Ping(data) => conn.send_text(Packet::Pong(data).encode()).await?,
            Packet::Noop => {}
            Packet::ConnectError(reason) => return Err(TransportError::Rejected(reason.to_string())),
            other => {
                return Err(TransportError::Protocol(format!(
                    "expected connect ack, got {:?}",
                    other
                )))
            }
        }
    }
}

/// Waits out the retry delay. Returns `true` if shutdown was requested meanwhile.
async fn wait_for_retry(delay: Duration, shutdown: &mut oneshot::Receiver<()>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = shutdown => true,
    }
}

fn forward_notification(args: Vec<serde_json::Value>) -> Option<Notification> {
    let payload = args.into_iter().next()?;
    match serde_json::from_value::<Notification>(payload) {
        Ok(notification) if !notification.id.is_empty() => Some(notification),
        Ok(_) => {
            debug!("Dropping notification without an id");
            None
        }
        Err(e) => {
            debug!("Dropping undecodable notification: {}", e);
            None
        }
    }
}

async fn run_connection<C: Connector + Send + Sync + 'static>(
    connector: Arc<C>,
    settings: ConnectionSettings,
    user_id: String,
    events: mpsc::Sender<Notification>,
    state: Arc<watch::Sender<ConnectionState>>,
    mut shutdown: oneshot::Receiver<()>,
) {
    info!(user_id = %user_id, "Starting realtime connection");
    let timeout_secs = settings.connect_timeout.as_secs();

    'outer: loop {
        set_state(&state, ConnectionState::Connecting);

        let attempt = tokio::select! {
            res = tokio::time::timeout(settings.connect_timeout, open_session(&*connector, &settings.url)) => res,
            _ = &mut shutdown => break 'outer,
        };

        let (mut conn, handshake) = match attempt {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                warn!("Failed to connect to realtime endpoint: {}", e);
                metrics::RECONNECT_ATTEMPTS.inc();
                if wait_for_retry(settings.retry_delay, &mut shutdown).await {
                    break 'outer;
                }
                continue 'outer;
            }
            Err(_) => {
                warn!("{}", TransportError::Timeout(timeout_secs));
                metrics::RECONNECT_ATTEMPTS.inc();
                if wait_for_retry(settings.retry_delay, &mut shutdown).await {
                    break 'outer;
                }
                continue 'outer;
            }
        };

        // Bind this socket to the user's private channel
        let join = Packet::event("join", vec![json!(user_id)]);
        if let Err(e) = conn.send_text(join.encode()).await {
            warn!("Failed to send join: {}", e);
            metrics::RECONNECT_ATTEMPTS.inc();
            if wait_for_retry(settings.retry_delay, &mut shutdown).await {
                break 'outer;
            }
            continue 'outer;
        }

        set_state(&state, ConnectionState::Connected);
        info!(user_id = %user_id, "Realtime connection established");

        // The server pings every interval; silence past interval + timeout means a dead link
        let liveness = handshake.liveness_window();
        let mut stopping = false;
        'inner: loop {
            let frame = tokio::select! {
                frame = tokio::time::timeout(liveness, conn.next_text()) => frame,
                _ = &mut shutdown => {
                    stopping = true;
                    break 'inner;
                }
            };

            let text = match frame {
                Err(_) => {
                    warn!(
                        silent_ms = liveness.as_millis() as u64,
                        "No traffic from realtime endpoint, treating connection as dropped"
                    );
                    break 'inner;
                }
                Ok(frame) => frame,
            };

            let text = match text {
                Some(Ok(text)) => text,
                Some(Err(e)) => {
                    warn!("Realtime transport error: {}", e);
                    break 'inner;
                }
                None => break 'inner,
            };

            match wire::decode(&text) {
                Ok(Packet::Ping(data)) => {
                    if let Err(e) = conn.send_text(Packet::Pong(data).encode()).await {
                        warn!("Failed to answer ping: {}", e);
                        break 'inner;
                    }
                }
                Ok(Packet::Event { name, args }) if name == "notification" => {
                    metrics::EVENTS_RECEIVED.inc();
                    if let Some(notification) = forward_notification(args) {
                        if events.send(notification).await.is_err() {
                            info!("Notification consumer is gone, stopping connection");
                            stopping = true;
                            break 'inner;
                        }
                    }
                }
                Ok(Packet::Event { name, .. }) => debug!("Ignoring event of type: {}", name),
                Ok(Packet::Close) | Ok(Packet::Disconnect) => {
                    debug!("Server closed the session");
                    break 'inner;
                }
                Ok(_) => {}
                Err(e) => debug!("Ignoring undecodable frame: {}", e),
            }
        }

        if stopping {
            conn.close().await;
            break 'outer;
        }

        warn!("Connection interrupted, attempting to reconnect");
        metrics::RECONNECT_ATTEMPTS.inc();
        set_state(&state, ConnectionState::Connecting);
        if wait_for_retry(settings.retry_delay, &mut shutdown).await {
            break 'outer;
        }
    }

    set_state(&state, ConnectionState::Disconnected);
    info!(user_id = %user_id, "Realtime connection stopped");
}
