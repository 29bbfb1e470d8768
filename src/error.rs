use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("server rejected namespace connect: {0}")]
    Rejected(String),
    #[error("handshake timed out after {0}s")]
    Timeout(u64),
    #[error("connection closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("server reported failure: {0}")]
    Rejected(String),
    #[error("not authenticated")]
    Unauthenticated,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed stored data: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}")]
    Exit { program: String, status: String },
    #[error("desktop notification backend failed: {0}")]
    Backend(String),
    #[error("no desktop notification backend on this platform")]
    Unsupported,
    #[error("permission denied")]
    PermissionDenied,
}

#[derive(Debug, Error)]
#[error("notification hub has stopped")]
pub struct HubClosed;
