//! Socket.IO (v5) framing over the Engine.IO (v4) websocket transport.
//!
//! Only the text packets the dashboard's realtime endpoint actually exchanges are
//! modelled: the Engine.IO open/ping/pong/close packets and the Socket.IO
//! connect, disconnect, event and connect-error packets carried inside `4`.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::TransportError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
    #[serde(default)]
    pub upgrades: Vec<String>,
}

/// Engine.IO server defaults, used when the open packet leaves the timings out.
const DEFAULT_PING_INTERVAL_MS: u64 = 25_000;
const DEFAULT_PING_TIMEOUT_MS: u64 = 20_000;

impl Handshake {
    /// How long the socket may stay silent before the server counts as gone: one ping
    /// interval plus the ping timeout.
    pub fn liveness_window(&self) -> Duration {
        let interval = match self.ping_interval {
            0 => DEFAULT_PING_INTERVAL_MS,
            ms => ms,
        };
        let timeout = match self.ping_timeout {
            0 => DEFAULT_PING_TIMEOUT_MS,
            ms => ms,
        };
        Duration::from_millis(interval + timeout)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Noop,
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, args: Vec<Value> },
    ConnectError(Value),
}

impl Packet {
    pub fn event(name: &str, args: Vec<Value>) -> Self {
        Packet::Event {
            name: name.to_string(),
            args,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Packet::Open(h) => format!(
                "0{}",
                serde_json::json!({
                    "sid": h.sid,
                    "pingInterval": h.ping_interval,
                    "pingTimeout": h.ping_timeout,
                    "upgrades": h.upgrades,
                })
            ),
            Packet::Close => "1".to_string(),
            Packet::Ping(data) => format!("2{}", data),
            Packet::Pong(data) => format!("3{}", data),
            Packet::Noop => "6".to_string(),
            Packet::Connect(None) => "40".to_string(),
            Packet::Connect(Some(data)) => format!("40{}", data),
            Packet::Disconnect => "41".to_string(),
            Packet::Event { name, args } => {
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(args.iter().cloned());
                format!("42{}", Value::Array(items))
            }
            Packet::ConnectError(data) => format!("44{}", data),
        }
    }
}

pub fn decode(frame: &str) -> Result<Packet, TransportError> {
    let mut chars = frame.chars();
    let kind = chars
        .next()
        .ok_or_else(|| TransportError::Protocol("empty frame".to_string()))?;
    let rest = chars.as_str();

    match kind {
        '0' => {
            let handshake: Handshake = serde_json::from_str(rest)
                .map_err(|e| TransportError::Protocol(format!("bad open packet: {}", e)))?;
            Ok(Packet::Open(handshake))
        }
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping(rest.to_string())),
        '3' => Ok(Packet::Pong(rest.to_string())),
        '4' => decode_socket_packet(rest),
        '6' => Ok(Packet::Noop),
        other => Err(TransportError::Protocol(format!(
            "unknown engine packet type {:?}",
            other
        ))),
    }
}

fn decode_socket_packet(body: &str) -> Result<Packet, TransportError> {
    let mut chars = body.chars();
    let kind = chars
        .next()
        .ok_or_else(|| TransportError::Protocol("empty message packet".to_string()))?;
    let payload = strip_ack_id(strip_namespace(chars.as_str()));

    match kind {
        '0' => {
            if payload.is_empty() {
                Ok(Packet::Connect(None))
            } else {
                Ok(Packet::Connect(Some(parse_json(payload)?)))
            }
        }
        '1' => Ok(Packet::Disconnect),
        '2' => {
            let value = parse_json(payload)?;
            let Value::Array(mut items) = value else {
                return Err(TransportError::Protocol("event payload is not an array".to_string()));
            };
            if items.is_empty() {
                return Err(TransportError::Protocol("event without a name".to_string()));
            }
            let name = match items.remove(0) {
                Value::String(name) => name,
                other => {
                    return Err(TransportError::Protocol(format!(
                        "event name is not a string: {}",
                        other
                    )))
                }
            };
            Ok(Packet::Event { name, args: items })
        }
        '4' => Ok(Packet::ConnectError(if payload.is_empty() {
            Value::Null
        } else {
            parse_json(payload)?
        })),
        other => Err(TransportError::Protocol(format!(
            "unsupported socket packet type {:?}",
            other
        ))),
    }
}

// Custom namespaces are written as "/name," before the payload.
fn strip_namespace(payload: &str) -> &str {
    if payload.starts_with('/') {
        match payload.find(',') {
            Some(idx) => &payload[idx + 1..],
            None => "",
        }
    } else {
        payload
    }
}

fn strip_ack_id(payload: &str) -> &str {
    payload.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn parse_json(payload: &str) -> Result<Value, TransportError> {
    serde_json::from_str(payload)
        .map_err(|e| TransportError::Protocol(format!("bad packet payload: {}", e)))
}

/// Websocket endpoint for a socket server base URL such as `http://localhost:5000`.
pub fn endpoint_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}/socket.io/?EIO=4&transport=websocket", base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_open() {
        let packet =
            decode(r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#)
                .unwrap();
        match packet {
            Packet::Open(h) => {
                assert_eq!(h.sid, "abc");
                assert_eq!(h.ping_interval, 25000);
            }
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[test]
    fn test_decode_notification_event() {
        let packet = decode(r#"42["notification",{"_id":"n1","type":"message"}]"#).unwrap();
        assert_eq!(
            packet,
            Packet::Event {
                name: "notification".to_string(),
                args: vec![json!({"_id": "n1", "type": "message"})],
            }
        );
    }

    #[test]
    fn test_decode_namespaced_event_with_ack_id() {
        let packet = decode(r#"42/admin,7["notification",1]"#).unwrap();
        assert_eq!(packet, Packet::event("notification", vec![json!(1)]));
    }

    #[test]
    fn test_connect_variants() {
        assert_eq!(decode("40").unwrap(), Packet::Connect(None));
        assert_eq!(
            decode(r#"40{"sid":"xyz"}"#).unwrap(),
            Packet::Connect(Some(json!({"sid": "xyz"})))
        );
        assert_eq!(
            decode(r#"44{"message":"unauthorized"}"#).unwrap(),
            Packet::ConnectError(json!({"message": "unauthorized"}))
        );
    }

    #[test]
    fn test_engine_control_packets() {
        assert_eq!(decode("2").unwrap(), Packet::Ping(String::new()));
        assert_eq!(decode("1").unwrap(), Packet::Close);
        assert_eq!(decode("6").unwrap(), Packet::Noop);
        assert_eq!(Packet::Pong(String::new()).encode(), "3");
    }

    #[test]
    fn test_encode_join() {
        let join = Packet::event("join", vec![json!("u1")]);
        assert_eq!(join.encode(), r#"42["join","u1"]"#);
        assert_eq!(Packet::Connect(None).encode(), "40");
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(decode("").is_err());
        assert!(decode("9").is_err());
        assert!(decode("42{}").is_err());
        assert!(decode("42[]").is_err());
    }

    #[test]
    fn test_endpoint_url() {
        assert_eq!(
            endpoint_url("http://localhost:5000/"),
            "ws://localhost:5000/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            endpoint_url("https://tasks.example.com"),
            "wss://tasks.example.com/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn test_liveness_window() {
        let handshake = Handshake {
            sid: "abc".to_string(),
            ping_interval: 300,
            ping_timeout: 200,
            upgrades: Vec::new(),
        };
        assert_eq!(handshake.liveness_window(), Duration::from_millis(500));

        let bare: Handshake = serde_json::from_str(r#"{"sid":"abc"}"#).unwrap();
        assert_eq!(bare.liveness_window(), Duration::from_secs(45));
    }
}
