//! Engine.IO v4 / Socket.IO v5 text framing over a WebSocket transport.
//!
//! ```text
//!   0{"sid":..}        open handshake           (server → client)
//!   2 / 3              ping / pong
//!   40                 namespace connect        (client → server, ack back)
//!   42["NAME",{..}]    event
//!   44{"message":..}   connect error
//! ```
//!
//! Only the default namespace and text frames are used; binary packets and
//! acknowledgements decode to `Packet::Other`.
use std::time::Duration;

use serde_json::{json, Value};
use url::Url;

pub const CONNECT_FRAME: &str = "40";
pub const PONG_FRAME: &str = "3";

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("invalid channel url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unsupported channel url scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("empty frame")]
    Empty,
    #[error("unknown packet type '{0}'")]
    UnknownPacket(char),
    #[error("malformed event payload: {0}")]
    MalformedEvent(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Value),
    Close,
    Ping,
    Pong,
    Noop,
    /// Namespace connect acknowledgement.
    Connect,
    Disconnect,
    Event { name: String, data: Value },
    ConnectError(Value),
    Other,
}

pub fn decode(frame: &str) -> Result<Packet, WireError> {
    let mut chars = frame.chars();
    let kind = chars.next().ok_or(WireError::Empty)?;
    let body = chars.as_str();
    match kind {
        '0' => Ok(Packet::Open(serde_json::from_str(body)?)),
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => decode_socket(body),
        '5' | '6' => Ok(Packet::Noop),
        other => Err(WireError::UnknownPacket(other)),
    }
}

/// How long the server may stay silent before the session is considered
/// dead: `pingInterval + pingTimeout` from the open handshake.
pub fn liveness_window(open: &Value) -> Option<Duration> {
    let interval = open.get("pingInterval")?.as_u64()?;
    let timeout = open.get("pingTimeout")?.as_u64()?;
    Some(Duration::from_millis(interval.saturating_add(timeout)))
}

fn decode_socket(body: &str) -> Result<Packet, WireError> {
    let mut chars = body.chars();
    let kind = chars.next().ok_or(WireError::Empty)?;
    let rest = strip_ack_id(strip_namespace(chars.as_str()));
    match kind {
        '0' => Ok(Packet::Connect),
        '1' => Ok(Packet::Disconnect),
        '2' => decode_event(rest),
        '4' => Ok(Packet::ConnectError(
            serde_json::from_str(rest).unwrap_or(Value::Null),
        )),
        '3' | '5' | '6' => Ok(Packet::Other),
        other => Err(WireError::UnknownPacket(other)),
    }
}

fn strip_namespace(rest: &str) -> &str {
    if !rest.starts_with('/') {
        return rest;
    }
    match rest.find(',') {
        Some(comma) => &rest[comma + 1..],
        None => "",
    }
}

fn strip_ack_id(rest: &str) -> &str {
    rest.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn decode_event(rest: &str) -> Result<Packet, WireError> {
    let value: Value = serde_json::from_str(rest)?;
    let mut args = match value {
        Value::Array(args) => args.into_iter(),
        other => return Err(WireError::MalformedEvent(other.to_string())),
    };
    let name = match args.next() {
        Some(Value::String(name)) => name,
        other => {
            return Err(WireError::MalformedEvent(format!(
                "event name {:?}",
                other.unwrap_or(Value::Null)
            )))
        }
    };
    Ok(Packet::Event {
        name,
        data: args.next().unwrap_or(Value::Null),
    })
}

pub fn encode_event(name: &str, data: &Value) -> Result<String, WireError> {
    Ok(format!("42{}", serde_json::to_string(&json!([name, data]))?))
}

/// WebSocket endpoint for a configured channel URL: `http(s)` becomes
/// `ws(s)`, `/socket.io/` is appended unless present, and the Engine.IO
/// query is added.
pub fn socket_url(base: &str) -> Result<Url, WireError> {
    let mut url = Url::parse(base.trim())?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => return Err(WireError::UnsupportedScheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|_| WireError::UnsupportedScheme(url.scheme().to_string()))?;
    if !url.path().contains("/socket.io") {
        let path = format!("{}/socket.io/", url.path().trim_end_matches('/'));
        url.set_path(&path);
    }
    url.query_pairs_mut()
        .append_pair("EIO", "4")
        .append_pair("transport", "websocket");
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_event_frame() {
        let packet = decode(r#"42["COMMAND",{"action":"PLAY"}]"#).unwrap();
        assert_eq!(
            packet,
            Packet::Event {
                name: "COMMAND".into(),
                data: json!({"action": "PLAY"})
            }
        );
    }

    #[test]
    fn tolerates_namespace_and_ack_id() {
        let packet = decode(r#"42/tv,17["SET_PLAYLIST",{"items":[]}]"#).unwrap();
        assert!(matches!(packet, Packet::Event { ref name, .. } if name == "SET_PLAYLIST"));
    }

    #[test]
    fn event_without_payload_has_null_data() {
        assert_eq!(
            decode(r#"42["PING_ROOM"]"#).unwrap(),
            Packet::Event {
                name: "PING_ROOM".into(),
                data: Value::Null
            }
        );
    }

    #[test]
    fn decodes_control_frames() {
        assert!(matches!(
            decode(r#"0{"sid":"abc","pingInterval":25000}"#).unwrap(),
            Packet::Open(_)
        ));
        assert_eq!(decode("2").unwrap(), Packet::Ping);
        assert_eq!(decode(r#"40{"sid":"x"}"#).unwrap(), Packet::Connect);
        assert_eq!(decode("41").unwrap(), Packet::Disconnect);
        assert!(matches!(
            decode(r#"44{"message":"nope"}"#).unwrap(),
            Packet::ConnectError(_)
        ));
    }

    #[test]
    fn liveness_window_from_open_packet() {
        let open = json!({"sid": "abc", "pingInterval": 25000, "pingTimeout": 20000});
        assert_eq!(liveness_window(&open), Some(Duration::from_secs(45)));
        assert_eq!(liveness_window(&json!({"sid": "abc"})), None);
        assert_eq!(liveness_window(&json!({"pingInterval": "fast", "pingTimeout": 1})), None);
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode("").is_err());
        assert!(decode("9").is_err());
        assert!(decode(r#"42{"not":"array"}"#).is_err());
        assert!(decode("42[1,2]").is_err());
    }

    #[test]
    fn encodes_event() {
        let frame = encode_event("HELLO", &json!({"role": "receiver"})).unwrap();
        assert_eq!(frame, r#"42["HELLO",{"role":"receiver"}]"#);
    }

    #[test]
    fn builds_socket_url() {
        assert_eq!(
            socket_url("wss://api.curizm.io").unwrap().as_str(),
            "wss://api.curizm.io/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            socket_url("https://host.example/app/").unwrap().as_str(),
            "wss://host.example/app/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            socket_url("ws://127.0.0.1:3000/socket.io/").unwrap().path(),
            "/socket.io/"
        );
    }

    #[test]
    fn malformed_urls_fail() {
        assert!(matches!(
            socket_url("not a url"),
            Err(WireError::InvalidUrl(_))
        ));
        assert!(matches!(
            socket_url("ftp://host"),
            Err(WireError::UnsupportedScheme(_))
        ));
    }
}
