use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role announced in the handshake.  The server only routes room traffic to
/// peers that announced themselves as receivers.
pub const ROLE_RECEIVER: &str = "receiver";

pub const EVENT_HELLO: &str = "HELLO";
pub const EVENT_HEARTBEAT: &str = "HEARTBEAT";
pub const EVENT_SET_PLAYLIST: &str = "SET_PLAYLIST";
pub const EVENT_COMMAND: &str = "COMMAND";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ProtocolError {
    #[error("SET_PLAYLIST without an items array")]
    MissingItems,
    #[error("{0} payload is not an object")]
    NotAnObject(&'static str),
}

// ── outbound ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub role: String,
    pub company_name: String,
    pub secret_code: String,
}

impl Hello {
    pub fn receiver(company_name: &str, secret_code: &str) -> Self {
        Self {
            role: ROLE_RECEIVER.to_string(),
            company_name: company_name.to_string(),
            secret_code: secret_code.to_string(),
        }
    }
}

/// Liveness report.  `idx` is -1 when nothing is loaded, `t` is the primary
/// position in whole seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Heartbeat {
    pub ts: i64,
    pub idx: i64,
    pub paused: bool,
    pub t: u64,
}

/// Messages sent from the receiver to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Hello(Hello),
    Heartbeat(Heartbeat),
}

impl Outbound {
    pub fn event_name(&self) -> &'static str {
        match self {
            Outbound::Hello(_) => EVENT_HELLO,
            Outbound::Heartbeat(_) => EVENT_HEARTBEAT,
        }
    }

    pub fn payload(&self) -> serde_json::Result<Value> {
        match self {
            Outbound::Hello(h) => serde_json::to_value(h),
            Outbound::Heartbeat(h) => serde_json::to_value(h),
        }
    }
}

// ── inbound ───────────────────────────────────────────────────────────────────

/// Messages received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Raw item records; validation happens in the playlist model.
    SetPlaylist { items: Vec<Value> },
    Command(RawCommand),
}

impl Inbound {
    /// Decode a named channel event.  Unknown event names yield `Ok(None)`.
    pub fn from_event(name: &str, data: &Value) -> Result<Option<Self>, ProtocolError> {
        match name {
            EVENT_SET_PLAYLIST => {
                let items = data
                    .get("items")
                    .and_then(Value::as_array)
                    .ok_or(ProtocolError::MissingItems)?;
                Ok(Some(Inbound::SetPlaylist {
                    items: items.clone(),
                }))
            }
            EVENT_COMMAND => Ok(Some(Inbound::Command(RawCommand::from_json(data)?))),
            _ => Ok(None),
        }
    }
}

/// Command argument.  Only numbers and booleans are meaningful; anything else
/// is treated as absent so a type check at the interpreter rejects it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandValue {
    Number(f64),
    Bool(bool),
    Absent,
}

impl CommandValue {
    pub fn from_json(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Number(n)) => n
                .as_f64()
                .filter(|f| f.is_finite())
                .map(CommandValue::Number)
                .unwrap_or(CommandValue::Absent),
            Some(Value::Bool(b)) => CommandValue::Bool(*b),
            _ => CommandValue::Absent,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CommandValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CommandValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// `COMMAND {action, value?, startAt?}` before its value has been checked
/// against the action.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCommand {
    pub action: String,
    pub value: CommandValue,
    /// Absolute epoch milliseconds.
    pub start_at: Option<i64>,
}

impl RawCommand {
    pub fn new(action: impl Into<String>, value: CommandValue) -> Self {
        Self {
            action: action.into(),
            value,
            start_at: None,
        }
    }

    pub fn from_json(data: &Value) -> Result<Self, ProtocolError> {
        let obj = data
            .as_object()
            .ok_or(ProtocolError::NotAnObject(EVENT_COMMAND))?;
        let action = obj
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let start_at = obj.get("startAt").and_then(|v| {
            v.as_i64()
                .or_else(|| v.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
        });
        Ok(Self {
            action,
            value: CommandValue::from_json(obj.get("value")),
            start_at,
        })
    }
}

/// Typed playback operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    Play,
    Pause,
    Next,
    Prev,
    JumpToIndex(i64),
    /// Seconds; may be negative on the wire, clamped when applied.
    Seek(f64),
    SetVideoVolume(f32),
    SetBgmVolume(f32),
    SetCaptions(bool),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Command {
    pub action: Action,
    pub start_at: Option<i64>,
}

impl Command {
    /// Check the value against the action.  Unknown actions and values of the
    /// wrong type yield `None`; nothing is coerced.
    pub fn decode(raw: &RawCommand) -> Option<Self> {
        let value = raw.value;
        let action = match raw.action.as_str() {
            "PLAY" => Action::Play,
            "PAUSE" => Action::Pause,
            "NEXT" => Action::Next,
            "PREV" => Action::Prev,
            "JUMP_TO_INDEX" => Action::JumpToIndex(value.as_number()? as i64),
            "SEEK" => Action::Seek(value.as_number()?),
            "SET_VIDEO_VOLUME" => Action::SetVideoVolume(value.as_number()? as f32),
            "SET_BGM_VOLUME" => Action::SetBgmVolume(value.as_number()? as f32),
            "SET_CAPTIONS" => Action::SetCaptions(value.as_bool()?),
            _ => return None,
        };
        Some(Self {
            action,
            start_at: raw.start_at,
        })
    }
}
