//! Presentation decisions.  The core decides when overlays appear and for how
//! long; the host draws them.
use std::time::Duration;

use receiver_proto::playlist::PlaylistItem;
use serde::Serialize;

use crate::channel::ConnectionStatus;

pub const UNTITLED: &str = "Untitled Artwork";
pub const NO_DETAILS: &str = "No additional information";
pub const DETAIL_SEPARATOR: &str = " • ";

pub const TRANSITION_FADE: Duration = Duration::from_millis(200);

const PER_CHAR: Duration = Duration::from_millis(50);
const MIN_INFO: Duration = Duration::from_secs(4);
const MAX_INFO: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackInfo {
    pub title: String,
    pub details: String,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
}

impl TrackInfo {
    pub fn for_item(item: &PlaylistItem) -> Self {
        let title = if item.title.is_empty() {
            UNTITLED.to_string()
        } else {
            item.title.clone()
        };
        let parts: Vec<&str> = [&item.artist, &item.size, &item.material]
            .into_iter()
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .collect();
        let details = if parts.is_empty() {
            NO_DETAILS.to_string()
        } else {
            parts.join(DETAIL_SEPARATOR)
        };
        let duration = display_duration(&title, &details);
        Self {
            title,
            details,
            duration,
        }
    }
}

/// 50 ms per character of title + details, kept within 4..=8 s.
pub fn display_duration(title: &str, details: &str) -> Duration {
    let chars = (title.chars().count() + details.chars().count()) as u32;
    PER_CHAR.saturating_mul(chars).clamp(MIN_INFO, MAX_INFO)
}

/// `Room: <key>` before anything is loaded, `Room: <key>  |  #<n>/<len>` after.
pub fn room_indicator(room_key: &str, position: Option<(usize, usize)>) -> String {
    match position {
        Some((idx, len)) => format!("Room: {}  |  #{}/{}", room_key, idx + 1, len),
        None => format!("Room: {}", room_key),
    }
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// One presentation decision, broadcast to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Display {
    RoomIndicator { text: String },
    /// Opaque overlay masking the pipeline reload.
    TransitionShown,
    TransitionHidden {
        #[serde(rename = "fade_ms", serialize_with = "as_millis")]
        fade: Duration,
    },
    TrackInfoShown(TrackInfo),
    TrackInfoHidden,
    Connection {
        status: ConnectionStatus,
        text: &'static str,
    },
    StatusPillsHidden,
    /// Re-apply display mode and layout (after a size change or an error).
    Refresh,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(title: &str, artist: &str, size: &str, material: &str) -> PlaylistItem {
        PlaylistItem {
            video: "v.m3u8".into(),
            audio: None,
            subtitle: None,
            poster: None,
            title: title.into(),
            artist: artist.into(),
            size: size.into(),
            material: material.into(),
            order: 0,
        }
    }

    #[test]
    fn test_empty_metadata_uses_fallbacks() {
        let info = TrackInfo::for_item(&item("", "", "", ""));
        assert_eq!(info.title, UNTITLED);
        assert_eq!(info.details, NO_DETAILS);
        // 16 + 25 chars = 2.05 s, raised to the floor
        assert_eq!(info.duration, Duration::from_secs(4));
    }

    #[test]
    fn test_details_skip_empty_parts() {
        let info = TrackInfo::for_item(&item("Dawn", "Kim", "", "Oil on canvas"));
        assert_eq!(info.details, "Kim • Oil on canvas");
    }

    #[test]
    fn test_duration_scales_then_caps() {
        let title = "t".repeat(50);
        let details = "d".repeat(50);
        assert_eq!(display_duration(&title, &details), Duration::from_secs(5));
        assert_eq!(display_duration(&title.repeat(10), ""), Duration::from_secs(8));
        // counted in characters, not bytes
        assert_eq!(display_duration(&"가".repeat(100), ""), Duration::from_secs(5));
    }

    #[test]
    fn test_room_indicator_text() {
        assert_eq!(room_indicator("acme__hall", None), "Room: acme__hall");
        assert_eq!(room_indicator("acme__hall", Some((0, 3))), "Room: acme__hall  |  #1/3");
    }

    #[test]
    fn test_display_serialises_tagged() {
        let v = serde_json::to_value(Display::TransitionHidden { fade: TRANSITION_FADE }).unwrap();
        assert_eq!(v, serde_json::json!({"kind": "transition_hidden", "fade_ms": 200}));
    }
}
