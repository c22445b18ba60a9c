use serde::Serialize;
use serde_json::Value;

/// One playable entry.  Only constructible with a non-empty `video` URI;
/// records without one are dropped at parse time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistItem {
    pub video: String,
    /// Background (looping) audio track.
    pub audio: Option<String>,
    pub subtitle: Option<String>,
    /// Carried for hosts; playback never looks at it.
    pub poster: Option<String>,
    pub title: String,
    pub artist: String,
    pub size: String,
    pub material: String,
    pub order: i64,
}

impl PlaylistItem {
    /// Parse one loosely typed record.  `artworkName`/`artistName` win over
    /// the generic `title`/`artist` fields when present.
    pub fn from_record(record: &Value) -> Option<Self> {
        let obj = record.as_object()?;
        let video = obj
            .get("video")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())?
            .to_string();

        let text = |key: &str| obj.get(key).and_then(display_string);
        let uri = |key: &str| text(key).filter(|s| !s.trim().is_empty());

        Some(Self {
            video,
            audio: uri("audio"),
            subtitle: uri("subtitle"),
            poster: uri("poster"),
            title: text("artworkName").or_else(|| text("title")).unwrap_or_default(),
            artist: text("artistName").or_else(|| text("artist")).unwrap_or_default(),
            size: text("size").unwrap_or_default(),
            material: text("material").unwrap_or_default(),
            order: obj.get("order").and_then(order_value).unwrap_or(0),
        })
    }
}

fn display_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn order_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Ordered playlist, stable-sorted ascending by `order`.  Rebuilt wholesale
/// on every update.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Playlist {
    items: Vec<PlaylistItem>,
}

impl Playlist {
    pub fn from_records(records: &[Value]) -> Self {
        let mut items: Vec<PlaylistItem> =
            records.iter().filter_map(PlaylistItem::from_record).collect();
        // sort_by_key is stable: equal orders keep their arrival order
        items.sort_by_key(|item| item.order);
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&PlaylistItem> {
        self.items.get(idx)
    }

    pub fn items(&self) -> &[PlaylistItem] {
        &self.items
    }

    /// Wrap a requested index into `[0, len)`.
    pub fn wrap(&self, requested: i64) -> Option<usize> {
        wrap_index(requested, self.items.len())
    }
}

/// `((requested % len) + len) % len`, for positive and negative requests.
/// `None` for an empty playlist.
pub fn wrap_index(requested: i64, len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    Some(requested.rem_euclid(len as i64) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_without_video_is_dropped() {
        assert!(PlaylistItem::from_record(&json!({"title": "x", "order": 1})).is_none());
        assert!(PlaylistItem::from_record(&json!({"video": ""})).is_none());
        assert!(PlaylistItem::from_record(&json!({"video": 3})).is_none());
        assert!(PlaylistItem::from_record(&json!("a.m3u8")).is_none());
    }

    #[test]
    fn optional_fields_default_to_empty() {
        let item = PlaylistItem::from_record(&json!({"video": "a.m3u8"})).unwrap();
        assert_eq!(item.video, "a.m3u8");
        assert_eq!(item.audio, None);
        assert_eq!(item.subtitle, None);
        assert_eq!(item.title, "");
        assert_eq!(item.order, 0);
    }

    #[test]
    fn artwork_fields_take_precedence() {
        let item = PlaylistItem::from_record(&json!({
            "video": "a.m3u8",
            "title": "generic",
            "artworkName": "Water Lilies",
            "artist": "someone",
            "artistName": "Monet",
            "subtitle": "",
            "audio": "bed.mp3",
        }))
        .unwrap();
        assert_eq!(item.title, "Water Lilies");
        assert_eq!(item.artist, "Monet");
        assert_eq!(item.subtitle, None);
        assert_eq!(item.audio.as_deref(), Some("bed.mp3"));
    }

    #[test]
    fn sorts_by_order() {
        let playlist = Playlist::from_records(&[
            json!({"video": "a.m3u8", "order": 2}),
            json!({"video": "b.m3u8", "order": 1}),
        ]);
        let videos: Vec<_> = playlist.items().iter().map(|i| i.video.as_str()).collect();
        assert_eq!(videos, ["b.m3u8", "a.m3u8"]);
    }

    #[test]
    fn wrap_handles_negative_requests() {
        assert_eq!(wrap_index(-1, 3), Some(2));
        assert_eq!(wrap_index(3, 3), Some(0));
        assert_eq!(wrap_index(-7, 3), Some(2));
        assert_eq!(wrap_index(5, 0), None);
    }
}
