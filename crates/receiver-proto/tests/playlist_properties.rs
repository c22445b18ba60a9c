use receiver_proto::playlist::{wrap_index, Playlist};
use serde_json::{json, Map, Value};

#[test]
fn wrap_always_lands_in_range() {
    for len in 1..=7usize {
        for requested in -50i64..=50 {
            let idx = wrap_index(requested, len).unwrap();
            assert!(idx < len, "wrap({requested}, {len}) = {idx}");
            assert_eq!(idx as i64, ((requested % len as i64) + len as i64) % len as i64);
        }
    }
    assert_eq!(wrap_index(i64::MIN, 3), Some((i64::MIN.rem_euclid(3)) as usize));
}

#[test]
fn equal_orders_keep_arrival_order() {
    let records: Vec<Value> = [
        ("first", 1),
        ("second", 0),
        ("third", 1),
        ("fourth", 0),
        ("fifth", 1),
    ]
    .iter()
    .map(|(video, order)| json!({"video": video, "order": order}))
    .collect();

    let playlist = Playlist::from_records(&records);
    let videos: Vec<_> = playlist.items().iter().map(|i| i.video.as_str()).collect();
    assert_eq!(videos, ["second", "fourth", "first", "third", "fifth"]);
}

#[test]
fn missing_order_sorts_as_zero() {
    let playlist = Playlist::from_records(&[
        json!({"video": "late", "order": 3}),
        json!({"video": "unordered"}),
        json!({"video": "early", "order": -1}),
    ]);
    let videos: Vec<_> = playlist.items().iter().map(|i| i.video.as_str()).collect();
    assert_eq!(videos, ["early", "unordered", "late"]);
}

#[test]
fn records_without_video_never_survive() {
    let optional = [
        ("audio", json!("bed.mp3")),
        ("subtitle", json!("subs.vtt")),
        ("poster", json!("poster.jpg")),
        ("title", json!("t")),
        ("artworkName", json!("aw")),
        ("artist", json!("a")),
        ("artistName", json!("an")),
        ("size", json!("100x80")),
        ("material", json!("oil")),
        ("order", json!(4)),
    ];

    // every subset of the optional fields, with and without a bad `video`
    for mask in 0u32..(1 << optional.len()) {
        let mut base = Map::new();
        for (bit, (key, value)) in optional.iter().enumerate() {
            if mask & (1 << bit) != 0 {
                base.insert(key.to_string(), value.clone());
            }
        }
        for bad_video in [None, Some(json!("")), Some(json!(null)), Some(json!(12))] {
            let mut record = base.clone();
            if let Some(v) = bad_video {
                record.insert("video".into(), v);
            }
            let playlist = Playlist::from_records(&[
                Value::Object(record),
                json!({"video": "keep.m3u8"}),
            ]);
            assert_eq!(playlist.len(), 1);
            assert_eq!(playlist.items()[0].video, "keep.m3u8");
        }
    }
}

#[test]
fn scenario_two_items_sorted_and_wrapping() {
    let playlist = Playlist::from_records(&[
        json!({"video": "a.m3u8", "order": 2}),
        json!({"video": "b.m3u8", "order": 1}),
    ]);
    assert_eq!(playlist.get(0).unwrap().video, "b.m3u8");
    assert_eq!(playlist.get(1).unwrap().video, "a.m3u8");
    assert_eq!(playlist.wrap(0 + 1), Some(1));
    assert_eq!(playlist.wrap(1 + 1), Some(0));
}
