use crate::core::{ReceiverEvent, ReceiverSnapshot};
use axum::{extract::Path, extract::State, http::StatusCode, response::Json, routing::get, Router};
use receiver_proto::protocol::{CommandValue, RawCommand};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    snapshot: watch::Receiver<ReceiverSnapshot>,
    event_tx: mpsc::Sender<ReceiverEvent>,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    snapshot: watch::Receiver<ReceiverSnapshot>,
    event_tx: mpsc::Sender<ReceiverEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(HttpState { snapshot, event_tx });

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/play", get(play).post(play))
        .route("/api/pause", get(pause).post(pause))
        .route("/api/next", get(next).post(next))
        .route("/api/prev", get(prev).post(prev))
        .route("/api/jump/:idx", get(jump).post(jump))
        .route("/api/seek/:secs", get(seek).post(seek))
        .route("/api/captions/:on", get(captions).post(captions))
        .route("/api/volume/video/:pct", get(video_volume).post(video_volume))
        .route("/api/volume/bgm/:pct", get(bgm_volume).post(bgm_volume))
        .with_state(state)
}

async fn get_state(State(state): State<HttpState>) -> Json<ReceiverSnapshot> {
    Json(state.snapshot.borrow().clone())
}

async fn inject(state: &HttpState, action: &str, value: CommandValue) -> StatusCode {
    info!("HTTP API: {} {:?}", action, value);
    let cmd = RawCommand::new(action, value);
    if state.event_tx.send(ReceiverEvent::LocalCommand(cmd)).await.is_err() {
        error!("Failed to send {} command", action);
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

async fn play(State(state): State<HttpState>) -> StatusCode {
    inject(&state, "PLAY", CommandValue::Absent).await
}

async fn pause(State(state): State<HttpState>) -> StatusCode {
    inject(&state, "PAUSE", CommandValue::Absent).await
}

async fn next(State(state): State<HttpState>) -> StatusCode {
    inject(&state, "NEXT", CommandValue::Absent).await
}

async fn prev(State(state): State<HttpState>) -> StatusCode {
    inject(&state, "PREV", CommandValue::Absent).await
}

async fn jump(State(state): State<HttpState>, Path(idx): Path<i64>) -> StatusCode {
    inject(&state, "JUMP_TO_INDEX", CommandValue::Number(idx as f64)).await
}

async fn seek(State(state): State<HttpState>, Path(secs): Path<f64>) -> StatusCode {
    inject(&state, "SEEK", CommandValue::Number(secs)).await
}

async fn captions(State(state): State<HttpState>, Path(on): Path<bool>) -> StatusCode {
    inject(&state, "SET_CAPTIONS", CommandValue::Bool(on)).await
}

async fn video_volume(State(state): State<HttpState>, Path(pct): Path<i32>) -> StatusCode {
    inject(&state, "SET_VIDEO_VOLUME", CommandValue::Number(pct as f64 / 100.0)).await
}

async fn bgm_volume(State(state): State<HttpState>, Path(pct): Path<i32>) -> StatusCode {
    inject(&state, "SET_BGM_VOLUME", CommandValue::Number(pct as f64 / 100.0)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ConnectionStatus;
    use crate::core::Phase;
    use receiver_proto::protocol::Action;

    fn snapshot() -> ReceiverSnapshot {
        ReceiverSnapshot {
            phase: Phase::Ready(1),
            index: 1,
            playlist_len: 3,
            title: Some("Dawn".into()),
            captions_on: true,
            video_volume: 1.0,
            bgm_volume: 0.25,
            is_playing: true,
            position_secs: 12.0,
            connection: ConnectionStatus::Connected,
            room_key: "acme__hall".into(),
        }
    }

    async fn serve() -> (String, mpsc::Receiver<ReceiverEvent>) {
        let (_snapshot_tx, snapshot) = watch::channel(snapshot());
        let (event_tx, event_rx) = mpsc::channel(8);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(HttpState { snapshot, event_tx });
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), event_rx)
    }

    #[tokio::test]
    async fn test_state_endpoint_serves_snapshot() {
        let (base, _rx) = serve().await;
        let body: serde_json::Value = reqwest::get(format!("{}/api/state", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["phase"], serde_json::json!({"state": "ready", "index": 1}));
        assert_eq!(body["connection"], "connected");
        assert_eq!(body["room_key"], "acme__hall");
    }

    #[tokio::test]
    async fn test_control_routes_inject_local_commands() {
        let (base, mut rx) = serve().await;
        let client = reqwest::Client::new();

        let resp = client.post(format!("{}/api/volume/bgm/170", base)).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        match rx.recv().await {
            Some(ReceiverEvent::LocalCommand(raw)) => {
                let cmd = receiver_proto::protocol::Command::decode(&raw).unwrap();
                assert_eq!(cmd.action, Action::SetBgmVolume(1.7));
            }
            other => panic!("unexpected {:?}", other),
        }

        client.get(format!("{}/api/captions/false", base)).send().await.unwrap();
        match rx.recv().await {
            Some(ReceiverEvent::LocalCommand(raw)) => {
                assert_eq!(raw.action, "SET_CAPTIONS");
                assert_eq!(raw.value, CommandValue::Bool(false));
            }
            other => panic!("unexpected {:?}", other),
        }

        let bad = client.get(format!("{}/api/jump/abc", base)).send().await.unwrap();
        assert_eq!(bad.status(), 400);
    }
}
