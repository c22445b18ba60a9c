/// mpv IPC driver with separated reader/writer tasks, one process per pipeline.
///
/// Architecture:
///
/// ```text
///   MpvPipeline::spawn(kind)
///         │
///         ├── MpvDriver        owns the child process
///         ├── writer_task   ← receives MpvRequest via mpsc, serialises → socket
///         ├── reader_task   ← reads JSON lines from socket
///         │                      ├── response (has request_id) → matched oneshot::Sender
///         │                      └── event / property-change   → raw event channel
///         └── forward_task  ← PlaybackObserver turns raw events into PipelineEvents
///                                                           → ReceiverEvent::Pipeline
/// ```
///
/// Platform notes:
/// - Unix:   Unix domain sockets
/// - Windows: Named pipes  \\.\pipe\<name>
use receiver_proto::config::MpvConfig;
use receiver_proto::platform;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

use crate::core::ReceiverEvent;
use crate::pipeline::{MediaPipeline, MediaSource, PipelineEvent, PipelineKind};

// ── global request-id counter ─────────────────────────────────────────────────

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

// ── observation property IDs ──────────────────────────────────────────────────

pub const OBS_PAUSE: u64 = 1;
pub const OBS_CORE_IDLE: u64 = 2;
pub const OBS_TIME_POS: u64 = 3;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

// ── internal channel types ────────────────────────────────────────────────────

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// Returns `Some((obs_id, data))` if this is a property-change event.
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    /// Returns the event name, e.g. "end-file", "start-file", "playback-restart".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }
}

// ── public handle ─────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    fn request(command: &Value) -> anyhow::Result<(PendingRequest, oneshot::Receiver<anyhow::Result<Value>>)> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');
        let (reply_tx, reply_rx) = oneshot::channel();
        Ok((
            PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            },
            reply_rx,
        ))
    }

    /// Fire a command and await mpv's response.
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let (req, reply_rx) = Self::request(&command)?;
        let req_id = req.req_id;
        self.tx
            .send(req)
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    /// Queue a command without waiting for the reply.  Commands posted from
    /// one caller reach mpv in the order they were posted.
    pub fn post(&self, command: Value) -> anyhow::Result<()> {
        let (req, _reply_rx) = Self::request(&command)?;
        self.tx
            .try_send(req)
            .map_err(|e| anyhow::anyhow!("mpv writer queue: {}", e))
    }

    /// Register observe_property for the properties the observer needs.
    /// mpv answers each with the current value as a property-change event.
    pub async fn observe_properties(&self) {
        let props = [
            (OBS_PAUSE, "pause"),
            (OBS_CORE_IDLE, "core-idle"),
            (OBS_TIME_POS, "time-pos"),
        ];
        for (id, name) in &props {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns one mpv child process and its IPC endpoint.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
}

impl MpvDriver {
    pub fn new(kind: PipelineKind) -> Self {
        Self {
            socket_name: platform::mpv_socket_name(kind.as_str()),
            process: None,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        if let Some(ref mut child) = self.process {
            child.try_wait().ok().flatten().is_none()
        } else {
            false
        }
    }

    /// Kill the process without waiting for it to exit.
    pub fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            if let Err(e) = p.start_kill() {
                debug!("mpv: kill failed: {}", e);
            }
        }
    }

    fn spawn_process(&mut self, args: &[String]) -> anyhow::Result<()> {
        self.kill();
        let mpv_binary =
            platform::find_mpv_binary().ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;
        info!("mpv: spawning {} {}", mpv_binary.display(), args.join(" "));
        let child = tokio::process::Command::new(mpv_binary)
            .args(args)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);
        Ok(())
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        args: &[String],
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        self.spawn_process(args)?;

        // Wait for socket to appear
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear: {}", self.socket_name);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to {}", self.socket_name);
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(read_half, write_half, event_tx))
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        args: &[String],
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.spawn_process(args)?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe {}", pipe_path);
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(read_half, write_half, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear: {}", pipe_path)
    }
}

fn start_io_tasks<R, W>(read_half: R, write_half: W, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    // pending map: req_id → reply channel.  Shared between writer (inserts) and reader (resolves).
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap, event_tx: mpsc::Sender<MpvEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC connection closed")));
                }
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"].as_str().unwrap_or("unknown error").to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    }
                } else if event_tx.send(MpvEvent { raw: val }).await.is_err() {
                    debug!("mpv reader: event consumer gone");
                    break;
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC read error: {}", e)));
                }
                break;
            }
        }
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register reply channel before writing so reader can match it
        {
            let mut map = pending.lock().await;
            map.insert(req.req_id, req.reply);
        }
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            let mut map = pending.lock().await;
            if let Some(tx) = map.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── event translation ─────────────────────────────────────────────────────────

/// Turns raw mpv events into [`PipelineEvent`]s.  Tracks `pause` and
/// `core-idle` so that `PlayingChanged` fires only on actual transitions.
#[derive(Debug)]
pub struct PlaybackObserver {
    paused: bool,
    core_idle: bool,
    playing: Option<bool>,
}

impl Default for PlaybackObserver {
    fn default() -> Self {
        // nothing is playing until mpv says otherwise
        Self {
            paused: false,
            core_idle: true,
            playing: None,
        }
    }
}

impl PlaybackObserver {
    pub fn observe(&mut self, event: &MpvEvent) -> Vec<PipelineEvent> {
        let mut out = Vec::new();
        if let Some((id, data)) = event.as_property_change() {
            match id {
                OBS_PAUSE => {
                    self.paused = data.as_bool().unwrap_or(false);
                    self.push_playing(&mut out);
                }
                OBS_CORE_IDLE => {
                    self.core_idle = data.as_bool().unwrap_or(true);
                    self.push_playing(&mut out);
                }
                OBS_TIME_POS => {
                    if let Some(secs) = data.as_f64().filter(|s| s.is_finite() && *s >= 0.0) {
                        out.push(PipelineEvent::Position(Duration::from_secs_f64(secs)));
                    }
                }
                _ => {}
            }
            return out;
        }

        match event.event_name() {
            Some("start-file") => out.push(PipelineEvent::Buffering),
            Some("playback-restart") => out.push(PipelineEvent::Ready),
            Some("video-reconfig") => out.push(PipelineEvent::VideoSizeChanged),
            Some("idle") => out.push(PipelineEvent::Idle),
            Some("end-file") => match event.raw.get("reason").and_then(Value::as_str) {
                Some("eof") => out.push(PipelineEvent::Ended),
                Some("error") => {
                    let detail = event
                        .raw
                        .get("file_error")
                        .and_then(Value::as_str)
                        .unwrap_or("playback error");
                    out.push(PipelineEvent::Error(detail.to_string()));
                }
                _ => {}
            },
            _ => {}
        }
        out
    }

    fn push_playing(&mut self, out: &mut Vec<PipelineEvent>) {
        let playing = !self.paused && !self.core_idle;
        if self.playing != Some(playing) {
            self.playing = Some(playing);
            out.push(PipelineEvent::PlayingChanged(playing));
        }
    }
}

// ── pipeline adapter ──────────────────────────────────────────────────────────

pub fn process_args(kind: PipelineKind, config: &MpvConfig, volume: f32) -> Vec<String> {
    let mut args = vec![
        "--idle=yes".to_string(),
        "--quiet".to_string(),
        platform::mpv_socket_arg(kind.as_str()),
        format!("--volume={}", volume_percent(volume)),
        format!("--user-agent={}", config.user_agent),
    ];
    match kind {
        PipelineKind::Primary => {
            args.push("--force-window=yes".to_string());
            args.push("--sub-auto=no".to_string());
            if config.fullscreen {
                args.push("--fullscreen".to_string());
            }
            args.extend(config.extra_args.iter().cloned());
        }
        PipelineKind::Background => {
            args.push("--no-video".to_string());
            args.push("--loop-file=inf".to_string());
        }
    }
    args
}

fn volume_percent(volume: f32) -> i64 {
    (volume * 100.0).clamp(0.0, 100.0).round() as i64
}

/// A [`MediaPipeline`] backed by its own mpv process.
pub struct MpvPipeline {
    kind: PipelineKind,
    driver: MpvDriver,
    handle: MpvHandle,
}

impl MpvPipeline {
    pub async fn spawn(
        kind: PipelineKind,
        config: &MpvConfig,
        volume: f32,
        events: mpsc::Sender<ReceiverEvent>,
    ) -> anyhow::Result<Self> {
        let mut driver = MpvDriver::new(kind);
        let (raw_tx, raw_rx) = mpsc::channel::<MpvEvent>(256);
        let handle = driver
            .spawn_and_connect(&process_args(kind, config, volume), raw_tx)
            .await?;
        tokio::spawn(forward_task(kind, raw_rx, events));
        handle.observe_properties().await;
        Ok(Self {
            kind,
            driver,
            handle,
        })
    }

    fn post(&self, command: Value) {
        if let Err(e) = self.handle.post(command) {
            warn!("mpv[{}]: {}", self.kind.as_str(), e);
        }
    }
}

async fn forward_task(
    kind: PipelineKind,
    mut raw_rx: mpsc::Receiver<MpvEvent>,
    events: mpsc::Sender<ReceiverEvent>,
) {
    let mut observer = PlaybackObserver::default();
    while let Some(raw) = raw_rx.recv().await {
        for evt in observer.observe(&raw) {
            if events.send(ReceiverEvent::Pipeline(kind, evt)).await.is_err() {
                return;
            }
        }
    }
    debug!("mpv[{}]: event stream ended", kind.as_str());
}

impl MediaPipeline for MpvPipeline {
    fn load(&mut self, source: &MediaSource) {
        self.post(json!(["set_property", "pause", true]));
        self.post(json!(["change-list", "sub-files", "clr", ""]));
        if let Some(ref subtitle) = source.subtitle {
            self.post(json!(["change-list", "sub-files", "append", subtitle]));
        }
        self.post(json!(["loadfile", source.uri, "replace"]));
    }

    fn play(&mut self) {
        self.post(json!(["set_property", "pause", false]));
    }

    fn pause(&mut self) {
        self.post(json!(["set_property", "pause", true]));
    }

    fn stop(&mut self) {
        self.post(json!(["stop"]));
    }

    fn seek(&mut self, position: Duration) {
        self.post(json!(["set_property", "time-pos", position.as_secs_f64()]));
    }

    fn set_volume(&mut self, volume: f32) {
        self.post(json!(["set_property", "volume", volume_percent(volume)]));
    }

    fn set_subtitle_enabled(&mut self, enabled: bool) {
        self.post(json!(["set_property", "sub-visibility", enabled]));
    }

    fn attach_subtitle(&mut self, uri: &str) {
        self.post(json!(["sub-add", uri, "select"]));
    }

    fn release(&mut self) {
        self.post(json!(["quit"]));
        if self.driver.process_alive() {
            self.driver.kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evt(raw: Value) -> MpvEvent {
        MpvEvent { raw }
    }

    #[test]
    fn test_lifecycle_events_map_to_pipeline_events() {
        let mut obs = PlaybackObserver::default();
        assert_eq!(obs.observe(&evt(json!({"event": "start-file"}))), vec![PipelineEvent::Buffering]);
        assert_eq!(obs.observe(&evt(json!({"event": "playback-restart"}))), vec![PipelineEvent::Ready]);
        assert_eq!(
            obs.observe(&evt(json!({"event": "video-reconfig"}))),
            vec![PipelineEvent::VideoSizeChanged]
        );
        assert_eq!(
            obs.observe(&evt(json!({"event": "end-file", "reason": "eof"}))),
            vec![PipelineEvent::Ended]
        );
        assert_eq!(
            obs.observe(&evt(json!({"event": "end-file", "reason": "error", "file_error": "loading failed"}))),
            vec![PipelineEvent::Error("loading failed".into())]
        );
        // replaced by a new loadfile: not an end of playback
        assert!(obs.observe(&evt(json!({"event": "end-file", "reason": "stop"}))).is_empty());
        assert_eq!(obs.observe(&evt(json!({"event": "idle"}))), vec![PipelineEvent::Idle]);
    }

    #[test]
    fn test_playing_changes_only_on_transition() {
        let mut obs = PlaybackObserver::default();
        let pause = |v: bool| evt(json!({"event": "property-change", "id": OBS_PAUSE, "name": "pause", "data": v}));
        let idle = |v: bool| evt(json!({"event": "property-change", "id": OBS_CORE_IDLE, "name": "core-idle", "data": v}));

        assert_eq!(obs.observe(&pause(true)), vec![PipelineEvent::PlayingChanged(false)]);
        assert!(obs.observe(&idle(true)).is_empty());
        assert!(obs.observe(&pause(false)).is_empty());
        assert_eq!(obs.observe(&idle(false)), vec![PipelineEvent::PlayingChanged(true)]);
        assert_eq!(obs.observe(&pause(true)), vec![PipelineEvent::PlayingChanged(false)]);
    }

    #[test]
    fn test_time_pos_reports_position() {
        let mut obs = PlaybackObserver::default();
        let out = obs.observe(&evt(json!({"event": "property-change", "id": OBS_TIME_POS, "data": 12.5})));
        assert_eq!(out, vec![PipelineEvent::Position(Duration::from_millis(12_500))]);
        let out = obs.observe(&evt(json!({"event": "property-change", "id": OBS_TIME_POS, "data": null})));
        assert!(out.is_empty());
    }

    #[test]
    fn test_process_args_per_pipeline() {
        let config = MpvConfig::default();
        let video = process_args(PipelineKind::Primary, &config, 1.0);
        assert!(video.contains(&"--force-window=yes".to_string()));
        assert!(video.contains(&"--fullscreen".to_string()));
        assert!(video.contains(&"--volume=100".to_string()));
        assert!(!video.contains(&"--no-video".to_string()));

        let bgm = process_args(PipelineKind::Background, &config, 0.25);
        assert!(bgm.contains(&"--no-video".to_string()));
        assert!(bgm.contains(&"--loop-file=inf".to_string()));
        assert!(bgm.contains(&"--volume=25".to_string()));
        assert!(bgm.iter().any(|a| a.contains("receiver-mpv-bgm")));
    }

    #[tokio::test]
    async fn test_io_tasks_route_replies_and_events() {
        let (client, server) = tokio::io::duplex(4096);
        let (read_half, write_half) = tokio::io::split(client);
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let handle = start_io_tasks(read_half, write_half, event_tx);

        let fake_mpv = tokio::spawn(async move {
            let (server_read, mut server_write) = tokio::io::split(server);
            let mut lines = BufReader::new(server_read).lines();

            // posted command first, then the awaited one, in order
            let posted: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            assert_eq!(posted["command"], json!(["set_property", "pause", true]));
            let asked: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            assert_eq!(asked["command"], json!(["get_property", "volume"]));

            let event = "{\"event\":\"playback-restart\"}\n";
            server_write.write_all(event.as_bytes()).await.unwrap();
            let reply = json!({"request_id": asked["request_id"], "error": "success", "data": 40.0});
            server_write
                .write_all(format!("{}\n", reply).as_bytes())
                .await
                .unwrap();
        });

        handle.post(json!(["set_property", "pause", true])).unwrap();
        let reply = handle.send(json!(["get_property", "volume"])).await.unwrap();
        assert_eq!(reply["data"], json!(40.0));

        let event = event_rx.recv().await.unwrap();
        assert_eq!(event.event_name(), Some("playback-restart"));
        fake_mpv.await.unwrap();
    }
}
