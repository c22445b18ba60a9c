/// ReceiverCore — single-owner event loop for all playback state.
///
/// Every input (channel lifecycle and messages, pipeline events, the pull
/// fetch, local HTTP commands, scheduled timers, heartbeat ticks) arrives as
/// a `ReceiverEvent` on one mpsc channel and is handled to completion before
/// the next.  ReceiverCore exclusively owns `PlaybackState`, the playlist and
/// both media pipelines; nothing else commands the background pipeline.
///
/// Load cycle:
///
/// ```text
///   EMPTY ──playlist──▶ LOADING(i) ──settle──▶ (source submitted)
///                          ▲                        │ primary ready
///        NEXT/PREV/JUMP ───┤                        ▼
///        ended, len > 1 ───┴──────────────────── READY(i) ──ended──▶ ENDED(i)
/// ```
///
/// Timers carry the cycle number they were scheduled in.  Entering LOADING
/// bumps the cycle and cancels the pending settle and info-hide tasks, so a
/// late timer from an earlier cycle is a no-op.  Deferred PLAY timers are
/// never cancelled.
use std::time::Duration;

use receiver_proto::config::Config;
use receiver_proto::playlist::{Playlist, PlaylistItem};
use receiver_proto::protocol::{Action, Inbound, Outbound, RawCommand};
use receiver_proto::session::SessionIdentity;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::channel::{ChannelEvent, ChannelHandle, ConnectionStatus};
use crate::heartbeat;
use crate::interpreter::{self, Dispatch};
use crate::overlay::{self, Display, TrackInfo, TRANSITION_FADE};
use crate::pipeline::{MediaPipeline, MediaSource, PipelineEvent, PipelineKind};
use crate::scheduler::{Scheduler, TimerSlot};
use crate::BroadcastMessage;

// ── ReceiverEvent ─────────────────────────────────────────────────────────────

/// All inputs into the ReceiverCore loop.
#[derive(Debug)]
pub enum ReceiverEvent {
    Channel(ChannelEvent),
    Pipeline(PipelineKind, PipelineEvent),
    /// Records from the one-shot pull fetch.
    PlaylistFetched(Vec<Value>),
    /// A command injected by the local HTTP API.
    LocalCommand(RawCommand),
    Timer(Timer),
    HeartbeatTick,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Timer {
    Settle { cycle: u64 },
    HideTrackInfo { cycle: u64 },
    Deferred(Action),
    LayoutRefresh,
}

/// While the primary is playing the host re-lays out its surfaces this often.
const LAYOUT_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

// ── state ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "index", rename_all = "lowercase")]
pub enum Phase {
    Empty,
    Loading(usize),
    Ready(usize),
    Ended(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    /// `None` until the first item is loaded.
    pub current_index: Option<usize>,
    pub captions_on: bool,
    pub video_volume: f32,
    pub bgm_volume: f32,
    pub is_playing: bool,
    pub position: Duration,
}

impl PlaybackState {
    fn from_config(config: &Config) -> Self {
        Self {
            current_index: None,
            captions_on: config.playback.captions,
            video_volume: interpreter::clamp_volume(config.playback.video_volume),
            bgm_volume: interpreter::clamp_volume(config.playback.bgm_volume),
            is_playing: false,
            position: Duration::ZERO,
        }
    }
}

/// Read-only view published after every handled event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiverSnapshot {
    pub phase: Phase,
    pub index: i64,
    pub playlist_len: usize,
    pub title: Option<String>,
    pub captions_on: bool,
    pub video_volume: f32,
    pub bgm_volume: f32,
    pub is_playing: bool,
    pub position_secs: f64,
    pub connection: ConnectionStatus,
    pub room_key: String,
}

// ── ReceiverCore ──────────────────────────────────────────────────────────────

pub struct ReceiverCore {
    identity: SessionIdentity,
    room_key: String,
    settle_delay: Duration,
    primary: Box<dyn MediaPipeline>,
    background: Box<dyn MediaPipeline>,
    channel: ChannelHandle,
    scheduler: Scheduler<ReceiverEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    snapshot_tx: watch::Sender<ReceiverSnapshot>,
    clock: Box<dyn Fn() -> i64 + Send>,
    playlist: Playlist,
    state: PlaybackState,
    phase: Phase,
    connection: ConnectionStatus,
    cycle: u64,
    /// Primary source submitted for the current cycle.
    submitted: bool,
    subtitle_attached: bool,
    /// Background started at READY and not yet stopped by a new LOADING.
    bgm_bound: bool,
    settle: TimerSlot,
    info_hide: TimerSlot,
    layout_refresh: TimerSlot,
}

impl ReceiverCore {
    pub fn new(
        config: &Config,
        identity: SessionIdentity,
        primary: Box<dyn MediaPipeline>,
        background: Box<dyn MediaPipeline>,
        channel: ChannelHandle,
        event_tx: mpsc::Sender<ReceiverEvent>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Self {
        let room_key = identity.room_key();
        let state = PlaybackState::from_config(config);
        let initial = ReceiverSnapshot {
            phase: Phase::Empty,
            index: -1,
            playlist_len: 0,
            title: None,
            captions_on: state.captions_on,
            video_volume: state.video_volume,
            bgm_volume: state.bgm_volume,
            is_playing: false,
            position_secs: 0.0,
            connection: ConnectionStatus::Connecting,
            room_key: room_key.clone(),
        };
        let (snapshot_tx, _) = watch::channel(initial);
        Self {
            identity,
            room_key,
            settle_delay: config.timing.settle_delay(),
            primary,
            background,
            channel,
            scheduler: Scheduler::new(event_tx),
            broadcast_tx,
            snapshot_tx,
            clock: Box::new(|| chrono::Utc::now().timestamp_millis()),
            playlist: Playlist::default(),
            state,
            phase: Phase::Empty,
            connection: ConnectionStatus::Connecting,
            cycle: 0,
            submitted: false,
            subtitle_attached: false,
            bgm_bound: false,
            settle: TimerSlot::default(),
            info_hide: TimerSlot::default(),
            layout_refresh: TimerSlot::default(),
        }
    }

    /// Replace the epoch-millisecond clock used for `startAt` and heartbeats.
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<ReceiverSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Run the core event loop until `Shutdown`, then release both pipelines.
    /// The scheduler holds a sender, so the channel never closes on its own.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<ReceiverEvent>) -> anyhow::Result<()> {
        info!("ReceiverCore: starting event loop for room {}", self.room_key);
        self.start();

        loop {
            match event_rx.recv().await {
                None => {
                    info!("ReceiverCore: event channel closed, shutting down");
                    break;
                }
                Some(ReceiverEvent::Shutdown) => {
                    info!("ReceiverCore: shutdown requested");
                    break;
                }
                Some(evt) => self.handle_event(evt),
            }
        }

        self.cleanup();
        Ok(())
    }

    fn start(&mut self) {
        self.display(Display::RoomIndicator {
            text: overlay::room_indicator(&self.room_key, None),
        });
        self.primary.set_volume(self.state.video_volume);
        self.background.set_volume(self.state.bgm_volume);
        self.publish();
    }

    pub fn handle_event(&mut self, evt: ReceiverEvent) {
        match evt {
            ReceiverEvent::Channel(ChannelEvent::Status(status)) => self.on_connection(status),
            ReceiverEvent::Channel(ChannelEvent::Message { name, data }) => {
                match Inbound::from_event(&name, &data) {
                    Ok(Some(Inbound::SetPlaylist { items })) => self.replace_playlist(&items),
                    Ok(Some(Inbound::Command(raw))) => self.handle_command(raw),
                    Ok(None) => debug!("core: ignoring channel event {}", name),
                    Err(e) => warn!("core: {}", e),
                }
            }
            ReceiverEvent::PlaylistFetched(items) => self.replace_playlist(&items),
            ReceiverEvent::LocalCommand(raw) => self.handle_command(raw),
            ReceiverEvent::Pipeline(PipelineKind::Primary, evt) => self.on_primary(evt),
            ReceiverEvent::Pipeline(PipelineKind::Background, evt) => self.on_background(evt),
            ReceiverEvent::Timer(timer) => self.on_timer(timer),
            ReceiverEvent::HeartbeatTick => self.send_heartbeat(),
            ReceiverEvent::Shutdown => debug!("core: shutdown is handled by run()"),
        }
        self.publish();
    }

    // ── channel ───────────────────────────────────────────────────────────────

    fn on_connection(&mut self, status: ConnectionStatus) {
        info!("core: {}", status.text());
        self.connection = status;
        self.display(Display::Connection {
            status,
            text: status.text(),
        });
        if status == ConnectionStatus::Connected {
            let hello = Outbound::Hello(self.identity.hello());
            if !self.channel.emit(&hello) {
                warn!("core: HELLO not sent");
            }
        }
    }

    fn send_heartbeat(&mut self) {
        if !self.channel.is_connected() {
            return;
        }
        let hb = heartbeat::build(
            (self.clock)(),
            self.state.current_index,
            self.state.is_playing,
            self.state.position,
        );
        self.channel.emit(&Outbound::Heartbeat(hb));
    }

    // ── playlist ──────────────────────────────────────────────────────────────

    fn replace_playlist(&mut self, records: &[Value]) {
        self.playlist = Playlist::from_records(records);
        info!(
            "core: playlist replaced, {} of {} records playable",
            self.playlist.len(),
            records.len()
        );
        if self.state.current_index.is_none() && !self.playlist.is_empty() {
            self.enter_loading(0);
        }
    }

    /// The loaded item, if the current index still points into the playlist.
    fn current_item(&self) -> Option<PlaylistItem> {
        self.state
            .current_index
            .and_then(|i| self.playlist.get(i))
            .cloned()
    }

    // ── commands ──────────────────────────────────────────────────────────────

    fn handle_command(&mut self, raw: RawCommand) {
        match interpreter::interpret(&raw, (self.clock)()) {
            Dispatch::Immediate(action) => {
                info!("core: command {:?}", action);
                self.apply(action);
            }
            Dispatch::Deferred { action, delay } => {
                info!("core: command {:?} deferred by {:?}", action, delay);
                // dropping the token leaves the task running
                let _ = self
                    .scheduler
                    .schedule(delay, ReceiverEvent::Timer(Timer::Deferred(action)));
            }
            Dispatch::Ignored => debug!("core: ignoring command {:?}", raw),
        }
    }

    fn apply(&mut self, action: Action) {
        let current = self.state.current_index.map(|i| i as i64).unwrap_or(-1);
        match action {
            Action::Play => {
                self.primary.play();
                if self.bgm_bound {
                    self.background.play();
                }
            }
            Action::Pause => {
                self.primary.pause();
                if self.bgm_bound {
                    self.background.pause();
                }
            }
            Action::Next => self.jump(current.saturating_add(1)),
            Action::Prev => self.jump(current.saturating_sub(1)),
            Action::JumpToIndex(idx) => self.jump(idx),
            Action::Seek(secs) => self.primary.seek(interpreter::seek_target(secs)),
            Action::SetVideoVolume(v) => {
                self.state.video_volume = interpreter::clamp_volume(v);
                self.primary.set_volume(self.state.video_volume);
            }
            Action::SetBgmVolume(v) => {
                self.state.bgm_volume = interpreter::clamp_volume(v);
                self.background.set_volume(self.state.bgm_volume);
            }
            Action::SetCaptions(on) => self.set_captions(on),
        }
    }

    fn jump(&mut self, requested: i64) {
        match self.playlist.wrap(requested) {
            Some(idx) => self.enter_loading(idx),
            None => debug!("core: playlist empty, nothing to jump to"),
        }
    }

    /// Subtitles are reconfigured in place; the primary source is not reloaded.
    fn set_captions(&mut self, on: bool) {
        self.state.captions_on = on;
        if !self.submitted {
            return;
        }
        let Some(subtitle) = self.current_item().and_then(|item| item.subtitle) else {
            return;
        };
        if on && !self.subtitle_attached {
            self.primary.attach_subtitle(&subtitle);
            self.subtitle_attached = true;
        }
        self.primary.set_subtitle_enabled(on);
    }

    // ── load cycle ────────────────────────────────────────────────────────────

    fn enter_loading(&mut self, idx: usize) {
        self.cycle += 1;
        self.settle.cancel();
        if self.info_hide.is_armed() {
            self.info_hide.cancel();
            self.display(Display::TrackInfoHidden);
        }

        // stop-before-load: the old bed never overlaps the new item
        self.background.stop();
        self.bgm_bound = false;

        self.phase = Phase::Loading(idx);
        self.state.current_index = Some(idx);
        self.state.position = Duration::ZERO;
        self.submitted = false;
        self.subtitle_attached = false;
        info!("core: loading #{} (cycle {})", idx, self.cycle);

        self.display(Display::RoomIndicator {
            text: overlay::room_indicator(&self.room_key, Some((idx, self.playlist.len()))),
        });
        self.display(Display::TransitionShown);

        let token = self.scheduler.schedule(
            self.settle_delay,
            ReceiverEvent::Timer(Timer::Settle { cycle: self.cycle }),
        );
        self.settle.arm(token);
    }

    fn on_settle(&mut self) {
        self.settle.clear();
        let Some(item) = self.current_item() else {
            warn!("core: settle with no item at {:?}", self.state.current_index);
            return;
        };

        let subtitle = item.subtitle.clone().filter(|_| self.state.captions_on);
        self.subtitle_attached = subtitle.is_some();
        let source = MediaSource::new(item.video.clone()).with_subtitle(subtitle);
        debug!("core: submitting {:?}", source);
        self.primary.load(&source);
        self.primary.set_subtitle_enabled(self.state.captions_on);
        self.primary.set_volume(self.state.video_volume);
        self.primary.play();
        self.submitted = true;

        if let Some(ref audio) = item.audio {
            self.background.load(&MediaSource::new(audio.clone()));
            self.background.set_volume(self.state.bgm_volume);
        }

        let info = TrackInfo::for_item(&item);
        let token = self.scheduler.schedule(
            info.duration,
            ReceiverEvent::Timer(Timer::HideTrackInfo { cycle: self.cycle }),
        );
        self.info_hide.arm(token);
        self.display(Display::TrackInfoShown(info));
    }

    fn on_timer(&mut self, timer: Timer) {
        match timer {
            Timer::Settle { cycle } if cycle == self.cycle => self.on_settle(),
            Timer::HideTrackInfo { cycle } if cycle == self.cycle => {
                self.info_hide.clear();
                self.display(Display::TrackInfoHidden);
            }
            Timer::Deferred(action) => {
                info!("core: deferred {:?} due", action);
                self.apply(action);
            }
            Timer::LayoutRefresh => {
                self.layout_refresh.clear();
                if self.state.is_playing {
                    self.display(Display::Refresh);
                    self.arm_layout_refresh();
                }
            }
            stale => debug!("core: stale timer {:?} (cycle {})", stale, self.cycle),
        }
    }

    // ── pipelines ─────────────────────────────────────────────────────────────

    fn on_primary(&mut self, evt: PipelineEvent) {
        match evt {
            PipelineEvent::Ready => match self.phase {
                Phase::Loading(idx) if self.submitted => self.enter_ready(idx),
                _ => debug!("core: primary ready in {:?}, ignored", self.phase),
            },
            PipelineEvent::Ended => {
                if let Phase::Ready(idx) = self.phase {
                    info!("core: #{} ended", idx);
                    self.phase = Phase::Ended(idx);
                    if self.playlist.len() > 1 {
                        self.jump(idx as i64 + 1);
                    }
                }
            }
            PipelineEvent::Error(msg) => {
                warn!("primary pipeline error: {}", msg);
                self.display(Display::Refresh);
            }
            PipelineEvent::VideoSizeChanged => self.display(Display::Refresh),
            PipelineEvent::PlayingChanged(playing) => {
                if playing && !self.state.is_playing {
                    self.display(Display::StatusPillsHidden);
                    self.arm_layout_refresh();
                }
                if !playing {
                    self.layout_refresh.cancel();
                }
                self.state.is_playing = playing;
            }
            PipelineEvent::Position(pos) => self.state.position = pos,
            PipelineEvent::Idle | PipelineEvent::Buffering => {
                debug!("core: primary {:?}", evt);
            }
        }
    }

    fn arm_layout_refresh(&mut self) {
        let token = self
            .scheduler
            .schedule(LAYOUT_REFRESH_INTERVAL, ReceiverEvent::Timer(Timer::LayoutRefresh));
        self.layout_refresh.arm(token);
    }

    /// The only place the background pipeline is started.
    fn enter_ready(&mut self, idx: usize) {
        info!("core: #{} ready", idx);
        self.phase = Phase::Ready(idx);
        self.display(Display::TransitionHidden {
            fade: TRANSITION_FADE,
        });
        if self.current_item().and_then(|item| item.audio).is_some() {
            self.background.play();
            self.bgm_bound = true;
        }
    }

    fn on_background(&mut self, evt: PipelineEvent) {
        match evt {
            PipelineEvent::Error(msg) => warn!("background pipeline error: {}", msg),
            PipelineEvent::Position(_) => {}
            other => debug!("core: background {:?}", other),
        }
    }

    // ── outputs ───────────────────────────────────────────────────────────────

    fn display(&self, decision: Display) {
        debug!("display: {:?}", decision);
        let _ = self.broadcast_tx.send(BroadcastMessage::Display(decision));
    }

    fn snapshot(&self) -> ReceiverSnapshot {
        ReceiverSnapshot {
            phase: self.phase,
            index: self.state.current_index.map(|i| i as i64).unwrap_or(-1),
            playlist_len: self.playlist.len(),
            title: self.current_item().map(|item| item.title),
            captions_on: self.state.captions_on,
            video_volume: self.state.video_volume,
            bgm_volume: self.state.bgm_volume,
            is_playing: self.state.is_playing,
            position_secs: self.state.position.as_secs_f64(),
            connection: self.connection,
            room_key: self.room_key.clone(),
        }
    }

    fn publish(&self) {
        let next = self.snapshot();
        let changed = self.snapshot_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        }
    }

    fn cleanup(&mut self) {
        info!("ReceiverCore: releasing pipelines");
        self.settle.cancel();
        self.info_hide.cancel();
        self.primary.stop();
        self.background.stop();
        self.primary.release();
        self.background.release();
    }
}
