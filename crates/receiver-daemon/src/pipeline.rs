//! Media pipeline capability boundary.
//!
//! The coordinator drives two instances of [`MediaPipeline`]: the primary
//! (video + subtitles) and the background (looping audio bed).  Every call
//! returns immediately; completion and state changes come back as
//! [`PipelineEvent`]s through the core event loop.
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    Primary,
    Background,
}

impl PipelineKind {
    /// Short name used for IPC endpoints and log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::Primary => "video",
            PipelineKind::Background => "bgm",
        }
    }
}

/// What gets submitted to a pipeline on load.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaSource {
    pub uri: String,
    pub subtitle: Option<String>,
}

impl MediaSource {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            subtitle: None,
        }
    }

    pub fn with_subtitle(mut self, subtitle: Option<String>) -> Self {
        self.subtitle = subtitle;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Idle,
    Buffering,
    /// Buffered and able to render.
    Ready,
    /// Reached the end of the loaded media.
    Ended,
    Error(String),
    VideoSizeChanged,
    /// Whether media is actively playing (loaded, unpaused, not stalled).
    PlayingChanged(bool),
    Position(Duration),
}

pub trait MediaPipeline: Send {
    /// Replace the current media.  The pipeline stays paused until `play`.
    fn load(&mut self, source: &MediaSource);
    fn play(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);
    fn seek(&mut self, position: Duration);
    /// 0.0..=1.0
    fn set_volume(&mut self, volume: f32);
    fn set_subtitle_enabled(&mut self, enabled: bool);
    /// Add and select a subtitle track on the loaded media without reloading it.
    fn attach_subtitle(&mut self, uri: &str);
    /// Tear down the underlying engine.  No further calls follow.
    fn release(&mut self) {}
}
