use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;
use super::session::SessionIdentity;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub mpv: MpvConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// Persisted receiver identity.  The host turns this into a
/// [`SessionIdentity`]; the playback core never reads it directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_company_name")]
    pub company_name: String,
    #[serde(default = "default_secret_code")]
    pub secret_code: String,
    #[serde(default = "default_channel_url")]
    pub channel_url: String,
    /// Pull-fetch endpoint; empty disables the one-shot fetch.
    #[serde(default)]
    pub api_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Retry delay after the channel URL itself failed to parse.
    #[serde(default = "default_failed_url_retry_ms")]
    pub failed_url_retry_ms: u64,
    /// Upper bound on the wait for the Engine.IO open and namespace ack.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Pause between showing the transition overlay and submitting the new
    /// source to the primary pipeline.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_video_volume")]
    pub video_volume: f32,
    #[serde(default = "default_bgm_volume")]
    pub bgm_volume: f32,
    #[serde(default = "default_captions")]
    pub captions: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpvConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_fullscreen")]
    pub fullscreen: bool,
    /// Extra arguments for the primary (video) mpv process.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            company_name: default_company_name(),
            secret_code: default_secret_code(),
            channel_url: default_channel_url(),
            api_url: String::new(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            failed_url_retry_ms: default_failed_url_retry_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            video_volume: default_video_volume(),
            bgm_volume: default_bgm_volume(),
            captions: default_captions(),
        }
    }
}

impl Default for MpvConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            fullscreen: default_fullscreen(),
            extra_args: Vec::new(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

fn default_company_name() -> String {
    "default".to_string()
}

fn default_secret_code() -> String {
    "room".to_string()
}

fn default_channel_url() -> String {
    "wss://api.curizm.io".to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    2000
}

fn default_reconnect_delay_ms() -> u64 {
    1500
}

fn default_failed_url_retry_ms() -> u64 {
    2000
}

fn default_handshake_timeout_ms() -> u64 {
    20_000
}

fn default_settle_delay_ms() -> u64 {
    100
}

fn default_video_volume() -> f32 {
    1.0
}

fn default_bgm_volume() -> f32 {
    0.25
}

fn default_captions() -> bool {
    true
}

fn default_user_agent() -> String {
    "CurizmTV/1.0".to_string()
}

fn default_fullscreen() -> bool {
    true
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

impl SessionConfig {
    pub fn identity(&self) -> SessionIdentity {
        SessionIdentity::new(
            self.company_name.clone(),
            self.secret_code.clone(),
            self.channel_url.clone(),
            Some(self.api_url.clone()),
        )
    }
}

impl TimingConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn failed_url_retry(&self) -> Duration {
        Duration::from_millis(self.failed_url_retry_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    /// `RECEIVER_CONFIG` overrides the default location.
    pub fn config_path() -> PathBuf {
        std::env::var_os("RECEIVER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| platform::config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.timing.heartbeat_interval_ms, 2000);
        assert_eq!(config.timing.reconnect_delay_ms, 1500);
        assert_eq!(config.playback.bgm_volume, 0.25);
        assert!(config.playback.captions);
        assert!(config.session.channel_url.starts_with("wss://"));
        assert!(config.session.identity().api_url.is_none());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [session]
            company_name = "Acme"
            secret_code = "Hall"
            api_url = "https://api.example.com/playlist"

            [timing]
            reconnect_delay_ms = 2000
            "#,
        )
        .unwrap();
        let identity = config.session.identity();
        assert_eq!(identity.room_key(), "acme__hall");
        assert!(identity.api_url.is_some());
        assert_eq!(config.timing.reconnect_delay(), Duration::from_secs(2));
        assert_eq!(config.timing.settle_delay_ms, 100);
        assert_eq!(config.timing.handshake_timeout_ms, 20_000);
        assert_eq!(config.http.port, 8990);
    }
}
