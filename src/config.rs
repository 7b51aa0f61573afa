//! Configuration for the voice client
//!
//! Provides centralized configuration for all components. Every field has a
//! default, so an empty TOML file is a valid configuration.

use crate::audio::encoder::ContainerFormat;
use crate::{Result, VoxError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Remote agent endpoints and credentials
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP base used for the voice list
    pub api_base: String,

    /// WebSocket base; derived from `api_base` when unset
    pub ws_base: Option<String>,

    /// Opaque credential passed as `authorization=Bearer <token>`
    pub token: Option<String>,

    /// Voice to use instead of the first one listed
    pub voice_id: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000".to_string(),
            ws_base: None,
            token: None,
            voice_id: None,
        }
    }
}

impl ServerConfig {
    /// WebSocket base URL, `http` becomes `ws` and `https` becomes `wss`
    pub fn ws_base(&self) -> String {
        if let Some(ws) = &self.ws_base {
            return ws.trim_end_matches('/').to_string();
        }
        let api = self.api_base.trim_end_matches('/');
        if let Some(rest) = api.strip_prefix("https") {
            format!("wss{}", rest)
        } else if let Some(rest) = api.strip_prefix("http") {
            format!("ws{}", rest)
        } else {
            api.to_string()
        }
    }
}

/// Voice activity detection parameters
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VadConfig {
    /// Level (dBFS) above which the signal counts as voice
    pub threshold_db: f32,

    /// Sustained time above threshold before voice-start is accepted
    pub debounce_ms: u64,

    /// Sampling cadence of the level meter
    pub sample_interval_ms: u64,

    /// Amount of most recent audio the level is computed over
    pub window_ms: u64,

    /// Detect user speech while a reply is playing
    pub barge_in: bool,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold_db: -42.0,
            debounce_ms: 200,
            sample_interval_ms: 50,
            window_ms: 50,
            barge_in: true,
        }
    }
}

impl VadConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

/// Durations of the four session timers
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimerConfig {
    /// Silence needed to close an open segment
    pub silence_confirm_ms: u64,

    /// Silence while listening before a long-silence notice
    pub long_silence_ms: u64,

    /// Hard cap on one segment, kept below `inactivity_ms`
    pub max_speaking_ms: u64,

    /// Session ends when no voice starts for this long
    pub inactivity_ms: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            silence_confirm_ms: 350,
            long_silence_ms: 10_000,
            max_speaking_ms: 20_000,
            inactivity_ms: 30_000,
        }
    }
}

/// Segment capture parameters
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Encoded segments smaller than this are dropped as noise
    pub min_segment_bytes: usize,

    /// Pause between a flush and re-arming the recorder
    pub rearm_delay_ms: u64,

    /// Audio kept from before voice-start
    pub pre_roll_ms: u64,

    /// Upload sample rate; 0 keeps the device rate
    pub target_sample_rate: u32,

    /// Container preference order, first supported wins
    pub formats: Vec<ContainerFormat>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            min_segment_bytes: 4096,
            rearm_delay_ms: 150,
            pre_roll_ms: 300,
            target_sample_rate: 16_000,
            formats: ContainerFormat::default_preferences(),
        }
    }
}

impl CaptureConfig {
    pub fn rearm_delay(&self) -> Duration {
        Duration::from_millis(self.rearm_delay_ms)
    }

    pub fn pre_roll(&self) -> Duration {
        Duration::from_millis(self.pre_roll_ms)
    }
}

/// Playback queue parameters
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Replies waiting behind the one playing before a backlog warning
    pub backlog_warning: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self { backlog_warning: 32 }
    }
}

/// Configuration for the complete client
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VoiceConfig {
    pub server: ServerConfig,
    pub vad: VadConfig,
    pub timers: TimerConfig,
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
}

impl VoiceConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: VoiceConfig = toml::from_str(text)
            .map_err(|e| VoxError::ConfigError(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        info!("Loaded config from {}", path.display());
        Self::from_toml(&text)
    }

    /// Load `path` if given, else the per-user config file if present, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// `<config dir>/voxloop/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("voxloop").join("config.toml"))
    }

    /// Set the HTTP base URL
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.server.api_base = api_base.into();
        self
    }

    /// Set the credential token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.server.token = Some(token.into());
        self
    }

    /// Select a voice explicitly
    pub fn with_voice(mut self, voice_id: u64) -> Self {
        self.server.voice_id = Some(voice_id);
        self
    }

    /// Set the VAD threshold in dBFS
    pub fn with_threshold_db(mut self, threshold_db: f32) -> Self {
        self.vad.threshold_db = threshold_db;
        self
    }

    /// Disable barge-in (VAD is paused while replies play)
    pub fn without_barge_in(mut self) -> Self {
        self.vad.barge_in = false;
        self
    }

    /// Disable the pre-roll so segments hold only post voice-start audio
    pub fn without_pre_roll(mut self) -> Self {
        self.capture.pre_roll_ms = 0;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.vad.sample_interval_ms == 0 {
            return Err(VoxError::ConfigError(
                "vad.sample_interval_ms must be greater than 0".into(),
            ));
        }
        if self.vad.window_ms == 0 {
            return Err(VoxError::ConfigError(
                "vad.window_ms must be greater than 0".into(),
            ));
        }
        let t = &self.timers;
        if t.silence_confirm_ms == 0
            || t.long_silence_ms == 0
            || t.max_speaking_ms == 0
            || t.inactivity_ms == 0
        {
            return Err(VoxError::ConfigError("timer durations must be greater than 0".into()));
        }
        if t.silence_confirm_ms >= t.long_silence_ms {
            return Err(VoxError::ConfigError(format!(
                "timers.silence_confirm_ms ({}) must be shorter than timers.long_silence_ms ({})",
                t.silence_confirm_ms, t.long_silence_ms
            )));
        }
        if t.max_speaking_ms >= t.inactivity_ms {
            return Err(VoxError::ConfigError(format!(
                "timers.max_speaking_ms ({}) must be shorter than timers.inactivity_ms ({})",
                t.max_speaking_ms, t.inactivity_ms
            )));
        }
        if self.vad.debounce_ms >= t.long_silence_ms {
            return Err(VoxError::ConfigError(format!(
                "vad.debounce_ms ({}) must be shorter than timers.long_silence_ms ({})",
                self.vad.debounce_ms, t.long_silence_ms
            )));
        }
        if self.capture.formats.is_empty() {
            return Err(VoxError::ConfigError("capture.formats must not be empty".into()));
        }
        if self.playback.backlog_warning == 0 {
            return Err(VoxError::ConfigError(
                "playback.backlog_warning must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
