use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for selecting specific audio devices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AudioDeviceConfig {
    /// Identifier of the preferred audio input device.
    pub selected_input_device_id: Option<String>,
    /// Identifier of the preferred audio output device.
    pub selected_output_device_id: Option<String>,
}

/// Timing and buffering parameters of a live session.
///
/// Every duration is stored in milliseconds so the file stays readable.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineTuning {
    /// Cumulative audio that must be buffered before the first playback.
    pub pre_roll_threshold_ms: u64,
    /// Delay between a pre-roll flush and the start of the batch.
    pub pre_roll_offset_ms: u64,
    /// Minimal distance between "now" and a steady-state schedule time.
    pub schedule_epsilon_ms: u64,
    /// How long playback must stay silent before the agent stops "speaking".
    pub speaking_grace_ms: u64,
    /// Silence after which the agent is nudged to continue.
    pub idle_threshold_ms: u64,
    /// How often the idle condition is checked.
    pub idle_check_interval_ms: u64,
    /// How often remaining credit is compared to the last persisted value.
    pub credit_sync_interval_ms: u64,
    /// Reconnect attempts allowed after an unexpected close.
    pub max_retries: u32,
    /// Backoff unit; attempt `n` waits `n` units.
    pub retry_backoff_ms: u64,
    /// Upper bound for the transport handshake.
    pub connect_timeout_ms: u64,
    /// How often playback completion is polled.
    pub playback_poll_ms: u64,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            pre_roll_threshold_ms: 1000,
            pre_roll_offset_ms: 100,
            schedule_epsilon_ms: 10,
            speaking_grace_ms: 500,
            idle_threshold_ms: 8000,
            idle_check_interval_ms: 1000,
            credit_sync_interval_ms: 15_000,
            max_retries: 5,
            retry_backoff_ms: 1000,
            connect_timeout_ms: 10_000,
            playback_poll_ms: 20,
        }
    }
}

impl EngineTuning {
    pub fn pre_roll_threshold(&self) -> Duration {
        Duration::from_millis(self.pre_roll_threshold_ms)
    }

    pub fn pre_roll_offset(&self) -> Duration {
        Duration::from_millis(self.pre_roll_offset_ms)
    }

    pub fn schedule_epsilon(&self) -> Duration {
        Duration::from_millis(self.schedule_epsilon_ms)
    }

    pub fn speaking_grace(&self) -> Duration {
        Duration::from_millis(self.speaking_grace_ms)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_millis(self.idle_threshold_ms)
    }

    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_millis(self.idle_check_interval_ms)
    }

    pub fn credit_sync_interval(&self) -> Duration {
        Duration::from_millis(self.credit_sync_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn playback_poll(&self) -> Duration {
        Duration::from_millis(self.playback_poll_ms)
    }
}

/// Endpoints of the remote services. Secrets are never stored here; they
/// come from the environment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Websocket endpoint of the live conversation service.
    pub live_endpoint: String,
    /// Model used for the live conversation.
    pub live_model: String,
    /// Base REST endpoint used for transcript evaluation.
    pub evaluation_endpoint: String,
    /// Evaluation models, tried in order.
    pub evaluation_models: Vec<String>,
    /// Base URL of the profile store. Persistence is disabled when empty.
    pub supabase_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            live_endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
            live_model: "models/gemini-2.5-flash-native-audio-preview-12-2025".to_string(),
            evaluation_endpoint: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
            evaluation_models: vec![
                "gemini-2.5-flash".to_string(),
                "gemini-1.5-flash-latest".to_string(),
                "gemini-1.5-flash".to_string(),
            ],
            supabase_url: String::new(),
        }
    }
}

/// The practicing user's profile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Identifier of the user in the profile store.
    pub user_id: Option<String>,
    /// Name the conversation partner addresses the user by.
    pub display_name: Option<String>,
    /// Credit balance used when the profile store cannot be reached.
    pub credits_remaining_minutes: u32,
    /// Persona picked when a session is started without one.
    pub default_persona: String,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            display_name: None,
            credits_remaining_minutes: 0,
            default_persona: "Léo".to_string(),
        }
    }
}

/// Global application configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Maximum log level (`error`, `warn`, `info`, `debug`, `trace`).
    pub log_level: String,
    /// Configuration for audio devices for the host.
    pub audio_device_config: AudioDeviceConfig,
    /// Session timing parameters.
    pub engine: EngineTuning,
    /// Remote service endpoints.
    pub api: ApiConfig,
    /// The practicing user.
    pub profile: ProfileConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            audio_device_config: AudioDeviceConfig::default(),
            engine: EngineTuning::default(),
            api: ApiConfig::default(),
            profile: ProfileConfig::default(),
        }
    }
}
