//! Process-wide configuration, loaded once at start-up (spec §6, §9).
//!
//! Every component is handed a [`SupervisorSettings`] by value; no component
//! reads the environment again after construction.

use std::time::Duration;

/// Absolute ceiling on the hard timeout, regardless of caller overrides
/// (spec §4.A).
pub const MAX_HARD_TIMEOUT_SECS: u64 = 3600;

/// Absolute ceiling on `max_iterations` (spec §4.E).
pub const MAX_ITERATIONS_CEILING: u32 = 25;

/// Settings governing the Agent Execution Supervisor.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorSettings {
    pub cursor_cli_path: String,
    pub cursor_cli_use_pty: PtyMode,
    pub cursor_cli_timeout_ms: u64,
    pub cursor_cli_idle_timeout_ms: u64,
    pub cursor_cli_max_output_size: usize,
    pub cursor_cli_max_concurrent: usize,
    pub max_iterations: u32,
    pub webhook_secret: Option<String>,
    pub callback_base_url: String,
    pub redis_url: Option<String>,
    pub redis_key_prefix: String,
    pub ttl_seconds: u64,
}

/// Whether the supervisor should prefer a pseudoterminal for the main pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtyMode {
    Auto,
    ForceOn,
    ForceOff,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            cursor_cli_path: "cursor".to_string(),
            cursor_cli_use_pty: PtyMode::Auto,
            cursor_cli_timeout_ms: 300_000,
            cursor_cli_idle_timeout_ms: 300_000,
            cursor_cli_max_output_size: 10 * 1024 * 1024,
            cursor_cli_max_concurrent: 5,
            max_iterations: 5,
            webhook_secret: None,
            callback_base_url: "http://app:3000".to_string(),
            redis_url: None,
            redis_key_prefix: String::new(),
            ttl_seconds: 3600,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config validation error: {0}")]
    Validation(String),
}

impl SupervisorSettings {
    /// Load settings from environment variables, falling back to defaults
    /// for anything unset. Mirrors the table in spec §6.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Ok(v) = std::env::var("CURSOR_CLI_PATH") {
            settings.cursor_cli_path = v;
        }
        if let Ok(v) = std::env::var("CURSOR_CLI_USE_PTY") {
            settings.cursor_cli_use_pty = match v.to_ascii_lowercase().as_str() {
                "true" | "1" | "on" => PtyMode::ForceOn,
                "false" | "0" | "off" => PtyMode::ForceOff,
                _ => PtyMode::Auto,
            };
        }
        if let Ok(v) = env_u64("CURSOR_CLI_TIMEOUT_MS") {
            settings.cursor_cli_timeout_ms = v;
        }
        if let Ok(v) = env_u64("CURSOR_CLI_IDLE_TIMEOUT_MS") {
            settings.cursor_cli_idle_timeout_ms = v;
        }
        if let Ok(v) = env_u64("CURSOR_CLI_MAX_OUTPUT_SIZE") {
            settings.cursor_cli_max_output_size = v as usize;
        }
        if let Ok(v) = env_u64("CURSOR_CLI_MAX_CONCURRENT") {
            settings.cursor_cli_max_concurrent = v as usize;
        }
        if let Ok(v) = env_u64("MAX_ITERATIONS") {
            settings.max_iterations = v as u32;
        }
        if let Ok(v) = std::env::var("WEBHOOK_SECRET") {
            if !v.is_empty() {
                settings.webhook_secret = Some(v);
            }
        }
        if let Ok(v) = std::env::var("CALLBACK_BASE_URL") {
            settings.callback_base_url = v;
        }
        if let Ok(v) = std::env::var("REDIS_URL") {
            if !v.is_empty() {
                settings.redis_url = Some(v);
            }
        }
        if let Ok(v) = std::env::var("REDIS_KEY_PREFIX") {
            settings.redis_key_prefix = v;
        }
        if let Ok(v) = env_u64("TTL_SECONDS") {
            settings.ttl_seconds = v;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cursor_cli_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "cursor_cli_timeout_ms must be > 0".into(),
            ));
        }
        if self.hard_timeout_ceiling().as_secs() > MAX_HARD_TIMEOUT_SECS {
            return Err(ConfigError::Validation(format!(
                "cursor_cli_timeout_ms must not exceed {MAX_HARD_TIMEOUT_SECS}s"
            )));
        }
        if self.cursor_cli_idle_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "cursor_cli_idle_timeout_ms must be > 0".into(),
            ));
        }
        if self.cursor_cli_max_output_size == 0 {
            return Err(ConfigError::Validation(
                "cursor_cli_max_output_size must be > 0".into(),
            ));
        }
        if self.cursor_cli_max_concurrent == 0 {
            return Err(ConfigError::Validation(
                "cursor_cli_max_concurrent must be > 0".into(),
            ));
        }
        if self.max_iterations == 0 || self.max_iterations > MAX_ITERATIONS_CEILING {
            return Err(ConfigError::Validation(format!(
                "max_iterations must be in 1..={MAX_ITERATIONS_CEILING}"
            )));
        }
        Ok(())
    }

    pub fn hard_timeout(&self) -> Duration {
        Duration::from_millis(self.cursor_cli_timeout_ms)
    }

    fn hard_timeout_ceiling(&self) -> Duration {
        Duration::from_millis(self.cursor_cli_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.cursor_cli_idle_timeout_ms)
    }

    /// Clamp a caller-requested hard-timeout override to the absolute
    /// ceiling (spec §4.A, §5).
    pub fn clamp_hard_timeout(&self, override_ms: Option<u64>) -> Duration {
        let ms = override_ms.unwrap_or(self.cursor_cli_timeout_ms);
        let ceiling_ms = MAX_HARD_TIMEOUT_SECS * 1000;
        Duration::from_millis(ms.min(ceiling_ms))
    }

    /// Clamp a caller-requested iteration override to the absolute ceiling.
    pub fn clamp_max_iterations(&self, override_value: Option<u32>) -> u32 {
        override_value
            .unwrap_or(self.max_iterations)
            .clamp(1, MAX_ITERATIONS_CEILING)
    }
}

fn env_u64(key: &str) -> Result<u64, std::env::VarError> {
    std::env::var(key).map(|v| v.parse::<u64>().unwrap_or_default())
}
