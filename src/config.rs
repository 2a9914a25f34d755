//! Configuration and settings management
//!
//! Loads settings from environment variables and defines service constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub telegram_token: String,

    /// Telegram ID of the operator (admin broadcast, feedback recipient)
    pub dev_user_id: i64,

    /// Vision analysis endpoint URL
    pub vision_url: String,
    /// Vision analysis subscription key
    pub vision_token: String,
    /// Face-emotion endpoint URL
    pub emotion_url: String,
    /// Face-emotion subscription key
    pub emotion_token: String,
    /// Speech-to-text endpoint URL
    pub speech_url: String,
    /// Speech-to-text subscription key
    pub speech_token: String,

    /// Deliver feedback by email instead of logging it
    #[serde(default)]
    pub email_feedback: bool,
    /// Sender/recipient address for feedback mail
    pub feedback_email: Option<String>,
    /// SMTP password for the feedback address
    pub feedback_email_password: Option<String>,
    /// SMTP relay host for feedback mail
    pub smtp_host: Option<String>,

    /// TrueType font used for face annotation labels
    #[serde(default = "default_font_path")]
    pub font_path: String,
}

fn default_font_path() -> String {
    "assets/DejaVuSans.ttf".to_string()
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails or mandatory keys are absent.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(File::with_name("config/default").required(false))
            // Add in the current environment file
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Add in a local configuration file
            // This file shouldn't be checked into git
            .add_source(File::with_name("config/local").required(false))
            // Add in settings from the environment (with a prefix of APP)
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Also add settings from environment variables directly (without prefix)
            // ignore_empty treats empty env vars as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        s.try_deserialize()
    }

    /// Whether the given Telegram user is the operator
    #[must_use]
    pub fn is_operator(&self, user_id: i64) -> bool {
        user_id == self.dev_user_id
    }
}

/// Byte ceiling for images submitted to the analysis services.
/// Applied to every image intake path (document, photo, URL).
pub const ANALYSIS_IMAGE_SIZE_LIMIT: u64 = 4_000_000;

/// Byte ceiling for generic artifact downloads (audio).
pub const DOWNLOAD_SIZE_LIMIT: u64 = 20_000_000;

/// Maximum retries for a rate-limited (429) analysis call
pub const SERVICE_MAX_RETRIES: u32 = 3;
/// Fixed delay between rate-limited retries
pub const SERVICE_RETRY_DELAY_MS: u64 = 1000;

// Telegram API retry configuration (file downloads, sends)
/// Initial backoff delay for Telegram API retries
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Maximum backoff delay for Telegram API retries
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
/// Maximum attempts for Telegram API retries
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;

/// Clip-art classes returned by the vision service, indexed by `clipArtType`
pub const CLIP_ART_TYPES: [&str; 4] =
    ["non-clip-art", "ambiguous", "normal-clip-art", "good-clip-art"];

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_settings() -> Settings {
        Settings {
            telegram_token: "dummy".to_string(),
            dev_user_id: 42,
            vision_url: String::new(),
            vision_token: String::new(),
            emotion_url: String::new(),
            emotion_token: String::new(),
            speech_url: String::new(),
            speech_token: String::new(),
            email_feedback: false,
            feedback_email: None,
            feedback_email_password: None,
            smtp_host: None,
            font_path: default_font_path(),
        }
    }

    #[test]
    fn test_operator_check() {
        let settings = dummy_settings();
        assert!(settings.is_operator(42));
        assert!(!settings.is_operator(43));
    }

    #[test]
    fn test_default_font_path() {
        assert_eq!(dummy_settings().font_path, "assets/DejaVuSans.ttf");
    }
}
