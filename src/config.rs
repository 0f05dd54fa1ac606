use chrono_tz::Tz;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::onboarding::{ChainTiming, OnboardingConfig};

/// File name of the picture sent with the source question, inside `media_dir`.
const MENU_PHOTO_FILE: &str = "get_to_know_us.png";

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Unknown IANA timezone name.
    InvalidTimezone { name: String, source: chrono_tz::ParseError },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::InvalidTimezone { name, source } => {
                write!(f, "invalid timezone '{}': {}", name, source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::InvalidTimezone { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    telegram_bot_token: String,
    /// Forum supergroup hosting one discussion thread per user.
    group_id: i64,
    /// Directory for state files (logs, database). Defaults to current directory.
    data_dir: Option<String>,
    /// Directory holding the menu picture.
    media_dir: Option<String>,
    #[serde(default = "default_timezone")]
    timezone: String,
    #[serde(default = "default_menu_cooldown_secs")]
    menu_cooldown_secs: u64,
    #[serde(default = "default_menu_pause_secs")]
    menu_pause_secs: u64,
    #[serde(default = "default_greeting_delay_secs")]
    greeting_delay_secs: u64,
    #[serde(default = "default_follow_up_delay_secs")]
    follow_up_delay_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    request_timeout_secs: u64,
    #[serde(default)]
    tgtrack: TgTrackFile,
}

#[derive(Deserialize, Default)]
struct TgTrackFile {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    api_key: String,
}

fn default_timezone() -> String {
    "Europe/Moscow".to_string()
}

fn default_menu_cooldown_secs() -> u64 {
    3
}

fn default_menu_pause_secs() -> u64 {
    3
}

fn default_greeting_delay_secs() -> u64 {
    35
}

fn default_follow_up_delay_secs() -> u64 {
    8
}

fn default_request_timeout_secs() -> u64 {
    5
}

pub struct Config {
    pub telegram_bot_token: String,
    pub group_id: i64,
    /// Directory for state files (logs, database).
    pub data_dir: PathBuf,
    pub media_dir: Option<PathBuf>,
    pub timezone: Tz,
    pub menu_cooldown: Duration,
    pub menu_pause: Duration,
    pub greeting_delay: Duration,
    pub follow_up_delay: Duration,
    pub request_timeout: Duration,
    /// TGTrack API key, present only when tracking is enabled.
    pub tgtrack_api_key: Option<String>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
            ));
        }
        if file.group_id >= 0 {
            return Err(ConfigError::Validation(
                "group_id must be a supergroup id (negative, e.g. -1001234567890)".into(),
            ));
        }
        if file.tgtrack.enabled && file.tgtrack.api_key.trim().is_empty() {
            return Err(ConfigError::Validation("tgtrack.api_key is required when tgtrack is enabled".into()));
        }
        for (name, value) in [
            ("menu_cooldown_secs", file.menu_cooldown_secs),
            ("greeting_delay_secs", file.greeting_delay_secs),
            ("follow_up_delay_secs", file.follow_up_delay_secs),
            ("request_timeout_secs", file.request_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation(format!("{name} must be positive")));
            }
        }

        let timezone = file
            .timezone
            .parse::<Tz>()
            .map_err(|e| ConfigError::InvalidTimezone { name: file.timezone.clone(), source: e })?;

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            telegram_bot_token: file.telegram_bot_token,
            group_id: file.group_id,
            data_dir,
            media_dir: file.media_dir.map(PathBuf::from),
            timezone,
            menu_cooldown: Duration::from_secs(file.menu_cooldown_secs),
            menu_pause: Duration::from_secs(file.menu_pause_secs),
            greeting_delay: Duration::from_secs(file.greeting_delay_secs),
            follow_up_delay: Duration::from_secs(file.follow_up_delay_secs),
            request_timeout: Duration::from_secs(file.request_timeout_secs),
            tgtrack_api_key: file.tgtrack.enabled.then_some(file.tgtrack.api_key),
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("conversations.db")
    }

    pub fn onboarding(&self) -> OnboardingConfig {
        OnboardingConfig {
            group_chat_id: self.group_id,
            menu_cooldown: self.menu_cooldown,
            menu_pause: self.menu_pause,
            menu_photo: self.media_dir.as_ref().map(|dir| dir.join(MENU_PHOTO_FILE)),
            request_timeout: self.request_timeout,
            timezone: self.timezone,
            timing: ChainTiming {
                greeting_delay: self.greeting_delay,
                follow_up_delay: self.follow_up_delay,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_valid_config_defaults() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdefGHIjklMNOpqrsTUVwxyz",
            "group_id": -1001234567890
        }"#);
        let config = Config::load(file.path()).expect("should load valid config");
        assert_eq!(config.group_id, -1001234567890);
        assert_eq!(config.data_dir, PathBuf::from("."));
        assert_eq!(config.timezone, chrono_tz::Europe::Moscow);
        assert_eq!(config.menu_cooldown, Duration::from_secs(3));
        assert_eq!(config.greeting_delay, Duration::from_secs(35));
        assert_eq!(config.follow_up_delay, Duration::from_secs(8));
        assert!(config.tgtrack_api_key.is_none());

        let onboarding = config.onboarding();
        assert!(onboarding.menu_photo.is_none());
        assert_eq!(onboarding.timing.greeting_delay, Duration::from_secs(35));
    }

    #[test]
    fn test_full_config() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "group_id": -100500,
            "data_dir": "/var/lib/onboardbot",
            "media_dir": "/srv/media",
            "timezone": "Asia/Almaty",
            "menu_pause_secs": 0,
            "greeting_delay_secs": 60,
            "tgtrack": { "enabled": true, "api_key": "secret" }
        }"#);
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.timezone, chrono_tz::Asia::Almaty);
        assert_eq!(config.tgtrack_api_key.as_deref(), Some("secret"));
        assert_eq!(config.database_path(), PathBuf::from("/var/lib/onboardbot/conversations.db"));

        let onboarding = config.onboarding();
        assert!(onboarding.menu_pause.is_zero());
        assert_eq!(onboarding.menu_photo, Some(PathBuf::from("/srv/media").join(MENU_PHOTO_FILE)));
        assert_eq!(onboarding.timing.greeting_delay, Duration::from_secs(60));
    }

    #[test]
    fn test_disabled_tracking_ignores_key() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "group_id": -100,
            "tgtrack": { "enabled": false, "api_key": "secret" }
        }"#);
        assert!(Config::load(file.path()).unwrap().tgtrack_api_key.is_none());
    }

    #[test]
    fn test_empty_token() {
        let file = write_config(r#"{ "telegram_bot_token": "", "group_id": -100 }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("telegram_bot_token"));
    }

    #[test]
    fn test_invalid_token_format() {
        for token in ["invalid_token_no_colon", "notanumber:ABCdef", "123456789:"] {
            let file = write_config(&format!(r#"{{ "telegram_bot_token": "{token}", "group_id": -100 }}"#));
            let err = assert_err(Config::load(file.path()));
            assert!(matches!(err, ConfigError::Validation(_)), "token {token:?}");
        }
    }

    #[test]
    fn test_positive_group_id() {
        let file = write_config(r#"{ "telegram_bot_token": "123456789:ABCdef", "group_id": 42 }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("group_id"));
    }

    #[test]
    fn test_tracking_without_key() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "group_id": -100,
            "tgtrack": { "enabled": true }
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("tgtrack"));
    }

    #[test]
    fn test_zero_delay_rejected() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "group_id": -100,
            "follow_up_delay_secs": 0
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("follow_up_delay_secs"));
    }

    #[test]
    fn test_invalid_timezone() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "group_id": -100,
            "timezone": "Mars/Olympus"
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::InvalidTimezone { .. }));
    }

    #[test]
    fn test_missing_group_id() {
        let file = write_config(r#"{ "telegram_bot_token": "123456789:ABCdef" }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::load("/nonexistent/path/config.json"));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }
}
