// Daemon configuration.
//
// Config file: `~/.sheetbot/config.toml` (override with `--config`).
// Secrets never live in the file; they come from the environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root directory for sheetbot state: `~/.sheetbot/`.
pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".sheetbot"))
}

/// Path to the default config file: `~/.sheetbot/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

// ── File config ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct BotConfig {
    pub spreadsheet: SpreadsheetConfig,
    pub telegram: TelegramConfig,
    pub refresh: RefreshConfig,
}

impl BotConfig {
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpreadsheetConfig {
    /// Share link (or bare id) of the spreadsheet holding all bot state.
    pub url: Option<String>,
    /// Service account JSON key. Unused when `SHEETBOT_SHEETS_TOKEN` is set.
    pub credentials_path: Option<PathBuf>,
    /// Title of the vocabulary worksheet; every other title is read from it.
    pub i18n_worksheet: String,
}

impl Default for SpreadsheetConfig {
    fn default() -> Self {
        Self { url: None, credentials_path: None, i18n_worksheet: "i18n".into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelegramConfig {
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self { api_base: "https://api.telegram.org".into() }
    }
}

/// Refresh intervals for tables whose schedule is not set in the settings
/// sheet, plus delivery bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RefreshConfig {
    pub switch_interval_sec: u64,
    pub settings_interval_sec: u64,
    /// Used when a `*_update_time` setting is missing or not a number.
    pub default_interval_sec: u64,
    pub delivery_timeout_sec: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            switch_interval_sec: 60,
            settings_interval_sec: 3600,
            default_interval_sec: 3600,
            delivery_timeout_sec: 30,
        }
    }
}

impl RefreshConfig {
    pub fn switch_interval(&self) -> Duration {
        Duration::from_secs(self.switch_interval_sec)
    }

    pub fn settings_interval(&self) -> Duration {
        Duration::from_secs(self.settings_interval_sec)
    }

    pub fn default_interval(&self) -> Duration {
        Duration::from_secs(self.default_interval_sec)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_sec)
    }
}

// ── Environment ────────────────────────────────────────────────────

/// Secrets and log filter read from the environment.
///
/// | Variable | Default |
/// |---|---|
/// | `SHEETBOT_TELEGRAM_TOKEN` | *(required)* |
/// | `SHEETBOT_SHEETS_TOKEN` | *(none: use the service account key)* |
/// | `SHEETBOT_LOG` | `info` |
#[derive(Clone, PartialEq, Eq)]
pub struct EnvConfig {
    pub telegram_token: Option<String>,
    pub sheets_token: Option<String>,
    pub log_filter: String,
}

impl std::fmt::Debug for EnvConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvConfig")
            .field("telegram_token", &self.telegram_token.as_ref().map(|_| "<redacted>"))
            .field("sheets_token", &self.sheets_token.as_ref().map(|_| "<redacted>"))
            .field("log_filter", &self.log_filter)
            .finish()
    }
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let non_empty = |key: &str| env(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            telegram_token: non_empty("SHEETBOT_TELEGRAM_TOKEN"),
            sheets_token: non_empty("SHEETBOT_SHEETS_TOKEN"),
            log_filter: non_empty("SHEETBOT_LOG").unwrap_or_else(|| "info".into()),
        }
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Serialize(e) => write!(f, "config serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env_from_map(
        map: HashMap<&'static str, &'static str>,
    ) -> impl Fn(&str) -> Result<String, std::env::VarError> {
        move |key: &str| map.get(key).map(|v| v.to_string()).ok_or(std::env::VarError::NotPresent)
    }

    #[test]
    fn defaults() {
        let cfg = BotConfig::default();
        assert!(cfg.spreadsheet.url.is_none());
        assert_eq!(cfg.spreadsheet.i18n_worksheet, "i18n");
        assert_eq!(cfg.telegram.api_base, "https://api.telegram.org");
        assert_eq!(cfg.refresh.switch_interval(), Duration::from_secs(60));
        assert_eq!(cfg.refresh.delivery_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let cfg = BotConfig {
            spreadsheet: SpreadsheetConfig {
                url: Some("https://docs.google.com/spreadsheets/d/abc/edit".into()),
                credentials_path: Some(PathBuf::from("/etc/sheetbot/key.json")),
                i18n_worksheet: "i18n_ru".into(),
            },
            telegram: TelegramConfig::default(),
            refresh: RefreshConfig { switch_interval_sec: 15, ..RefreshConfig::default() },
        };
        cfg.save_to(&path).unwrap();
        assert_eq!(BotConfig::load_from(&path).unwrap(), cfg);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let cfg: BotConfig = toml::from_str(
            r#"
[spreadsheet]
url = "1AbC"

[refresh]
delivery_timeout_sec = 5
"#,
        )
        .unwrap();
        assert_eq!(cfg.spreadsheet.url.as_deref(), Some("1AbC"));
        assert_eq!(cfg.spreadsheet.i18n_worksheet, "i18n");
        assert_eq!(cfg.refresh.delivery_timeout_sec, 5);
        assert_eq!(cfg.refresh.settings_interval_sec, 3600);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let result = BotConfig::load_from(&dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[refresh]\nswitch_interval_sec = \"soon\"\n").unwrap();
        assert!(matches!(BotConfig::load_from(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn env_defaults_when_unset() {
        let env = EnvConfig::from_env_fn(env_from_map(HashMap::new()));
        assert!(env.telegram_token.is_none());
        assert!(env.sheets_token.is_none());
        assert_eq!(env.log_filter, "info");
    }

    #[test]
    fn env_reads_secrets_and_ignores_blank_values() {
        let env = EnvConfig::from_env_fn(env_from_map(HashMap::from([
            ("SHEETBOT_TELEGRAM_TOKEN", "123:abc"),
            ("SHEETBOT_SHEETS_TOKEN", "  "),
            ("SHEETBOT_LOG", "sheetbot_daemon=debug"),
        ])));
        assert_eq!(env.telegram_token.as_deref(), Some("123:abc"));
        assert!(env.sheets_token.is_none());
        assert_eq!(env.log_filter, "sheetbot_daemon=debug");
        assert!(!format!("{env:?}").contains("123:abc"));
    }
}
