use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chatorbit_core::{DEFAULT_MAX_MESSAGE_LENGTH, DEFAULT_PIN_THRESHOLD};
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::urls::normalize_api_base;

pub const DEFAULT_API_BASE: &str = "http://localhost:8089";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const SETTINGS_DIRECTORY_NAME: &str = "chatorbit";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "CHATORBIT_";

/// What happens after the push subscription closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum ReconnectSettings {
    /// A closed connection stays closed until the room view is recreated.
    #[default]
    Never,
    Fixed { delay_ms: u64, max_attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
    #[serde(default = "default_pin_threshold")]
    pub pin_threshold_px: f32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub reconnect: ReconnectSettings,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            max_message_length: default_max_message_length(),
            pin_threshold_px: default_pin_threshold(),
            request_timeout_secs: default_request_timeout_secs(),
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl ClientSettings {
    pub fn normalized(mut self) -> Self {
        self.api_base = normalize_api_base(&self.api_base);
        if self.api_base.is_empty() {
            self.api_base = default_api_base();
        }
        if self.max_message_length == 0 {
            self.max_message_length = default_max_message_length();
        }
        if !self.pin_threshold_px.is_finite() || self.pin_threshold_px < 0.0 {
            self.pin_threshold_px = default_pin_threshold();
        }
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = default_request_timeout_secs();
        }

        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Layers defaults, an optional JSON file, then `CHATORBIT_*` variables.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
    }
}

/// Process-wide settings with lock-free reads.
pub struct SettingsStore {
    settings: Arc<ArcSwap<ClientSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".chatorbit"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn settings(&self) -> Arc<ClientSettings> {
        self.settings.load_full()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Stores `api_base` as the default for later runs and returns the updated settings.
    ///
    /// Only the `api_base` key of the settings file is rewritten; other keys in the
    /// file are kept and values that came from the environment are not written back.
    pub fn remember_api_base(&self, api_base: &str) -> Result<Arc<ClientSettings>, SettingsError> {
        let api_base = normalize_api_base(api_base);
        if api_base.is_empty() {
            return EmptyApiBaseSnafu {
                stage: "validate-api-base",
            }
            .fail();
        }

        let mut file = self.read_file_layer()?;
        file.insert("api_base".into(), serde_json::Value::String(api_base.clone()));
        self.write_file_layer(&file)?;

        let current = self.settings.load();
        let updated = Arc::new(ClientSettings {
            api_base,
            ..ClientSettings::clone(&current)
        });
        self.settings.store(Arc::clone(&updated));
        tracing::info!(
            path = ?self.config_path,
            api_base = %updated.api_base,
            "remembered api base"
        );
        Ok(updated)
    }

    fn load_from_disk(path: &Path) -> ClientSettings {
        if !path.exists() {
            tracing::info!(path = ?path, "settings file not found, using defaults and environment");
        }

        match ClientSettings::figment(path).extract::<ClientSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    path = ?path,
                    error = %error,
                    "failed to parse settings, using defaults"
                );
                ClientSettings::default()
            }
        }
    }

    fn read_file_layer(&self) -> Result<serde_json::Map<String, serde_json::Value>, SettingsError> {
        let content = match std::fs::read_to_string(&self.config_path) {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(serde_json::Map::new());
            }
            Err(source) => {
                return Err(source).context(ReadFileSnafu {
                    stage: "read-settings-file",
                    path: self.config_path.clone(),
                });
            }
        };
        if content.trim().is_empty() {
            return Ok(serde_json::Map::new());
        }

        serde_json::from_str(&content).context(ParseFileSnafu {
            stage: "parse-settings-file",
            path: self.config_path.clone(),
        })
    }

    fn write_file_layer(
        &self,
        file: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(file).context(SerializeFileSnafu {
            stage: "serialize-settings-file",
        })?;

        // Write beside the target, then swap it in.
        let staged = self.config_path.with_extension("json.tmp");
        std::fs::write(&staged, content).context(WriteFileSnafu {
            stage: "write-staged-settings-file",
            path: staged.clone(),
        })?;
        std::fs::rename(&staged, &self.config_path).context(ReplaceFileSnafu {
            stage: "replace-settings-file",
            path: self.config_path.clone(),
        })
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("refusing to save a blank api base on `{stage}`"))]
    EmptyApiBase { stage: &'static str },
    #[snafu(display("failed to read settings file at {path:?} on `{stage}`: {source}"))]
    ReadFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("settings file at {path:?} is not a JSON object on `{stage}`: {source}"))]
    ParseFile {
        stage: &'static str,
        path: PathBuf,
        source: serde_json::Error,
    },
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeFile {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to replace settings file at {path:?} on `{stage}`: {source}"))]
    ReplaceFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_max_message_length() -> usize {
    DEFAULT_MAX_MESSAGE_LENGTH
}

fn default_pin_threshold() -> f32 {
    DEFAULT_PIN_THRESHOLD
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}
