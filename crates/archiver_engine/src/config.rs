use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use engine_logging::engine_info;
use serde::{Deserialize, Serialize};

use crate::cover::DEFAULT_RESOLUTION_TOKENS;
use crate::fetch::FetchSettings;
use crate::schedule::{DelayPolicy, ScheduleConfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub base_url: String,
    /// Chapter page path with `{id}` and `{chapter}` placeholders.
    pub story_path: String,
    /// Document editor path with an `{id}` placeholder.
    pub document_path: String,
    pub document_list_path: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.fanfiction.net".to_string(),
            story_path: "/s/{id}/{chapter}/".to_string(),
            document_path: "/docs/edit.php?docid={id}".to_string(),
            document_list_path: "/docs/docs.php".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub redirect_limit: usize,
    pub max_bytes: u64,
    pub user_agent: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        let defaults = FetchSettings::default();
        Self {
            connect_timeout_ms: defaults.connect_timeout.as_millis() as u64,
            request_timeout_ms: defaults.request_timeout.as_millis() as u64,
            redirect_limit: defaults.redirect_limit,
            max_bytes: defaults.max_bytes,
            user_agent: None,
        }
    }
}

impl FetchConfig {
    pub fn settings(&self) -> FetchSettings {
        FetchSettings {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            redirect_limit: self.redirect_limit,
            max_bytes: self.max_bytes,
            user_agent: self.user_agent.clone(),
            ..FetchSettings::default()
        }
    }
}

/// Serialized form of [`ScheduleConfig`]. Equal min and max mean a fixed delay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub cooldown_ms: u64,
    pub retry_delay_ms: u64,
    pub fetch_timeout_ms: Option<u64>,
}

impl ScheduleSettings {
    pub fn from_config(config: &ScheduleConfig) -> Self {
        let (min, max) = match config.first_pass_delay {
            DelayPolicy::Fixed(delay) => (delay, delay),
            DelayPolicy::Uniform { min, max } => (min, max),
        };
        Self {
            min_delay_ms: min.as_millis() as u64,
            max_delay_ms: max.as_millis() as u64,
            cooldown_ms: config.cooldown.as_millis() as u64,
            retry_delay_ms: config.retry_delay.as_millis() as u64,
            fetch_timeout_ms: config.fetch_timeout.map(|t| t.as_millis() as u64),
        }
    }

    pub fn schedule(&self) -> ScheduleConfig {
        let min = Duration::from_millis(self.min_delay_ms);
        let max = Duration::from_millis(self.max_delay_ms);
        ScheduleConfig {
            first_pass_delay: if min == max {
                DelayPolicy::Fixed(min)
            } else {
                DelayPolicy::Uniform { min, max }
            },
            cooldown: Duration::from_millis(self.cooldown_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            fetch_timeout: self.fetch_timeout_ms.map(Duration::from_millis),
        }
    }
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self::from_config(&ScheduleConfig::chapters())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverConfig {
    pub enabled: bool,
    /// Resolution path tokens, smallest first.
    pub resolution_tokens: Vec<String>,
}

impl Default for CoverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            resolution_tokens: DEFAULT_RESOLUTION_TOKENS
                .iter()
                .map(|t| t.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub site: SiteConfig,
    pub fetch: FetchConfig,
    pub chapters: ScheduleSettings,
    pub documents: ScheduleSettings,
    pub cover: CoverConfig,
    pub output_dir: PathBuf,
    pub archive_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::default_with_output(PathBuf::from("output"))
    }
}

impl EngineConfig {
    pub fn default_with_output(output_dir: PathBuf) -> Self {
        Self {
            site: SiteConfig::default(),
            fetch: FetchConfig::default(),
            chapters: ScheduleSettings::from_config(&ScheduleConfig::chapters()),
            documents: ScheduleSettings::from_config(&ScheduleConfig::documents()),
            cover: CoverConfig::default(),
            output_dir,
            archive_prefix: "documents".to_string(),
        }
    }

    /// Reads a RON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                engine_info!("No config at {:?}, using defaults", path);
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_ron(&content).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_ron(content: &str) -> Result<Self, String> {
        ron::from_str(content).map_err(|err| err.to_string())
    }

    pub fn to_ron(&self) -> Result<String, String> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::new()).map_err(|err| err.to_string())
    }
}
