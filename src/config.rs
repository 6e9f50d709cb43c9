//! Configuration management
//!
//! Reads `.playbookd.toml`: embedding provider selection, data directory
//! and manager tuning. `${VAR}` references in the API key are expanded
//! from the environment.

use chrono::Duration;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{PlaybookError, Result};
use crate::manager::ManagerConfig;
use crate::playbook::lifecycle::DEFAULT_DEPRECATION_THRESHOLD;

/// Config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = ".playbookd.toml";

/// Environment variable overriding `[data] dir`
pub const DATA_DIR_ENV: &str = "PLAYBOOKD_DATA";

pub const DEFAULT_DATA_DIR: &str = "./playbooks";
pub const DEFAULT_MAX_AGE_DAYS: i64 = 90;
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.3;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub manager: ManagerSettings,
}

/// Supported embedding backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Noop,
    Hash,
    OpenAi,
    Ollama,
    Google,
}

impl FromStr for ProviderKind {
    type Err = PlaybookError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "noop" => Ok(ProviderKind::Noop),
            "hash" => Ok(ProviderKind::Hash),
            "openai" => Ok(ProviderKind::OpenAi),
            "ollama" => Ok(ProviderKind::Ollama),
            "google" => Ok(ProviderKind::Google),
            other => Err(PlaybookError::Config(format!("unknown embedding provider: {:?}", other))),
        }
    }
}

/// `[embedding]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// noop, hash, openai, ollama or google; empty means noop
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    /// Supports `${ENV_VAR}` expansion
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub url: String,
    /// 0 disables vector search
    #[serde(default)]
    pub dimensions: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: String::new(),
            model: String::new(),
            api_key: String::new(),
            url: String::new(),
            dimensions: 0,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn kind(&self) -> Result<ProviderKind> {
        self.provider.parse()
    }
}

/// `[data]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub dir: String,
}

fn default_data_dir() -> String {
    DEFAULT_DATA_DIR.to_string()
}

impl Default for DataConfig {
    fn default() -> Self {
        Self { dir: default_data_dir() }
    }
}

/// `[manager]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerSettings {
    #[serde(default)]
    pub auto_reflect: bool,
    /// Day count such as `"90d"`
    #[serde(default = "default_max_age")]
    pub max_age: String,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_deprecation_threshold")]
    pub deprecation_threshold: f64,
}

fn default_max_age() -> String {
    format!("{}d", DEFAULT_MAX_AGE_DAYS)
}

fn default_min_confidence() -> f64 {
    DEFAULT_MIN_CONFIDENCE
}

fn default_deprecation_threshold() -> f64 {
    DEFAULT_DEPRECATION_THRESHOLD
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            auto_reflect: false,
            max_age: default_max_age(),
            min_confidence: default_min_confidence(),
            deprecation_threshold: default_deprecation_threshold(),
        }
    }
}

impl Config {
    /// Load configuration from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
            Err(e) => {
                return Err(PlaybookError::Config(format!("read {}: {}", path.display(), e)));
            }
        };
        Self::from_toml_str(&contents)
            .map_err(|e| PlaybookError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(contents).map_err(|e| PlaybookError::Config(format!("parse config: {}", e)))?;
        config.embedding.api_key = expand_env_vars(&config.embedding.api_key);
        Ok(config)
    }

    /// Data directory, with the environment override applied
    pub fn data_dir(&self) -> PathBuf {
        match std::env::var(DATA_DIR_ENV) {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ if self.data.dir.trim().is_empty() => PathBuf::from(DEFAULT_DATA_DIR),
            _ => PathBuf::from(&self.data.dir),
        }
    }

    /// Resolve the settings the manager runs with
    pub fn manager_config(&self) -> Result<ManagerConfig> {
        let max_age = parse_max_age(&self.manager.max_age)?;
        Ok(ManagerConfig {
            data_dir: self.data_dir(),
            auto_reflect: self.manager.auto_reflect,
            max_age: if max_age.is_zero() {
                Duration::days(DEFAULT_MAX_AGE_DAYS)
            } else {
                max_age
            },
            min_confidence: if self.manager.min_confidence > 0.0 {
                self.manager.min_confidence
            } else {
                DEFAULT_MIN_CONFIDENCE
            },
            deprecation_threshold: if self.manager.deprecation_threshold > 0.0 {
                self.manager.deprecation_threshold
            } else {
                DEFAULT_DEPRECATION_THRESHOLD
            },
        })
    }
}

static ENV_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));

/// Replace `${VAR}` with the variable's value; unset variables become empty
pub fn expand_env_vars(s: &str) -> String {
    ENV_VAR
        .replace_all(s, |caps: &regex::Captures| std::env::var(&caps[1]).unwrap_or_default())
        .into_owned()
}

/// Parse a `"Nd"` day count; an empty string is a zero duration
pub fn parse_max_age(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(Duration::zero());
    }

    let days = s
        .strip_suffix('d')
        .ok_or_else(|| PlaybookError::Config(format!("unsupported max_age format {:?} (expected Nd, e.g. \"90d\")", s)))?;
    let days: i64 = days
        .parse()
        .map_err(|e| PlaybookError::Config(format!("invalid number of days in max_age {:?}: {}", s, e)))?;
    if days < 0 {
        return Err(PlaybookError::Config(format!("max_age must not be negative: {:?}", s)));
    }
    Duration::try_days(days).ok_or_else(|| PlaybookError::Config(format!("max_age out of range: {:?}", s)))
}

/// Commented configuration template for `playbookd init`
pub fn default_config_toml(provider: &str) -> Result<String> {
    let embedding = match provider.parse::<ProviderKind>()? {
        ProviderKind::Google => {
            r#"[embedding]
# Embedding provider: "noop", "hash", "openai", "ollama", "google"
provider = "google"
model = "gemini-embedding-001"
api_key = "${GOOGLE_API_KEY}"
url = "https://generativelanguage.googleapis.com/v1beta"
dimensions = 768
"#
        }
        ProviderKind::OpenAi => {
            r#"[embedding]
# Embedding provider: "noop", "hash", "openai", "ollama", "google"
provider = "openai"
model = "text-embedding-3-small"
api_key = "${OPENAI_API_KEY}"
url = "https://api.openai.com/v1"
dimensions = 1536
"#
        }
        ProviderKind::Ollama => {
            r#"[embedding]
# Embedding provider: "noop", "hash", "openai", "ollama", "google"
provider = "ollama"
model = "nomic-embed-text-v2-moe"
url = "http://localhost:11434"
dimensions = 768
"#
        }
        ProviderKind::Hash => {
            r#"[embedding]
# Embedding provider: "noop", "hash", "openai", "ollama", "google"
# Offline hashed bag-of-words vectors
provider = "hash"
dimensions = 384
"#
        }
        ProviderKind::Noop => {
            r#"[embedding]
# Embedding provider: "noop", "hash", "openai", "ollama", "google"
provider = "noop"
# model = ""
# api_key = "${OPENAI_API_KEY}"
# url = ""
# dimensions = 0
"#
        }
    };

    let rest = r#"
[data]
dir = "./playbooks"

[manager]
auto_reflect = false
max_age = "90d"
min_confidence = 0.3
deprecation_threshold = 0.3
"#;

    Ok(format!("# playbookd configuration\n\n{}{}", embedding, rest))
}
