use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_PATH: &str = "config/app.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub workers: WorkerSettings,
    pub classifier: ClassifierSettings,
    pub guard: GuardSettings,
    pub trials: TrialSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_address: String,
    pub port: u16,
    pub static_dir: String,
    pub max_upload_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            static_dir: "static".to_string(),
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub max_concurrent: usize,
    /// Keeps the processing view on screen long enough to be seen.
    pub processing_delay_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            processing_delay_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    pub api_url: String,
    pub model: String,
    pub timeout_secs: u64,
    /// Only ever read from the environment.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 30,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardSettings {
    pub enabled: bool,
    pub min_skin_ratio: f32,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            min_skin_ratio: 0.15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrialSettings {
    pub api_url: String,
    pub status_filter: String,
    pub page_size: usize,
    pub timeout_secs: u64,
}

impl Default for TrialSettings {
    fn default() -> Self {
        Self {
            api_url: "https://clinicaltrials.gov/api/v2/studies".to_string(),
            status_filter: "RECRUITING".to_string(),
            page_size: 5,
            timeout_secs: 10,
        }
    }
}

impl AppConfig {
    /// Reads `APP_CONFIG` (or `config/app.yaml`), applies environment
    /// overrides and validates the result. A missing file means defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("APP_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::warn!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<Self, ConfigError> {
        if config_str.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(config_str)?)
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(address) = lookup("BIND_ADDRESS") {
            self.server.bind_address = address;
        }
        if let Some(dir) = lookup("STATIC_DIR") {
            self.server.static_dir = dir;
        }
        if let Some(url) = lookup("TRIALS_API_URL") {
            self.trials.api_url = url;
        }
        self.classifier.api_key = lookup("OPENAI_API_KEY").filter(|key| !key.trim().is_empty());
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "workers.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.trials.api_url.trim().is_empty() {
            return Err(ConfigError::Invalid("trials.api_url is empty".to_string()));
        }
        if !(0.0..=1.0).contains(&self.guard.min_skin_ratio) {
            return Err(ConfigError::Invalid(format!(
                "guard.min_skin_ratio must be within [0, 1], got {}",
                self.guard.min_skin_ratio
            )));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }
}
