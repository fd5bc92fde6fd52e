//! Process-wide configuration
//!
//! Loaded once at startup from a YAML file plus environment-variable
//! overrides, then treated as read-only. Credentials come strictly from the
//! environment; they are never written back to disk and never logged.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("required configuration missing: {0}")]
    Missing(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("failed to resolve an application data directory")]
    NoAppDataDir,
}

/// Which LLM backend the gateway talks to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    #[default]
    OpenAI,
    Anthropic,
    /// OpenAI-compatible endpoint at a custom base URL
    Custom,
}

/// LLM gateway settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct LlmConfig {
    pub provider: LlmProviderKind,
    /// Model used for per-source query generation
    pub model_query_gen: String,
    /// Model used for relevance validation and scoring
    pub model_relevance: String,
    /// Model used for decomposition, follow-ups, and synthesis
    pub model_synthesis: String,
    /// Gateway-wide cap on in-flight model calls
    pub max_parallel: usize,
    pub timeout_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Populated from the environment only, never from the config file
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::OpenAI,
            model_query_gen: "gpt-4o-mini".to_string(),
            model_relevance: "gpt-4o-mini".to_string(),
            model_synthesis: "gpt-4o".to_string(),
            max_parallel: 4,
            timeout_seconds: 30,
            base_url: None,
            api_key: None,
        }
    }
}

/// Deep-research engine knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ResearchConfig {
    pub max_tasks: usize,
    pub max_retries_per_task: u32,
    pub max_time_minutes: u64,
    pub max_concurrent_tasks: usize,
    pub min_results_per_task: usize,
    /// Acceptance threshold for public queries; sensitive runs floor it to 1
    pub relevance_threshold: u8,
    /// Below this fraction of selected sources contributing, warn only
    pub min_source_utilization: f64,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_tasks: 10,
            max_retries_per_task: 2,
            max_time_minutes: 60,
            max_concurrent_tasks: 4,
            min_results_per_task: 3,
            relevance_threshold: 3,
            min_source_utilization: 0.5,
        }
    }
}

/// Parallel executor knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ExecutorConfig {
    pub concurrency: usize,
    pub relevance_timeout_seconds: u64,
    pub query_gen_timeout_seconds: u64,
    pub timeout_seconds: u64,
    /// Sources whose failure is surfaced prominently in reports and alerts
    pub critical_sources: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            relevance_timeout_seconds: 5,
            query_gen_timeout_seconds: 30,
            timeout_seconds: 60,
            critical_sources: Vec::new(),
        }
    }
}

/// Per-integration overrides keyed by source id
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct IntegrationSettings {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_per_day: Option<u32>,
    /// Local directory for archive-backed sources
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_dir: Option<String>,
    /// Populated from the environment only, never from the config file
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for IntegrationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
            rate_limit_per_day: None,
            archive_dir: None,
            api_key: None,
        }
    }
}

/// Complete process configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub research: ResearchConfig,
    pub executor: ExecutorConfig,
    /// Root for monitors/, research/, and logs/; defaults to the OS data dir
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_root: Option<String>,
    pub integrations: HashMap<String, IntegrationSettings>,
}

/// Environment variable names for credentials and overrides
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
pub const ENV_SAM_API_KEY: &str = "SAM_API_KEY";
pub const ENV_DVIDS_API_KEY: &str = "DVIDS_API_KEY";
pub const ENV_USAJOBS_API_KEY: &str = "USAJOBS_API_KEY";
pub const ENV_GOVINFO_API_KEY: &str = "GOVINFO_API_KEY";
pub const ENV_X_BEARER_TOKEN: &str = "X_BEARER_TOKEN";
pub const ENV_BRAVE_API_KEY: &str = "BRAVE_API_KEY";
pub const ENV_DATA_ROOT: &str = "ARGUS_DATA_ROOT";

/// (source id, credential env var) pairs for integrations that need a key
const INTEGRATION_CREDENTIALS: &[(&str, &str)] = &[
    ("sam_gov", ENV_SAM_API_KEY),
    ("dvids", ENV_DVIDS_API_KEY),
    ("usajobs", ENV_USAJOBS_API_KEY),
    ("govinfo", ENV_GOVINFO_API_KEY),
    ("twitter", ENV_X_BEARER_TOKEN),
    ("brave_search", ENV_BRAVE_API_KEY),
];

impl AppConfig {
    /// Load the config file, apply environment overrides, and validate.
    ///
    /// A missing file yields the defaults; a present-but-invalid file is an
    /// error so a typo cannot silently fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)?;
            serde_yaml::from_str(&content)?
        } else {
            log::info!("[Config] No config file at {:?}, using defaults", path);
            Self::default()
        };
        config.populate_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment-variable overrides and load credentials
    pub fn populate_from_env(&mut self) {
        if let Ok(root) = env::var(ENV_DATA_ROOT) {
            if !root.is_empty() {
                self.data_root = Some(root);
            }
        }

        let llm_key_var = match self.llm.provider {
            LlmProviderKind::Anthropic => ENV_ANTHROPIC_API_KEY,
            _ => ENV_OPENAI_API_KEY,
        };
        if let Ok(key) = env::var(llm_key_var) {
            if !key.is_empty() {
                self.llm.api_key = Some(key);
                log::info!("[Config] Loaded LLM API key from {}", llm_key_var);
            }
        }

        for (source_id, var) in INTEGRATION_CREDENTIALS {
            if let Ok(key) = env::var(var) {
                if key.is_empty() {
                    continue;
                }
                self.integrations
                    .entry(source_id.to_string())
                    .or_insert_with(IntegrationSettings::default)
                    .api_key = Some(key);
                log::info!("[Config] Loaded credential for {} from {}", source_id, var);
            }
        }
    }

    /// Startup validation; failures here abort process initialization
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.llm.model_query_gen.is_empty() {
            return Err(ConfigError::Missing("llm.model_query_gen".to_string()));
        }
        if self.llm.model_relevance.is_empty() {
            return Err(ConfigError::Missing("llm.model_relevance".to_string()));
        }
        if self.llm.model_synthesis.is_empty() {
            return Err(ConfigError::Missing("llm.model_synthesis".to_string()));
        }
        if self.llm.provider == LlmProviderKind::Custom && self.llm.base_url.is_none() {
            return Err(ConfigError::Missing("llm.base_url".to_string()));
        }
        if self.executor.concurrency == 0 {
            return Err(ConfigError::Missing("executor.concurrency".to_string()));
        }
        Ok(())
    }

    /// Settings for one integration, or the enabled defaults
    pub fn integration(&self, source_id: &str) -> IntegrationSettings {
        self.integrations
            .get(source_id)
            .cloned()
            .unwrap_or_else(IntegrationSettings::default)
    }

    /// Resolve the data root: configured, or the OS-specific data directory
    pub fn data_root(&self) -> Result<PathBuf, ConfigError> {
        if let Some(ref root) = self.data_root {
            return Ok(PathBuf::from(root));
        }
        ProjectDirs::from("com", "argus", "Argus")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or(ConfigError::NoAppDataDir)
    }

    pub fn monitors_config_dir(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_root()?.join("monitors").join("configs"))
    }

    pub fn monitors_state_dir(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_root()?.join("monitors").join("state"))
    }

    pub fn monitors_alerts_dir(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_root()?.join("monitors").join("alerts"))
    }

    pub fn research_dir(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_root()?.join("research"))
    }

    pub fn ops_log_dir(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_root()?.join("logs"))
    }
}
