//! Engine configuration.
//!
//! Configuration sources (highest priority first):
//! 1. `MENPROV_CONFIG` environment variable (path to a config file)
//! 2. Config file `.menprov/config.yaml` in the current directory or a parent
//! 3. `~/.menprov/config.yaml`
//! 4. Defaults
//!
//! `rules_file` is relative to the config file's directory.
//! `MENPROV_LLM_API_KEY` overrides the LLM API key from any source.

pub mod rules;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::adapters::{LlmConfig, NerModelConfig};
use crate::core::classifier::ClassifierConfig;
use crate::core::policy::PolicyConfig;
use crate::core::reconciler::ReconcilerConfig;
use crate::core::retry::RetryPolicy;
use crate::core::safety::SafetyLimits;

use self::rules::RuleSet;

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "MENPROV_CONFIG";

/// Environment variable overriding the LLM API key
pub const LLM_API_KEY_ENV: &str = "MENPROV_LLM_API_KEY";

const CONFIG_DIR: &str = ".menprov";
const CONFIG_FILE: &str = "config.yaml";

/// Config file schema; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub limits: SafetyLimits,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    /// Contextual LLM pass and section judge; disabled when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmConfig>,

    /// Statistical NER server; disabled when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<NerModelConfig>,

    /// Inline rule set; takes precedence over `rules_file`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<RuleSet>,

    /// Rule set file (YAML or JSON)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_file: Option<PathBuf>,

    /// File this config was loaded from
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl EngineConfig {
    /// Load configuration from the first source that exists
    pub fn load() -> Result<Self> {
        let path = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Some(PathBuf::from(path)),
            None => {
                let cwd = std::env::current_dir().context("Failed to read current directory")?;
                find_config_file(&cwd).or_else(home_config_file)
            }
        };

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => {
                debug!("No config file found, using defaults");
                Self::default()
            }
        };

        if let Ok(key) = std::env::var(LLM_API_KEY_ENV) {
            config.set_llm_api_key(key);
        }
        Ok(config)
    }

    /// Load and parse one config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        if let Some(rules_file) = config.rules_file.take() {
            let base = path.parent().unwrap_or(Path::new("."));
            config.rules_file = Some(resolve_path(base, &rules_file));
        }
        config.source = Some(path.to_path_buf());

        info!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Invalid config YAML")
    }

    /// The rule set to run with: inline rules, then `rules_file`, then the
    /// bundled OSL 26 sample
    pub fn rule_set(&self) -> Result<RuleSet> {
        if let Some(rules) = &self.rules {
            rules.validate()?;
            return Ok(rules.clone());
        }
        match &self.rules_file {
            Some(path) => RuleSet::from_file(path),
            None => RuleSet::osl26(),
        }
    }

    /// Set the LLM API key, enabling the LLM with defaults if needed
    pub fn set_llm_api_key(&mut self, key: impl Into<String>) {
        self.llm.get_or_insert_with(LlmConfig::default).api_key = Some(key.into());
    }
}

/// Search `start` and its parents for `.menprov/config.yaml`
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

fn home_config_file() -> Option<PathBuf> {
    let path = dirs::home_dir()?.join(CONFIG_DIR).join(CONFIG_FILE);
    path.exists().then_some(path)
}

/// Resolve a path that may be relative to the config file's directory
fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        let joined = base.join(path);
        joined.canonicalize().unwrap_or(joined)
    }
}
