use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub agent: AgentConfig,
    pub guards: GuardConfig,
    pub delegation: DelegationConfig,
    pub orchestrator: OrchestratorConfig,
}

/// Step-loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_steps: usize,
    pub system_prompt: Option<String>,
    /// Applied to every executor call when set.
    pub executor_timeout_secs: Option<u64>,
    /// Applied to every model call when set. Expiry is fatal.
    pub model_timeout_secs: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 20,
            system_prompt: None,
            executor_timeout_secs: Some(30),
            model_timeout_secs: None,
        }
    }
}

impl AgentConfig {
    pub fn executor_timeout(&self) -> Option<Duration> {
        self.executor_timeout_secs.map(Duration::from_secs)
    }

    pub fn model_timeout(&self) -> Option<Duration> {
        self.model_timeout_secs.map(Duration::from_secs)
    }
}

/// Repetition and goal-drift detector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub enabled: bool,
    /// Consecutive matching steps that count as repetition.
    pub repetition_window: usize,
    /// Trigram similarity at or above which free text counts as repeated.
    pub similarity_threshold: f64,
    /// Trailing steps scored for relevance to the task.
    pub drift_window: usize,
    pub drift_min_steps: usize,
    /// Relevance below this marks a step as off-task.
    pub low_relevance_threshold: f64,
    /// Grant exactly one more step after severe drift.
    pub final_step_on_severe_drift: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            repetition_window: 3,
            similarity_threshold: 0.9,
            drift_window: 5,
            drift_min_steps: 2,
            low_relevance_threshold: 0.2,
            final_step_on_severe_drift: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelegationConfig {
    pub max_depth: usize,
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self { max_depth: 3 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_concurrency: usize,
    pub default_timeout_secs: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            default_timeout_secs: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_secs.map(Duration::from_secs)
    }
}

impl Config {
    pub fn delve_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".delve"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::delve_dir()?.join("delve.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading config");
        if !path.exists() {
            debug!("config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        debug!(
            max_steps = config.agent.max_steps,
            max_depth = config.delegation.max_depth,
            max_concurrency = config.orchestrator.max_concurrency,
            "config loaded"
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let delve_dir = Self::delve_dir()?;
        if !delve_dir.exists() {
            debug!(dir = %delve_dir.display(), "creating delve directory");
            fs::create_dir_all(&delve_dir)?;
        }
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.guards.repetition_window < 2 {
            return Err(Error::Validation(
                "guards.repetition_window must be at least 2".to_string(),
            ));
        }
        if !(self.guards.similarity_threshold > 0.0 && self.guards.similarity_threshold <= 1.0) {
            return Err(Error::Validation(
                "guards.similarity_threshold must be in (0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.guards.low_relevance_threshold) {
            return Err(Error::Validation(
                "guards.low_relevance_threshold must be in [0, 1]".to_string(),
            ));
        }
        if self.guards.drift_min_steps == 0 || self.guards.drift_window < self.guards.drift_min_steps
        {
            return Err(Error::Validation(
                "guards.drift_window must be at least guards.drift_min_steps, which must be positive"
                    .to_string(),
            ));
        }
        if self.orchestrator.max_concurrency == 0 {
            return Err(Error::Validation(
                "orchestrator.max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
