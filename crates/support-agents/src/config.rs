//! Runtime configuration for the orchestrator.
//!
//! Sources, later wins: built-in defaults, an optional TOML file, then
//! `SUPPORT_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use triage::state_machine::RankingConfig;
use triage::PolicyConfig;

const DEFAULT_HANDLER_TIMEOUT_SECS: u64 = 30;
const DEFAULT_HISTORY_TTL_SECS: u64 = 300;
const DEFAULT_HISTORY_LIMIT: usize = 3;
const DEFAULT_COMPLETED_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Deadline for any handler without its own override.
    pub handler_timeout_secs: u64,
    pub classifier_timeout_secs: Option<u64>,
    pub knowledge_timeout_secs: Option<u64>,
    pub account_timeout_secs: Option<u64>,
    pub escalation_timeout_secs: Option<u64>,
    pub history_ttl_secs: u64,
    /// Past tickets pulled in as context.
    pub history_limit: usize,
    pub max_articles: usize,
    pub min_article_score: f64,
    pub escalation_threshold: f64,
    pub strong_match_threshold: f64,
    /// Finished outcomes kept in memory; older ones are looked up in the store.
    pub completed_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let ranking = RankingConfig::default();
        Self {
            handler_timeout_secs: DEFAULT_HANDLER_TIMEOUT_SECS,
            classifier_timeout_secs: None,
            knowledge_timeout_secs: None,
            account_timeout_secs: None,
            escalation_timeout_secs: None,
            history_ttl_secs: DEFAULT_HISTORY_TTL_SECS,
            history_limit: DEFAULT_HISTORY_LIMIT,
            max_articles: ranking.max_articles,
            min_article_score: ranking.min_score,
            escalation_threshold: PolicyConfig::default().confidence_threshold,
            strong_match_threshold: ranking.strong_match_threshold,
            completed_capacity: DEFAULT_COMPLETED_CAPACITY,
        }
    }
}

impl OrchestratorConfig {
    /// Defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `SUPPORT_*` overrides read through `lookup`.
    ///
    /// Unparseable or zero values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.handler_timeout_secs = u64_from_env(
            &lookup,
            "SUPPORT_HANDLER_TIMEOUT_SECS",
            self.handler_timeout_secs,
        );
        self.history_ttl_secs =
            u64_from_env(&lookup, "SUPPORT_HISTORY_TTL_SECS", self.history_ttl_secs);
        self.history_limit = u64_from_env(
            &lookup,
            "SUPPORT_HISTORY_LIMIT",
            self.history_limit as u64,
        ) as usize;
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let thresholds = [
            ("escalation_threshold", self.escalation_threshold),
            ("min_article_score", self.min_article_score),
            ("strong_match_threshold", self.strong_match_threshold),
        ];
        if let Some((name, value)) = thresholds
            .iter()
            .find(|(_, v)| !(0.0..=1.0).contains(v))
        {
            return Err(ConfigError::Invalid(format!(
                "{name} must be within [0, 1], got {value}"
            )));
        }
        let timeouts = [
            ("handler_timeout_secs", Some(self.handler_timeout_secs)),
            ("classifier_timeout_secs", self.classifier_timeout_secs),
            ("knowledge_timeout_secs", self.knowledge_timeout_secs),
            ("account_timeout_secs", self.account_timeout_secs),
            ("escalation_timeout_secs", self.escalation_timeout_secs),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, v)| *v == Some(0)) {
            return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
        }
        let sizes = [
            ("history_ttl_secs", self.history_ttl_secs as usize),
            ("max_articles", self.max_articles),
            ("completed_capacity", self.completed_capacity),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
        }
        Ok(())
    }

    fn timeout(&self, specific: Option<u64>) -> Duration {
        Duration::from_secs(specific.unwrap_or(self.handler_timeout_secs))
    }

    pub fn classifier_timeout(&self) -> Duration {
        self.timeout(self.classifier_timeout_secs)
    }

    pub fn knowledge_timeout(&self) -> Duration {
        self.timeout(self.knowledge_timeout_secs)
    }

    pub fn account_timeout(&self) -> Duration {
        self.timeout(self.account_timeout_secs)
    }

    pub fn escalation_timeout(&self) -> Duration {
        self.timeout(self.escalation_timeout_secs)
    }

    /// Deadline for record store calls.
    pub fn persistence_timeout(&self) -> Duration {
        self.timeout(None)
    }

    pub fn history_ttl(&self) -> Duration {
        Duration::from_secs(self.history_ttl_secs)
    }

    pub fn ranking(&self) -> RankingConfig {
        RankingConfig {
            max_articles: self.max_articles,
            min_score: self.min_article_score,
            strong_match_threshold: self.strong_match_threshold,
        }
    }

    pub fn policy(&self) -> PolicyConfig {
        PolicyConfig {
            confidence_threshold: self.escalation_threshold,
        }
    }
}

fn u64_from_env(lookup: &impl Fn(&str) -> Option<String>, var: &str, default: u64) -> u64 {
    lookup(var)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}
