//! Configuration loader and validator for the issue watcher.
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::model::SearchWindow;

pub const ENV_GH_TOKEN: &str = "GH_TOKEN";
pub const ENV_TELEGRAM_TOKEN: &str = "TELEGRAM_TOKEN";
pub const ENV_TELEGRAM_CHAT_ID: &str = "TELEGRAM_CHAT_ID";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("Invalid rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: &'static str },
    #[error("Invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub app: App,
    #[serde(default)]
    pub github: Github,
    #[serde(default)]
    pub telegram: Telegram,
    pub rules: Vec<Rule>,
}

/// Run-level settings shared by every rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    /// How often the external scheduler starts a run.
    #[serde(default = "default_schedule_interval")]
    pub schedule_interval_minutes: u32,
    /// Extra lookback on top of the schedule interval so runs overlap.
    #[serde(default = "default_overlap")]
    pub overlap_minutes: u32,
    /// Organizations per search query.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_excluded_label")]
    pub excluded_label: String,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Github {
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_github_api")]
    pub api_base: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    #[serde(default)]
    pub bot_token: String,
    /// Forum group id, usually starting with -100.
    #[serde(default)]
    pub chat_id: i64,
    /// Topic used by the connectivity self-test.
    #[serde(default)]
    pub test_topic_id: Option<i32>,
    /// Alternative Bot API endpoint.
    #[serde(default)]
    pub api_url: Option<String>,
}

/// A named forwarding policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rule {
    pub name: String,
    pub organizations: Vec<String>,
    /// Raw search predicates appended to every query, e.g. `label:"good first issue"`.
    #[serde(default)]
    pub filters: String,
    /// Forum topic (message thread) the rule posts into.
    pub topic_id: i32,
    pub label: String,
    /// Forward only issues whose author is a recognised member of `organizations`.
    #[serde(default)]
    pub require_membership_check: bool,
}

fn default_schedule_interval() -> u32 {
    15
}

fn default_overlap() -> u32 {
    2
}

fn default_batch_size() -> usize {
    5
}

fn default_excluded_label() -> String {
    "question".into()
}

fn default_http_timeout() -> u64 {
    30
}

fn default_github_api() -> String {
    "https://api.github.com/".into()
}

impl Default for App {
    fn default() -> Self {
        Self {
            schedule_interval_minutes: default_schedule_interval(),
            overlap_minutes: default_overlap(),
            batch_size: default_batch_size(),
            excluded_label: default_excluded_label(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

impl Default for Github {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_base: default_github_api(),
        }
    }
}

impl Config {
    /// Lookback covers one full scheduler interval plus the configured overlap.
    pub fn lookback(&self) -> Duration {
        Duration::minutes(i64::from(self.app.schedule_interval_minutes))
            + Duration::minutes(i64::from(self.app.overlap_minutes))
    }

    pub fn search_window(&self, now: DateTime<Utc>) -> SearchWindow {
        SearchWindow::ending_at(now, self.lookback())
    }

    pub fn http_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.app.http_timeout_secs)
    }

    /// Every configured organization once, paired with the first rule listing it.
    pub fn organizations(&self) -> Vec<(&str, &Rule)> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for rule in &self.rules {
            for org in &rule.organizations {
                if seen.insert(org.to_ascii_lowercase()) {
                    out.push((org.as_str(), rule));
                }
            }
        }
        out
    }

    /// Names of credentials that are still empty after loading.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.github.token.trim().is_empty() {
            missing.push(ENV_GH_TOKEN);
        }
        if self.telegram.bot_token.trim().is_empty() {
            missing.push(ENV_TELEGRAM_TOKEN);
        }
        if self.telegram.chat_id == 0 {
            missing.push(ENV_TELEGRAM_CHAT_ID);
        }
        missing
    }

    /// Overlay credentials from the environment (or any other lookup).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup(ENV_GH_TOKEN).filter(|v| !v.is_empty()) {
            self.github.token = token;
        }
        if let Some(token) = lookup(ENV_TELEGRAM_TOKEN).filter(|v| !v.is_empty()) {
            self.telegram.bot_token = token;
        }
        if let Some(raw) = lookup(ENV_TELEGRAM_CHAT_ID).filter(|v| !v.is_empty()) {
            self.telegram.chat_id = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_TELEGRAM_CHAT_ID,
                value: raw.clone(),
            })?;
        }
        Ok(())
    }
}

/// Load configuration from a YAML file, overlay environment credentials and validate.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_env(|key| std::env::var(key).ok())?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance. Credentials are deliberately not checked here.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.schedule_interval_minutes == 0 {
        return Err(ConfigError::Invalid("app.schedule_interval_minutes must be > 0"));
    }
    if cfg.app.batch_size == 0 {
        return Err(ConfigError::Invalid("app.batch_size must be > 0"));
    }
    if cfg.app.http_timeout_secs == 0 {
        return Err(ConfigError::Invalid("app.http_timeout_secs must be > 0"));
    }
    if cfg.github.api_base.trim().is_empty() {
        return Err(ConfigError::Invalid("github.api_base must be non-empty"));
    }
    if cfg.rules.is_empty() {
        return Err(ConfigError::Invalid("rules must contain at least one rule"));
    }

    let mut names = HashSet::new();
    for rule in &cfg.rules {
        if rule.name.trim().is_empty() {
            return Err(ConfigError::Invalid("rules[].name must be non-empty"));
        }
        let invalid = |reason| ConfigError::InvalidRule {
            rule: rule.name.clone(),
            reason,
        };
        if !names.insert(rule.name.as_str()) {
            return Err(invalid("duplicate rule name"));
        }
        if rule.organizations.is_empty() {
            return Err(invalid("organizations must be non-empty"));
        }
        if rule
            .organizations
            .iter()
            .any(|org| org.trim().is_empty() || org.contains(char::is_whitespace))
        {
            return Err(invalid("organization logins must be non-empty and contain no whitespace"));
        }
        if rule.label.trim().is_empty() {
            return Err(invalid("label must be non-empty"));
        }
    }

    Ok(())
}

/// Returns an example configuration.
pub fn example() -> &'static str {
    r#"app:
  schedule_interval_minutes: 15
  overlap_minutes: 2
  batch_size: 5
  excluded_label: "question"
  http_timeout_secs: 30

github:
  token: "YOUR_GITHUB_TOKEN"
  api_base: "https://api.github.com/"

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  chat_id: -1001234567890
  test_topic_id: 1

rules:
  - name: active_orgs
    organizations:
      - deepchem
      - Cloud-CV
      - keras-team
      - cBioPortal
      - google-deepmind
      - kornia
      - JdeRobot
      - openclimatefix
      - opencv
    filters: ""
    topic_id: 2
    label: "🔥 URGENT"

  - name: passive_orgs
    organizations: [Cloud-CV, cBioPortal, opencv, kornia]
    filters: 'label:"good first issue","help wanted"'
    topic_id: 3
    label: "🌱 EASY"

  - name: maintainer_orgs
    organizations: [opencv, kornia]
    topic_id: 4
    label: "🛠 MAINTAINER"
    require_membership_check: true
"#
}
