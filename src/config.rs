use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::models::{RuleId, Severity};

/// Root configuration structure, deserialized from `.contract-checkr/config.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Engine limits and source discovery.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Service id → source path prefix, relative to the project root.
    /// Overrides `root` entries of the manifest.
    #[serde(default)]
    pub services: BTreeMap<String, String>,
    /// Per-rule severity overrides keyed by rule id (e.g. `"CTR-dual-test"`).
    #[serde(default)]
    pub rules: HashMap<String, RuleAction>,
}

#[derive(Debug, Deserialize)]
pub struct EngineConfig {
    /// Recursion cap for manifest `ref` expansion and source type resolution.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Extraction batch size. `0` uses the available parallelism.
    #[serde(default)]
    pub jobs: usize,
    /// Directory names skipped during source discovery.
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,
}

fn default_max_depth() -> usize {
    8
}

fn default_exclude() -> Vec<String> {
    ["node_modules", "target", "vendor", "dist", "build", ".git", ".venv", "__pycache__"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_depth: default_max_depth(),
            jobs: 0,
            exclude: default_exclude(),
        }
    }
}

impl EngineConfig {
    /// Effective batch size.
    pub fn jobs(&self) -> usize {
        if self.jobs > 0 {
            self.jobs
        } else {
            std::thread::available_parallelism().map_or(4, |n| n.get())
        }
    }
}

/// What to do with a rule's violations.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Report as an error; the CLI exits with code 1.
    Error,
    /// Report as a warning.
    Warn,
    /// Drop the rule's violations.
    Off,
}

impl Config {
    /// Reject rule keys that name no known rule.
    fn validate(self) -> Result<Self> {
        for key in self.rules.keys() {
            if key.parse::<RuleId>().is_err() {
                bail!("unknown rule id '{key}' in [rules]");
            }
        }
        Ok(self)
    }
}

fn read_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: Config =
        toml::from_str(&content).with_context(|| format!("failed to parse config {}", path.display()))?;
    config.validate()
}

/// Load the run configuration, searching in order:
///
/// 1. `config_override` — path passed via `--config`
/// 2. `<project_path>/.contract-checkr/config.toml`
/// 3. `~/.config/contract-checkr/config.toml`
/// 4. Built-in [`Config::default`]
pub fn load_config(project_path: &Path, config_override: Option<&Path>) -> Result<Config> {
    if let Some(path) = config_override {
        return read_config(path);
    }

    let project_config = project_path.join(".contract-checkr").join("config.toml");
    if project_config.exists() {
        return read_config(&project_config);
    }

    if let Some(home) = dirs::home_dir() {
        let home_config = home
            .join(".config")
            .join("contract-checkr")
            .join("config.toml");
        if home_config.exists() {
            return read_config(&home_config);
        }
    }

    Ok(Config::default())
}

/// The severity a violation of `rule` is reported with, or `None` when the
/// rule is switched off.
pub fn apply_policy(config: &Config, rule: RuleId, severity: Severity) -> Option<Severity> {
    let action = config
        .rules
        .iter()
        .find(|(key, _)| key.parse::<RuleId>().is_ok_and(|r| r == rule))
        .map(|(_, action)| *action);
    match action {
        None => Some(severity),
        Some(RuleAction::Off) => None,
        Some(RuleAction::Warn) => Some(Severity::Warning),
        Some(RuleAction::Error) => Some(Severity::Error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.engine.max_depth, 8);
        assert!(cfg.engine.exclude.iter().any(|e| e == "node_modules"));
        assert!(cfg.engine.jobs() >= 1);
        assert!(cfg.services.is_empty());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let cfg: Config = toml::from_str(
            r#"
[engine]
jobs = 2

[services]
orders = "services/orders"

[rules]
"CTR-dual-test" = "warn"
"#,
        )
        .unwrap();
        assert_eq!(cfg.engine.jobs(), 2);
        assert_eq!(cfg.engine.max_depth, 8);
        assert_eq!(cfg.services["orders"], "services/orders");
        assert_eq!(cfg.rules["CTR-dual-test"], RuleAction::Warn);
    }

    #[test]
    fn test_apply_policy() {
        let mut cfg = Config::default();
        cfg.rules.insert("CTR-dual-test".to_string(), RuleAction::Warn);
        cfg.rules.insert("ctr-json-tag-match".to_string(), RuleAction::Off);
        assert_eq!(apply_policy(&cfg, RuleId::DualTest, Severity::Error), Some(Severity::Warning));
        assert_eq!(apply_policy(&cfg, RuleId::JsonTagMatch, Severity::Error), None);
        assert_eq!(
            apply_policy(&cfg, RuleId::ResponseShape, Severity::Warning),
            Some(Severity::Warning)
        );
    }

    #[test]
    fn test_load_project_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".contract-checkr")).unwrap();
        std::fs::write(
            dir.path().join(".contract-checkr").join("config.toml"),
            "[engine]\nmax_depth = 3\n",
        )
        .unwrap();
        let cfg = load_config(dir.path(), None).unwrap();
        assert_eq!(cfg.engine.max_depth, 3);
    }

    #[test]
    fn test_override_wins_and_unknown_rules_fail() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[rules]\n\"CTR-nope\" = \"off\"").unwrap();
        let err = load_config(dir.path(), Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("CTR-nope"));
    }
}
