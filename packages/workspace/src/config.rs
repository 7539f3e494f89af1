//! Server configuration, read from `notebook.config.json` in the root
//! directory. Every field is optional.
//!
//! ```json
//! {
//!   "rootDir": "notebooks",
//!   "maxRuleRounds": 16,
//!   "ruleTimeoutMs": 10000,
//!   "persist": true,
//!   "cas": { "program": "cas-engine", "args": ["--framed"] }
//! }
//! ```

use crate::errors::WorkspaceError;
use notebook_editor::RuleEngineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "notebook.config.json";

/// External program speaking the framed protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Directory notebook paths are resolved against
    pub root_dir: PathBuf,
    pub max_rule_rounds: usize,
    pub rule_timeout_ms: u64,
    /// Write notebooks back after every batch
    pub persist: bool,
    pub cas: Option<CommandConfig>,
    pub typesetter: Option<CommandConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let engine = RuleEngineConfig::default();
        Self {
            root_dir: PathBuf::from("."),
            max_rule_rounds: engine.max_rounds,
            rule_timeout_ms: engine.rule_timeout.as_millis() as u64,
            persist: true,
            cas: None,
            typesetter: None,
        }
    }
}

impl ServerConfig {
    /// Read `notebook.config.json` from `dir`, falling back to defaults.
    ///
    /// A relative `rootDir` is taken relative to `dir`.
    pub fn load(dir: &Path) -> Result<Self, WorkspaceError> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            tracing::debug!(dir = %dir.display(), "no config file, using defaults");
            return Ok(Self {
                root_dir: dir.to_path_buf(),
                ..Self::default()
            });
        }

        let text = std::fs::read_to_string(&path)?;
        let mut config: Self =
            serde_json::from_str(&text).map_err(|error| WorkspaceError::Config {
                path: path.display().to_string(),
                message: error.to_string(),
            })?;
        if config.root_dir.is_relative() {
            config.root_dir = dir.join(&config.root_dir);
        }
        Ok(config)
    }

    pub fn engine_config(&self) -> RuleEngineConfig {
        RuleEngineConfig {
            max_rounds: self.max_rule_rounds,
            rule_timeout: Duration::from_millis(self.rule_timeout_ms),
        }
    }

    /// Resolve a client-supplied notebook path inside the root directory
    pub fn resolve(&self, path: &str) -> Result<PathBuf, WorkspaceError> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            return Err(WorkspaceError::InvalidPath(path.to_string()));
        }
        Ok(self.root_dir.join(relative))
    }
}
