//! Gate configuration loaded from `.changegate/config.toml`.
//!
//! A missing file is not an error: every section has defaults.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::GateError;
use crate::core::pipeline::Mode;
use crate::core::store::Store;

pub const DEFAULT_MAX_CHECKPOINTS: usize = 20;
pub const DEFAULT_WARNING_THRESHOLD: f64 = 0.5;
pub const DEFAULT_ERROR_THRESHOLD: f64 = 1.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineSettings {
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Validator ids for `mode = "custom"`.
    #[serde(default)]
    pub custom: Vec<String>,
}

fn default_mode() -> String {
    "strict".to_string()
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            custom: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SizeSettings {
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: f64,
    #[serde(default = "default_error_threshold")]
    pub error_threshold: f64,
}

fn default_warning_threshold() -> f64 {
    DEFAULT_WARNING_THRESHOLD
}

fn default_error_threshold() -> f64 {
    DEFAULT_ERROR_THRESHOLD
}

impl Default for SizeSettings {
    fn default() -> Self {
        Self {
            warning_threshold: DEFAULT_WARNING_THRESHOLD,
            error_threshold: DEFAULT_ERROR_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointSettings {
    #[serde(default = "default_max_checkpoints")]
    pub max_checkpoints: usize,
    #[serde(default = "default_prefer_stash")]
    pub prefer_stash: bool,
    /// Overrides `.changegate/backups`. Relative paths resolve against the
    /// project root.
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
}

fn default_max_checkpoints() -> usize {
    DEFAULT_MAX_CHECKPOINTS
}

fn default_prefer_stash() -> bool {
    true
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            max_checkpoints: DEFAULT_MAX_CHECKPOINTS,
            prefer_stash: true,
            backup_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GateConfig {
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub size: SizeSettings,
    #[serde(default)]
    pub checkpoint: CheckpointSettings,
    /// Free-form keys merged into every validator context.
    #[serde(default)]
    pub validators: toml::Table,
}

impl GateConfig {
    pub fn parse(content: &str) -> Result<Self, GateError> {
        let config: GateConfig = toml::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), GateError> {
        if self.size.warning_threshold < 0.0 || self.size.error_threshold < 0.0 {
            return Err(GateError::ConfigError(
                "size thresholds must be non-negative".to_string(),
            ));
        }
        if self.size.error_threshold < self.size.warning_threshold {
            return Err(GateError::ConfigError(format!(
                "size.error_threshold ({}) is below size.warning_threshold ({})",
                self.size.error_threshold, self.size.warning_threshold
            )));
        }
        self.mode()?;
        Ok(())
    }

    pub fn mode(&self) -> Result<Mode, GateError> {
        if self.pipeline.mode == "custom" {
            return Ok(Mode::Custom(self.pipeline.custom.clone()));
        }
        self.pipeline.mode.parse()
    }

    /// Validator config map: the `[validators]` table plus size thresholds.
    pub fn validator_config(&self) -> Map<String, Value> {
        let mut map = match serde_json::to_value(&self.validators) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        map.entry("warning_threshold")
            .or_insert_with(|| Value::from(self.size.warning_threshold));
        map.entry("error_threshold")
            .or_insert_with(|| Value::from(self.size.error_threshold));
        map
    }

    pub fn backup_dir(&self, store: &Store) -> PathBuf {
        match &self.checkpoint.backup_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => store.project_root.join(dir),
            None => store.backup_dir(),
        }
    }
}

/// Load `<project>/.changegate/config.toml`, falling back to defaults.
pub fn load_config(project_root: &Path) -> Result<GateConfig, GateError> {
    let path = Store::for_project(project_root).config_path();
    if !path.exists() {
        return Ok(GateConfig::default());
    }
    let content = fs::read_to_string(&path).map_err(GateError::IoError)?;
    GateConfig::parse(&content)
}
