use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::naming::{NamingTemplate, DEFAULT_IMAGE_EXTENSIONS};
use crate::sort::{BackupMode, SortOptions};

/// File-backed settings for a sort run. Every field is optional in the JSON
/// document; command-line flags are applied on top.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SortConfig {
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_backup")]
    pub backup: bool,
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
    #[serde(default = "default_naming_template")]
    pub naming_template: String,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub progress: bool,
}

fn default_backup() -> bool {
    true
}

fn default_naming_template() -> String {
    NamingTemplate::INDEX.to_string()
}

fn default_extensions() -> Vec<String> {
    DEFAULT_IMAGE_EXTENSIONS
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            recursive: false,
            overwrite: false,
            dry_run: false,
            backup: default_backup(),
            backup_dir: None,
            naming_template: default_naming_template(),
            extensions: default_extensions(),
            excludes: Vec::new(),
            seed: None,
            progress: false,
        }
    }
}

impl SortConfig {
    pub fn backup_mode(&self) -> BackupMode {
        match (&self.backup_dir, self.backup) {
            (_, false) => BackupMode::Disabled,
            (Some(dir), true) => BackupMode::Root(dir.clone()),
            (None, true) => BackupMode::Local,
        }
    }

    pub fn into_options(self, root: PathBuf) -> Result<SortOptions> {
        NamingTemplate::parse(&self.naming_template)
            .with_context(|| format!("invalid naming template in config: {}", self.naming_template))?;
        Ok(SortOptions {
            root,
            recursive: self.recursive,
            overwrite: self.overwrite,
            dry_run: self.dry_run,
            backup: self.backup_mode(),
            naming_template: self.naming_template,
            extensions: self.extensions,
            excludes: self.excludes,
            seed: self.seed,
            progress: self.progress,
        })
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<SortConfig> {
    let path = path.as_ref();
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: SortConfig = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(config)
}
