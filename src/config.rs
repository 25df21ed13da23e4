//! TOML configuration.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) yields a usable [`Config`]. The loaded value is treated as immutable
//! for the lifetime of the process.

use anyhow::{Context, Result};
use globset::Glob;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub temp: TempConfig,
    #[serde(default)]
    pub clone: CloneConfig,
    #[serde(default)]
    pub filters: FilterConfig,
}

/// Hard budgets enforced by the tree walker.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LimitsConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_max_directory_depth")]
    pub max_directory_depth: usize,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default = "default_max_total_size_bytes")]
    pub max_total_size_bytes: u64,
    #[serde(default = "default_max_display_size")]
    pub max_display_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            max_directory_depth: default_max_directory_depth(),
            max_files: default_max_files(),
            max_total_size_bytes: default_max_total_size_bytes(),
            max_display_size: default_max_display_size(),
        }
    }
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}
fn default_max_directory_depth() -> usize {
    20
}
fn default_max_files() -> usize {
    10_000
}
fn default_max_total_size_bytes() -> u64 {
    500 * 1024 * 1024
}
fn default_max_display_size() -> usize {
    300_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct TempConfig {
    #[serde(default = "default_temp_root")]
    pub root: PathBuf,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for TempConfig {
    fn default() -> Self {
        Self {
            root: default_temp_root(),
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl TempConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_temp_root() -> PathBuf {
    std::env::temp_dir().join("repo-digest")
}
fn default_ttl_secs() -> u64 {
    60 * 60
}
fn default_sweep_interval_secs() -> u64 {
    10 * 60
}

/// Settings for the git subprocesses run by the materializer.
#[derive(Debug, Deserialize, Clone)]
pub struct CloneConfig {
    /// Git executable; a bare name is resolved through `PATH`.
    #[serde(default = "default_git")]
    pub git: PathBuf,
    #[serde(default = "default_clone_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            git: default_git(),
            timeout_secs: default_clone_timeout_secs(),
        }
    }
}

impl CloneConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_git() -> PathBuf {
    PathBuf::from("git")
}
fn default_clone_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct FilterConfig {
    /// When non-empty, only files matching one of these globs are ingested.
    #[serde(default)]
    pub include_patterns: Vec<String>,
    /// Appended to the built-in excludes (`.git`, `node_modules`, ...).
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::default())
    }
}

fn validate(config: &Config) -> Result<()> {
    let limits = &config.limits;
    if limits.max_file_size == 0 {
        anyhow::bail!("limits.max_file_size must be > 0");
    }
    if limits.max_files == 0 {
        anyhow::bail!("limits.max_files must be > 0");
    }
    if limits.max_total_size_bytes == 0 {
        anyhow::bail!("limits.max_total_size_bytes must be > 0");
    }
    if limits.max_display_size == 0 {
        anyhow::bail!("limits.max_display_size must be > 0");
    }

    if config.temp.ttl_secs == 0 {
        anyhow::bail!("temp.ttl_secs must be > 0");
    }
    if config.temp.sweep_interval_secs == 0 {
        anyhow::bail!("temp.sweep_interval_secs must be > 0");
    }
    if config.clone.timeout_secs == 0 {
        anyhow::bail!("clone.timeout_secs must be > 0");
    }

    for pattern in config
        .filters
        .include_patterns
        .iter()
        .chain(&config.filters.exclude_patterns)
    {
        Glob::new(pattern).with_context(|| format!("Invalid glob pattern: '{}'", pattern))?;
    }

    Ok(())
}
