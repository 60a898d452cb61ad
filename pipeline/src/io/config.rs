//! Pipeline configuration (`pipeline.toml`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::DEFAULT_BACKEND;

/// Default config file looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "pipeline.toml";

/// Pipeline configuration (TOML).
///
/// Hand-edited; every table is optional and missing fields fall back to the
/// defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Base directory holding numbered workspaces.
    pub workspaces_dir: PathBuf,

    /// Backend key used by steps that do not name one.
    pub default_backend: String,

    pub claude: ClaudeConfig,

    pub mock: MockConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClaudeConfig {
    /// Executable name or path of the agent CLI.
    pub program: String,

    /// Tools passed via `--allowedTools`.
    pub allowed_tools: Vec<String>,

    /// Extra arguments appended after the generated ones.
    pub extra_args: Vec<String>,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            allowed_tools: ["Read", "Write", "Edit", "Glob", "Grep", "Bash"]
                .iter()
                .map(|t| (*t).to_string())
                .collect(),
            extra_args: Vec::new(),
            output_limit_bytes: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MockConfig {
    /// Delay applied when a prompt carries the `MOCK_SLOW` directive.
    pub slow_delay_ms: u64,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            slow_delay_ms: 2_000,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workspaces_dir: PathBuf::from("workspaces"),
            default_backend: DEFAULT_BACKEND.to_string(),
            claude: ClaudeConfig::default(),
            mock: MockConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workspaces_dir.as_os_str().is_empty() {
            return Err(anyhow!("workspaces_dir must not be empty"));
        }
        if self.default_backend.trim().is_empty() {
            return Err(anyhow!("default_backend must not be empty"));
        }
        if self.claude.program.trim().is_empty() {
            return Err(anyhow!("claude.program must not be empty"));
        }
        if self.claude.output_limit_bytes == 0 {
            return Err(anyhow!("claude.output_limit_bytes must be > 0"));
        }
        if self.claude.allowed_tools.iter().any(|t| t.trim().is_empty()) {
            return Err(anyhow!("claude.allowed_tools must not contain empty names"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PipelineConfig::default()`.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        let cfg = PipelineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PipelineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PipelineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
