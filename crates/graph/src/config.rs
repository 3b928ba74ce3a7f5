//! Graph and context configuration.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Host,
    Gpu,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Host => "host",
            DeviceKind::Gpu => "gpu",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "host" | "cpu" => Ok(DeviceKind::Host),
            "gpu" | "wgpu" => Ok(DeviceKind::Gpu),
            other => bail!("unknown device `{other}` (expected host or gpu)"),
        }
    }
}

/// Resource ceilings a context enforces for one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextLimits {
    pub max_commands: usize,
    pub max_memory_bytes: u64,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            max_commands: 4096,
            max_memory_bytes: 1 << 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub label: String,
    pub device: DeviceKind,
    /// Substring the GPU adapter name must contain.
    pub adapter: Option<String>,
    pub limits: ContextLimits,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            label: "graph".to_string(),
            device: DeviceKind::default(),
            adapter: None,
            limits: ContextLimits::default(),
        }
    }
}

impl GraphConfig {
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_device(mut self, device: DeviceKind) -> Self {
        self.device = device;
        self
    }

    pub fn with_limits(mut self, limits: ContextLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config = serde_json::from_str(text).context("invalid graph config")?;
        Ok(config)
    }

    /// Reads a JSON config; a missing file yields the defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("while loading {}", path.display()))
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let blob = serde_json::to_vec_pretty(self)?;
        fs::write(path, blob)?;
        Ok(())
    }
}
