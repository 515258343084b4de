//! Settings management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tessel_core::MemoryConfig;

/// Runtime settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub memory: MemoryConfig,
    pub demo: DemoSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoSettings {
    pub frames: u32,
    pub objects: u32,
    pub meshes: u32,
    /// Objects released and recreated every frame to exercise recycling
    pub churn_per_frame: u32,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            frames: 240,
            objects: 4096,
            meshes: 32,
            churn_per_frame: 16,
        }
    }
}

impl Settings {
    /// Read settings from `path`, or use the defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        let settings: Self = serde_json::from_str(&text)
            .with_context(|| format!("parsing settings from {}", path.display()))?;
        settings.memory.validate()?;
        Ok(settings)
    }
}
