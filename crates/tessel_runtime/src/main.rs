//! Tessel Runtime
//!
//! Headless binary that boots the GPU memory subsystem and drives it
//! through a synthetic frame loop.

mod demo;
mod settings;

use anyhow::Result;
use settings::Settings;
use std::path::PathBuf;
use tessel_render::{GpuContext, GpuMemory, RenderError};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Tessel v{}", tessel_core::VERSION);

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("tessel.json"));
    let settings = Settings::load(&path)?;

    let gpu = match GpuContext::headless() {
        Ok(gpu) => gpu,
        Err(err @ (RenderError::NoAdapter | RenderError::ComputeUnsupported(_))) => {
            tracing::warn!(%err, "no usable GPU, nothing to run");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    let mut memory = GpuMemory::init(&gpu, &settings.memory)?;
    demo::run(&gpu, &mut memory, &settings.demo)?;
    memory.shutdown();

    tracing::info!("Runtime shut down cleanly");
    Ok(())
}
