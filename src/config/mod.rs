//! Application configuration

mod loader;

pub use loader::load_config;
#[cfg(test)]
use loader::DEFAULT_CONFIG;

use serde::Deserialize;
use shellherd_core::AutoSetupConfig;
use shellherd_tools::{ContainerConfig, PtyConfig};

/// Top-level configuration, one section per subsystem.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub pty: PtyConfig,
    #[serde(default)]
    pub containers: ContainerConfig,
    #[serde(default)]
    pub autosetup: AutoSetupConfig,
}
