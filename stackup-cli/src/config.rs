//! User configuration, stored with `confy`.
//!
//! Lives in the platform config directory (`~/.config/stackup/default-config.toml`
//! on Linux) unless `STACKUP_CONFIG` names an explicit file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const APP_NAME: &str = "stackup";
pub const CONFIG_ENV: &str = "STACKUP_CONFIG";

/// Which cluster backend a real run talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    /// `kube` when a kubeconfig can be inferred, else `kubectl`.
    #[default]
    Auto,
    Kube,
    Kubectl,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackupConfig {
    /// Plan used when none is given on the command line.
    pub plan: PathBuf,
    pub backend: BackendChoice,
    /// Kubeconfig context; the current context when unset.
    pub context: Option<String>,
    pub report_dir: Option<String>,
    pub request_timeout_secs: u64,
    pub http_timeout_secs: u64,
}

impl Default for StackupConfig {
    fn default() -> Self {
        Self {
            plan: PathBuf::from("stackup.toml"),
            backend: BackendChoice::Auto,
            context: None,
            report_dir: None,
            request_timeout_secs: 30,
            http_timeout_secs: 5,
        }
    }
}

impl StackupConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }

    /// Where run reports are written, with `~` expanded.
    pub fn report_dir(&self) -> PathBuf {
        match &self.report_dir {
            Some(dir) => PathBuf::from(shellexpand::tilde(dir).as_ref()),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".stackup")
                .join("reports"),
        }
    }
}

/// Load the user config, creating the default file on first use.
pub fn load_config() -> Result<StackupConfig> {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) => load_config_from(Path::new(&path)),
        None => confy::load(APP_NAME, None).context("Failed to load stackup config"),
    }
}

pub fn load_config_from(path: &Path) -> Result<StackupConfig> {
    confy::load_path(path)
        .with_context(|| format!("Failed to load stackup config from {}", path.display()))
}
